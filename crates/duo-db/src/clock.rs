use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};

/// Server-side source of `created_at` values.
///
/// Timestamps are truncated to microseconds (the stored precision) and are
/// strictly increasing, so ordering by them matches write order even when
/// the wall clock stalls or steps backwards.
pub struct ServerClock {
    last: Mutex<DateTime<Utc>>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let wall = Utc::now().trunc_subsecs(6);
        let next = if wall > *last {
            wall
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }

    /// Never hand out anything at or before `ts` (used after reopening a database).
    pub fn observe(&self, ts: DateTime<Utc>) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if ts > *last {
            *last = ts;
        }
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-width RFC 3339 so that text order equals time order in SQLite.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let clock = ServerClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn observe_moves_floor_forward() {
        let clock = ServerClock::new();
        let future = Utc::now().trunc_subsecs(6) + Duration::hours(1);
        clock.observe(future);
        assert!(clock.now() > future);
    }

    #[test]
    fn formatted_timestamps_sort_like_time() {
        let clock = ServerClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(format_timestamp(a) < format_timestamp(b));
        assert_eq!(parse_timestamp(&format_timestamp(a)).unwrap(), a);
    }
}
