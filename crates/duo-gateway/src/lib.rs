//! Live room feeds: snapshot fan-out and the WebSocket gateway.

pub mod connection;
pub mod dispatcher;

pub use dispatcher::{Dispatcher, RoomSubscription, Snapshot};
