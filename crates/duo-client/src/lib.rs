//! Client core for Duo: REST and feed clients plus the client-local state
//! (stroke capture, text annotations, snapshot-driven room views).

pub mod capture;
pub mod error;
pub mod feed;
pub mod http;
pub mod overlay;
pub mod session;
pub mod view;

pub use capture::{Brush, StrokeCapture};
pub use error::ClientError;
pub use feed::RoomFeed;
pub use http::DuoClient;
pub use overlay::AnnotationOverlay;
pub use session::Session;
pub use view::RoomView;
