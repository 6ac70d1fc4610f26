//! Line-delimited JSON request routing over stream sockets.
//!
//! Clients send one JSON request object per line; the server matches each
//! request's method and URL against a route table and runs the handler,
//! which writes zero or more JSON responses back on the same connection.

pub mod client;
pub mod error;
pub mod framing;
pub mod message;
pub mod path;
pub mod server;

pub use error::{AuthError, BoxError, ConfigError, FrameError, RouteError, SendError, ServerError};
pub use message::{Request, Response};
