//! Server-side types for linewire.
//!
//! A [`Server`] accepts connections and hands each one to a [`Service`],
//! which runs one session per connection: frames are read, matched against
//! the [`RouteTable`] and dispatched to handlers concurrently.

mod auth;
mod config;
mod handler;
mod listener;
mod registry;
mod router;
mod session;
mod tracker;

pub use auth::{AllowAll, Authenticator};
pub use config::{DEFAULT_LISTEN_ADDR, ListenAddr, ServerConfig};
pub use handler::{HandlerFn, HandlerResult, Responder, make_handler};
pub use listener::{Connection, Listener, Server, Service};
pub use registry::{RegistrationGuard, SessionRegistry};
pub use router::{Route, RouteTable};
pub use session::{SessionHandle, SessionId, SessionInfo, SessionState, SessionWriter};
pub use tracker::{TaskGuard, TaskTracker};
