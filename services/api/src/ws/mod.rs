//! WebSocket Relay
//!
//! Each client connection becomes a session paired with one backend
//! connection:
//!
//! - `transport`: Frame plumbing and the per-connection writer tasks.
//! - `protocol`: The JSON message format spoken with the browser client.
//! - `connector`: Opens and authenticates the backend connection.
//! - `manager`: Session registry and liveness sweep.
//! - `downstream` / `upstream`: The two relay loops.
//! - `session`: Ties the above together for one connection.

pub mod connector;
pub mod downstream;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod upstream;

pub use session::{run_session, ws_handler};
