//! Buddy API Library Crate
//!
//! This library contains all the logic for the relay service: configuration,
//! application state, HTTP handlers, the WebSocket relay, and routing. The
//! binaries in `bin/` are thin wrappers around it.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
