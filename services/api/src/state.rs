//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the session registry
//! and the service clients every session uses.

use crate::config::Config;
use crate::ws::{connector::Upstream, manager::SessionManager};
use buddy_core::{SpeechSynthesizer, ToolExecutor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionManager,
    pub upstream: Arc<dyn Upstream>,
    pub tools: Arc<ToolExecutor>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    /// Cancelled on server shutdown; every session token is a child of it.
    pub shutdown: CancellationToken,
}
