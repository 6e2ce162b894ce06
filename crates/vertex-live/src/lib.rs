//! Vertex AI Live (BidiGenerateContent) wire protocol.
//!
//! This crate holds the message shapes exchanged with the bidirectional
//! streaming endpoint and a small helper for dialing it:
//!
//! - `client`: frames we send (setup handshake, user turns, realtime media,
//!   tool responses) and the tool declaration schema types.
//! - `server`: frames we receive, decoded into the [`ServerEvent`] sum type.
//! - `connection`: opens an authenticated WebSocket to the endpoint.

pub mod client;
pub mod connection;
pub mod server;

pub use client::{
    Blob, ClientContent, ClientMessage, Content, FunctionDeclaration, FunctionResponse,
    GenerationConfig, Part, RealtimeInput, ResponseModality, Schema, SchemaType, Setup, Tool,
    ToolResponse,
};
pub use connection::{LiveStream, connect, regional_endpoint};
pub use server::{DecodeError, FunctionCall, ServerEvent};
