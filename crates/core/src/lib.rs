//! Transport-independent pieces of the assistant relay: per-session location,
//! turn accumulation, the tool executor and its providers, Google Cloud
//! credentials and speech synthesis.

pub mod accumulator;
pub mod credentials;
pub mod location;
pub mod speech;
pub mod tools;

pub use accumulator::StreamAccumulator;
pub use credentials::{CredentialError, CredentialProvider, ServiceAccountCredentials};
pub use location::{Coordinates, Degrees, LocationError, LocationState};
pub use speech::{GoogleTextToSpeech, SpeechSynthesizer};
pub use tools::{ToolError, ToolExecutor, ToolResult};
