//! Core abstractions for the embedded service control plane.
//!
//! This crate provides the fundamental building blocks:
//! - `ClientRequest` - the textual command/argument grammar
//! - `ServiceResponse` - typed outbound response records
//! - `StatusQueue` - flood-limited status broadcast queue
//! - Collaborator traits (transport, security, settings)

pub mod error;
pub mod request;
pub mod response;
pub mod settings;
pub mod status;
pub mod traits;

/// Connection identifier assigned by the transport.
pub type SessionId = uuid::Uuid;

pub use error::ControlError;
pub use request::ClientRequest;
pub use response::{ServiceResponse, UpdateKind};
pub use settings::{MemorySettings, SettingsStore};
pub use status::{FloodGate, StatusConsumer, StatusLog, StatusQueue, StatusSink, StatusUpdate};
pub use traits::{
    ClientHello, ClientPayload, Credentials, Enableable, Principal, SecurityProvider, Transport,
};
