//! Client session registry and request history ledger.

pub mod history;
pub mod registry;

pub use history::{RequestHistory, RequestRecord};
pub use registry::{ClientSession, SessionRegistry};
