//! The embedded service control plane: command dispatch, built-in commands,
//! and lifecycle coordination.
//!
//! A hosting service constructs a [`ServiceController`] with its transport,
//! security, and settings collaborators, defines its processes, and calls
//! [`ServiceController::start`]. Everything else - handshakes, dispatch,
//! status delivery, scheduling, the shell bridge - runs behind the
//! transport callbacks.

mod commands;
pub mod config;
pub mod controller;

pub use config::ControlConfig;
pub use controller::{CommandFn, CommandHandler, RequestContext, ServiceController};
