//! Exclusive pass-through tunnel between one client and a local
//! interactive command interpreter.

pub mod bridge;
pub mod shell;

pub use bridge::{ShellBridge, ShellError};
pub use shell::{interactive_shell, resolve_interpreter};
