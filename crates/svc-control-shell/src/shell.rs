//! Interactive command interpreter discovery.

use std::path::{Path, PathBuf};

/// Returns the path to an interactive shell for the current platform.
///
/// On Windows this is `cmd.exe`; on Unix the user's configured shell from
/// `$SHELL`, falling back to `/bin/sh`.
#[must_use]
pub fn interactive_shell() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("cmd.exe")
    } else {
        std::env::var("SHELL")
            .map(PathBuf::from)
            .ok()
            .filter(|p| p.is_file())
            .unwrap_or_else(|| PathBuf::from("/bin/sh"))
    }
}

/// Resolve the configured interpreter program, or fall back to the
/// platform's interactive shell.
///
/// Explicit paths are used as-is; bare names are looked up on `PATH`.
#[must_use]
pub fn resolve_interpreter(configured: Option<&str>) -> PathBuf {
    let Some(program) = configured.filter(|p| !p.trim().is_empty()) else {
        return interactive_shell();
    };

    let path = Path::new(program);
    if path.is_absolute() {
        return path.to_path_buf();
    }

    which::which(program).unwrap_or_else(|_| PathBuf::from(program))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shell_exists() {
        let shell = interactive_shell();
        assert!(!shell.as_os_str().is_empty());
    }

    #[test]
    fn absolute_paths_pass_through() {
        let path = if cfg!(windows) { r"C:\tools\repl.exe" } else { "/usr/bin/repl" };
        assert_eq!(resolve_interpreter(Some(path)), PathBuf::from(path));
    }

    #[test]
    fn empty_configuration_falls_back() {
        assert_eq!(resolve_interpreter(Some("  ")), interactive_shell());
        assert_eq!(resolve_interpreter(None), interactive_shell());
    }
}
