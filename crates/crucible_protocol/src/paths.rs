//! Home directory resolution for persistent server state.

use std::path::PathBuf;
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the Crucible home directory.
///
/// Priority:
/// 1) CRUCIBLE_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.crucible
pub fn crucible_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("CRUCIBLE_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".crucible");
    }
    PathBuf::from(".").join(".crucible")
}

fn ensure_home_dir(home: &PathBuf) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create Crucible home directory {}: {}. Set CRUCIBLE_HOME or pass --base-dir.",
                home.display(),
                err
            );
        });
    }
}

/// Default logs directory: ~/.crucible/logs
pub fn default_logs_dir() -> PathBuf {
    let home = crucible_home();
    ensure_home_dir(&home);
    home.join("logs")
}

/// Python shim cache directory: ~/.crucible/shim
pub fn shim_cache_dir() -> PathBuf {
    let home = crucible_home();
    ensure_home_dir(&home);
    home.join("shim")
}

/// Default audit log path: ~/.crucible/mcp_audit.ndjson
pub fn default_audit_log_path() -> PathBuf {
    let home = crucible_home();
    ensure_home_dir(&home);
    home.join("mcp_audit.ndjson")
}

/// Default user store path: ~/.crucible/users.json
pub fn default_users_path() -> PathBuf {
    let home = crucible_home();
    ensure_home_dir(&home);
    home.join("users.json")
}
