use std::path::PathBuf;

/// OpenCode's data directory: `$OPENCODE_DATA_DIR`, else
/// `$XDG_DATA_HOME/opencode`, else `~/.local/share/opencode`.
pub fn default_opencode_data_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("OPENCODE_DATA_DIR") {
        return Some(PathBuf::from(path));
    }
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME")
        && !data_home.is_empty()
    {
        return Some(PathBuf::from(data_home).join("opencode"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local/share/opencode"))
}

/// Directory of per-message JSON files.
pub fn default_opencode_message_dir() -> Option<PathBuf> {
    default_opencode_data_dir().map(|dir| dir.join("storage").join("message"))
}
