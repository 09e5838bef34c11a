use std::env;
use std::path::PathBuf;

/// Returns the root directory used by the patcher.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join("awakening-patcher")
}

/// Installation directory used when none is given on the command line.
pub fn default_install_dir() -> PathBuf {
    default_app_dir().join("game")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_dir_lives_under_app_dir() {
        let install = default_install_dir();
        assert!(install.starts_with(default_app_dir()));
        assert!(install.ends_with("game"));
    }
}
