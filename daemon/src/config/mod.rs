use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub log: String,
    /// How often tasks waiting on peer connectivity are re-examined.
    pub connect_check_interval: Duration,
    /// Lifetime of a web access token.
    pub web_token_expire: Duration,
    /// How often expired web access tokens are swept.
    pub web_token_cleanup_interval: Duration,
}

impl DaemonConfig {
    pub fn new(data_dir: Option<PathBuf>, log: String) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        Self {
            data_dir,
            log,
            connect_check_interval: Duration::from_secs(5),
            web_token_expire: Duration::from_secs(3600),
            web_token_cleanup_interval: Duration::from_secs(300),
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/eddyd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("eddyd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/eddyd or ~/.local/share/eddyd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("eddyd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("eddyd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\eddyd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("eddyd");
        }
    }
    // Fallback
    PathBuf::from(".eddyd")
}
