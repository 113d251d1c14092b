use std::path::PathBuf;

/// Which notification backend delivers SMS/email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyBackend {
    /// Writes messages to the log and reports them as sent.
    Console,
    /// Refuses every message; useful when no gateway is configured.
    Disabled,
}

impl NotifyBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Some(Self::Console),
            "disabled" | "off" | "none" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Daemon settings read from the environment (and `.env`, when present).
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened at start-up; otherwise the front end sends `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub notify_backend: NotifyBackend,
    pub school_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: "schoold=info".to_string(),
            notify_backend: NotifyBackend::Console,
            school_name: "School".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        Self {
            workspace: non_empty("SCHOOLD_WORKSPACE").map(PathBuf::from),
            log_filter: non_empty("SCHOOLD_LOG").unwrap_or(defaults.log_filter),
            notify_backend: non_empty("SCHOOLD_NOTIFY_BACKEND")
                .and_then(|v| NotifyBackend::parse(&v))
                .unwrap_or(defaults.notify_backend),
            school_name: non_empty("SCHOOLD_SCHOOL_NAME").unwrap_or(defaults.school_name),
        }
    }
}
