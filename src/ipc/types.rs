use std::path::PathBuf;

use crate::config::Config;
use crate::notify::Notifier;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    /// Username the request is made on behalf of.
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
    pub notifier: Box<dyn Notifier>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let notifier = crate::notify::notifier_for(config.notify_backend);
        Self {
            workspace: None,
            db: None,
            config,
            notifier,
        }
    }
}
