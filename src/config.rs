//! Server configuration, resolved from environment variables with sensible
//! defaults. A `.env` file is honored when present (loaded in `main`).

use std::path::PathBuf;

use anyhow::{Context, Result};

pub const DEFAULT_PORT: u16 = 4100;
pub const DEFAULT_DB_PATH: &str = ".caseboard/caseboard.db";
pub const DEFAULT_STORAGE_DIR: &str = ".caseboard/voice-notes";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub admin_token: Option<String>,
    pub dev_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            admin_token: None,
            dev_mode: false,
        }
    }
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// Recognized variables: `CASEBOARD_PORT`, `CASEBOARD_DB`,
    /// `CASEBOARD_STORAGE_DIR`, `CASEBOARD_ADMIN_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("CASEBOARD_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("Invalid CASEBOARD_PORT: {}", port))?;
        }
        if let Ok(path) = std::env::var("CASEBOARD_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("CASEBOARD_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        config.admin_token = std::env::var("CASEBOARD_ADMIN_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Ok(config)
    }
}
