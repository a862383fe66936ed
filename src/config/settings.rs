use crate::error::{Result, WeaveError};
use log::warn;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

pub const DEFAULT_PORT: u16 = 1984;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_DIFFICULTY: u32 = 8;
const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const CONFIG_FILE_KEY: &str = "WEAVELINK_CONFIG";
const NODE_PORT_KEY: &str = "NODE_PORT";
const DATA_DIR_KEY: &str = "DATA_DIR";

/// Node settings, loaded from defaults, an optional TOML file and the environment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub data_dir: PathBuf,
    pub request_timeout_ms: u64,
    /// Upper bound on connection establishment for outbound calls.
    pub connect_timeout_ms: u64,
    pub difficulty: u32,
    pub peers: Vec<String>,
    /// Inbound request bodies larger than this are refused.
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            difficulty: DEFAULT_DIFFICULTY,
            peers: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> Result<Settings> {
        toml::from_str(raw).map_err(|e| WeaveError::Config(format!("Invalid config file: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Settings> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    fn apply_env(&mut self) {
        if let Ok(port) = env::var(NODE_PORT_KEY) {
            match port.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => warn!("Ignoring {NODE_PORT_KEY}={port}: {e}"),
            }
        }
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
    }
}

pub struct Config {
    inner: RwLock<Settings>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut settings = match env::var(CONFIG_FILE_KEY) {
            Ok(path) => Settings::from_file(Path::new(&path)).unwrap_or_else(|e| {
                warn!("Falling back to default settings: {e}");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };
        settings.apply_env();

        Config {
            inner: RwLock::new(settings),
        }
    }

    pub fn with_settings(settings: Settings) -> Config {
        Config {
            inner: RwLock::new(settings),
        }
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> Settings {
        match self.inner.read() {
            Ok(inner) => inner.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Settings)) {
        match self.inner.write() {
            Ok(mut inner) => f(&mut inner),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn get_port(&self) -> u16 {
        self.settings().port
    }

    pub fn set_port(&self, port: u16) {
        self.update(|s| s.port = port);
    }

    pub fn get_data_dir(&self) -> PathBuf {
        self.settings().data_dir
    }

    pub fn set_data_dir(&self, dir: PathBuf) {
        self.update(|s| s.data_dir = dir);
    }

    pub fn get_difficulty(&self) -> u32 {
        self.settings().difficulty
    }

    pub fn set_difficulty(&self, difficulty: u32) {
        self.update(|s| s.difficulty = difficulty);
    }

    pub fn get_peers(&self) -> Vec<String> {
        self.settings().peers
    }

    pub fn add_peer(&self, peer: String) {
        self.update(|s| {
            if !s.peers.contains(&peer) {
                s.peers.push(peer);
            }
        });
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.settings().request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.settings().connect_timeout_ms)
    }

    pub fn max_body_bytes(&self) -> usize {
        self.settings().max_body_bytes
    }

    /// Directory holding the sled database for a node listening on `port`
    pub fn node_db_path(&self) -> PathBuf {
        let settings = self.settings();
        settings.data_dir.join(format!("node_{}", settings.port))
    }
}
