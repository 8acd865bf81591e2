//! TOML configuration of the `nagpool` binary
//!
//! ```toml
//! listen = "0.0.0.0:7420"
//! board_size = 19
//! patterns = ["patterns/joseki.txt", "patterns/tesuji.txt"]
//!
//! [coordinator]
//! protocol_version = "1"
//! seed = 42
//! ```
//!
//! Relative pattern paths resolve against the config file's directory.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use nagpool::{CoordinatorConfig, PatternSet};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7420";
pub const DEFAULT_BOARD_SIZE: u32 = 19;
/// Every vertex of the board must fit a 16-bit point.
pub const MAX_BOARD_SIZE: u32 = 255;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid listen address {0:?}")]
    Listen(String),

    #[error("board size must be in 1..={MAX_BOARD_SIZE}, got {0}")]
    BoardSize(u32),

    #[error("loading patterns: {0}")]
    Patterns(#[source] std::io::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NagpoolConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_board_size")]
    pub board_size: u32,
    #[serde(default)]
    pub patterns: Vec<PathBuf>,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_board_size() -> u32 {
    DEFAULT_BOARD_SIZE
}

impl Default for NagpoolConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            board_size: default_board_size(),
            patterns: Vec::new(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl NagpoolConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: NagpoolConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            for pattern in &mut config.patterns {
                if pattern.is_relative() {
                    *pattern = base.join(&*pattern);
                }
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if !(1..=MAX_BOARD_SIZE).contains(&self.board_size) {
            return Err(ConfigError::BoardSize(self.board_size));
        }
        Ok(())
    }

    /// Number of board vertices, `None` if it does not fit `usize`.
    pub fn vertices(&self) -> Option<usize> {
        let side = usize::try_from(self.board_size).ok()?;
        side.checked_mul(side)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|_| ConfigError::Listen(self.listen.clone()))
    }

    pub fn load_patterns(&self) -> Result<PatternSet, ConfigError> {
        PatternSet::from_files(&self.patterns).map_err(ConfigError::Patterns)
    }
}
