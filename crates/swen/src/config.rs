use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Directory step commands are launched from; the process working
    /// directory when unset
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl Config {
    /// Reads the environment (and `.env`). Does not validate: apply any
    /// overrides first, then call [`Config::validate`] once.
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Config {
            log: LogConfig {
                level: std::env::var("SWEN_LOG_LEVEL")
                    .unwrap_or_else(|_| "info".to_string())
                    .to_lowercase(),
            },
            execution: ExecutionConfig {
                working_dir: std::env::var("SWEN_WORKDIR")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from),
            },
        };

        Ok(config)
    }

    /// Replaces the working directory when `dir` is given.
    pub fn override_working_dir(&mut self, dir: Option<PathBuf>) {
        if let Some(dir) = dir {
            self.execution.working_dir = Some(dir);
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if let Some(dir) = &self.execution.working_dir {
            if !dir.is_dir() {
                return Err(crate::Error::Config(format!(
                    "working directory '{}' does not exist or is not a directory",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}
