//! Configuration parsing and validation.
//!
//! Seed Pipeline is configured via a TOML file (default `./config/seed.toml`).
//! Only `[db]` is required; `[ingest]`, `[server]`, and `[log]` fall back to
//! defaults.
//!
//! ```toml
//! [db]
//! path = "./data/seeds.sqlite"
//!
//! [ingest]
//! workers = 1
//! collapse_repeats = false
//! source_system = "subnet"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [log]
//! filter = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use seed_pipeline_core::normalize::Normalizer;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Opt-in lossy collapse of 3+ repeated characters during normalization.
    #[serde(default)]
    pub collapse_repeats: bool,
    /// Default source-system label for newly created batches.
    #[serde(default)]
    pub source_system: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            collapse_repeats: false,
            source_system: None,
        }
    }
}

fn default_workers() -> usize {
    1
}

impl IngestConfig {
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.collapse_repeats)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Config {
    /// Config with defaults everywhere except the database path.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let cfg = parse("[db]\npath = \"./data/seeds.sqlite\"\n").unwrap();
        assert_eq!(cfg.ingest.workers, 1);
        assert!(!cfg.ingest.collapse_repeats);
        assert!(cfg.ingest.source_system.is_none());
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert!(cfg.log.filter.is_none());
    }

    #[test]
    fn test_full_file() {
        let cfg = parse(
            r#"
[db]
path = "/tmp/x.sqlite"

[ingest]
workers = 4
collapse_repeats = true
source_system = "subnet-7"

[server]
bind = "0.0.0.0:9000"

[log]
filter = "seed_pipeline=debug"
"#,
        )
        .unwrap();
        assert_eq!(cfg.ingest.workers, 4);
        assert!(cfg.ingest.normalizer().collapse_repeats);
        assert_eq!(cfg.ingest.source_system.as_deref(), Some("subnet-7"));
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.log.filter.as_deref(), Some("seed_pipeline=debug"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = parse("[db]\npath = \"x\"\n[ingest]\nworkers = 0\n").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_missing_db_section_rejected() {
        assert!(parse("[server]\nbind = \"127.0.0.1:1\"\n").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
