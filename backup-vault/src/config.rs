use backup_engine::{Config, Identity};
use std::path::PathBuf;
use std::time::Duration;

/// Vault settings resolved from `.env` and the environment.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Engine TOML configuration file, if any
    pub config_file: Option<PathBuf>,
    pub db_path: PathBuf,
    /// Overrides `storage.root` from the engine configuration
    pub storage_root: Option<PathBuf>,
    pub identity: Identity,
    pub clamscan: PathBuf,
    pub scan_timeout: Duration,
    pub log_level: Option<String>,
}

impl VaultConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            config_file: std::env::var("VAULT_CONFIG").ok().map(PathBuf::from),
            db_path: PathBuf::from(
                std::env::var("VAULT_DB_PATH").unwrap_or_else(|_| "./data/vault.db".into()),
            ),
            storage_root: std::env::var("VAULT_STORAGE_ROOT").ok().map(PathBuf::from),
            identity: Identity::new(std::env::var("VAULT_IDENTITY").unwrap_or_else(|_| default_identity())),
            clamscan: PathBuf::from(
                std::env::var("VAULT_CLAMSCAN").unwrap_or_else(|_| "clamscan".into()),
            ),
            scan_timeout: Duration::from_secs(
                std::env::var("VAULT_SCAN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            log_level: std::env::var("LOG_LEVEL").ok(),
        }
    }

    /// Engine configuration: file (when configured) then environment overrides.
    pub fn engine_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config_file {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(root) = &self.storage_root {
            config.storage.root = root.clone();
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        Ok(config)
    }

    /// Directory holding the database and its daily snapshots
    pub fn data_dir(&self) -> PathBuf {
        self.db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn default_identity() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "local".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> VaultConfig {
        VaultConfig {
            config_file: None,
            db_path: PathBuf::from("vault.db"),
            storage_root: None,
            identity: Identity::new("tester"),
            clamscan: PathBuf::from("clamscan"),
            scan_timeout: Duration::from_secs(5),
            log_level: None,
        }
    }

    #[test]
    fn test_environment_overrides_file() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let file = dir.path().join("engine.toml");
        std::fs::write(&file, "[storage]\nroot = \"/from/file\"\n\n[log]\nlevel = \"debug\"\n")?;

        let mut vault = base();
        vault.config_file = Some(file);
        assert_eq!(vault.engine_config()?.storage.root, PathBuf::from("/from/file"));
        assert_eq!(vault.engine_config()?.log.level, "debug");

        vault.storage_root = Some(PathBuf::from("/from/env"));
        vault.log_level = Some("warn".to_string());
        let config = vault.engine_config()?;
        assert_eq!(config.storage.root, PathBuf::from("/from/env"));
        assert_eq!(config.log.level, "warn");
        Ok(())
    }

    #[test]
    fn test_data_dir() {
        let mut vault = base();
        assert_eq!(vault.data_dir(), PathBuf::from("."));
        vault.db_path = PathBuf::from("/var/lib/vault/vault.db");
        assert_eq!(vault.data_dir(), PathBuf::from("/var/lib/vault"));
    }
}
