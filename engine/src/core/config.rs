use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::data::Backend;
use crate::utils::file::{expand_path, profile_path};

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, OPTIMIZER_DEFAULT_CHUNK_SIZE,
    OPTIMIZER_HIGH_SELECTIVITY_THRESHOLD, OPTIMIZER_MAX_IN_CLAUSE_SIZE,
    OPTIMIZER_MEDIUM_SELECTIVITY_THRESHOLD, OPTIMIZER_MIN_CANDIDATES_FOR_STEP,
    OPTIMIZER_SMALL_DATASET_THRESHOLD, POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS, POSTGRES_DEFAULT_MAX_CONNECTIONS,
    POSTGRES_DEFAULT_MIN_CONNECTIONS, POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS, SQLITE_DEFAULT_PATH,
    SQLITE_DEFAULT_SPATIALITE_EXTENSION,
};

// =============================================================================
// File Config Structures (all Optional for merging)
// =============================================================================

/// PostgreSQL/PostGIS connection settings
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PostgresFileConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub statement_timeout_secs: Option<u64>,
}

/// SQLite/SpatiaLite settings
///
/// An empty `spatialite_extension` disables loading the extension.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SqliteFileConfig {
    pub path: Option<String>,
    pub spatialite_extension: Option<String>,
    pub read_only: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DatabaseFileConfig {
    pub backend: Option<Backend>,
    pub postgres: Option<PostgresFileConfig>,
    pub sqlite: Option<SqliteFileConfig>,
}

/// Query optimizer tuning
#[derive(Debug, Default, Clone, Deserialize)]
pub struct OptimizerFileConfig {
    pub small_dataset_threshold: Option<u64>,
    pub high_selectivity_threshold: Option<f64>,
    pub medium_selectivity_threshold: Option<f64>,
    pub min_candidates_for_step: Option<u64>,
    pub chunk_size: Option<usize>,
    pub max_in_clause_size: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    pub database: Option<DatabaseFileConfig>,
    pub optimizer: Option<OptimizerFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    fn merge(&mut self, other: FileConfig) {
        // Database
        if let Some(database) = other.database {
            let current = self
                .database
                .get_or_insert_with(DatabaseFileConfig::default);
            if database.backend.is_some() {
                tracing::trace!(backend = ?database.backend, "Merging database.backend");
                current.backend = database.backend;
            }
            if let Some(pg) = database.postgres {
                let current_pg = current
                    .postgres
                    .get_or_insert_with(PostgresFileConfig::default);
                if pg.url.is_some() {
                    tracing::trace!("Merging database.postgres.url");
                    current_pg.url = pg.url;
                }
                if pg.max_connections.is_some() {
                    current_pg.max_connections = pg.max_connections;
                }
                if pg.min_connections.is_some() {
                    current_pg.min_connections = pg.min_connections;
                }
                if pg.acquire_timeout_secs.is_some() {
                    current_pg.acquire_timeout_secs = pg.acquire_timeout_secs;
                }
                if pg.idle_timeout_secs.is_some() {
                    current_pg.idle_timeout_secs = pg.idle_timeout_secs;
                }
                if pg.statement_timeout_secs.is_some() {
                    current_pg.statement_timeout_secs = pg.statement_timeout_secs;
                }
            }
            if let Some(sqlite) = database.sqlite {
                let current_sqlite = current.sqlite.get_or_insert_with(SqliteFileConfig::default);
                if sqlite.path.is_some() {
                    tracing::trace!(path = ?sqlite.path, "Merging database.sqlite.path");
                    current_sqlite.path = sqlite.path;
                }
                if sqlite.spatialite_extension.is_some() {
                    current_sqlite.spatialite_extension = sqlite.spatialite_extension;
                }
                if sqlite.read_only.is_some() {
                    current_sqlite.read_only = sqlite.read_only;
                }
            }
        }

        // Optimizer
        if let Some(optimizer) = other.optimizer {
            let current = self
                .optimizer
                .get_or_insert_with(OptimizerFileConfig::default);
            if optimizer.small_dataset_threshold.is_some() {
                tracing::trace!(
                    value = ?optimizer.small_dataset_threshold,
                    "Merging optimizer.small_dataset_threshold"
                );
                current.small_dataset_threshold = optimizer.small_dataset_threshold;
            }
            if optimizer.high_selectivity_threshold.is_some() {
                current.high_selectivity_threshold = optimizer.high_selectivity_threshold;
            }
            if optimizer.medium_selectivity_threshold.is_some() {
                current.medium_selectivity_threshold = optimizer.medium_selectivity_threshold;
            }
            if optimizer.min_candidates_for_step.is_some() {
                current.min_candidates_for_step = optimizer.min_candidates_for_step;
            }
            if optimizer.chunk_size.is_some() {
                current.chunk_size = optimizer.chunk_size;
            }
            if optimizer.max_in_clause_size.is_some() {
                current.max_in_clause_size = optimizer.max_in_clause_size;
            }
        }

        if other.debug.is_some() {
            tracing::trace!(debug = ?other.debug, "Merging debug");
            self.debug = other.debug;
        }
    }
}

// =============================================================================
// Runtime Config Structures
// =============================================================================

/// PostgreSQL connection configuration
///
/// Zero numeric values fall back to the built-in defaults when connecting.
#[derive(Debug, Clone, Default)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub statement_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
    pub spatialite_extension: Option<String>,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: Backend,
    pub postgres: PostgresConfig,
    pub sqlite: SqliteConfig,
}

/// Thresholds the plan builder and executor work with
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub small_dataset_threshold: u64,
    pub high_selectivity_threshold: f64,
    pub medium_selectivity_threshold: f64,
    pub min_candidates_for_step: u64,
    pub chunk_size: usize,
    pub max_in_clause_size: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            small_dataset_threshold: OPTIMIZER_SMALL_DATASET_THRESHOLD,
            high_selectivity_threshold: OPTIMIZER_HIGH_SELECTIVITY_THRESHOLD,
            medium_selectivity_threshold: OPTIMIZER_MEDIUM_SELECTIVITY_THRESHOLD,
            min_candidates_for_step: OPTIMIZER_MIN_CANDIDATES_FOR_STEP,
            chunk_size: OPTIMIZER_DEFAULT_CHUNK_SIZE,
            max_in_clause_size: OPTIMIZER_MAX_IN_CLAUSE_SIZE,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        if !in_unit(self.high_selectivity_threshold) {
            anyhow::bail!(
                "Configuration error: optimizer.high_selectivity_threshold must be in (0, 1]"
            );
        }
        if !in_unit(self.medium_selectivity_threshold) {
            anyhow::bail!(
                "Configuration error: optimizer.medium_selectivity_threshold must be in (0, 1]"
            );
        }
        if self.high_selectivity_threshold > self.medium_selectivity_threshold {
            anyhow::bail!(
                "Configuration error: optimizer.high_selectivity_threshold must not exceed \
                 optimizer.medium_selectivity_threshold"
            );
        }
        if self.chunk_size == 0 {
            anyhow::bail!("Configuration error: optimizer.chunk_size must be greater than 0");
        }
        if self.max_in_clause_size == 0 {
            anyhow::bail!(
                "Configuration error: optimizer.max_in_clause_size must be greater than 0"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub optimizer: OptimizerConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from profile file, local/CLI file, env and CLI flags
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir (~/.geofilter/geofilter.json) - skip if not exists
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        // 3. Extract file config values with defaults
        let file_database = file_config.database.unwrap_or_default();
        let file_pg = file_database.postgres.unwrap_or_default();
        let file_sqlite = file_database.sqlite.unwrap_or_default();
        let file_optimizer = file_config.optimizer.unwrap_or_default();

        // 4. Apply CLI/env overrides
        let backend = cli
            .database_backend
            .or(file_database.backend)
            .unwrap_or(Backend::Sqlite);

        let postgres = PostgresConfig {
            url: cli.postgres_url.clone().or(file_pg.url).unwrap_or_default(),
            max_connections: file_pg
                .max_connections
                .unwrap_or(POSTGRES_DEFAULT_MAX_CONNECTIONS),
            min_connections: file_pg
                .min_connections
                .unwrap_or(POSTGRES_DEFAULT_MIN_CONNECTIONS),
            acquire_timeout_secs: file_pg
                .acquire_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout_secs: file_pg
                .idle_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS),
            statement_timeout_secs: file_pg
                .statement_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS),
        };

        let sqlite_path = cli
            .sqlite_path
            .clone()
            .or(file_sqlite.path.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(SQLITE_DEFAULT_PATH));
        let spatialite_extension = cli
            .spatialite_extension
            .clone()
            .or(file_sqlite.spatialite_extension)
            .unwrap_or_else(|| SQLITE_DEFAULT_SPATIALITE_EXTENSION.to_string());
        let sqlite = SqliteConfig {
            path: expand_path(&sqlite_path.to_string_lossy()),
            spatialite_extension: (!spatialite_extension.trim().is_empty())
                .then_some(spatialite_extension),
            read_only: file_sqlite.read_only.unwrap_or(true),
        };

        let defaults = OptimizerConfig::default();
        let optimizer = OptimizerConfig {
            small_dataset_threshold: file_optimizer
                .small_dataset_threshold
                .unwrap_or(defaults.small_dataset_threshold),
            high_selectivity_threshold: file_optimizer
                .high_selectivity_threshold
                .unwrap_or(defaults.high_selectivity_threshold),
            medium_selectivity_threshold: file_optimizer
                .medium_selectivity_threshold
                .unwrap_or(defaults.medium_selectivity_threshold),
            min_candidates_for_step: file_optimizer
                .min_candidates_for_step
                .unwrap_or(defaults.min_candidates_for_step),
            chunk_size: file_optimizer.chunk_size.unwrap_or(defaults.chunk_size),
            max_in_clause_size: file_optimizer
                .max_in_clause_size
                .unwrap_or(defaults.max_in_clause_size),
        };

        let config = AppConfig {
            database: DatabaseConfig {
                backend,
                postgres,
                sqlite,
            },
            optimizer,
            debug: cli.debug || file_config.debug.unwrap_or(false),
        };

        config.validate()?;

        tracing::debug!(
            backend = %config.database.backend,
            sqlite_path = %config.database.sqlite.path.display(),
            spatialite = ?config.database.sqlite.spatialite_extension,
            small_dataset_threshold = config.optimizer.small_dataset_threshold,
            chunk_size = config.optimizer.chunk_size,
            debug = config.debug,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.backend == Backend::Postgres && self.database.postgres.url.is_empty() {
            anyhow::bail!(
                "Configuration error: database.postgres.url is required when database.backend \
                 is 'postgres'"
            );
        }
        self.optimizer.validate()
    }
}

/// Get the profile config path (~/.geofilter/geofilter.json)
fn get_profile_config_path() -> Option<PathBuf> {
    profile_path(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn load_json(json: &str) -> Result<AppConfig> {
        let mut temp_file = tempfile::NamedTempFile::new().unwrap();
        temp_file.write_all(json.as_bytes()).unwrap();
        let cli = CliConfig {
            config: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        AppConfig::load(&cli)
    }

    #[test]
    fn test_file_config_parse_full() {
        let json = r#"{
            "database": {
                "backend": "postgres",
                "postgres": { "url": "postgres://localhost/gis", "max_connections": 4 },
                "sqlite": { "path": "layers.gpkg", "spatialite_extension": "", "read_only": false }
            },
            "optimizer": { "small_dataset_threshold": 500, "chunk_size": 100 },
            "debug": true
        }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();
        let database = config.database.unwrap();
        assert_eq!(database.backend, Some(Backend::Postgres));
        assert_eq!(database.postgres.unwrap().max_connections, Some(4));
        assert_eq!(database.sqlite.unwrap().read_only, Some(false));
        assert_eq!(config.optimizer.unwrap().chunk_size, Some(100));
        assert_eq!(config.debug, Some(true));
    }

    #[test]
    fn test_file_config_collects_unknown_fields() {
        let config: FileConfig = serde_json::from_str(r#"{ "optimiser": {} }"#).unwrap();
        let extra = config.extra.as_object().unwrap();
        assert!(extra.contains_key("optimiser"));
    }

    #[test]
    fn test_merge_overlays_set_fields_only() {
        let mut base: FileConfig = serde_json::from_str(
            r#"{ "optimizer": { "chunk_size": 10, "max_in_clause_size": 20 } }"#,
        )
        .unwrap();
        let overlay: FileConfig =
            serde_json::from_str(r#"{ "optimizer": { "chunk_size": 50 } }"#).unwrap();
        base.merge(overlay);
        let optimizer = base.optimizer.unwrap();
        assert_eq!(optimizer.chunk_size, Some(50));
        assert_eq!(optimizer.max_in_clause_size, Some(20));
    }

    #[test]
    fn test_optimizer_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.small_dataset_threshold, 10_000);
        assert_eq!(config.high_selectivity_threshold, 0.1);
        assert_eq!(config.medium_selectivity_threshold, 0.3);
        assert_eq!(config.min_candidates_for_step, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_optimizer_validation() {
        let inverted = OptimizerConfig {
            high_selectivity_threshold: 0.5,
            medium_selectivity_threshold: 0.2,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let zero_chunk = OptimizerConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(zero_chunk.validate().is_err());
    }

    #[test]
    fn test_app_config_from_file() {
        let config = load_json(
            r#"{
                "database": { "sqlite": { "path": "/tmp/layers.sqlite", "spatialite_extension": "" } },
                "optimizer": { "small_dataset_threshold": 250 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.database.backend, Backend::Sqlite);
        assert_eq!(
            config.database.sqlite.path,
            PathBuf::from("/tmp/layers.sqlite")
        );
        assert!(config.database.sqlite.spatialite_extension.is_none());
        assert!(config.database.sqlite.read_only);
        assert_eq!(config.optimizer.small_dataset_threshold, 250);
        assert_eq!(config.optimizer.chunk_size, OPTIMIZER_DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_app_config_cli_overrides_file() {
        let mut temp_file = tempfile::NamedTempFile::new().unwrap();
        let contents = br#"{
            "database": { "backend": "sqlite", "postgres": { "url": "postgres://file/db" } }
        }"#;
        temp_file.write_all(contents).unwrap();
        let cli = CliConfig {
            config: Some(temp_file.path().to_path_buf()),
            database_backend: Some(Backend::Postgres),
            postgres_url: Some("postgres://cli/db".to_string()),
            ..Default::default()
        };
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.database.backend, Backend::Postgres);
        assert_eq!(config.database.postgres.url, "postgres://cli/db");
    }

    #[test]
    fn test_app_config_postgres_requires_url() {
        let result = load_json(r#"{ "database": { "backend": "postgres" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("database.postgres.url is required")
        );
    }

    #[test]
    fn test_app_config_missing_file() {
        let cli = CliConfig {
            config: Some(PathBuf::from("/nonexistent/geofilter.json")),
            ..Default::default()
        };
        let err = AppConfig::load(&cli).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_app_config_invalid_json() {
        let err = load_json("{ not json").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
