use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Data, Env, Format, Serialized, Toml},
    value::{Uncased, UncasedStr},
};

/// Largest batch a single bulk delete request accepts.
pub const MAX_DELETE_BATCH_SIZE: usize = 1000;

/// Flat environment variables understood for compatibility with existing
/// deployments, mapped onto their nested configuration keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("DATABASE", "catalog.database"),
    ("SOURCE_TABLE", "catalog.source_table"),
    ("TARGET_TABLE", "catalog.target_table"),
    ("ATHENA_QUERY_RESULTS_LOCATION", "query.output_location"),
    ("ATHENA_WORK_GROUP_NAME", "query.work_group"),
];

/// Catalog coordinates of the two tables being reconciled.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Catalog database holding both tables.
    ///
    /// Env: GZSWEEP__CATALOG__DATABASE or DATABASE
    pub database: String,
    /// Table over the raw compressed row files.
    ///
    /// Env: GZSWEEP__CATALOG__SOURCE_TABLE or SOURCE_TABLE
    pub source_table: String,
    /// Table over the converted columnar files.
    ///
    /// Env: GZSWEEP__CATALOG__TARGET_TABLE or TARGET_TABLE
    pub target_table: String,
}

/// File format of a table registered with the embedded query engine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Parquet,
    Csv,
    Json,
}

/// A table backed by files under an object store prefix.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSourceConfig {
    /// Prefix URL of the table files, e.g. `s3://bucket/raw/`.
    pub location: String,
    pub format: TableFormat,
    /// Hive-style partition columns, read as strings.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    /// Override for the expected file extension (e.g. `.json.gz`).
    #[serde(default)]
    pub file_extension: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueryConfig {
    /// Location query results are written to.
    ///
    /// Env: GZSWEEP__QUERY__OUTPUT_LOCATION or ATHENA_QUERY_RESULTS_LOCATION
    pub output_location: String,
    /// Work group queries are submitted under.
    ///
    /// Env: GZSWEEP__QUERY__WORK_GROUP or ATHENA_WORK_GROUP_NAME
    pub work_group: String,
    /// Delay between two query status checks.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Tables registered with the embedded query engine, keyed by table name.
    #[serde(default)]
    pub tables: HashMap<String, TableSourceConfig>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            output_location: String::new(),
            work_group: String::new(),
            poll_interval: Duration::from_millis(100),
            tables: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupConfig {
    /// Maximum number of objects per delete request.
    ///
    /// Env: GZSWEEP__CLEANUP__BATCH_SIZE
    pub batch_size: usize,
    /// Log deletions without issuing them.
    ///
    /// Env: GZSWEEP__CLEANUP__DRY_RUN
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Configuration {
    pub catalog: CatalogConfig,
    pub query: QueryConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Invalid batch size {0}: must be between 1 and {MAX_DELETE_BATCH_SIZE}")]
    InvalidBatchSize(usize),

    #[error("Invalid poll interval: must be positive")]
    InvalidPollInterval,
}

fn legacy_env_key(key: &UncasedStr) -> Option<Uncased<'_>> {
    LEGACY_ENV
        .iter()
        .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
        .map(|(_, path)| Uncased::from(*path))
}

impl Configuration {
    /// Layered figment: defaults, then the TOML file, then legacy flat env
    /// vars, then `GZSWEEP__` prefixed env vars.
    fn figment(toml: Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(toml)
            .merge(Env::raw().filter_map(legacy_env_key))
            .merge(Env::prefixed("GZSWEEP__").split("__"))
    }

    /// Load from `gzsweep.toml` in the working directory (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment(Toml::file("gzsweep.toml")))
    }

    /// Load from an explicit TOML file and the environment.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::extract(Self::figment(Toml::file(path)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Configuration = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required setting is present and in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("catalog.database", &self.catalog.database),
            ("catalog.source_table", &self.catalog.source_table),
            ("catalog.target_table", &self.catalog.target_table),
            ("query.output_location", &self.query.output_location),
            ("query.work_group", &self.query.work_group),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }

        if self.cleanup.batch_size == 0 || self.cleanup.batch_size > MAX_DELETE_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize(self.cleanup.batch_size));
        }

        if self.query.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn complete_config() -> Configuration {
        Configuration {
            catalog: CatalogConfig {
                database: "logs".to_string(),
                source_table: "raw_requests".to_string(),
                target_table: "requests".to_string(),
            },
            query: QueryConfig {
                output_location: "s3://results/athena".to_string(),
                work_group: "primary".to_string(),
                ..Default::default()
            },
            cleanup: CleanupConfig::default(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.cleanup.batch_size, 500);
        assert!(!config.cleanup.dry_run);
        assert_eq!(config.query.poll_interval, Duration::from_millis(100));
        assert!(config.query.tables.is_empty());
    }

    #[test]
    fn test_defaults_are_incomplete() {
        let err = Configuration::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("catalog.database")));
    }

    #[test]
    fn test_complete_config_is_valid() {
        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut config = complete_config();
        config.cleanup.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBatchSize(0))
        ));

        config.cleanup.batch_size = MAX_DELETE_BATCH_SIZE + 1;
        assert!(config.validate().is_err());

        config.cleanup.batch_size = MAX_DELETE_BATCH_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_is_invalid() {
        let mut config = complete_config();
        config.query.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval)
        ));
    }

    #[test]
    fn test_load_from_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "gzsweep.toml",
                r#"
                [catalog]
                database = "logs"
                source_table = "raw_requests"
                target_table = "requests"

                [query]
                output_location = "s3://results/athena"
                work_group = "primary"
                poll_interval = "250ms"

                [query.tables.raw_requests]
                location = "s3://raw/requests/"
                format = "json"
                partition_columns = ["year", "month", "day"]
                file_extension = ".json.gz"

                [cleanup]
                dry_run = true
                "#,
            )?;

            let config = Configuration::load().expect("config should load");
            assert_eq!(config.catalog.database, "logs");
            assert_eq!(config.query.poll_interval, Duration::from_millis(250));
            assert!(config.cleanup.dry_run);
            assert_eq!(config.cleanup.batch_size, 500);

            let table = config.query.tables.get("raw_requests").unwrap();
            assert_eq!(table.format, TableFormat::Json);
            assert_eq!(table.partition_columns, vec!["year", "month", "day"]);
            assert_eq!(table.file_extension.as_deref(), Some(".json.gz"));
            Ok(())
        });
    }

    #[test]
    fn test_legacy_env_vars() {
        Jail::expect_with(|jail| {
            jail.set_env("DATABASE", "logs");
            jail.set_env("SOURCE_TABLE", "raw_requests");
            jail.set_env("TARGET_TABLE", "requests");
            jail.set_env("ATHENA_QUERY_RESULTS_LOCATION", "s3://results/athena");
            jail.set_env("ATHENA_WORK_GROUP_NAME", "primary");

            let config = Configuration::load().expect("config should load");
            assert_eq!(config.catalog.source_table, "raw_requests");
            assert_eq!(config.catalog.target_table, "requests");
            assert_eq!(config.query.output_location, "s3://results/athena");
            assert_eq!(config.query.work_group, "primary");
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [catalog]
                database = "logs"
                source_table = "raw_requests"
                target_table = "requests"

                [query]
                output_location = "s3://results/athena"
                work_group = "primary"
                "#,
            )?;
            jail.set_env("GZSWEEP__CLEANUP__BATCH_SIZE", "250");
            jail.set_env("GZSWEEP__CATALOG__DATABASE", "archive");

            let config = Configuration::load_from_path(Path::new("custom.toml"))
                .expect("config should load");
            assert_eq!(config.cleanup.batch_size, 250);
            assert_eq!(config.catalog.database, "archive");
            Ok(())
        });
    }

    #[test]
    fn test_missing_settings_fail_load() {
        Jail::expect_with(|_jail| {
            let err = Configuration::load().unwrap_err();
            assert!(matches!(err, ConfigError::Missing(_)));
            Ok(())
        });
    }
}
