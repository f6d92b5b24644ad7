//! Store configuration, loadable from `DYNAREPO_*` environment variables.

use super::{batch::BatchWriteRetryConfig, marshalling::MarshallingMode, Error, Result};
use serde::Deserialize;
use std::{collections::HashMap, str::FromStr};

/// What to do with each entity's table when a store starts up and shuts down.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TableSynchronization {
    #[default]
    None,
    /// Fail on startup if a table or its key schema is missing.
    Validate,
    /// Recreate tables on startup.
    Create,
    /// Recreate tables on startup and drop them on shutdown.
    CreateDrop,
    /// Drop tables on shutdown.
    Drop,
}

impl TableSynchronization {
    pub fn creates_on_startup(&self) -> bool {
        matches!(self, Self::Create | Self::CreateDrop)
    }

    pub fn drops_on_shutdown(&self) -> bool {
        matches!(self, Self::CreateDrop | Self::Drop)
    }
}

impl FromStr for TableSynchronization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" => Ok(Self::None),
            "validate" => Ok(Self::Validate),
            "create" => Ok(Self::Create),
            "create-drop" => Ok(Self::CreateDrop),
            "drop" => Ok(Self::Drop),
            _ => Err(Error::Configuration(format!("unknown table synchronization mode {}", s))),
        }
    }
}

/// Maps base table names to the names used in a given environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableNameResolver {
    prefix: Option<String>,
    overrides: HashMap<String, String>,
}

impl TableNameResolver {
    pub fn new(prefix: Option<String>, overrides: HashMap<String, String>) -> Self {
        Self { prefix, overrides }
    }

    /// An explicit override wins, then the prefix is prepended.
    pub fn resolve(&self, base_name: &str) -> String {
        if let Some(name) = self.overrides.get(base_name) {
            return name.clone();
        }
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, base_name),
            None => base_name.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DynamoConfig {
    pub table_name_prefix: Option<String>,
    pub table_name_overrides: HashMap<String, String>,
    pub marshalling_mode: MarshallingMode,
    pub table_synchronization: TableSynchronization,
    pub batch_retry: BatchWriteRetryConfig,
    /// Items examined per page when a request sets no limit. Unset leaves it to the store.
    pub page_size: Option<usize>,
}

fn parse<T: FromStr>(name: &str, v: &str) -> Result<T> {
    v.trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid value for {}: {}", name, v)))
}

fn env_bool(name: &str, v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Configuration(format!("invalid value for {}: {}", name, v))),
    }
}

impl DynamoConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("DYNAREPO_TABLE_NAME_PREFIX") {
            config.table_name_prefix = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = lookup("DYNAREPO_MARSHALLING_MODE") {
            config.marshalling_mode = v.parse()?;
        }
        if let Some(v) = lookup("DYNAREPO_TABLE_SYNCHRONIZATION") {
            config.table_synchronization = v.parse()?;
        }
        if let Some(v) = lookup("DYNAREPO_PAGE_SIZE") {
            config.page_size = Some(parse("DYNAREPO_PAGE_SIZE", &v)?);
        }
        if let Some(v) = lookup("DYNAREPO_BATCH_MAX_RETRIES") {
            config.batch_retry.max_retries = parse("DYNAREPO_BATCH_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("DYNAREPO_BATCH_BASE_DELAY_MS") {
            config.batch_retry.base_delay_ms = parse("DYNAREPO_BATCH_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("DYNAREPO_BATCH_MAX_DELAY_MS") {
            config.batch_retry.max_delay_ms = parse("DYNAREPO_BATCH_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("DYNAREPO_BATCH_JITTER") {
            config.batch_retry.jitter = env_bool("DYNAREPO_BATCH_JITTER", &v)?;
        }

        if config.page_size == Some(0) {
            return Err(Error::Configuration("DYNAREPO_PAGE_SIZE must be positive".to_string()));
        }
        if config.batch_retry.base_delay_ms > config.batch_retry.max_delay_ms {
            return Err(Error::Configuration(
                "batch retry base delay must not exceed the maximum delay".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn table_name_resolver(&self) -> TableNameResolver {
        TableNameResolver::new(self.table_name_prefix.clone(), self.table_name_overrides.clone())
    }
}
