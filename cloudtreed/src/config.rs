//! Startup configuration. Values come from `CLOUDTREE_*` environment
//! variables (a `.env` file is loaded first by the binary), are validated
//! once into an [`AppConfig`], and are never re-read afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cloudtree_core::{
    ExportTarget, LogLevel, PolicyError, PolicySet, SiblingOrder, StorageProvider, TraversalMode,
};
use thiserror::Error;

pub const ENV_STORAGE_ROOT: &str = "CLOUDTREE_STORAGE_ROOT";
pub const ENV_LOG_LEVEL: &str = "CLOUDTREE_LOG_LEVEL";
pub const ENV_EXPORT_TARGET: &str = "CLOUDTREE_EXPORT_TARGET";
pub const ENV_EXPORT_PATH: &str = "CLOUDTREE_EXPORT_PATH";
pub const ENV_PROVIDER: &str = "CLOUDTREE_PROVIDER";
pub const ENV_SQLITE_URL: &str = "CLOUDTREE_SQLITE_URL";
pub const ENV_SQLSERVER_CONNECTION: &str = "CLOUDTREE_SQLSERVER_CONNECTION";
pub const ENV_MAX_UPLOAD_BYTES: &str = "CLOUDTREE_MAX_UPLOAD_BYTES";
pub const ENV_TRAVERSAL_MODE: &str = "CLOUDTREE_TRAVERSAL_MODE";
pub const ENV_SIBLING_ORDER: &str = "CLOUDTREE_SIBLING_ORDER";
pub const ENV_FILE_CONFLICT_POLICY: &str = "CLOUDTREE_FILE_CONFLICT_POLICY";
pub const ENV_DIRECTORY_DELETE_POLICY: &str = "CLOUDTREE_DIRECTORY_DELETE_POLICY";

const DEFAULT_DIR_NAME: &str = "cloudtree";
const DEFAULT_DATABASE_FILE: &str = "metadata.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must not be empty")]
    Empty { var: &'static str },
    #[error("{var}: {source}")]
    Invalid {
        var: &'static str,
        #[source]
        source: PolicyError,
    },
    #[error("{var} must be a positive integer, got '{value}'")]
    NotPositive { var: &'static str, value: String },
    #[error("CLOUDTREE_EXPORT_PATH is required when the export target is File")]
    MissingExportPath,
    #[error("{var} is required for the {provider} provider")]
    MissingConnection {
        var: &'static str,
        provider: StorageProvider,
    },
    #[error("no data directory available; set CLOUDTREE_STORAGE_ROOT")]
    NoDataDirectory,
}

/// Unvalidated settings as they were found; `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    pub storage_root: Option<String>,
    pub log_level: Option<String>,
    pub export_target: Option<String>,
    pub export_path: Option<String>,
    pub provider: Option<String>,
    pub sqlite_url: Option<String>,
    pub sqlserver_connection: Option<String>,
    pub max_upload_bytes: Option<String>,
    pub traversal_mode: Option<String>,
    pub sibling_order: Option<String>,
    pub file_conflict_policy: Option<String>,
    pub directory_delete_policy: Option<String>,
}

impl RawConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            storage_root: lookup(ENV_STORAGE_ROOT),
            log_level: lookup(ENV_LOG_LEVEL),
            export_target: lookup(ENV_EXPORT_TARGET),
            export_path: lookup(ENV_EXPORT_PATH),
            provider: lookup(ENV_PROVIDER),
            sqlite_url: lookup(ENV_SQLITE_URL),
            sqlserver_connection: lookup(ENV_SQLSERVER_CONNECTION),
            max_upload_bytes: lookup(ENV_MAX_UPLOAD_BYTES),
            traversal_mode: lookup(ENV_TRAVERSAL_MODE),
            sibling_order: lookup(ENV_SIBLING_ORDER),
            file_conflict_policy: lookup(ENV_FILE_CONFLICT_POLICY),
            directory_delete_policy: lookup(ENV_DIRECTORY_DELETE_POLICY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    pub target: ExportTarget,
    /// Present whenever the target is `File`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    Sqlite { url: String },
    SqlServer { connection: String },
}

impl StorageSettings {
    pub fn provider(&self) -> StorageProvider {
        match self {
            StorageSettings::Sqlite { .. } => StorageProvider::Sqlite,
            StorageSettings::SqlServer { .. } => StorageProvider::SqlServer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub storage_root: PathBuf,
    pub log_level: LogLevel,
    pub export: ExportSettings,
    pub storage: StorageSettings,
    pub traversal: TraversalMode,
    pub sibling_order: SiblingOrder,
    pub policies: PolicySet,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_raw(RawConfig::from_env())
    }

    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let home = dirs::home_dir();
        let storage_root = match present(ENV_STORAGE_ROOT, raw.storage_root)? {
            Some(value) => expand_with_home(&value, home.as_deref()),
            None => default_storage_root().ok_or(ConfigError::NoDataDirectory)?,
        };

        let log_level = parse_or(ENV_LOG_LEVEL, raw.log_level, LogLevel::Info)?;
        let target = parse_or(ENV_EXPORT_TARGET, raw.export_target, ExportTarget::Console)?;
        let export_path = present(ENV_EXPORT_PATH, raw.export_path)?
            .map(|value| expand_with_home(&value, home.as_deref()));
        if target == ExportTarget::File && export_path.is_none() {
            return Err(ConfigError::MissingExportPath);
        }

        let provider = parse_or(ENV_PROVIDER, raw.provider, StorageProvider::Sqlite)?;
        let storage = match provider {
            StorageProvider::Sqlite => StorageSettings::Sqlite {
                url: present(ENV_SQLITE_URL, raw.sqlite_url)?.unwrap_or_else(|| {
                    storage_root
                        .join(DEFAULT_DATABASE_FILE)
                        .to_string_lossy()
                        .into_owned()
                }),
            },
            StorageProvider::SqlServer => StorageSettings::SqlServer {
                connection: present(ENV_SQLSERVER_CONNECTION, raw.sqlserver_connection)?.ok_or(
                    ConfigError::MissingConnection {
                        var: ENV_SQLSERVER_CONNECTION,
                        provider,
                    },
                )?,
            },
        };

        let defaults = PolicySet::default();
        let max_upload_bytes = match present(ENV_MAX_UPLOAD_BYTES, raw.max_upload_bytes)? {
            Some(value) => value
                .parse::<u64>()
                .ok()
                .filter(|bytes| *bytes > 0)
                .ok_or(ConfigError::NotPositive {
                    var: ENV_MAX_UPLOAD_BYTES,
                    value,
                })?,
            None => defaults.max_upload_bytes,
        };
        let policies = PolicySet {
            file_conflict: parse_or(
                ENV_FILE_CONFLICT_POLICY,
                raw.file_conflict_policy,
                defaults.file_conflict,
            )?,
            directory_delete: parse_or(
                ENV_DIRECTORY_DELETE_POLICY,
                raw.directory_delete_policy,
                defaults.directory_delete,
            )?,
            max_upload_bytes,
        };

        Ok(Self {
            storage_root,
            log_level,
            export: ExportSettings {
                target,
                path: export_path,
            },
            storage,
            traversal: parse_or(
                ENV_TRAVERSAL_MODE,
                raw.traversal_mode,
                TraversalMode::DepthFirstPreOrder,
            )?,
            sibling_order: parse_or(
                ENV_SIBLING_ORDER,
                raw.sibling_order,
                SiblingOrder::CreationTime,
            )?,
            policies,
        })
    }

    /// Directory holding the byte store (`files/` and `staging/`).
    pub fn data_root(&self) -> &Path {
        &self.storage_root
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "storage root:            {}", self.storage_root.display())?;
        writeln!(f, "log level:               {}", self.log_level)?;
        match &self.export.path {
            Some(path) => writeln!(
                f,
                "export:                  {} ({})",
                self.export.target,
                path.display()
            )?,
            None => writeln!(f, "export:                  {}", self.export.target)?,
        }
        match &self.storage {
            StorageSettings::Sqlite { url } => writeln!(f, "provider:                Sqlite ({url})")?,
            StorageSettings::SqlServer { .. } => writeln!(f, "provider:                SqlServer")?,
        }
        writeln!(f, "max upload bytes:        {}", self.policies.max_upload_bytes)?;
        writeln!(f, "traversal mode:          {}", self.traversal)?;
        writeln!(f, "sibling order:           {}", self.sibling_order)?;
        writeln!(f, "file conflict policy:    {}", self.policies.file_conflict)?;
        write!(f, "directory delete policy: {}", self.policies.directory_delete)
    }
}

/// `None` for unset, error for set-but-blank, trimmed value otherwise.
fn present(var: &'static str, value: Option<String>) -> Result<Option<String>, ConfigError> {
    match value {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty { var }),
        Some(value) => Ok(Some(value.trim().to_string())),
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = PolicyError>,
{
    match present(var, value)? {
        Some(value) => value
            .parse()
            .map_err(|source| ConfigError::Invalid { var, source }),
        None => Ok(default),
    }
}

fn expand_with_home(value: &str, home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) if value == "~" => home.to_path_buf(),
        Some(home) => match value.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}

fn default_storage_root() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(DEFAULT_DIR_NAME))
}
