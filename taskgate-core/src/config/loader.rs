//! Configuration loading and validation.
//!
//! Search order: explicit path (CLI flag), `TASKGATE_CONFIG`, then
//! `./taskgate.yaml`. When no file is found the built-in defaults apply.

use regex::Regex;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use super::error::{ConfigError, ValidationResult, ValidationWarning};
use super::schema::{Config, PersistenceBackend};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "TASKGATE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "./taskgate.yaml";

/// Configuration file search paths (in priority order), excluding the CLI flag.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG_FILE));

    paths
}

/// Find the config file to load.
///
/// An explicit path must exist. Otherwise the first existing default path
/// wins, and `Ok(None)` means "run on defaults".
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    Ok(default_config_paths().into_iter().find(|p| p.exists()))
}

/// Load configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;

    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let contents = substitute_env_vars(&contents)?;
    let config: Config = serde_saphyr::from_str(&contents)?;

    Ok(config)
}

/// Locate, load and validate configuration.
///
/// Returns the defaults (validated) when no file is found.
pub fn load_and_validate(
    explicit_path: Option<&Path>,
) -> Result<(Config, Option<PathBuf>, ValidationResult), ConfigError> {
    let path = find_config_file(explicit_path)?;
    let config = match &path {
        Some(p) => load_config(p)?,
        None => Config::default(),
    };
    let result = validate(&config)?;
    Ok((config, path, result))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern.
// The pattern is covered by test_env_var_pattern_compiles().
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Substitute environment variables in a string.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing: Option<String> = None;

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        let var_name = cap.get(1).map_or("", |m| m.as_str());
        match std::env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar {
            var,
            field: "configuration".to_string(),
        });
    }

    Ok(result.into_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a configuration.
pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
    let mut warnings = Vec::new();

    if config.schema != 1 {
        return Err(ConfigError::UnsupportedSchemaVersion {
            version: config.schema,
        });
    }

    if config.registry.max_active_tasks == 0 {
        return Err(ConfigError::ZeroValue {
            field: "registry.max_active_tasks",
        });
    }

    let durations: [(&'static str, Duration); 6] = [
        ("registry.retention", config.registry.retention),
        ("registry.cleanup_interval", config.registry.cleanup_interval),
        ("executor.input_timeout", config.executor.input_timeout),
        ("executor.input_ack_timeout", config.executor.input_ack_timeout),
        ("executor.watchdog_interval", config.executor.watchdog_interval),
        ("executor.shutdown_timeout", config.executor.shutdown_timeout),
    ];
    for (field, value) in durations {
        if value.is_zero() {
            return Err(ConfigError::ZeroDuration { field });
        }
    }

    match config.persistence.backend {
        PersistenceBackend::File if config.persistence.path.is_none() => {
            return Err(ConfigError::MissingPersistencePath);
        }
        PersistenceBackend::None | PersistenceBackend::Memory
            if config.persistence.path.is_some() =>
        {
            warnings.push(ValidationWarning::PersistencePathIgnored {
                backend: config.persistence.backend.as_str().to_string(),
            });
        }
        _ => {}
    }

    if config.admin.bind.parse::<IpAddr>().is_err() {
        return Err(ConfigError::InvalidBindAddress {
            bind: config.admin.bind.clone(),
        });
    }

    if config.executor.input_ack_timeout > config.executor.input_timeout {
        warnings.push(ValidationWarning::AckTimeoutExceedsInputTimeout);
    }
    if config.registry.retention < config.registry.cleanup_interval {
        warnings.push(ValidationWarning::RetentionShorterThanCleanup);
    }

    Ok(ValidationResult::with_warnings(warnings))
}
