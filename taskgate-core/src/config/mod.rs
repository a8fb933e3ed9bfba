//! YAML configuration for the task service.

pub mod defaults;
pub mod duration_format;
pub mod error;
pub mod loader;
pub mod schema;

pub use defaults::TaskgateDefaults;
pub use error::{ConfigError, ValidationResult, ValidationWarning};
pub use loader::{find_config_file, load_and_validate, load_config, substitute_env_vars, validate};
pub use schema::{
    AdminConfig, Config, ExecutorConfig, PersistenceBackend, PersistenceConfig, RegistryConfig,
};
