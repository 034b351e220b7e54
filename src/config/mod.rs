// Configuration management module
// TOML settings under the data directory, plus the interactive setup flow

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, OllamaConfig, RetrievalConfig, StorageBackend, StorageConfig,
};
