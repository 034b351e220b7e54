
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;
use std::time::Duration;

use super::{Config, ConfigError, OllamaConfig, StorageBackend};
use crate::embeddings::OllamaClient;

#[inline]
pub fn run_interactive_config(base_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Docs RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(base_dir)?;

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure your local Ollama instance for embeddings and answers.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Document Processing").bold().yellow());
    configure_processing(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before uploading.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(base_dir: &Path) -> Result<()> {
    let config = Config::load_with_env(base_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Answer model: {}", style(&config.ollama.model).cyan());
    eprintln!(
        "  Embedding model: {}",
        style(&config.ollama.embed_model).cyan()
    );
    eprintln!(
        "  Embeddings in flight: {}",
        style(config.ollama.max_in_flight).cyan()
    );
    eprintln!("  Timeout: {}s", style(config.ollama.timeout_secs).cyan());

    eprintln!();
    eprintln!("{}", style("Processing Settings:").bold().yellow());
    eprintln!(
        "  Chunk size: {} tokens",
        style(config.chunking.chunk_size).cyan()
    );
    eprintln!(
        "  Chunk overlap: {} tokens",
        style(config.chunking.chunk_overlap).cyan()
    );
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!("  Storage: {}", style(config.storage.backend).cyan());
    eprintln!(
        "  Upload limit: {} bytes",
        style(config.storage.max_upload_bytes).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(base_dir: &Path) -> Result<Config> {
    if !Config::with_base_dir(base_dir).config_file_path().exists() {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
        return Ok(Config::with_base_dir(base_dir));
    }

    match Config::load(base_dir) {
        Ok(config) => {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        }
        Err(e) => {
            eprintln!(
                "{} {:#}",
                style("Existing configuration is invalid, starting from defaults:").yellow(),
                e
            );
            Ok(Config::with_base_dir(base_dir))
        }
    }
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols
        .get(protocol_index)
        .copied()
        .unwrap_or("http")
        .to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Answer model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| non_empty(input))
        .interact_text()?;

    let embed_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.embed_model.clone())
        .validate_with(|input: &String| non_empty(input))
        .interact_text()?;

    let max_in_flight: usize = Input::new()
        .with_prompt("Embedding requests in flight")
        .default(ollama.max_in_flight)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=64).contains(input) {
                Ok(())
            } else {
                Err("Must be between 1 and 64")
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embed_model(embed_model)?;
    ollama.set_max_in_flight(max_in_flight)?;

    Ok(())
}

fn configure_processing(config: &mut Config) -> Result<()> {
    let chunk_size: usize = Input::new()
        .with_prompt("Chunk size (tokens)")
        .default(config.chunking.chunk_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (16..=8192).contains(input) {
                Ok(())
            } else {
                Err("Chunk size must be between 16 and 8192")
            }
        })
        .interact_text()?;

    let chunk_overlap: usize = Input::new()
        .with_prompt("Chunk overlap (tokens)")
        .default(config.chunking.chunk_overlap.min(chunk_size.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input < chunk_size {
                Ok(())
            } else {
                Err("Overlap must be smaller than the chunk size")
            }
        })
        .interact_text()?;

    let top_k: usize = Input::new()
        .with_prompt("Chunks retrieved per question")
        .default(config.retrieval.top_k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=100).contains(input) {
                Ok(())
            } else {
                Err("Must be between 1 and 100")
            }
        })
        .interact_text()?;

    let backends = [StorageBackend::Json, StorageBackend::Lancedb];
    let labels = ["json (single file)", "lancedb (embedded table)"];
    let default_index = backends
        .iter()
        .position(|&b| b == config.storage.backend)
        .unwrap_or(0);
    let backend_index = Select::new()
        .with_prompt("Vector storage")
        .default(default_index)
        .items(&labels)
        .interact()?;

    config.chunking.chunk_size = chunk_size;
    config.chunking.chunk_overlap = chunk_overlap;
    config.retrieval.top_k = top_k;
    config.storage.backend = backends.get(backend_index).copied().unwrap_or_default();
    config.validate()?;

    Ok(())
}

fn non_empty(input: &str) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Model name cannot be empty")
    } else {
        Ok(())
    }
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    OllamaClient::new(ollama)
        .map(|client| client.with_timeout(Duration::from_secs(5)))
        .and_then(|client| client.ping())
        .is_ok()
}
