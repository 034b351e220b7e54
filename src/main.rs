use clap::{Parser, Subcommand};
use docs_rag::{RagError, Result};
use docs_rag::commands::{
    delete_document, list_documents, query_documents, show_status, upload_document,
};
use docs_rag::config::{Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "Ask questions about your PDF documents using a local Ollama model")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the vector store and staged uploads
    /// (defaults to ~/.docs-rag)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Upload a PDF document
    Upload {
        /// Path of the PDF file
        path: PathBuf,
        /// Display name for the document (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Ask a question about the uploaded documents
    Query {
        /// The question to answer
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List uploaded documents
    List,
    /// Delete a document
    Delete {
        /// Document ID to delete
        document_id: String,
    },
    /// Show Ollama and vector store status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => Config::default_dir().map_err(|e| RagError::Config(e.to_string()))?,
    };

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&data_dir)?;
        } else {
            run_interactive_config(&data_dir)?;
        }
        return Ok(());
    }

    let config = Config::load_with_env(&data_dir)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Upload { path, name } => {
            upload_document(&config, &path, name).await?;
        }
        Commands::Query { question, json } => {
            query_documents(&config, &question.join(" "), json).await?;
        }
        Commands::List => {
            list_documents(&config).await?;
        }
        Commands::Delete { document_id } => {
            delete_document(&config, &document_id).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
