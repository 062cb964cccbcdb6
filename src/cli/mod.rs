//! CLI command definitions and parsing
use crate::corpus::DocumentId;
use crate::retrieval::SessionScope;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lectern",
    version,
    about = "Grounded question answering over your own documents",
    long_about = "Lectern stores pre-chunked document text, retrieves the passages most relevant to a \
                  question through vector, lexical and keyword search, and asks a language model to \
                  answer from them, falling back between providers when one is unavailable."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/lectern/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a document; each blank-line separated paragraph becomes one chunk
    Ingest {
        /// Identifier of the document (re-ingesting replaces it)
        document_id: DocumentId,

        /// Text file to read, or `-` for stdin
        file: PathBuf,
    },

    /// Remove a document and its chunks
    Remove { document_id: DocumentId },

    /// Retrieve the passages most relevant to a query
    Query {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        limit: Option<usize>,

        /// Restrict to these documents (defaults to all)
        #[arg(short, long = "doc", value_name = "ID")]
        docs: Vec<DocumentId>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Answer a question from the stored documents
    Ask {
        /// Question to ask
        question: String,

        /// Role description prepended to the system prompt
        #[arg(long)]
        persona: Option<String>,

        /// Restrict to these documents (defaults to all)
        #[arg(short, long = "doc", value_name = "ID")]
        docs: Vec<DocumentId>,

        /// Show the answer in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show corpus and index statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Remove every document
    Clear {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Blank-line separated paragraphs, whitespace-trimmed, empties dropped
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                chunks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

/// `None` when no ids were given, meaning every stored document
pub fn scope_from_args(docs: &[DocumentId]) -> Option<SessionScope> {
    (!docs.is_empty()).then(|| docs.iter().copied().collect())
}
