use lectern::assistant::Assistant;
use lectern::cli::{scope_from_args, split_paragraphs, Cli, Commands, ConfigAction};
use lectern::config::Config;
use lectern::error::{LecternError, Result};
use lectern::retrieval::SessionScope;
use std::io::Read;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Config { action } => cmd_config(cli.config, action)?,
        command => {
            let config = load_config(cli.config, cli.profile)?;
            let assistant = Assistant::open(config).await?;
            run(&assistant, command).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "lectern=debug" } else { "lectern=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(assistant: &Assistant, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest { document_id, file } => {
            let text = read_input(&file)?;
            let chunks = split_paragraphs(&text);
            let report = assistant.ingest(document_id, chunks).await?;
            println!(
                "✓ Document {}: {} chunks stored, {} embedded",
                document_id, report.stored, report.indexed
            );
            if report.substituted > 0 {
                println!(
                    "⚠ {} chunks received random or fallback vectors; the vector index is degraded",
                    report.substituted
                );
            }
        }
        Commands::Remove { document_id } => {
            if assistant.remove_document(document_id).await? {
                println!("✓ Removed document {}", document_id);
            } else {
                println!("Document {} not found", document_id);
            }
        }
        Commands::Query {
            query,
            limit,
            docs,
            json,
        } => {
            let scope = resolve_scope(assistant, &docs).await;
            let k = limit.unwrap_or(assistant.config().retrieval.default_k);
            let retrieval = assistant.retrieve(&query, &scope, k).await?;

            if json {
                println!("{}", to_json(&retrieval)?);
            } else if retrieval.is_empty() {
                println!("No results");
            } else {
                if let Some(tier) = retrieval.tier {
                    println!("Results ({} search):\n", tier);
                }
                for (rank, chunk) in retrieval.chunks.iter().enumerate() {
                    println!(
                        "{:>2}. [doc {}] {:.3}  {}",
                        rank + 1,
                        chunk.document_id,
                        chunk.score,
                        chunk.preview(160)
                    );
                }
            }
        }
        Commands::Ask {
            question,
            persona,
            docs,
            json,
        } => {
            let scope = resolve_scope(assistant, &docs).await;
            let answer = assistant
                .answer(&question, &scope, persona.as_deref())
                .await?;

            if json {
                println!("{}", to_json(&answer)?);
            } else {
                println!("{}", answer.text);
                if !answer.sources.is_empty() {
                    println!("\nSources:");
                    for source in &answer.sources {
                        println!(
                            "  [doc {}] {:.3}  {}",
                            source.document_id, source.score, source.snippet
                        );
                    }
                }
            }
        }
        Commands::Stats { json } => {
            let stats = assistant.stats().await;
            if json {
                println!("{}", to_json(&stats)?);
            } else {
                println!("Lectern Status");
                println!("==============");
                println!("Documents:       {}", stats.document_count);
                println!("Chunks:          {}", stats.total_chunks);
                println!(
                    "Indexed chunks:  {} ({} documents)",
                    stats.indexed_chunks, stats.indexed_documents
                );
                if stats.health.is_degraded() {
                    println!("Index health:    degraded ({:?})", stats.health);
                } else {
                    println!("Index health:    healthy");
                }
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                println!("This removes every stored document. Re-run with --yes to confirm.");
                return Ok(());
            }
            assistant.clear().await?;
            println!("✓ All documents removed");
        }
        Commands::Config { .. } => unreachable!("handled before opening the assistant"),
    }

    Ok(())
}

async fn resolve_scope(assistant: &Assistant, docs: &[i64]) -> SessionScope {
    match scope_from_args(docs) {
        Some(scope) => scope,
        None => assistant.all_documents().await,
    }
}

fn read_input(file: &Path) -> Result<String> {
    let mut text = String::new();
    if file == Path::new("-") {
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| LecternError::Io {
                source: e,
                context: "Failed to read stdin".to_string(),
            })?;
    } else {
        text = std::fs::read_to_string(file).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to read {}", file.display()),
        })?;
    }
    Ok(text)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| LecternError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, None)?;
            let value = serde_json::to_value(&config).map_err(|e| LecternError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    LecternError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };
            println!("{}", to_json(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let mut config = Config::default();
            config.storage.data_dir = Config::default_data_dir()?;
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'lectern config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
