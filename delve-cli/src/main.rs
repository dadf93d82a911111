//! Delve CLI - Command-line interface for Delve
//!
//! Runs research queries locally or against a remote delve server

mod remote;
mod render;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use delve_core::{
    config_error, init_logging, log_operation_start, log_operation_success, DelveConfig, DelveError, DelveResult,
    EnvCredentials, ErrorContext, LoggingConfig, Query, ResearchOptions, ResearchResult, Strategy,
};
use delve_research::{ResearchAgentBuilder, StrategyOptimizer};

use crate::remote::RemoteClient;
use crate::render::{render_result, status_line};

#[derive(Parser)]
#[command(name = "delve")]
#[command(about = "Multi-source research assistant")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a question
    Research {
        /// The question to research
        query: String,

        /// Force a strategy instead of classifying the query (quick, standard, comprehensive)
        #[arg(short, long)]
        strategy: Option<Strategy>,

        /// Print status updates while researching
        #[arg(long)]
        stream: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Run on a remote delve server instead of locally
        #[arg(long)]
        server: Option<String>,
    },

    /// Show how a query would be planned, without researching it
    Classify {
        /// The question to classify
        query: String,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let logging_config = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        config.logging.clone()
    };
    init_logging(&logging_config).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting Delve CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Research {
            query,
            strategy,
            stream,
            json,
            server,
        } => {
            handle_research(&query, strategy, stream, json, server.as_deref(), config)
                .await
                .context("research failed")?;
        }
        Commands::Classify { query } => {
            handle_classify(&query, &config)?;
        }
        Commands::Config { show, init, validate } => {
            handle_config(show, init, validate, cli.config.as_deref(), &config)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> DelveResult<DelveConfig> {
    match path {
        Some(path) => info!("Loading configuration from {:?}", path),
        None => info!("Loading configuration from default locations"),
    }
    DelveConfig::load(path)
}

async fn handle_research(
    query: &str,
    strategy: Option<Strategy>,
    stream: bool,
    json: bool,
    server: Option<&str>,
    config: DelveConfig,
) -> DelveResult<()> {
    log_operation_start!("research", query = %query);

    let result: ResearchResult = match server {
        Some(server) => {
            let client = RemoteClient::new(server)?;
            client
                .research(query, strategy, |status| {
                    if stream {
                        eprintln!("{}", status_line(status));
                    }
                })
                .await?
        }
        None => {
            let agent = ResearchAgentBuilder::from_config(config, &EnvCredentials)
                .await?
                .build()?;
            let options = ResearchOptions { strategy };
            if stream {
                agent
                    .research_with_streaming(query, &options, |status| eprintln!("{}", status_line(&status)))
                    .await
            } else {
                eprintln!("🔍 Researching \"{}\"...", query);
                agent.research(query, &options).await
            }
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", render_result(&result));
    }

    log_operation_success!(
        "research",
        sources = result.metadata.sources_count,
        degraded = result.metadata.error
    );
    Ok(())
}

fn handle_classify(query: &str, config: &DelveConfig) -> DelveResult<()> {
    let query = Query::parse(query, config.research.min_query_chars)?;
    let optimizer = StrategyOptimizer::new(config.strategies.clone(), &config.research);
    let plan = optimizer.plan(&query, &ResearchOptions::default());

    println!("📋 Query: {}", query);
    println!("   Strategy:    {}", plan.strategy);
    println!("   Domain:      {:?}", plan.domain);
    println!("   Programming: {}", plan.is_programming);
    if let Some(language) = plan.language {
        println!("   Language:    {}", language);
    }
    println!(
        "   Budgets:     search {} ms, processing {} ms, chunk {} chars, {} documents",
        plan.budgets.search_timeout.as_millis(),
        plan.budgets.processing_timeout.as_millis(),
        plan.budgets.chunk_size,
        plan.budgets.max_documents
    );
    println!("   Overall:     {} ms", plan.overall_budget.as_millis());
    Ok(())
}

fn handle_config(show: bool, init: bool, validate: bool, path: Option<&Path>, config: &DelveConfig) -> DelveResult<()> {
    if init {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => DelveConfig::default_path().ok_or_else(|| DelveError::Config {
                message: "Could not determine the home directory".to_string(),
                source: None,
                context: ErrorContext::new("cli")
                    .with_operation("config_init")
                    .with_suggestion("Pass --config to choose a location"),
            })?,
        };

        if config_path.exists() {
            println!("⚠️  Configuration already exists at: {:?}", config_path);
        } else {
            DelveConfig::default().save_to_file(&config_path)?;
            println!("✅ Configuration initialized at: {:?}", config_path);
            println!("📝 API keys are read from the environment (TAVILY_API_KEY, GITHUB_TOKEN, OPENAI_API_KEY, ...).");
        }
    }

    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| config_error!(format!("Failed to render configuration: {}", e), "cli", e))?;
        println!("📋 Current configuration:");
        println!("{}", rendered);
    }

    if validate {
        match config.validate() {
            Ok(()) => println!("✅ Configuration is valid"),
            Err(e) => {
                println!("❌ Configuration validation failed: {}", e);
                return Err(e);
            }
        }
    }

    if !(init || show || validate) {
        println!("Nothing to do. Use --init, --show or --validate.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_arguments_parse() {
        let cli = Cli::try_parse_from([
            "delve",
            "--verbose",
            "research",
            "quicksort in python",
            "--strategy",
            "comprehensive",
            "--stream",
            "--server",
            "http://localhost:8080",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Research {
                query,
                strategy,
                stream,
                json,
                server,
            } => {
                assert_eq!(query, "quicksort in python");
                assert_eq!(strategy, Some(Strategy::Comprehensive));
                assert!(stream);
                assert!(!json);
                assert_eq!(server.as_deref(), Some("http://localhost:8080"));
            }
            _ => panic!("expected the research command"),
        }
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["delve", "research", "x", "--strategy", "thorough"]).is_err());
    }

    #[test]
    fn config_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delve").join("config.toml");

        handle_config(false, true, false, Some(&path), &DelveConfig::default()).unwrap();

        let written = DelveConfig::from_file(&path).unwrap();
        assert_eq!(written, DelveConfig::default());
    }

    #[test]
    fn classify_rejects_empty_queries() {
        assert!(handle_classify("   ", &DelveConfig::default()).is_err());
        assert!(handle_classify("rust async runtimes", &DelveConfig::default()).is_ok());
    }
}
