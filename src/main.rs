//! deepseek-relay: HTTP relay for the DeepSeek chat completion API
//!
//! A relay that accepts one chat-style operation, forwards it to the DeepSeek
//! completion API and returns the answer with:
//! - CORS normalization for browser callers
//! - A uniform error surface that never leaks upstream detail
//! - An optional streaming deployment (named SSE events)

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

use deepseek_relay::{chat::ChatSession, config::AppConfig, run_server};

#[derive(Parser)]
#[command(name = "deepseek-relay")]
#[command(version = "0.1.0")]
#[command(about = "HTTP relay for the DeepSeek chat completion API")]
#[command(long_about = "
deepseek-relay forwards a single chat prompt to the DeepSeek completion API
and returns the answer with CORS normalization and a uniform error surface.

The upstream credential is read from the DEEPSEEK_API_KEY environment
variable (or the config file).

Example usage:
  deepseek-relay run --config config.yaml
  deepseek-relay check-config
  deepseek-relay chat --relay-url http://localhost:8787
")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Set logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Run {
        /// Override listen port
        #[arg(short, long)]
        port: Option<u16>,
        /// Override upstream URL (e.g. "https://api.deepseek.com")
        #[arg(long)]
        upstream_url: Option<String>,
    },

    /// Validate configuration file
    CheckConfig,

    /// Test connection to the upstream provider
    TestUpstream,

    /// Interactive chat against a running relay (streaming deployment)
    Chat {
        /// Base URL of the relay server
        #[arg(long, default_value = "http://localhost:8787")]
        relay_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level_filter = if let Some(level) = cli.log_level {
        level.to_string()
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            .to_string()
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&level_filter))
        .init();

    match cli.command {
        Commands::Run { port, upstream_url } => {
            run_relay(cli.config, port, upstream_url).await?;
        }
        Commands::CheckConfig => {
            check_config(cli.config)?;
        }
        Commands::TestUpstream => {
            test_upstream(cli.config).await?;
        }
        Commands::Chat { relay_url } => {
            chat(relay_url).await?;
        }
    }

    Ok(())
}

/// Run the relay server
async fn run_relay(
    config_path: PathBuf,
    port_override: Option<u16>,
    upstream_url_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config_or_exit(&config_path);

    // Apply CLI overrides
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(url) = upstream_url_override {
        config.upstream.url = url;
    }

    tracing::info!("Loading configuration from {:?}", config_path);

    if config.upstream.api_key.is_none() {
        tracing::warn!(
            "No upstream credential configured; set DEEPSEEK_API_KEY or upstream.api_key"
        );
    }

    run_server(config).await?;

    Ok(())
}

/// Validate configuration file
fn check_config(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match AppConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid\n");
            println!("Server:");
            println!("  Listen: {}:{}", config.server.host, config.server.port);
            println!("\nUpstream:");
            println!("  URL: {}", config.upstream.base_url());
            println!("  Model: {}", config.upstream.model);
            println!("  Temperature: {}", config.upstream.temperature);
            println!("  Max tokens: {}", config.upstream.max_tokens);
            println!("  Timeout: {}s", config.upstream.timeout_seconds);
            println!(
                "  Credential: {}",
                if config.upstream.api_key.is_some() {
                    "configured"
                } else {
                    "NOT configured"
                }
            );
            println!("\nRelay:");
            println!(
                "  Streaming route: {}",
                if config.relay.streaming.is_enabled() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Test connection to the upstream provider
async fn test_upstream(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_or_exit(&config_path);
    let models_url = format!("{}/v1/models", config.upstream.base_url());

    println!("Testing connection to upstream: {}", models_url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let mut request = client.get(&models_url);
    if let Some(ref api_key) = config.upstream.api_key {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", api_key));
    }

    match request.send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("✓ Upstream is reachable");
                println!("  Status: {}", resp.status());

                if let Ok(body) = resp.text().await {
                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
                        if let Some(data) = json.get("data").and_then(|d| d.as_array()) {
                            println!("  Available models: {}", data.len());
                            for model in data.iter().take(5) {
                                if let Some(id) = model.get("id").and_then(|i| i.as_str()) {
                                    println!("    - {}", id);
                                }
                            }
                        }
                    }
                }
            } else {
                println!("✗ Upstream returned error status: {}", resp.status());
            }
        }
        Err(e) => {
            println!("✗ Failed to connect to upstream: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Interactive chat loop against a running relay
async fn chat(relay_url: String) -> Result<(), Box<dyn std::error::Error>> {
    println!("Chatting via {} (empty line or \"exit\" to quit)\n", relay_url);

    let mut session = ChatSession::new(reqwest::Client::new(), relay_url).with_echo(true);
    let stdin = std::io::stdin();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let prompt = line.trim();
        if prompt.is_empty() || prompt == "exit" {
            break;
        }

        if let Err(e) = session.ask(prompt).await {
            eprintln!("error: {}", e);
        }
    }

    Ok(())
}

/// Load configuration or exit with error
fn load_config_or_exit(config_path: &PathBuf) -> AppConfig {
    match AppConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            eprintln!("\nMake sure you have a config.yaml file.");
            eprintln!("You can copy config.yaml.default and modify it:");
            eprintln!("  cp config.yaml.default config.yaml");
            std::process::exit(1);
        }
    }
}
