//! # Queue Drain CLI
//!
//! Command-line interface over the `queue-drain` library.
//!
//! This module provides CLI commands for:
//! - Queue management (create, resolve, list, delete, purge)
//! - Sending, receiving and counting messages
//! - Draining a queue to stdout until it is empty or a quota is reached
//! - Configuration validation and shell completions
//!
//! Configuration is layered: built-in defaults, then an optional file given
//! by `--config` / `QUEUE_DRAIN_CONFIG`, then `QUEUE_DRAIN__SECTION__KEY`
//! environment variables.

use clap::{CommandFactory, Parser, Subcommand};
use queue_drain::{
    ConfigurationError, DrainEvent, DrainRequest, ProviderType, QueueClient, QueueClientFactory,
    QueueConfig, QueueError, QueueName, ReceivedMessage, Role, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix of environment variables overriding configuration values
pub const ENV_PREFIX: &str = "QUEUE_DRAIN";

// ============================================================================
// CLI Structure
// ============================================================================

/// queue-drain - inspect, feed and drain SQS queues
#[derive(Debug, Parser)]
#[command(name = "queue-drain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect, feed and drain message queues")]
#[command(
    long_about = "queue-drain wraps an SQS queue: send batches, receive messages and drain a queue until it is empty or a quota is reached"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_DRAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue name, overrides `queue` from the configuration
    #[arg(short, long, env = "QUEUE_DRAIN_QUEUE")]
    pub queue: Option<String>,

    /// Logging level, overrides `logging.level`
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Output format, overrides `output.format`
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the URL of the queue
    Url,

    /// Create the queue if it does not exist and print its URL
    Create,

    /// Delete the queue
    DeleteQueue {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// List the URLs of all queues visible to the account
    List,

    /// Print the approximate number of visible messages
    Count,

    /// Send messages; bodies are read line by line from stdin when none are given
    Send {
        /// Message bodies
        messages: Vec<String>,

        /// Retry a single send on transient failures
        #[arg(long)]
        retry: bool,
    },

    /// Receive one batch of messages
    Receive {
        /// Maximum number of messages (1-10)
        #[arg(short = 'n', long, default_value = "1")]
        max: u32,

        /// Long-poll wait in seconds
        #[arg(short, long)]
        wait: Option<u64>,

        /// Delete each message after printing it
        #[arg(short, long)]
        delete: bool,
    },

    /// Print messages until the queue is empty or the quota is reached
    Drain {
        /// Stop after this many messages (0 drains until empty)
        #[arg(short = 'n', long, default_value = "0")]
        max: usize,

        /// Messages requested per receive call
        #[arg(short, long)]
        batch: Option<u32>,

        /// Long-poll wait in seconds
        #[arg(short, long)]
        wait: Option<u64>,

        /// Delete each message after printing it
        #[arg(short, long)]
        delete: bool,
    },

    /// Delete every message in the queue
    Purge {
        /// Confirm the purge
        #[arg(long)]
        yes: bool,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON document per line
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(#[from] config::ConfigError),

    #[error("Invalid client settings: {0}")]
    Invalid(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// CLI configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Queue used when `--queue` is not given
    pub queue: Option<String>,

    /// Provider, client settings and role
    pub client: QueueConfig,

    pub logging: LoggingConfig,

    pub output: OutputConfig,
}

impl CliConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        if let Some(queue) = &self.queue {
            QueueName::new(queue.clone())?;
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    #[default]
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json")]
    Json,
}

/// Output formatting preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = load_configuration(cli.config.as_deref())?;
    initialize_logging(&cli, &config.logging)?;

    execute(cli, config, &mut std::io::stdout()).await
}

/// Run a parsed command against a loaded configuration, writing results to `out`
pub async fn execute(cli: Cli, config: CliConfig, out: &mut dyn Write) -> Result<(), CliError> {
    let format = cli.output.unwrap_or(config.output.format);

    match cli.command {
        Commands::Config { show } => execute_config_command(&config, show, out),
        Commands::Completions { shell } => execute_completions_command(shell, out),
        Commands::List => execute_list_command(&config, format, out).await,
        command => {
            let queue = resolve_queue_name(cli.queue.as_deref(), &config)?;
            let client = bind_client(&command, &config, queue).await?;
            execute_queue_command(&client, command, format, out).await
        }
    }
}

/// Initialize logging from the CLI flags and the `logging` section.
///
/// `RUST_LOG` takes precedence over both.
fn initialize_logging(cli: &Cli, logging: &LoggingConfig) -> Result<(), CliError> {
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    let json = cli.json_logs || logging.format == LogFormat::Json;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| CliError::InvalidArgument {
            arg: "--log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    // stdout carries command output, logs go to stderr
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .flatten_event(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| CliError::CommandFailed {
            message: format!("failed to initialize logging: {}", e),
        })
}

/// Load configuration from defaults, an optional file and the environment
pub fn load_configuration(config_path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = config_path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        builder = builder.add_source(config::File::from(path));
    }

    // QUEUE_DRAIN__CLIENT__SETTINGS__RECEIVE_BATCH_SIZE=5 -> client.settings.receive_batch_size
    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: CliConfig = settings.try_deserialize()?;
    config.validate()?;

    Ok(config)
}

fn resolve_queue_name(flag: Option<&str>, config: &CliConfig) -> Result<QueueName, CliError> {
    let name = flag
        .or(config.queue.as_deref())
        .ok_or_else(|| ConfigError::MissingRequired {
            key: "queue".to_string(),
        })?;

    QueueName::new(name.to_string()).map_err(|e| CliError::InvalidArgument {
        arg: "--queue".to_string(),
        message: e.to_string(),
    })
}

/// Bind a client to the queue.
///
/// `create` creates the queue first. In-memory queues live only as long as
/// the process, so they are always created on demand.
async fn bind_client(
    command: &Commands,
    config: &CliConfig,
    queue: QueueName,
) -> Result<QueueClient, CliError> {
    let creates = matches!(command, Commands::Create)
        || config.client.provider.provider_type() == ProviderType::InMemory;

    let client = if creates {
        QueueClientFactory::create_client_and_queue(config.client.clone(), queue).await?
    } else {
        QueueClientFactory::create_client(config.client.clone(), queue).await?
    };
    Ok(client)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute a command that operates on the bound queue
pub async fn execute_queue_command(
    client: &QueueClient,
    command: Commands,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Commands::Url | Commands::Create => {
            write_value(out, format, client.queue_url(), || {
                serde_json::json!({
                    "queue": client.queue_name().as_str(),
                    "url": client.queue_url(),
                })
            })
        }
        Commands::DeleteQueue { yes } => {
            require_confirmation(yes, "deleting a queue cannot be undone")?;
            client.delete_queue(client.queue_name()).await?;
            Ok(())
        }
        Commands::Count => {
            let count = client.approximate_message_count().await?;
            write_value(out, format, &count.to_string(), || {
                serde_json::json!({
                    "queue": client.queue_name().as_str(),
                    "approximate_message_count": count,
                })
            })
        }
        Commands::Send { messages, retry } => {
            let bodies = if messages.is_empty() {
                read_bodies(std::io::stdin().lock())?
            } else {
                messages
            };
            execute_send_command(client, bodies, retry, format, out).await
        }
        Commands::Receive { max, wait, delete } => {
            execute_receive_command(client, max, wait, delete, format, out).await
        }
        Commands::Drain {
            max,
            batch,
            wait,
            delete,
        } => execute_drain_command(client, max, batch, wait, delete, format, out).await,
        Commands::Purge { yes } => {
            require_confirmation(yes, "purging deletes every message in the queue")?;
            client.purge().await?;
            Ok(())
        }
        Commands::List | Commands::Config { .. } | Commands::Completions { .. } => {
            Err(CliError::InvalidArgument {
                arg: "command".to_string(),
                message: "not a queue command".to_string(),
            })
        }
    }
}

/// Execute config command
fn execute_config_command(
    config: &CliConfig,
    show: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if show {
        writeln!(out, "{}", serde_json::to_string_pretty(config)?)?;
    } else {
        writeln!(out, "Configuration is valid")?;
    }
    Ok(())
}

/// Execute completions command
fn execute_completions_command(
    shell: clap_complete::Shell,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    info!(shell = ?shell, "Generating shell completions");

    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "queue-drain", out);
    Ok(())
}

/// List queues straight from the provider; no queue needs to be bound
async fn execute_list_command(
    config: &CliConfig,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    config.client.role.check(Role::READ, "list_queues")?;

    let provider = QueueClientFactory::create_provider(&config.client.provider).await?;
    let urls = provider.list_queues().await?;

    match format {
        OutputFormat::Text => {
            for url in &urls {
                writeln!(out, "{}", url)?;
            }
        }
        OutputFormat::Json => writeln!(out, "{}", serde_json::json!({ "queues": urls }))?,
    }
    Ok(())
}

async fn execute_send_command(
    client: &QueueClient,
    bodies: Vec<String>,
    retry: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if let [body] = bodies.as_slice() {
        let message_id = if retry {
            client
                .send_message_with_retry(body, &client.settings().retry)
                .await?
        } else {
            client.send_message(body).await?
        };
        return write_value(out, format, message_id.as_str(), || {
            serde_json::json!({ "message_id": message_id.as_str() })
        });
    }

    if bodies.is_empty() {
        return Err(CliError::InvalidArgument {
            arg: "messages".to_string(),
            message: "no message bodies given".to_string(),
        });
    }

    let sent = client.send_messages(&bodies).await?;
    write_value(out, format, &format!("Sent {} messages", sent), || {
        serde_json::json!({ "sent": sent })
    })
}

async fn execute_receive_command(
    client: &QueueClient,
    max: u32,
    wait: Option<u64>,
    delete: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut options = client.default_receive_options().with_max_messages(max);
    if let Some(seconds) = wait {
        options = options.with_wait_time(Duration::from_secs(seconds));
    }

    for message in client.receive_messages(&options).await? {
        write_message(out, format, &message)?;
        if delete {
            client.delete_message(&message.receipt_handle).await?;
        }
    }
    Ok(())
}

async fn execute_drain_command(
    client: &QueueClient,
    max: usize,
    batch: Option<u32>,
    wait: Option<u64>,
    delete: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let settings = client.settings();
    let request = DrainRequest::new()
        .with_max_messages(max)
        .with_batch_size(batch.unwrap_or(settings.receive_batch_size))
        .with_wait_time(wait.map_or(settings.wait_time, Duration::from_secs))
        .with_retry_policy(settings.retry.clone());

    info!(queue = %client.queue_name(), max_messages = max, delete, "Draining queue");

    let (session, mut rx) = client.drain(request)?;
    let mut failure = None;
    let mut interrupted = false;

    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                info!("Interrupted, stopping drain");
                session.cancel();
                interrupted = true;
                continue;
            }
        };

        let Some(event) = event else {
            break;
        };

        match event {
            DrainEvent::Delivered(message) => {
                write_message(out, format, &message)?;
                if delete {
                    client.delete_message(&message.receipt_handle).await?;
                }
            }
            DrainEvent::Exhausted => info!("Queue is empty"),
            DrainEvent::QuotaReached { delivered } => info!(delivered, "Quota reached"),
            DrainEvent::Failed {
                error,
                consecutive_failures,
                terminal,
            } => {
                if terminal {
                    failure = Some(error);
                } else {
                    warn!(error = %error, consecutive_failures, "Drain call failed, retrying");
                }
            }
        }
    }

    let outcome = session.join().await?;
    if let Some(error) = failure {
        return Err(error.into());
    }

    info!(delivered = outcome.delivered(), outcome = ?outcome, "Drain finished");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Non-empty lines of `reader`, one message body each
pub fn read_bodies(reader: impl BufRead) -> Result<Vec<String>, CliError> {
    let mut bodies = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            bodies.push(line);
        }
    }
    Ok(bodies)
}

fn require_confirmation(yes: bool, message: &str) -> Result<(), CliError> {
    if yes {
        Ok(())
    } else {
        Err(CliError::InvalidArgument {
            arg: "--yes".to_string(),
            message: message.to_string(),
        })
    }
}

fn write_value(
    out: &mut dyn Write,
    format: OutputFormat,
    text: &str,
    json: impl FnOnce() -> serde_json::Value,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", text)?,
        OutputFormat::Json => writeln!(out, "{}", json())?,
    }
    Ok(())
}

fn write_message(
    out: &mut dyn Write,
    format: OutputFormat,
    message: &ReceivedMessage,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => writeln!(out, "{}\t{}", message.message_id.as_str(), message.body)?,
        OutputFormat::Json => {
            let value = serde_json::json!({
                "message_id": message.message_id.as_str(),
                "body": message.body,
                "receipt_handle": message.receipt_handle.as_str(),
                "receive_count": message.receive_count,
                "received_at": message.received_at.to_rfc3339(),
            });
            writeln!(out, "{}", value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
