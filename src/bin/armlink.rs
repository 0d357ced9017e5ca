//! armlink command client
//!
//! Command-line interface for sending a single command to a robot controller
//! over Zenoh and printing its feedback.

use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;

#[cfg(feature = "zenoh-integration")]
use {
    anyhow::Result,
    armlink::{
        ClientConfig, Command, CommandEnvelope, DebugInstruction, DefaultFeedback, FeedbackParser, LinkError,
        ParseWith, RobotClient, RobotMessage, ZenohTransport,
    },
    std::{sync::Arc, time::Instant},
    tracing::{error, info},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Compact,
}

/// Command line arguments for the armlink client
#[derive(Parser)]
#[command(name = "armlink")]
#[command(about = "Send commands to a robot controller and print the feedback")]
#[command(version)]
struct Args {
    /// Robot namespace (default: /rob1, or the namespace from --config)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Client configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Seconds to wait for feedback (default: from config, else forever)
    #[arg(short, long, global = true, value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show timing information
    #[arg(long, global = true)]
    timing: bool,

    /// Zenoh endpoint override (optional)
    #[arg(long, global = true)]
    zenoh_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Round trip without side effects on the controller
    Noop,
    /// Print a text on the controller's teach pendant
    Print {
        /// Text to print
        text: String,
    },
    /// Send an arbitrary instruction
    Send {
        /// Instruction name
        #[arg(short, long)]
        instruction: String,
        /// String value (repeatable)
        #[arg(long = "string")]
        strings: Vec<String>,
        /// Numeric value (repeatable)
        #[arg(long = "float", allow_negative_numbers = true)]
        floats: Vec<f64>,
        /// Send over the system interface (driver level)
        #[arg(long)]
        system: bool,
    },
}

fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    let seconds: f64 = value.parse().map_err(|e| format!("{}: {}", value, e))?;
    armlink::config::seconds_to_duration(seconds)
}

#[cfg(feature = "zenoh-integration")]
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays parseable
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("armlink=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("armlink=warn")
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_path(path)?,
        None => ClientConfig::with_namespace("/rob1"),
    };
    if let Some(namespace) = &args.namespace {
        config.client.namespace = namespace.clone();
    }

    let envelope = build_envelope(&args.command);
    if let Err(e) = envelope.check_payload_bounds() {
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }

    let endpoint = args.zenoh_endpoint.as_deref().or(config.zenoh_endpoint());
    let transport = match ZenohTransport::open(endpoint).await {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("✗ Failed to connect to Zenoh network: {}", e);
            std::process::exit(3);
        }
    };
    let client = RobotClient::connect(Arc::new(transport), &config).await?;

    if args.verbose {
        info!("Connected to namespace {}", client.topics().namespace());
    }

    // Keep the error marker check but hand back the whole reply
    let parser = ParseWith::new(|message: &RobotMessage| {
        DefaultFeedback.parse(message).map(|_| message.clone())
    });
    let mut command = DebugInstruction::with_parser(Command::new(envelope), parser);

    let start_time = Instant::now();
    let outcome = client.send_and_wait(&mut command, args.timeout, None).await;
    let elapsed = start_time.elapsed();

    match outcome {
        Ok(reply) => {
            print_reply(&args, &command, &reply, elapsed);
            std::process::exit(0);
        }
        Err(e) => {
            error!("{} failed: {}", command.instruction(), e);
            print_failure(&args, &command, &e, elapsed);
            std::process::exit(exit_code(&e));
        }
    }
}

#[cfg(feature = "zenoh-integration")]
fn build_envelope(command: &Commands) -> CommandEnvelope {
    match command {
        Commands::Noop => CommandEnvelope::new("r_RRC_Noop"),
        Commands::Print { text } => CommandEnvelope::new("r_RRC_PrintText").with_strings([text.clone()]),
        Commands::Send {
            instruction,
            strings,
            floats,
            system,
        } => {
            let envelope = if *system {
                CommandEnvelope::system(instruction.clone())
            } else {
                CommandEnvelope::new(instruction.clone())
            };
            envelope.with_strings(strings.clone()).with_floats(floats.iter().copied())
        }
    }
}

#[cfg(feature = "zenoh-integration")]
fn exit_code(error: &LinkError) -> i32 {
    match error {
        LinkError::Instruction { .. } | LinkError::Parse(_) => 1,
        LinkError::Timeout { .. } => 2,
        _ => 3,
    }
}

#[cfg(feature = "zenoh-integration")]
fn print_reply<P>(args: &Args, command: &DebugInstruction<Command, P>, reply: &RobotMessage, elapsed: Duration)
where
    P: FeedbackParser,
{
    match args.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "success": true,
                "instruction": command.instruction(),
                "sequence_id": command.sequence_id(),
                "reply": reply,
                "duration_ms": elapsed.as_millis() as u64,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            println!("{}", output);
        }
        OutputFormat::Compact => {
            println!("✓ {} ({}ms)", reply.feedback, elapsed.as_millis());
        }
        OutputFormat::Text => {
            println!(
                "✓ {} #{}: {}",
                command.instruction(),
                command.sequence_id(),
                reply.feedback
            );
            if !reply.string_values.is_empty() {
                println!("  strings: {:?}", reply.string_values);
            }
            if !reply.float_values.is_empty() {
                println!("  floats: {:?}", reply.float_values);
            }
            if args.timing {
                println!("Timing: round trip took {}ms", elapsed.as_millis());
            }
        }
    }
}

#[cfg(feature = "zenoh-integration")]
fn print_failure<P>(args: &Args, command: &DebugInstruction<Command, P>, error: &LinkError, elapsed: Duration)
where
    P: FeedbackParser,
{
    match args.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "success": false,
                "instruction": command.instruction(),
                "sequence_id": command.sequence_id(),
                "error": error.to_string(),
                "duration_ms": elapsed.as_millis() as u64,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            println!("{}", output);
        }
        OutputFormat::Compact => {
            println!("✗ {} ({}ms)", error, elapsed.as_millis());
        }
        OutputFormat::Text => {
            eprintln!("✗ {} #{} failed: {}", command.instruction(), command.sequence_id(), error);
            if args.timing {
                eprintln!("Timing: gave up after {}ms", elapsed.as_millis());
            }
        }
    }
}

#[cfg(not(feature = "zenoh-integration"))]
fn main() {
    eprintln!("armlink requires zenoh-integration feature");
    eprintln!("Build with: cargo build --bin armlink --features zenoh-integration");
    std::process::exit(1);
}
