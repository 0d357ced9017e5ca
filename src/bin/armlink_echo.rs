//! armlink echo server
//!
//! Simulates a robot controller on a namespace: answers every command that
//! asks for feedback with "Done" and serves the parameters clients check
//! before sending. Run it alongside `armlink` to try the full round trip.

#[cfg(feature = "zenoh-integration")]
use {
    armlink::{
        transport::response_topic_for, EchoResponder, Interface, RobotMessage, Topics, Transport, ZenohTransport,
        CLIENT_PROTOCOL_VERSION,
    },
    clap::Parser,
    std::sync::Arc,
    tokio::sync::mpsc,
    tracing::{error, info, Level},
};

#[cfg(feature = "zenoh-integration")]
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Robot namespace to serve
    #[arg(short, long, default_value = "/rob1")]
    namespace: String,

    /// Protocol version to advertise
    #[arg(long, default_value_t = CLIENT_PROTOCOL_VERSION)]
    protocol_version: i64,

    /// Port advertised as robot_state_port
    #[arg(long, default_value_t = 30101)]
    state_port: u16,

    /// Zenoh endpoint override (optional)
    #[arg(long)]
    zenoh_endpoint: Option<String>,

    /// Log every received command
    #[arg(short, long)]
    verbose: bool,
}

#[cfg(feature = "zenoh-integration")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!("Starting echo server on namespace {}", args.namespace);

    let transport = ZenohTransport::open(args.zenoh_endpoint.as_deref()).await?;
    let topics = Topics::new(&args.namespace);

    transport
        .serve_param(&topics.version_param(), serde_json::json!(args.protocol_version))
        .await?;
    transport
        .serve_param(&topics.state_port_param(), serde_json::json!(args.state_port))
        .await?;

    // Subscriber callbacks run on Zenoh threads; replies are published from here
    let (sender, mut receiver) = mpsc::unbounded_channel::<(String, RobotMessage)>();
    for interface in Interface::ALL {
        let topic = topics.request(interface);
        let sender = sender.clone();
        let name = topic.clone();
        transport
            .subscribe(
                &topic,
                Arc::new(move |message: RobotMessage| {
                    if sender.send((name.clone(), message)).is_err() {
                        error!("Echo loop stopped, dropping command");
                    }
                }),
            )
            .await?;
        info!("Listening on {}", topic);
    }

    let mut echo = EchoResponder::new();
    info!("Echoing commands... (Ctrl+C to stop)");

    loop {
        tokio::select! {
            received = receiver.recv() => {
                let Some((topic, command)) = received else { break };
                let Some(reply) = echo.respond(&topic, &command) else { continue };
                let Some(response_topic) = response_topic_for(&topic) else { continue };
                if let Err(e) = transport.publish(&response_topic, &reply).await {
                    error!("Failed to publish reply for {}: {}", command.sequence_id, e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!(
        "Echoed {} replies, {} sequence mismatches",
        echo.echoed(),
        echo.mismatches()
    );
    Ok(())
}

#[cfg(not(feature = "zenoh-integration"))]
fn main() {
    eprintln!("armlink_echo requires the zenoh-integration feature.");
    eprintln!("Run with: cargo run --bin armlink_echo --features zenoh-integration");
    std::process::exit(1);
}
