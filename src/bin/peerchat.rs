//! peerchat
//!
//! Joins a room, sends typed lines and microphone audio to every peer, and
//! prints and plays what the peers send back.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerchat::{
    audio::{default_backend, list_devices, AudioPipeline},
    config::AppConfig,
    network::Transport,
    protocol::RoomCode,
    session::Session,
    ui::{spawn_stdin_reader, StdoutDisplay},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serverless text and voice chat", long_about = None)]
struct Args {
    /// Five-character room code shared by everyone in the conversation
    #[arg(short, long, value_parser = parse_room)]
    room: Option<String>,

    /// Name shown to the other participants
    #[arg(short, long, env = "PEERCHAT_USERNAME")]
    username: Option<String>,

    /// Peer endpoint to subscribe to (host:port), repeatable
    #[arg(short, long = "peer")]
    peers: Vec<String>,

    /// Local endpoint to publish on
    #[arg(short, long)]
    bind: Option<String>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text only: no capture and no playback
    #[arg(long)]
    no_audio: bool,

    /// List available audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_room(value: &str) -> Result<String, String> {
    RoomCode::new(value)
        .map(|room| room.as_str().to_string())
        .map_err(|e| e.to_string())
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose == 0 {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
    } else {
        tracing_subscriber::EnvFilter::new(default_level)
    };

    // stdout belongs to the conversation
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_devices() -> Result<()> {
    let devices = list_devices().context("Failed to enumerate audio devices")?;

    println!("\n=== Available Audio Devices ===");
    for device in &devices {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
    Ok(())
}

fn apply_args(config: &mut AppConfig, args: Args) {
    if let Some(room) = args.room {
        config.session.room = room;
    }
    if let Some(username) = args.username {
        config.session.username = username;
    }
    if let Some(bind) = args.bind {
        config.network.bind_address = bind;
    }
    if !args.peers.is_empty() {
        config.network.peers = args.peers;
    }
    if args.no_audio {
        config.audio.enabled = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list_devices {
        return print_devices();
    }

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    apply_args(&mut config, args);
    let identity = config.validate().context("Invalid configuration")?;

    tracing::info!("Starting peerchat as {} in room {}", identity.username, identity.room);

    let transport = Transport::open(
        &config.network.bind_address,
        &config.network.peers,
        &identity.room,
        config.transport_options(),
    )
    .with_context(|| format!("Failed to open transport on {}", config.network.bind_address))?;

    let input = spawn_stdin_reader().context("Failed to start console reader")?;
    let mut session = Session::new(identity, transport, input, Box::new(StdoutDisplay))
        .with_poll_timeout(config.poll_timeout());

    if config.audio.enabled {
        let backend = default_backend(
            config.audio.input_device.clone(),
            config.audio.output_device.clone(),
        );
        session = session
            .with_audio(AudioPipeline::start(&config.audio, backend))
            .with_idle_timeout(config.audio.speaker_idle_timeout());
    } else {
        tracing::info!("Audio disabled");
    }

    let shutdown = session.shutdown_handle();
    let mut handle = tokio::task::spawn_blocking(move || session.run());

    let stats = tokio::select! {
        result = &mut handle => result.context("Session task failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Interrupted, leaving room");
            shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
            handle.await.context("Session task failed")?
        }
    };

    tracing::info!("Goodbye ({})", stats);
    // the console reader may still be blocked on stdin
    std::process::exit(0);
}
