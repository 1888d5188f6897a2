mod driver;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use tunesync_core::{
    cache::{KeyValueStore, RedisStore},
    logging, metrics,
    models::{ParticipantId, SyncRole},
    Config, KeyBuilder, SyncLoopController,
};

use driver::SimulatedDriver;

#[derive(Parser, Debug)]
#[command(name = "tunesync")]
#[command(about = "TuneSync participant: keeps a local player in step with the room owner", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "TUNESYNC_CONFIG")]
    config: Option<String>,

    /// Room to join
    #[arg(long, env = "TUNESYNC_ROOM")]
    room: String,

    /// Participant role (owner or member)
    #[arg(long, env = "TUNESYNC_ROLE", default_value = "member")]
    role: SyncRole,

    /// Participant ID (random if not provided)
    #[arg(long, env = "TUNESYNC_PARTICIPANT")]
    participant: Option<String>,

    /// Initial position of the simulated player
    #[arg(long, default_value = "0")]
    start_position_ms: u64,

    /// Start the simulated player paused
    #[arg(long, default_value = "false")]
    paused: bool,

    /// Playback speed of the simulated player; values off 1.0 simulate clock drift
    #[arg(long, default_value = "1.0")]
    playback_rate: f64,

    /// Output latency reported by the simulated audio pipeline
    #[arg(long)]
    audio_output_ms: Option<f64>,

    /// Seconds between status reports
    #[arg(long, default_value = "10")]
    status_interval_secs: u64,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let config = Config::load(path)?;

    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    Ok(config)
}

fn report_status(controller: &SyncLoopController) {
    let latency = controller.latency_info();
    info!(
        state = ?controller.state(),
        connected = controller.is_connected(),
        last_sync = ?controller.last_sync_time(),
        rtt_ms = latency.average_ms,
        jitter_ms = latency.jitter_ms,
        stable = latency.is_stable,
        audio_latency_ms = latency.audio_latency_ms,
        "Sync status"
    );
    for e in controller.sync_errors() {
        warn!(error = %e, "Recent sync error");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Configuration and logging
    let config = load_config(args.config.as_deref())?;
    logging::init_logging(&config.logging)?;
    info!("TuneSync starting...");

    // 2. Shared store
    info!("Connecting to Redis at {}", config.redis.url);
    let store = RedisStore::connect(&config.redis).await?;
    store.ping().await?;
    info!("Connected to Redis successfully");

    // 3. Local player
    let mut player = SimulatedDriver::new(
        "simulated-track",
        args.start_position_ms,
        args.paused,
        args.playback_rate,
    );
    if let Some(output_ms) = args.audio_output_ms {
        player = player.with_audio_latency(0.0, output_ms);
    }
    let player = Arc::new(player);

    // 4. Sync loop
    let participant_id = args
        .participant
        .map_or_else(ParticipantId::new, ParticipantId::from_string);
    info!(participant_id = %participant_id, role = %args.role, room = %args.room, "Joining room");

    let controller = SyncLoopController::with_store(
        Arc::new(store),
        KeyBuilder::from_config(&config),
        player.clone(),
        participant_id,
        config.sync.clone(),
    );
    controller.start(&args.room, args.role, player);

    if !controller.sync_errors().is_empty() {
        for e in controller.sync_errors() {
            error!(error = %e, "Failed to start sync");
        }
        return Err(anyhow::anyhow!("Could not join room {}", args.room));
    }

    // 5. Run until interrupted
    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = status.tick() => report_status(&controller),
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    controller.stop();
    report_status(&controller);
    tracing::debug!(metrics = %metrics::gather_metrics(), "Final metrics");
    info!("TuneSync shutting down");
    Ok(())
}
