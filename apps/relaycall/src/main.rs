use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use relaycall::config::RelayCallConfig;
use relaycall::media::SyntheticMediaSource;
use relaycall::orchestrator::{Backends, CallEvent, CallMode, Orchestrator};
use relaycall::peer::ParticipantId;
use relaycall::peer::rtc::WebRtcFactory;
use relaycall::signaling::WsConnector;
use relaycall::telemetry::logging::{self, LogConfig, LogLevel};
use relaycall::timer::TokioScheduler;

#[derive(Parser, Debug)]
#[command(name = "relaycall", about = "Audio/video calls negotiated over a websocket signaling relay")]
struct Cli {
    #[arg(long, short = 'c', env = "RELAYCALL_CONFIG", help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(
        long = "server",
        short = 's',
        value_delimiter = ',',
        help = "Signaling server, tried in the order given"
    )]
    servers: Vec<String>,

    #[arg(long, short = 'r', help = "Room to join; share it with the other side")]
    room: Option<String>,

    #[arg(long, value_enum)]
    mode: Option<CallMode>,

    #[arg(long, help = "Participant id announced to the room")]
    id: Option<String>,

    #[arg(long, help = "Also send a video track")]
    video: bool,

    #[arg(long = "call", help = "Participant to offer to right away (multi mode)")]
    calls: Vec<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn, env = "RELAYCALL_LOG_LEVEL")]
    log_level: LogLevel,

    #[arg(long, env = "RELAYCALL_LOG_FILE", help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut RelayCallConfig) {
        if !self.servers.is_empty() {
            config.servers = self.servers.clone();
        }
        if let Some(room) = &self.room {
            config.room = Some(room.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(id) = &self.id {
            config.participant_id = Some(id.clone());
        }
        if self.video {
            config.media.video = true;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let mut config = RelayCallConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(run(config, cli.calls))
}

async fn run(config: RelayCallConfig, calls: Vec<String>) -> anyhow::Result<()> {
    let settings = config.orchestrator_settings()?;
    println!("room: {}  id: {}", settings.room, settings.local_id);

    let backends = Backends {
        connector: Arc::new(WsConnector::new()),
        peers: Arc::new(WebRtcFactory::new(config.ice_servers.clone())?),
        media: Arc::new(SyntheticMediaSource::new(
            config.media.audio,
            config.media.video,
        )),
        scheduler: Arc::new(TokioScheduler::new()),
    };
    let (orchestrator, handle, mut events) = Orchestrator::new(settings, backends);
    let task = tokio::spawn(orchestrator.run());

    handle.start()?;
    for id in calls {
        handle.call(ParticipantId::new(id))?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    println!("{event}");
                    if matches!(event, CallEvent::SignalingUnavailable { .. }) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; hanging up");
                break;
            }
        }
    }

    let _ = handle.hangup();
    let _ = handle.shutdown();
    task.await.context("orchestrator task failed")?;
    Ok(())
}
