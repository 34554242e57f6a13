use anyhow::Result;
use clap::Parser;
use kiosk_voice::config::SourceKind;
use kiosk_voice::http::PortalSelection;
use kiosk_voice::{
    create_router, ActionLog, AppState, Config, ControllerOptions, PlatformDevices,
    SessionConfig, VoiceSession, WebSocketTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "kiosk-voice", about = "Realtime voice assistant for the parcel kiosk")]
struct Args {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/kiosk-voice")]
    config: String,

    /// Stream this WAV file instead of the microphone
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Start a voice session right away
    #[arg(long)]
    connect: bool,

    /// Override the HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;

    if let Some(path) = args.wav {
        cfg.audio.source = SourceKind::File;
        cfg.audio.file_path = Some(path);
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("Kiosk Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!(
        "Live API model {} (voice={}, language={})",
        cfg.live.model, cfg.assistant.voice, cfg.assistant.language
    );

    let devices = Arc::new(PlatformDevices::from_config(&cfg.audio)?);
    let transport = Arc::new(WebSocketTransport::new(cfg.live.clone()));
    let actions = ActionLog::new();

    let options = ControllerOptions {
        reconnect_debounce: Duration::from_millis(cfg.assistant.reconnect_debounce_ms),
        output_sample_rate: cfg.audio.output_sample_rate,
        ..ControllerOptions::default()
    };
    let session = VoiceSession::spawn(transport, devices, Arc::new(actions.clone()), options);

    let selection = PortalSelection {
        voice: cfg.assistant.voice,
        language: cfg.assistant.language,
    };

    if args.connect {
        session
            .connect(SessionConfig::for_language(selection.voice, selection.language))
            .await?;
        if let Some(message) = session.monitor().last_error().await {
            error!("Voice session did not start: {}", message);
        }
    }

    let app = create_router(AppState::new(session.clone(), selection, actions));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    session.shutdown().await?;
    Ok(())
}
