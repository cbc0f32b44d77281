use anyhow::{Context, Result};
use solashen::audio::capture::{CaptureHandle, CaptureSource};
use solashen::audio::cues::{Cue, CueBank};
use solashen::audio::scheduler::{PlaybackSink, SegmentEndedCallback};
use solashen::audio::silent::SilentOutput;
use solashen::integration::config::AppConfig;
use solashen::market::{run_market_poller, HttpPriceFetcher, MarketPoller};
use solashen::session::{
    command_channel, segment_ended_callback, CommandReceiver, CommandSender, SessionCommand,
    SessionDriver, SessionManager,
};
use solashen::transport::LiveConnector;
use solashen::SolashenError;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Capture source used when audio devices are disabled
struct NoCapture;

impl CaptureSource for NoCapture {
    fn acquire(
        &self,
        _epoch: u64,
        _commands: CommandSender,
    ) -> solashen::Result<Box<dyn CaptureHandle>> {
        Err(SolashenError::DeviceAbsent("Audio devices are disabled".into()))
    }

    fn check_available(&self) -> solashen::Result<()> {
        Err(SolashenError::DeviceAbsent("Audio devices are disabled".into()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solashen=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Solashen voice co-pilot");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("Loading {}", path))?,
        None => AppConfig::default(),
    }
    .with_env_api_key();
    config.validate().map_err(anyhow::Error::msg)?;

    if config.realtime.api_key.is_none() {
        warn!("No API key found in GEMINI_API_KEY or API_KEY; starting a session will fail");
    }

    let cues = load_cues(&config)?;
    let (commands, receiver) = command_channel();
    let on_ended = segment_ended_callback(&commands);

    let poller = MarketPoller::new(
        HttpPriceFetcher::new(config.market.request_timeout())?,
        &config.market,
    );
    let poller_task = tokio::spawn(run_market_poller(
        poller,
        config.market.poll_interval(),
        commands.clone(),
    ));

    spawn_controls(commands.clone());

    let ctrl_c_commands = commands.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_commands.send(SessionCommand::Shutdown);
        }
    });

    println!("Press Enter to start or stop the voice session, q to quit.");

    run_with_devices(&config, cues, on_ended, commands, receiver).await?;

    poller_task.abort();
    info!("Goodbye");
    Ok(())
}

fn load_cues(config: &AppConfig) -> Result<CueBank> {
    let mut cues = CueBank::synthesized(config.audio.cue_sample_rate);
    let overrides = [
        (Cue::Alert, &config.cues.alert),
        (Cue::PriceUp, &config.cues.price_up),
        (Cue::PriceDown, &config.cues.price_down),
    ];
    for (cue, path) in overrides {
        if let Some(path) = path {
            cues = cues.with_override(cue, path)?;
        }
    }
    Ok(cues)
}

#[cfg(feature = "audio-io")]
async fn run_with_devices(
    config: &AppConfig,
    cues: CueBank,
    on_ended: SegmentEndedCallback,
    commands: CommandSender,
    receiver: CommandReceiver,
) -> Result<()> {
    use solashen::audio::input::CpalCapture;
    use solashen::audio::output::CpalOutput;

    if !config.audio.enable_devices {
        return run_silent(config, cues, on_ended, commands, receiver).await;
    }

    let output = CpalOutput::new(on_ended).context("Opening audio output")?;
    info!("Audio output at {} Hz", output.sample_rate());
    let capture = Arc::new(CpalCapture::with_frame_size(config.audio.capture_frame_size));
    run_driver(config, output, cues, capture, commands, receiver).await
}

#[cfg(not(feature = "audio-io"))]
async fn run_with_devices(
    config: &AppConfig,
    cues: CueBank,
    on_ended: SegmentEndedCallback,
    commands: CommandSender,
    receiver: CommandReceiver,
) -> Result<()> {
    run_silent(config, cues, on_ended, commands, receiver).await
}

async fn run_silent(
    config: &AppConfig,
    cues: CueBank,
    on_ended: SegmentEndedCallback,
    commands: CommandSender,
    receiver: CommandReceiver,
) -> Result<()> {
    info!("Running without audio devices");
    let output = SilentOutput::new(on_ended);
    run_driver(config, output, cues, Arc::new(NoCapture), commands, receiver).await
}

async fn run_driver<S: PlaybackSink + 'static>(
    config: &AppConfig,
    sink: S,
    cues: CueBank,
    capture: Arc<dyn CaptureSource>,
    commands: CommandSender,
    receiver: CommandReceiver,
) -> Result<()> {
    let manager = SessionManager::new(sink, cues);
    let connector = Arc::new(LiveConnector::new(config.realtime.clone()));
    let driver = SessionDriver::new(manager, capture, connector, (commands, receiver))
        .with_connect_timeout(config.realtime.connect_timeout());

    let mut states = driver.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match state.user_message() {
                Some(message) => error!("Session {}: {}", state, message),
                None => info!("Session {}", state),
            }
        }
    });

    let manager = driver.run().await;

    for message in manager.messages() {
        info!("[{:?}] {}", message.speaker, message.text);
    }
    Ok(())
}

/// Enter toggles the session, q quits
fn spawn_controls(commands: CommandSender) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "q" | "quit" => SessionCommand::Shutdown,
                _ => SessionCommand::Toggle,
            };
            let quit = matches!(command, SessionCommand::Shutdown);
            if commands.send(command).is_err() || quit {
                break;
            }
        }
    });
}
