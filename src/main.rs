use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

use voice_agent_client::backend::HttpBackend;
use voice_agent_client::session::{NavigationState, PageUrl, SESSION_QUERY_PARAM};
use voice_agent_client::voice::{CpalMicrophone, HttpAudioPlayer, Microphone, decode_audio};
use voice_agent_client::{
    ClientHandle, Collaborators, Config, ConversationBackend, PresentationSink, TerminalSink,
    TurnSettings, VoiceClient,
};

/// Voice Agent - push-to-talk client for a conversational voice agent
#[derive(Parser)]
#[command(name = "voice-agent", version, about)]
struct Cli {
    /// Agent backend base URL
    #[arg(long, env = "VOICE_AGENT_BACKEND_URL")]
    backend_url: Option<String>,

    /// Resume this session instead of the one in the page URL
    #[arg(short, long)]
    session: Option<String>,

    /// Re-arm recording after each spoken response
    #[arg(long, env = "VOICE_AGENT_AUTO_RECORD")]
    auto_record: bool,

    /// TTS voice selector
    #[arg(long, env = "VOICE_AGENT_VOICE_ID")]
    voice: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Ask the backend for a fresh session and print it
    NewSession,
    /// Print a session's conversation history
    History {
        /// Session token; defaults to the configured page URL's session
        session: Option<String>,
    },
    /// Check that the backend is reachable
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,voice_agent_client=info",
        1 => "info,voice_agent_client=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::NewSession => cmd_new_session(&config).await,
            Command::History { session } => cmd_history(&config, session).await,
            Command::Check => cmd_check(&config).await,
        };
    }

    chat(config).await
}

/// Apply command-line overrides on top of env and file configuration
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load()?;

    if let Some(raw) = &cli.backend_url {
        let url = Url::parse(raw)?;
        if config.page_url == config.backend_url {
            config.page_url = url.clone();
        }
        config.backend_url = url;
    }

    if let Some(session) = &cli.session {
        let mut page = PageUrl::new(config.page_url.clone());
        page.replace_query_param(SESSION_QUERY_PARAM, session);
        config.page_url = page.as_url().clone();
    }

    if cli.auto_record {
        config.voice.auto_record = true;
    }

    if let Some(voice) = &cli.voice {
        config.voice.voice_id.clone_from(voice);
    }

    Ok(config)
}

/// Interactive voice chat on the terminal
async fn chat(config: Config) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config.backend_url.clone(), config.request_timeout)?;
    let player = HttpAudioPlayer::new(config.backend_url.clone(), config.request_timeout)?;

    let collaborators = Collaborators {
        backend: Arc::new(backend),
        microphone: Arc::new(CpalMicrophone::default()),
        player: Arc::new(player),
        sink: Box::new(TerminalSink::stdout()),
        navigation: Box::new(PageUrl::new(config.page_url.clone())),
    };

    println!("Voice Agent ({})", config.backend_url);
    println!(
        "Enter = record/stop, n = new session, a = toggle auto-record, h = history, q = quit\n"
    );

    let client = VoiceClient::new(collaborators, TurnSettings::from(&config));
    let handle = client.handle();

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.shutdown();
        }
    });

    spawn_command_reader(handle, config.voice.auto_record);

    client.run().await;
    Ok(())
}

/// Translate terminal lines into client actions
///
/// Reads on a plain thread so a pending read never holds up runtime shutdown.
fn spawn_command_reader(handle: ClientHandle, mut auto_record: bool) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read from stdin");
                    break;
                }
            };

            let sent = match line.trim() {
                "" => handle.press_record(),
                "n" => handle.new_session(),
                "a" => {
                    auto_record = !auto_record;
                    println!("Auto-record {}", if auto_record { "on" } else { "off" });
                    handle.set_auto_record(auto_record)
                }
                "h" => handle.show_history(),
                "q" => break,
                other => {
                    println!("Unknown command: {other}");
                    true
                }
            };

            if !sent {
                return;
            }
        }

        handle.shutdown();
    });
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let microphone = CpalMicrophone::default();
    let mut track = microphone.open().await?;
    tokio::time::sleep(Duration::from_secs(duration)).await;

    let fragments = track.stop()?;
    let wav: Vec<u8> = fragments.concat();
    let decoded = decode_audio(&wav)?;

    println!("Sample rate: {} Hz", decoded.sample_rate);
    println!("---");

    let per_second = usize::try_from(decoded.sample_rate)?.max(1);
    for (i, chunk) in decoded.samples.chunks(per_second).enumerate() {
        let energy = calculate_rms(chunk);
        let peak = chunk.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    println!("\n---");
    println!("Captured {} bytes of {} audio", wav.len(), track.media_type());
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Create a fresh backend session
async fn cmd_new_session(config: &Config) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config.backend_url.clone(), config.request_timeout)?;
    let token = backend.new_session().await?;

    let mut page = PageUrl::new(config.page_url.clone());
    page.replace_query_param(SESSION_QUERY_PARAM, &token);

    println!("Session: {token}");
    println!("Resume with: voice-agent --session {token}");
    println!("Page: {}", page.as_url());
    Ok(())
}

/// Print a session's history
async fn cmd_history(config: &Config, session: Option<String>) -> anyhow::Result<()> {
    let session = session
        .or_else(|| PageUrl::new(config.page_url.clone()).query_param(SESSION_QUERY_PARAM))
        .ok_or_else(|| anyhow::anyhow!("no session given and none in {}", config.page_url))?;

    let backend = HttpBackend::new(config.backend_url.clone(), config.request_timeout)?;
    let history = backend.history(&session).await?;

    TerminalSink::stdout().show_history(&history);
    Ok(())
}

/// Check backend health
async fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config.backend_url.clone(), config.request_timeout)?;
    let health = backend.health().await?;

    println!("Backend {} is reachable", backend.base_url());
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}
