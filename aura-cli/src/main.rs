mod config_store;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use aura_audio::{CpalMicrophone, CpalSpeaker, list_input_device_names, list_output_device_names};
use aura_core::config::SessionConfig;
use aura_core::prompt::HELLO_TURN;
use aura_core::types::{SessionStatus, SessionSummary};
use aura_engine::live::{SessionDeps, start_session};
use aura_engine::traits::SessionHost;
use aura_engine::transport::GeminiConnector;
use aura_providers::gemini_live::GeminiLiveConfig;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use url::Url;

use crate::config_store::{ConfigStore, load_or_default};
use crate::render::{TranscriptPrinter, print_summary};

#[derive(Parser)]
#[command(name = "aura", about = "Spoken daily affirmation sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a live session with the microphone and speakers
    Run {
        /// Use the first-time greeting
        #[arg(long)]
        first_time: bool,

        /// JSON session config; defaults apply to missing fields
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input device name (see `aura devices`)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// List audio devices
    Devices,
    /// Write the default session config to PATH
    InitConfig {
        path: PathBuf,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

enum Step {
    View { open: bool },
    Finished(Option<SessionSummary>),
    Typed(Option<String>),
    Interrupted,
}

/// A typed line becomes a user turn; an empty line nudges the agent.
fn typed_turn(line: &str) -> String {
    match line.trim() {
        "" => HELLO_TURN.to_string(),
        text => text.to_string(),
    }
}

struct TerminalHost {
    finished: mpsc::UnboundedSender<SessionSummary>,
}

impl SessionHost for TerminalHost {
    fn on_finish(&self, summary: SessionSummary) {
        let _ = self.finished.send(summary);
    }

    fn on_closed(&self) {
        log::debug!("session resources released");
    }
}

fn api_key_from_env() -> anyhow::Result<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("API key missing: set GEMINI_API_KEY"))
}

fn live_config(cfg: &SessionConfig, api_key: String) -> anyhow::Result<GeminiLiveConfig> {
    Ok(GeminiLiveConfig {
        ws_url: Url::parse(&cfg.ws_url).with_context(|| format!("parse ws_url: {}", cfg.ws_url))?,
        api_key,
        connect_timeout: cfg.connect_timeout(),
    })
}

async fn run(first_time: bool, config: Option<PathBuf>, device: Option<String>) -> anyhow::Result<()> {
    let mut cfg = load_or_default(config.as_deref())?;
    if device.is_some() {
        cfg.microphone_device = device;
    }
    let api_key = api_key_from_env()?;

    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    let deps = SessionDeps {
        microphone: Arc::new(CpalMicrophone::new(cfg.microphone_device.clone())),
        speaker: Arc::new(CpalSpeaker::new()),
        connector: Arc::new(GeminiConnector::new(live_config(&cfg, api_key)?)),
        host: Arc::new(TerminalHost {
            finished: finished_tx,
        }),
    };

    let handle = start_session(cfg, first_time, deps);
    log::info!("session {} started", handle.id());

    let mut views = handle.subscribe();
    let mut printer = TranscriptPrinter::new();
    let mut stdout = std::io::stdout();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    eprintln!("Type a line and press Enter to speak to Aura; an empty line says hello.");

    let summary = loop {
        let step = tokio::select! {
            changed = views.changed() => Step::View { open: changed.is_ok() },
            summary = finished_rx.recv() => Step::Finished(summary),
            line = input.next_line(), if input_open => Step::Typed(line.ok().flatten()),
            _ = tokio::signal::ctrl_c() => Step::Interrupted,
        };

        match step {
            Step::View { open } => {
                let view = views.borrow_and_update().clone();
                printer.update(&view, &mut stdout)?;
                if !open || view.status == SessionStatus::Error {
                    break None;
                }
            }
            Step::Finished(summary) => break summary,
            Step::Typed(Some(line)) => handle.send_text(typed_turn(&line)).await,
            Step::Typed(None) => input_open = false,
            Step::Interrupted => {
                log::info!("interrupted; closing session");
                break None;
            }
        }
    };

    handle.close().await;

    match summary {
        Some(s) => print_summary(&s, &mut stdout)?,
        None if handle.view().status == SessionStatus::Error => {
            return Err(anyhow!(
                "{}",
                handle.view().error_message.unwrap_or_else(|| "session failed".into())
            ));
        }
        None => {}
    }
    Ok(())
}

fn print_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in list_input_device_names()? {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in list_output_device_names()? {
        println!("  {name}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Library crates log through `log`; the subscriber picks those records up.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            first_time,
            config,
            device,
        } => run(first_time, config, device).await,
        Commands::Devices => print_devices(),
        Commands::InitConfig { path, force } => {
            let store = ConfigStore::at_path(path);
            store.save(&SessionConfig::default(), force)?;
            println!("Wrote {}", store.path().display());
            Ok(())
        }
    }
}
