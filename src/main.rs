use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};

use hope_voice::domain::config::SpeechBackendKind;
use hope_voice::{AppController, ConfigOverrides, Phase, SessionController, SessionEvent};

/// HopeVoice - talk to the assistant from the terminal
#[derive(Parser)]
#[command(name = "hope-voice", version, about)]
struct Cli {
    /// Directory holding config.toml (defaults to the OS config directory)
    #[arg(long, env = "HOPE_VOICE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// User identifier sent with each recording
    #[arg(long, env = "HOPE_VOICE_USER_ID")]
    user_id: Option<String>,

    /// Conversation identifier sent with each recording
    #[arg(long, env = "HOPE_VOICE_SESSION_ID")]
    session_id: Option<String>,

    /// Inference endpoint URL
    #[arg(long, env = "HOPE_VOICE_INFERENCE_URL")]
    inference_url: Option<String>,

    /// Speech backend used for responses
    #[arg(long, value_enum)]
    speech: Option<SpeechArg>,

    /// Probe the inference service and exit
    #[arg(long)]
    check: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SpeechArg {
    Cloud,
    Local,
    Off,
}

impl From<SpeechArg> for SpeechBackendKind {
    fn from(arg: SpeechArg) -> Self {
        match arg {
            SpeechArg::Cloud => SpeechBackendKind::Cloud,
            SpeechArg::Local => SpeechBackendKind::Local,
            SpeechArg::Off => SpeechBackendKind::Disabled,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hope-voice: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = ConfigOverrides {
        config_dir: cli.config_dir,
        user_id: cli.user_id,
        session_id: cli.session_id,
        inference_url: cli.inference_url,
        speech_backend: cli.speech.map(Into::into),
    };

    let app = AppController::new(overrides)?;

    if cli.check {
        app.check_health().await?;
        println!("Inference service is healthy");
        return Ok(());
    }

    let session = app.session().clone();
    let printer = tokio::spawn(print_events(session.clone()));

    println!("Config: {}", app.config_path().display());
    println!("Enter: start/stop recording   s: stop speaking   q: quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match line.trim() {
            "" => toggle(&session),
            "s" => {
                session.stop_speaking();
            }
            "q" => break,
            other => println!("Unknown command: {other}"),
        }
    }

    session.abandon().await;
    printer.abort();
    Ok(())
}

/// Enter starts a recording when idle, stops it while recording, and
/// interrupts speech while speaking.
fn toggle(session: &SessionController) {
    match session.phase() {
        Phase::Idle => {
            let session = session.clone();
            tokio::spawn(async move {
                let _ = session.start().await;
            });
        }
        Phase::Recording => {
            let session = session.clone();
            tokio::spawn(async move {
                let _ = session.stop().await;
            });
        }
        Phase::Speaking => {
            session.stop_speaking();
        }
        Phase::Processing => println!("Still thinking..."),
    }
}

async fn print_events(session: SessionController) {
    let mut events = session.subscribe();
    while let Ok(event) = events.recv().await {
        match event {
            SessionEvent::PhaseChanged { to, .. } => println!("[{to}]"),
            SessionEvent::Answered {
                transcription,
                response,
                ..
            } => {
                println!("You: {transcription}");
                println!("Hope: {response}");
            }
            SessionEvent::SpeechSkipped { reason, .. } => println!("(not speaking: {reason:?})"),
            SessionEvent::Error { kind, message, .. } => println!("Error ({kind:?}): {message}"),
        }
    }
}
