use anyhow::{Context, Result};
use recall_core::mode::Mode;
use recall_core::session_state::SessionView;
use recall_core::topic::TopicContent;
use recall_core::{SessionError, SessionOrchestrator};
use recall_tutor::config::Config;
use recall_tutor::cpal_backend::CpalBackend;
use recall_tutor::gemini_adapter::GeminiConnector;
use recall_tutor::presenter::{self, UserCommand};
use std::io::Write;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr so the status line on stdout stays readable.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "Configuration loaded successfully. Starting tutor with model {}...",
        config.model
    );

    // --- 3. Wire up the session ---
    let topic = TopicContent::photosynthesis();
    tracing::info!("Topic: {}", topic.title);
    let connector = GeminiConnector::new(&config.base_url, &config.model);
    let backend = CpalBackend::new(config.input_device.clone(), config.output_device.clone());
    let (orchestrator, handle) = SessionOrchestrator::new(
        config.gemini_api_key,
        topic,
        Box::new(connector),
        Box::new(backend),
    );

    // --- 4. Presentation ---
    println!("{}", presenter::HELP);
    let status = tokio::spawn(present(handle.subscribe()));

    // Interactive stdin reads cannot be cancelled, so they get their own thread.
    let (user_tx, mut user_rx) = mpsc::channel::<UserCommand>(8);
    std::thread::spawn(move || read_commands(user_tx));

    // --- 5. Run ---
    // Audio streams are not `Send`, so the orchestrator runs on this future
    // instead of being spawned.
    connected(handle.connect(Some(Mode::Intro)).await)?;
    let run = orchestrator.run();
    tokio::pin!(run);

    let mut input_open = true;
    loop {
        tokio::select! {
            _ = &mut run => {
                tracing::warn!("Session orchestrator stopped unexpectedly.");
                status.abort();
                return Ok(());
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            command = user_rx.recv(), if input_open => match command {
                Some(UserCommand::Connect(mode)) => connected(handle.connect(mode).await)?,
                Some(UserCommand::Disconnect) => handle.disconnect().await?,
                Some(UserCommand::Quit) => break,
                None => {
                    tracing::debug!("Standard input closed; Ctrl-C to quit.");
                    input_open = false;
                }
            },
        }
    }

    // --- 6. Shutdown ---
    // Dropping the last handle makes the orchestrator disconnect and return.
    tracing::info!("Shutting down...");
    drop(handle);
    run.await;
    status.abort();
    println!();
    Ok(())
}

/// Only a stopped orchestrator is fatal; a refused connect is already on the status line.
fn connected(result: Result<(), SessionError>) -> Result<()> {
    match result {
        Err(SessionError::Stopped) => Err(SessionError::Stopped.into()),
        Err(e) => {
            tracing::warn!("Connect refused: {}", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

/// Redraws the status line whenever the session view changes.
async fn present(mut view: watch::Receiver<SessionView>) {
    loop {
        let line = presenter::render(&view.borrow_and_update());
        print!("\r{}\x1b[K", line);
        if let Err(e) = std::io::stdout().flush() {
            tracing::debug!("Failed to flush status line: {}", e);
        }
        if view.changed().await.is_err() {
            break;
        }
    }
}

fn read_commands(tx: mpsc::Sender<UserCommand>) {
    for line in std::io::stdin().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read from stdin: {}", e);
                break;
            }
        };
        match presenter::parse_command(&line) {
            Ok(Some(command)) => {
                if tx.blocking_send(command).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => println!("\n{}", e),
        }
    }
}
