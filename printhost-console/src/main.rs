//! # printhost-console
//! A shell for driving [`printhost_core::Session`] against a real serial
//! printer or the in-process [`printhost_virtual::VirtualPrinter`],
//! inspired by Pronsole.

use std::time::Duration;

use futures_util::AsyncWriteExt;
use rustyline_async::{Readline, ReadlineEvent, SharedWriter};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use winnow::Parser;

use printhost_core::{
    observer::SessionObserver, serial::SerialTransport, session::Session, state::State,
    SessionConfig,
};
use printhost_virtual::{FaultPlan, VirtualPrinter};

mod commands;

use commands::Command;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("Console error: {0}")]
    Readline(#[from] rustyline_async::ReadlineError),
    #[error("Can't write to console")]
    Writer(#[from] futures_util::io::Error),
}

/// Forwards session events to the console as plain lines, decoupled from
/// the monitor task by an unbounded channel so `SessionObserver` methods
/// never block it.
struct ConsoleObserver {
    tx: mpsc::UnboundedSender<String>,
}

impl SessionObserver for ConsoleObserver {
    fn on_state_change(&self, old: State, new: State) {
        let _ = self.tx.send(format!("[state] {old} -> {new}\n"));
    }

    fn on_log(&self, line: &str) {
        let _ = self.tx.send(format!("{line}\n"));
    }

    fn on_print_done(&self) {
        let _ = self.tx.send("[print] done\n".to_string());
    }

    fn on_print_cancelled(&self) {
        let _ = self.tx.send("[print] cancelled\n".to_string());
    }

    fn on_error(&self, message: &str) {
        let _ = self.tx.send(format!("[error] {message}\n"));
    }
}

fn prompt_string(session: Option<&Session>) -> String {
    let status = session.map(|s| s.state().to_string()).unwrap_or_else(|| "Disconnected".to_string());
    format!("[{status}]> ")
}

fn setup_logging(writer: SharedWriter) {
    if let Ok(env_log) = tracing_subscriber::EnvFilter::builder()
        .with_env_var("PRINTHOST_LOG")
        .try_from_env()
    {
        let write_layer = tracing_subscriber::fmt::layer().with_writer(move || writer.clone());
        let format_layer = tracing_subscriber::fmt::layer().without_time().compact();
        let logger = tracing_subscriber::registry()
            .with(env_log)
            .with(write_layer)
            .with(format_layer);
        logger.init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    let mut session: Option<Session> = None;
    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<String>();

    let (mut readline, mut writer) = Readline::new(prompt_string(session.as_ref()))?;
    writer.write_all(commands::version_text().as_bytes()).await?;
    writer
        .write_all(b"type `:help` for a list of commands\n")
        .await?;
    setup_logging(writer.clone());

    const DISCONNECTED_ERROR: &[u8] = b"No printer connected!\n";

    loop {
        tokio::select! {
            Some(line) = log_rx.recv() => {
                writer.write_all(line.as_bytes()).await?;
            }
            Ok(event) = readline.readline() => {
                let line = match event {
                    ReadlineEvent::Line(line) => line,
                    _ => { readline.flush()?; return Ok(()); }
                };
                let command = match commands::parse_command.parse(&line) {
                    Ok(command) => command,
                    Err(_) => {
                        writer.write_all(b"invalid command!\n").await?;
                        continue;
                    }
                };
                match command {
                    Command::Clear => { readline.clear()?; }
                    Command::Quit => { readline.flush()?; return Ok(()); }
                    Command::Gcodes(codes) => {
                        match &session {
                            Some(session) => {
                                for code in codes {
                                    let _ = session.send_gcode(code).await;
                                }
                            }
                            None => { writer.write_all(DISCONNECTED_ERROR).await?; }
                        }
                    }
                    Command::PrintSdFile(name) => {
                        match &session {
                            Some(session) => { let _ = session.print_sd_file(name).await; }
                            None => { writer.write_all(DISCONNECTED_ERROR).await?; }
                        }
                    }
                    Command::Pause => {
                        match &session {
                            Some(session) => { let _ = session.pause().await; }
                            None => { writer.write_all(DISCONNECTED_ERROR).await?; }
                        }
                    }
                    Command::Resume => {
                        match &session {
                            Some(session) => { let _ = session.resume().await; }
                            None => { writer.write_all(DISCONNECTED_ERROR).await?; }
                        }
                    }
                    Command::Cancel => {
                        match &session {
                            Some(session) => { let _ = session.cancel().await; }
                            None => { writer.write_all(DISCONNECTED_ERROR).await?; }
                        }
                    }
                    Command::Status => {
                        let status = prompt_string(session.as_ref());
                        writer.write_all(status.as_bytes()).await?;
                    }
                    Command::Connect(path, baud) => {
                        let baud = baud.unwrap_or(115200);
                        match SerialTransport::open(path, baud, Duration::from_millis(500)) {
                            Ok(transport) => {
                                let observer = ConsoleObserver { tx: log_tx.clone() };
                                session = Some(Session::spawn(transport, SessionConfig::default(), observer));
                            }
                            Err(_) => { writer.write_all(b"Connection failed.\n").await?; }
                        }
                    }
                    Command::ConnectVirtual => {
                        let config = SessionConfig::default();
                        let transport = VirtualPrinter::with_sd_dir(FaultPlan::default(), &config.virtual_sd_dir);
                        let observer = ConsoleObserver { tx: log_tx.clone() };
                        session = Some(Session::spawn(transport, config, observer));
                        writer.write_all(b"Connected to virtual printer.\n").await?;
                    }
                    Command::Disconnect => {
                        if let Some(session) = session.take() {
                            let _ = session.disconnect().await;
                        }
                    }
                    Command::Help => { writer.write_all(commands::help_text().as_bytes()).await?; }
                    Command::Version => { writer.write_all(commands::version_text().as_bytes()).await?; }
                    Command::Unrecognized => { writer.write_all(b"Unsupported command!\n").await?; }
                }
                readline.add_history_entry(line);
            }
        }
        readline.update_prompt(&prompt_string(session.as_ref()))?;
    }
}
