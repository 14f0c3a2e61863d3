//! REPL mode for interactive conversations.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use opsmind::AssistantApi;

use crate::commands::{Command, Flow, Session, execute, send_message, stream_message};

/// Runs the REPL loop.
///
/// Lines starting with `:` are commands; everything else goes to the assistant.
///
/// # Errors
///
/// Returns an error if the line editor cannot be initialized.
pub async fn run_repl(session: &Session, history_path: &Path, stream: bool) -> Result<()> {
    println!("{}", "opsmind".bright_magenta().bold());
    println!(
        "{}",
        format!("{} · :help for commands, Ctrl-D to exit", session.client().config().base_url)
            .dimmed()
    );
    println!();

    let mut rl = DefaultEditor::new()?;
    if rl.load_history(history_path).is_err() {
        tracing::debug!(path = %history_path.display(), "No line history loaded");
    }

    loop {
        let readline = rl.readline(&format!("{} ", ">".bright_green()));

        match readline {
            Ok(line) => {
                let line = line.trim();

                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = line.strip_prefix(':') {
                    let result = match Command::parse(cmd) {
                        Ok(command) => execute(session, command).await,
                        Err(e) => Err(e.into()),
                    };
                    match result {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => eprintln!("{} {e}", "Error:".bright_red()),
                    }
                    continue;
                }

                let result = if stream {
                    stream_message(session, line).await
                } else {
                    send_message(session, line).await
                };
                if let Err(e) = result {
                    eprintln!("{} {e}", "Error:".bright_red());
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("Exiting");
                break;
            }
            Err(err) => {
                eprintln!("{} {err}", "Error:".bright_red());
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(history_path) {
        tracing::warn!(path = %history_path.display(), error = %e, "Failed to save line history");
    }

    Ok(())
}
