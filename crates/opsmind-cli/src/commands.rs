//! Command implementations for the CLI.

use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use colored::Colorize;
use opsmind::{
    ApiClient, ChatSession, DEFAULT_HISTORY_LIMIT, MessageRole, StoreSnapshot, StreamOutcome,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::display::{
    StreamPrinter, display_assistant_end, display_assistant_header, display_connection_test,
    display_conversation, display_conversations, display_exec_result, display_help,
    display_history, display_server_status,
};

pub type Session = ChatSession<ApiClient>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: :{0}\nType :help for available commands")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Invalid port in '{0}'")]
    InvalidPort(String),
}

/// A parsed `:command` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    List,
    /// 1-based position in `:list`.
    Switch(usize),
    Delete(Option<usize>),
    Clear,
    History(u32),
    Exec {
        host: String,
        port: Option<u16>,
        command: String,
    },
    Status {
        host: String,
        port: Option<u16>,
    },
    Ping {
        host: String,
        port: Option<u16>,
    },
    Help,
    Quit,
}

/// Whether the REPL keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Command {
    /// Parses the text after the leading `:`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown commands and malformed arguments.
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let input = input.trim();
        let (name, rest) = input
            .split_once(char::is_whitespace)
            .map_or((input, ""), |(name, rest)| (name, rest.trim()));

        match name {
            "new" => Ok(Self::New),
            "list" | "ls" => Ok(Self::List),
            "switch" => match rest {
                "" => Err(CommandError::Usage(":switch <n>")),
                n => Ok(Self::Switch(parse_position(n)?)),
            },
            "delete" | "rm" => match rest {
                "" => Ok(Self::Delete(None)),
                n => Ok(Self::Delete(Some(parse_position(n)?))),
            },
            "clear" => Ok(Self::Clear),
            "history" => match rest {
                "" => Ok(Self::History(DEFAULT_HISTORY_LIMIT)),
                n => n
                    .parse()
                    .map(Self::History)
                    .map_err(|_| CommandError::InvalidNumber(n.to_string())),
            },
            "exec" => {
                let Some((target, command)) = rest.split_once(char::is_whitespace) else {
                    return Err(CommandError::Usage(":exec <host[:port]> <command>"));
                };
                let (host, port) = parse_target(target)?;
                Ok(Self::Exec {
                    host,
                    port,
                    command: command.trim().to_string(),
                })
            }
            "status" | "ping" => {
                if rest.is_empty() || rest.contains(char::is_whitespace) {
                    return Err(CommandError::Usage(if name == "status" {
                        ":status <host[:port]>"
                    } else {
                        ":ping <host[:port]>"
                    }));
                }
                let (host, port) = parse_target(rest)?;
                Ok(if name == "status" {
                    Self::Status { host, port }
                } else {
                    Self::Ping { host, port }
                })
            }
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            _ => Err(CommandError::Unknown(input.to_string())),
        }
    }
}

fn parse_position(text: &str) -> Result<usize, CommandError> {
    match text.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(CommandError::InvalidNumber(text.to_string())),
    }
}

/// Splits `host[:port]`.
fn parse_target(target: &str) -> Result<(String, Option<u16>), CommandError> {
    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => port
            .parse()
            .map(|port| (host.to_string(), Some(port)))
            .map_err(|_| CommandError::InvalidPort(target.to_string())),
        Some(_) => Err(CommandError::InvalidPort(target.to_string())),
        None => Ok((target.to_string(), None)),
    }
}

fn conversation_at(snapshot: &StoreSnapshot, position: usize) -> Result<Uuid> {
    position
        .checked_sub(1)
        .and_then(|idx| snapshot.conversations.get(idx))
        .map(|conversation| conversation.id)
        .with_context(|| format!("No conversation #{position}, see :list"))
}

fn active_conversation(session: &Session) -> Result<Uuid> {
    session
        .store()
        .active_conversation_id()
        .context("No active conversation")
}

/// Runs a parsed command.
///
/// # Errors
///
/// Returns an error if the command fails; the REPL reports it and continues.
pub async fn execute(session: &Session, command: Command) -> Result<Flow> {
    let mut stdout = io::stdout();
    match command {
        Command::New => {
            session.new_conversation();
            println!("{} Started a new conversation", "✓".bright_green());
        }
        Command::List => display_conversations(&session.store().snapshot(), &mut stdout)?,
        Command::Switch(position) => {
            let id = conversation_at(&session.store().snapshot(), position)?;
            session.switch_to(id)?;
            if let Some(conversation) = session.store().conversation(id) {
                display_conversation(&conversation, &mut stdout)?;
            }
        }
        Command::Delete(position) => {
            let id = match position {
                Some(position) => conversation_at(&session.store().snapshot(), position)?,
                None => active_conversation(session)?,
            };
            if !session.delete_conversation(id).await {
                bail!("Conversation {id} no longer exists");
            }
            println!("{} Deleted conversation", "✓".bright_green());
        }
        Command::Clear => {
            session.clear(active_conversation(session)?)?;
            println!("{} Cleared conversation", "✓".bright_green());
        }
        Command::History(limit) => {
            let history = session
                .remote_history(active_conversation(session)?, limit)
                .await?;
            display_history(&history, &mut stdout)?;
        }
        Command::Exec {
            host,
            port,
            command,
        } => {
            let result = session.execute_command(&host, &command, port).await?;
            display_exec_result(&result, &mut stdout)?;
        }
        Command::Status { host, port } => {
            let status = session.server_status(&host, port).await?;
            display_server_status(&status, &mut stdout)?;
        }
        Command::Ping { host, port } => {
            let test = session.test_connection(&host, port).await?;
            display_connection_test(&test, &mut stdout)?;
        }
        Command::Help => display_help(),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Sends a message and waits for the whole answer.
///
/// # Errors
///
/// Returns an error if the request failed.
pub async fn send_message(session: &Session, text: &str) -> Result<()> {
    let result = session.send(text).await;
    let conversation_id = active_conversation(session)?;

    display_assistant_header();
    let conversation = session
        .store()
        .conversation(conversation_id)
        .context("Active conversation disappeared")?;
    if let Some(message) = conversation
        .last_message()
        .filter(|m| m.role == MessageRole::Assistant)
    {
        StreamPrinter::default().render(message, &mut io::stdout())?;
    }
    display_assistant_end();

    result?;
    Ok(())
}

/// Sends a message and prints the answer while it streams in.
///
/// Ctrl-C cancels the stream; whatever arrived so far is kept.
///
/// # Errors
///
/// Returns an error if the request or the stream failed.
pub async fn stream_message(session: &Session, text: &str) -> Result<()> {
    let store = session.store();
    let before = store
        .snapshot()
        .active_conversation()
        .and_then(|conversation| conversation.last_message().map(|m| m.id));

    let cancel = CancellationToken::new();
    let mut changes = store.subscribe();
    let mut printer = StreamPrinter::default();
    let mut stdout = io::stdout();

    display_assistant_header();

    let send = session.send_streaming(text, cancel.clone());
    tokio::pin!(send);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            _ = &mut interrupt, if !cancel.is_cancelled() => {
                tracing::debug!("Cancelling stream on Ctrl-C");
                cancel.cancel();
            }
            Ok(()) = changes.changed() => {
                let snapshot = changes.borrow_and_update().clone();
                render_reply(&snapshot, before, &mut printer, &mut stdout)?;
            }
        }
    };

    render_reply(&store.snapshot(), before, &mut printer, &mut stdout)?;
    match result {
        Ok(StreamOutcome::Completed(_)) => display_assistant_end(),
        Ok(StreamOutcome::Cancelled(_)) => {
            println!();
            println!("{}", "(cancelled)".dimmed());
        }
        Err(e) => {
            display_assistant_end();
            return Err(e.into());
        }
    }
    Ok(())
}

/// Prints the newest assistant message of the active conversation, unless it
/// predates the current request.
fn render_reply(
    snapshot: &StoreSnapshot,
    before: Option<Uuid>,
    printer: &mut StreamPrinter,
    out: &mut impl Write,
) -> io::Result<()> {
    let Some(message) = snapshot
        .active_conversation()
        .and_then(|conversation| conversation.last_message())
        .filter(|m| m.role == MessageRole::Assistant && Some(m.id) != before)
    else {
        return Ok(());
    };
    printer.render(message, out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use opsmind::{ConversationStore, NewMessage};

    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("new"), Ok(Command::New));
        assert_eq!(Command::parse("ls"), Ok(Command::List));
        assert_eq!(Command::parse(" clear "), Ok(Command::Clear));
        assert_eq!(Command::parse("q"), Ok(Command::Quit));
        assert_eq!(Command::parse("delete"), Ok(Command::Delete(None)));
        assert_eq!(Command::parse("delete 2"), Ok(Command::Delete(Some(2))));
        assert_eq!(Command::parse("switch 3"), Ok(Command::Switch(3)));
        assert_eq!(
            Command::parse("history"),
            Ok(Command::History(DEFAULT_HISTORY_LIMIT))
        );
        assert_eq!(Command::parse("history 5"), Ok(Command::History(5)));
    }

    #[test]
    fn test_parse_rejects_bad_positions() {
        assert_eq!(
            Command::parse("switch 0"),
            Err(CommandError::InvalidNumber("0".to_string()))
        );
        assert_eq!(
            Command::parse("switch two"),
            Err(CommandError::InvalidNumber("two".to_string()))
        );
        assert_eq!(
            Command::parse("switch"),
            Err(CommandError::Usage(":switch <n>"))
        );
    }

    #[test]
    fn test_parse_exec_keeps_command_line() {
        assert_eq!(
            Command::parse("exec 10.0.0.5 df -h  /var"),
            Ok(Command::Exec {
                host: "10.0.0.5".to_string(),
                port: None,
                command: "df -h  /var".to_string(),
            })
        );
        assert_eq!(
            Command::parse("exec db-02:2222 uptime"),
            Ok(Command::Exec {
                host: "db-02".to_string(),
                port: Some(2222),
                command: "uptime".to_string(),
            })
        );
        assert!(matches!(
            Command::parse("exec db-02"),
            Err(CommandError::Usage(_))
        ));
    }

    #[test]
    fn test_parse_host_targets() {
        assert_eq!(
            Command::parse("status web-01"),
            Ok(Command::Status {
                host: "web-01".to_string(),
                port: None
            })
        );
        assert_eq!(
            Command::parse("ping web-01:22"),
            Ok(Command::Ping {
                host: "web-01".to_string(),
                port: Some(22)
            })
        );
        assert_eq!(
            Command::parse("ping web-01:ssh"),
            Err(CommandError::InvalidPort("web-01:ssh".to_string()))
        );
        assert_eq!(
            Command::parse("status :22"),
            Err(CommandError::InvalidPort(":22".to_string()))
        );
        assert!(matches!(
            Command::parse("status a b"),
            Err(CommandError::Usage(_))
        ));
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = Command::parse("reboot now").unwrap_err();
        assert_eq!(err, CommandError::Unknown("reboot now".to_string()));
        assert!(err.to_string().contains(":help"));
    }

    #[test]
    fn test_conversation_at_is_one_based() {
        let store = ConversationStore::new();
        let older = store.create_conversation();
        let newer = store.create_conversation();
        let snapshot = store.snapshot();

        assert_eq!(conversation_at(&snapshot, 1).unwrap(), newer);
        assert_eq!(conversation_at(&snapshot, 2).unwrap(), older);
        assert!(conversation_at(&snapshot, 3).is_err());
    }

    #[test]
    fn test_render_reply_skips_previous_answer() {
        colored::control::set_override(false);
        let store = ConversationStore::new();
        let id = store.create_conversation();
        store.add_message(id, NewMessage::user("uptime?"));
        let old = store
            .add_message(id, NewMessage::assistant("3 days"))
            .unwrap();

        let mut printer = StreamPrinter::default();
        let mut out = Vec::new();
        render_reply(&store.snapshot(), Some(old), &mut printer, &mut out).unwrap();
        assert!(out.is_empty());

        store.add_message(id, NewMessage::user("and db-02?"));
        render_reply(&store.snapshot(), Some(old), &mut printer, &mut out).unwrap();
        assert!(out.is_empty());

        let reply = store.add_message(id, NewMessage::placeholder()).unwrap();
        assert!(store.append_to_message(id, reply, "5 days"));
        render_reply(&store.snapshot(), Some(old), &mut printer, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "5 days");
    }
}
