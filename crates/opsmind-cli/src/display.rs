//! Display utilities for CLI output formatting
//!
//! Provides formatted output for messages, tool calls, conversations and the
//! results of direct host commands.

use std::collections::HashMap;
use std::io::{self, Write};

use colored::Colorize;
use opsmind::{
    ConnectionTest, Conversation, DeliveryStatus, Message, MessageRole, ServerStatus,
    SshExecuteResponse, StoreSnapshot, ToolCall, ToolCallStatus,
};
use serde_json::Value;

const PREVIEW_CHARS: usize = 200;

/// Cuts `text` to [`PREVIEW_CHARS`] characters, noting the full length.
fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}... ({} chars)", &text[..idx], text.chars().count()),
        None => text.to_string(),
    }
}

/// Display a tool call started by the assistant
pub fn display_tool_call_started(call: &ToolCall, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{} {}", "⚙".bright_yellow(), call.name.bright_yellow().bold())?;
    for (key, value) in &call.input {
        let value = value
            .as_str()
            .map_or_else(|| value.to_string(), str::to_string);
        writeln!(out, "  {} {}", format!("{key}:").dimmed(), value)?;
    }
    Ok(())
}

/// Display how a tool call ended
pub fn display_tool_result(call: &ToolCall, out: &mut impl Write) -> io::Result<()> {
    let label = match call.status {
        ToolCallStatus::Error => format!("✗ {}", call.name).bright_red(),
        _ => format!("✓ {}", call.name).bright_green(),
    };
    writeln!(out, "{label}")?;
    if let Some(output) = call.output.as_deref().filter(|o| !o.is_empty()) {
        writeln!(out, "  {}", preview(output))?;
    }
    Ok(())
}

/// Display assistant response header
pub fn display_assistant_header() {
    println!("{}", "Assistant".bright_magenta().bold());
    let _ = io::stdout().flush();
}

/// Display end of assistant flow
pub fn display_assistant_end() {
    println!();
}

/// Writes an assistant message incrementally as the store fills it.
///
/// Content is append-only while streaming, so each render prints only the
/// unseen suffix. Tool calls are printed once when they start and once more
/// when they resolve.
#[derive(Debug)]
pub struct StreamPrinter {
    printed: usize,
    at_line_start: bool,
    tools: HashMap<String, ToolCallStatus>,
}

impl Default for StreamPrinter {
    fn default() -> Self {
        Self {
            printed: 0,
            at_line_start: true,
            tools: HashMap::new(),
        }
    }
}

impl StreamPrinter {
    /// Prints whatever changed in `message` since the last call.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `out` fails.
    pub fn render(&mut self, message: &Message, out: &mut impl Write) -> io::Result<()> {
        for call in &message.tool_calls {
            let seen = self.tools.get(&call.id).copied();
            if seen.is_none() {
                self.break_line(out)?;
                display_tool_call_started(call, out)?;
            }
            if call.status.is_terminal() && !seen.is_some_and(ToolCallStatus::is_terminal) {
                self.break_line(out)?;
                display_tool_result(call, out)?;
            }
            self.tools.insert(call.id.clone(), call.status);
        }

        if let Some(delta) = message.content.get(self.printed..)
            && !delta.is_empty()
        {
            write!(out, "{delta}")?;
            self.printed = message.content.len();
            self.at_line_start = delta.ends_with('\n');
        }
        out.flush()
    }

    fn break_line(&mut self, out: &mut impl Write) -> io::Result<()> {
        if !self.at_line_start {
            writeln!(out)?;
            self.at_line_start = true;
        }
        Ok(())
    }

    /// Whether anything was written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.printed == 0 && self.tools.is_empty()
    }
}

/// Display one message of a transcript
pub fn display_message(message: &Message, out: &mut impl Write) -> io::Result<()> {
    let role = match message.role {
        MessageRole::User => "You".bright_green(),
        MessageRole::Assistant => "Assistant".bright_magenta(),
    };
    let marker = match message.status {
        DeliveryStatus::Sent => String::new(),
        DeliveryStatus::Sending => format!(" {}", "(sending)".dimmed()),
        DeliveryStatus::Error => format!(" {}", "(failed)".bright_red()),
    };
    writeln!(
        out,
        "{} {}{} {}",
        "●".bright_white(),
        role.bold(),
        marker,
        message.timestamp.format("%H:%M").to_string().dimmed()
    )?;

    for call in &message.tool_calls {
        display_tool_result(call, out)?;
    }
    if !message.content.is_empty() {
        writeln!(out, "  {}", message.content)?;
    }
    writeln!(out)
}

/// Display a whole conversation
pub fn display_conversation(conversation: &Conversation, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", conversation.title.bright_cyan().bold())?;
    if conversation.messages.is_empty() {
        writeln!(out, "{}", "No messages in this conversation".dimmed())?;
    }
    for message in &conversation.messages {
        display_message(message, out)?;
    }
    Ok(())
}

/// Display all conversations, most recent first, numbered for `:switch`
pub fn display_conversations(snapshot: &StoreSnapshot, out: &mut impl Write) -> io::Result<()> {
    if snapshot.conversations.is_empty() {
        return writeln!(out, "No conversations yet");
    }

    writeln!(out, "Conversations:")?;
    for (idx, conversation) in snapshot.conversations.iter().enumerate() {
        let active = snapshot.active_conversation_id == Some(conversation.id);
        let marker = if active { "*".bright_green() } else { " ".normal() };
        writeln!(
            out,
            "{marker} {:>2}. {} {}",
            idx + 1,
            conversation.title,
            format!(
                "({} messages, {})",
                conversation.messages.len(),
                conversation.updated_at.format("%Y-%m-%d %H:%M")
            )
            .dimmed()
        )?;
    }
    Ok(())
}

/// Display the remote side's stored history of a conversation
///
/// Entries carrying `query`/`answer` pairs are shown as turns; anything else is
/// printed as JSON.
pub fn display_history(history: &Value, out: &mut impl Write) -> io::Result<()> {
    let Some(entries) = history.get("data").and_then(Value::as_array) else {
        return writeln!(
            out,
            "{}",
            serde_json::to_string_pretty(history).unwrap_or_else(|_| history.to_string())
        );
    };

    if entries.is_empty() {
        return writeln!(out, "No remote messages for this conversation");
    }

    for entry in entries {
        if let Some(query) = entry.get("query").and_then(Value::as_str) {
            writeln!(out, "{} {}", "You:".bright_green().bold(), query)?;
        }
        if let Some(answer) = entry.get("answer").and_then(Value::as_str) {
            writeln!(out, "{} {}", "Assistant:".bright_magenta().bold(), preview(answer))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Display the result of a remote command
pub fn display_exec_result(result: &SshExecuteResponse, out: &mut impl Write) -> io::Result<()> {
    let status = if result.success {
        format!("✓ exit {}", result.exit_code).bright_green()
    } else {
        format!("✗ exit {}", result.exit_code).bright_red()
    };
    let timing = result
        .execution_time_ms
        .map(|ms| format!(" ({ms:.0} ms)"))
        .unwrap_or_default();
    writeln!(out, "{status}{}", timing.dimmed())?;

    if !result.stdout.is_empty() {
        write!(out, "{}", result.stdout)?;
        if !result.stdout.ends_with('\n') {
            writeln!(out)?;
        }
    }
    if !result.stderr.is_empty() {
        writeln!(out, "{}", result.stderr.trim_end().red())?;
    }
    Ok(())
}

/// Display usage figures of a host
pub fn display_server_status(status: &ServerStatus, out: &mut impl Write) -> io::Result<()> {
    let state = if status.online {
        "online".bright_green()
    } else {
        "offline".bright_red()
    };
    writeln!(out, "{} {}", status.host.bright_cyan().bold(), state)?;

    let rows = [
        ("CPU", &status.cpu_usage),
        ("Memory", &status.memory_usage),
        ("Disk", &status.disk_usage),
        ("Load", &status.load_average),
        ("Uptime", &status.uptime),
    ];
    for (label, value) in rows {
        if let Some(value) = value {
            writeln!(out, "  {:<8} {value}", format!("{label}:").dimmed())?;
        }
    }
    Ok(())
}

/// Display a connection test
pub fn display_connection_test(test: &ConnectionTest, out: &mut impl Write) -> io::Result<()> {
    let label = if test.success {
        "✓ reachable".bright_green()
    } else {
        "✗ unreachable".bright_red()
    };
    let latency = test
        .latency_ms
        .map(|ms| format!(" ({ms:.0} ms)"))
        .unwrap_or_default();
    writeln!(out, "{label}{}", latency.dimmed())?;
    if !test.message.is_empty() {
        writeln!(out, "  {}", test.message)?;
    }
    Ok(())
}

/// Display REPL help
pub fn display_help() {
    println!("{}", "REPL Commands:".bright_cyan().bold());
    let rows = [
        (":new", "Start a new conversation"),
        (":list", "List conversations"),
        (":switch <n>", "Switch to conversation n"),
        (":delete [n]", "Delete conversation n, or the active one"),
        (":clear", "Remove all messages of the active conversation"),
        (":history [limit]", "Show the assistant's stored history"),
        (":exec <host[:port]> <cmd>", "Run a command on a host"),
        (":status <host[:port]>", "Show usage figures of a host"),
        (":ping <host[:port]>", "Test the connection to a host"),
        (":help", "Show this help message"),
        (":quit", "Exit the REPL"),
    ];
    for (command, text) in rows {
        println!("  {} - {text}", command.bright_yellow());
    }
    println!("  {} - Cancel a streaming answer", "Ctrl-C".bright_yellow());
    println!();
}
