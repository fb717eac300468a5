//! Slash commands for interactive mode

use std::path::PathBuf;

/// Result of parsing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Analyse the image at this path
    SubmitImage(PathBuf),
    /// Print the chat history
    ShowHistory,
    /// Start a new conversation thread
    Reset,
    /// Show a message to the user
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for ordinary input.
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "image" | "i" => {
            if args.is_empty() {
                CommandResult::Message("Usage: /image <path>".to_string())
            } else {
                CommandResult::SubmitImage(PathBuf::from(args))
            }
        }

        "history" => CommandResult::ShowHistory,

        "reset" | "new" => CommandResult::Reset,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /image, /i <path>    Analyse a food photo (jpg, png, webp)
  /history             Show this session's questions and answers
  /reset, /new         Start a new session
  /help, /h, /?        Show this help message
  /quit, /exit, /q     Exit nibble

Anything else is asked as a follow-up about the current analysis, e.g.
  You missed a banana
  How much protein is in the eggs?"#
        .to_string()
}
