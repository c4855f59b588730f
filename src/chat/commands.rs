//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to manage conversations and attachments without sending
//! messages to the API.

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the API.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Start a new stored conversation.
    New,

    /// List stored conversations.
    List,

    /// Switch to a stored conversation.
    Open(i64),

    /// Delete a stored conversation.
    Delete(i64),

    /// Rename the current conversation.
    Rename(String),

    /// Ask the model for a short title and rename the conversation with it.
    Summarize,

    /// Attach files or directories (comma separated) to the conversation.
    Attach(Vec<String>),

    /// Detach one file from the conversation.
    Detach(String),

    /// List attached files.
    Files,

    /// List configured deployments.
    Deployments,

    /// Select the deployment used for new conversations.
    Deployment(String),

    /// Show context token counts.
    Tokens,

    /// Display session statistics.
    Stats,

    /// Compact the conversation database.
    Vacuum,

    /// Save the transcript to a file.
    SaveTranscript(String),

    /// Load conversation history from a file.
    LoadTranscript(String),

    /// Clear the conversation history.
    Clear,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use obelisca::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert_eq!(parse_command("/open 3"), Some(ChatCommand::Open(3)));
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ChatCommand::New,
        "list" | "ls" => ChatCommand::List,
        "open" => parse_id_command(argument, ChatCommand::Open, "/open"),
        "delete" | "rm" => parse_id_command(argument, ChatCommand::Delete, "/delete"),
        "rename" => match argument {
            Some(title) => ChatCommand::Rename(title.to_string()),
            None => ChatCommand::Invalid("/rename requires a title".to_string()),
        },
        "summarize" => ChatCommand::Summarize,
        "attach" => match argument.map(split_paths) {
            Some(paths) if !paths.is_empty() => ChatCommand::Attach(paths),
            _ => ChatCommand::Invalid("/attach requires a path".to_string()),
        },
        "detach" => match argument {
            Some(path) => ChatCommand::Detach(path.to_string()),
            None => ChatCommand::Invalid("/detach requires a path".to_string()),
        },
        "files" => ChatCommand::Files,
        "deployments" => ChatCommand::Deployments,
        "deployment" => match argument {
            Some(name) => ChatCommand::Deployment(name.to_string()),
            None => ChatCommand::Invalid("/deployment requires a deployment name".to_string()),
        },
        "tokens" => ChatCommand::Tokens,
        "stats" | "status" => ChatCommand::Stats,
        "vacuum" => ChatCommand::Vacuum,
        "save" => match argument {
            Some(arg) => ChatCommand::SaveTranscript(arg.to_string()),
            None => ChatCommand::Invalid("/save requires a file path".to_string()),
        },
        "load" => match argument {
            Some(arg) => ChatCommand::LoadTranscript(arg.to_string()),
            None => ChatCommand::Invalid("/load requires a file path".to_string()),
        },
        "clear" => ChatCommand::Clear,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn parse_id_command<F>(argument: Option<&str>, constructor: F, name: &str) -> ChatCommand
where
    F: Fn(i64) -> ChatCommand,
{
    match argument {
        Some(arg) => match arg.parse::<i64>() {
            Ok(value) if value > 0 => constructor(value),
            _ => ChatCommand::Invalid(format!("{} expects a conversation id", name)),
        },
        None => ChatCommand::Invalid(format!("{} requires a conversation id", name)),
    }
}

fn split_paths(argument: &str) -> Vec<String> {
    argument
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new conversation
  /list                  List stored conversations
  /open <id>             Switch to a stored conversation
  /delete <id>           Delete a stored conversation
  /rename <title>        Rename the current conversation
  /summarize             Title the conversation with a model-written summary
  /attach <path[,path]>  Attach files or directories to every message
  /detach <path>         Detach a file
  /files                 List attached files
  /deployments           List configured deployments
  /deployment <name>     Use a deployment for new conversations
  /tokens                Show context token usage
  /stats                 Show session statistics
  /vacuum                Compact the conversation database
  /save <file>           Save the current transcript
  /load <file>           Load a transcript from disk
  /clear                 Clear conversation history
  /help                  Show this help message
  /quit                  Exit the chat"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /quit  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_clear() {
        assert_eq!(parse_command("/clear"), Some(ChatCommand::Clear));
        assert_eq!(parse_command("/CLEAR"), Some(ChatCommand::Clear));
    }

    #[test]
    fn parse_conversation_commands() {
        assert_eq!(parse_command("/new"), Some(ChatCommand::New));
        assert_eq!(parse_command("/list"), Some(ChatCommand::List));
        assert_eq!(parse_command("/open 12"), Some(ChatCommand::Open(12)));
        assert_eq!(parse_command("/delete  4 "), Some(ChatCommand::Delete(4)));
        assert_eq!(parse_command("/summarize"), Some(ChatCommand::Summarize));
        assert_eq!(
            parse_command("/rename  Rust lifetimes  "),
            Some(ChatCommand::Rename("Rust lifetimes".to_string()))
        );
    }

    #[test]
    fn ids_must_be_positive_integers() {
        assert!(matches!(
            parse_command("/open"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
        assert!(matches!(
            parse_command("/open abc"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("expects")
        ));
        assert!(matches!(
            parse_command("/delete -1"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_attach_lists() {
        assert_eq!(
            parse_command("/attach src/main.rs, docs ,README.md"),
            Some(ChatCommand::Attach(vec![
                "src/main.rs".to_string(),
                "docs".to_string(),
                "README.md".to_string(),
            ]))
        );
        assert!(matches!(
            parse_command("/attach , ,"),
            Some(ChatCommand::Invalid(_))
        ));
        assert_eq!(
            parse_command("/detach docs/a b.txt"),
            Some(ChatCommand::Detach("docs/a b.txt".to_string()))
        );
        assert_eq!(parse_command("/files"), Some(ChatCommand::Files));
    }

    #[test]
    fn parse_deployment_commands() {
        assert_eq!(parse_command("/deployments"), Some(ChatCommand::Deployments));
        assert_eq!(
            parse_command("/deployment gpt-4o"),
            Some(ChatCommand::Deployment("gpt-4o".to_string()))
        );
        assert!(matches!(
            parse_command("/deployment"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_transcript_commands() {
        assert_eq!(
            parse_command("/save session.json"),
            Some(ChatCommand::SaveTranscript("session.json".to_string()))
        );
        assert_eq!(
            parse_command("/load session.json"),
            Some(ChatCommand::LoadTranscript("session.json".to_string()))
        );
        assert!(matches!(
            parse_command("/save"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("file path")
        ));
    }

    #[test]
    fn parse_info_commands() {
        assert_eq!(parse_command("/tokens"), Some(ChatCommand::Tokens));
        assert_eq!(parse_command("/stats"), Some(ChatCommand::Stats));
        assert_eq!(parse_command("/vacuum"), Some(ChatCommand::Vacuum));
        assert_eq!(parse_command("/help"), Some(ChatCommand::Help));
    }

    #[test]
    fn unknown_command_is_invalid() {
        assert_eq!(
            parse_command("/model gpt-4"),
            Some(ChatCommand::Invalid("Unknown command: /model".to_string()))
        );
    }

    #[test]
    fn non_commands() {
        assert_eq!(parse_command("Hello, there!"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("  "), None);
        assert_eq!(parse_command("path/with/slash"), None);
    }

    #[test]
    fn help_text_not_empty() {
        let help = help_text();
        assert!(!help.is_empty());
        for command in ["/quit", "/clear", "/attach", "/open", "/vacuum"] {
            assert!(help.contains(command), "missing {command}");
        }
    }
}
