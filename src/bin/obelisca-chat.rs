//! Interactive terminal chat against OpenAI and Azure OpenAI deployments.
//!
//! Conversations are stored in a local SQLite database and can be resumed.
//!
//! # Usage
//!
//! ```bash
//! # Start a new conversation with the first configured deployment
//! obelisca-chat
//!
//! # Use a specific settings file and deployment
//! obelisca-chat --settings ~/obelisca/settings.yaml --deployment gpt-4o
//!
//! # Resume a stored conversation
//! obelisca-chat --conversation 7
//!
//! # Disable colors (useful for piping output)
//! obelisca-chat --no-color
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `obelisca=info`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use time::macros::format_description;
use tracing_subscriber::EnvFilter;

use obelisca::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer, help_text,
    parse_command,
};
use obelisca::{
    Cl100kCounter, ConversationDatabase, DeploymentConfig, Error, OpenAiClient, Result, Role,
    Settings, TokenCounter,
};

type Session = ChatSession<OpenAiClient>;

/// Everything the REPL needs to create and reopen sessions.
struct App {
    settings: Settings,
    base: ChatConfig,
    store: Arc<ConversationDatabase>,
    counter: Arc<dyn TokenCounter>,
}

impl App {
    fn session_for(&self, deployment: DeploymentConfig) -> Result<Session> {
        let client = OpenAiClient::from_deployment(&deployment)?;
        let config = self.base.clone().with_deployment(deployment);
        Ok(ChatSession::with_counter(client, config, self.counter.clone()))
    }

    fn new_conversation(&self) -> Result<Session> {
        let session = self.session_for(self.base.deployment.clone())?;
        let count = self.store.conversation_count()?;
        let title = format!("Conversation {}", count + 1);
        let id = self.store.add_conversation(
            &title,
            session.deployment_name(),
            session.history(),
            0,
        )?;
        session.with_store(self.store.clone(), id)
    }

    fn open_conversation(&self, id: i64) -> Result<Session> {
        let record = self.store.conversation(id)?.ok_or_else(|| {
            Error::not_found(format!("conversation {id} does not exist"))
        })?;
        let deployment = self
            .settings
            .find_deployment(&record.deployment_name)
            .cloned()
            .ok_or_else(|| {
                Error::configuration(
                    format!(
                        "No deployment configuration found for '{}'.",
                        record.deployment_name
                    ),
                    Some("deployment".to_string()),
                )
            })?;
        let mut session = self.session_for(deployment)?;
        session.load_history(record.history);
        session.with_store(self.store.clone(), id)
    }
}

/// Main entry point for the obelisca-chat application.
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("obelisca=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("obelisca-chat [OPTIONS]");
    let settings = Settings::load(args.settings_path())?;
    let base = ChatConfig::resolve(&args, &settings)?;
    let store = Arc::new(ConversationDatabase::open(args.database_path(&settings))?);
    let counter: Arc<dyn TokenCounter> = Arc::new(Cl100kCounter::new()?);
    let mut renderer = PlainTextRenderer::with_color(base.use_color);
    let mut app = App {
        settings,
        base,
        store,
        counter,
    };

    let mut session = match args.conversation {
        Some(id) => app.open_conversation(id)?,
        None => app.new_conversation()?,
    };
    let mut rl = DefaultEditor::new()?;

    // Flag for interrupt handling while a request is in flight
    let interrupted = Arc::new(AtomicBool::new(false));

    // Set up Ctrl+C handler
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!(
        "Obelisca chat (deployment: {}, conversation: {})",
        session.deployment_name(),
        session.conversation_id().unwrap_or_default()
    );
    println!("Type /help for commands, /quit to exit\n");
    replay_history(&session, &mut renderer);

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    match run_command(&mut app, &mut session, &mut renderer, cmd).await {
                        Ok(true) => {
                            println!("Goodbye!");
                            break;
                        }
                        Ok(false) => {}
                        Err(err) if err.is_database() => {
                            tracing::error!("conversation database failed: {err}");
                            renderer.print_error(&format!(
                                "{err} (database: {})",
                                app.store
                                    .path()
                                    .map(|path| path.display().to_string())
                                    .unwrap_or_else(|| "in memory".to_string())
                            ));
                        }
                        Err(err) => renderer.print_error(&err.to_string()),
                    }
                    continue;
                }

                // Regular message - send to API
                renderer.print_status("Thinking...");
                tokio::select! {
                    result = session.send(line) => match result {
                        Ok(reply) => {
                            println!("Assistant:");
                            renderer.print_reply(&reply);
                        }
                        Err(err) => {
                            renderer.print_error(&format!("Error during API call: {err}"));
                        }
                    },
                    _ = wait_for_interrupt(&interrupted) => {
                        renderer.print_info("[interrupted]");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

async fn wait_for_interrupt(flag: &AtomicBool) {
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Runs one slash command; returns true when the REPL should exit.
async fn run_command(
    app: &mut App,
    session: &mut Session,
    renderer: &mut PlainTextRenderer,
    command: ChatCommand,
) -> Result<bool> {
    match command {
        ChatCommand::Quit => return Ok(true),
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {}", line);
            }
        }
        ChatCommand::New => {
            *session = app.new_conversation()?;
            renderer.print_info(&format!(
                "Started conversation {} with {}.",
                session.conversation_id().unwrap_or_default(),
                session.deployment_name()
            ));
        }
        ChatCommand::List => print_conversations(app, session)?,
        ChatCommand::Open(id) => {
            *session = app.open_conversation(id)?;
            renderer.print_info(&format!("Opened conversation {id}."));
            replay_history(session, renderer);
        }
        ChatCommand::Delete(id) => {
            if !app.store.delete_conversation(id)? {
                renderer.print_error(&format!("Conversation {id} does not exist."));
                return Ok(false);
            }
            renderer.print_info(&format!("Deleted conversation {id}."));
            if session.conversation_id() == Some(id) {
                *session = app.new_conversation()?;
                renderer.print_info(&format!(
                    "Started conversation {}.",
                    session.conversation_id().unwrap_or_default()
                ));
            }
        }
        ChatCommand::Rename(title) => {
            session.rename(&title)?;
            renderer.print_info(&format!("Renamed conversation to: {title}"));
        }
        ChatCommand::Summarize => {
            renderer.print_status("Thinking...");
            let summary = match session.generate_summary().await {
                Ok(summary) => summary,
                Err(err) => {
                    renderer.print_error(&format!("Failed to generate summary: {err}"));
                    return Ok(false);
                }
            };
            session.rename(&summary)?;
            renderer.print_info(&format!("Renamed conversation to: {summary}"));
        }
        ChatCommand::Attach(paths) => {
            let added = session.attach(&paths)?;
            if added.is_empty() {
                renderer.print_info("Nothing new to attach.");
            }
            for path in added {
                renderer.print_info(&format!("Attached {path}"));
            }
        }
        ChatCommand::Detach(path) => {
            if session.detach(&path)? {
                renderer.print_info(&format!("Detached {path}"));
            } else {
                renderer.print_error(&format!("{path} is not attached."));
            }
        }
        ChatCommand::Files => {
            let files = session.attached_files();
            if files.is_empty() {
                println!("    Attached files: (none)");
            } else {
                println!("    Attached files:");
                for file in files {
                    println!("      - {file}");
                }
            }
        }
        ChatCommand::Deployments => {
            println!("    Deployments:");
            for deployment in &app.settings.deployments {
                let marker = if deployment.deployment_name == app.base.deployment.deployment_name {
                    "*"
                } else {
                    " "
                };
                println!(
                    "    {marker} {} ({}, {})",
                    deployment.deployment_name, deployment.kind, deployment.endpoint
                );
            }
        }
        ChatCommand::Deployment(name) => {
            let deployment = app.settings.find_deployment(&name).cloned().ok_or_else(|| {
                Error::configuration(
                    format!("No deployment configuration found for '{name}'."),
                    Some("deployment".to_string()),
                )
            })?;
            app.base.deployment = deployment;
            renderer.print_info(&format!(
                "New conversations will use {name}. Use /new to start one."
            ));
        }
        ChatCommand::Tokens => {
            let stats = session.stats();
            println!(
                "    Context tokens: {} / {}",
                stats.context_tokens, stats.max_context_tokens
            );
            println!("    Last request total: {}", stats.last_total_tokens);
        }
        ChatCommand::Stats => print_stats(session),
        ChatCommand::Vacuum => {
            let store = app.store.clone();
            tokio::task::spawn_blocking(move || store.vacuum())
                .await
                .map_err(|err| Error::database("vacuum task failed", Some(Box::new(err))))??;
            renderer.print_info("Database vacuumed.");
        }
        ChatCommand::SaveTranscript(path) => {
            session.save_transcript_to(&path)?;
            renderer.print_info(&format!("Transcript saved to {}", path));
        }
        ChatCommand::LoadTranscript(path) => {
            session.load_transcript_from(&path)?;
            renderer.print_info(&format!("Transcript loaded from {}", path));
        }
        ChatCommand::Clear => {
            session.clear();
            renderer.print_info("Conversation cleared.");
        }
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
    Ok(false)
}

fn replay_history(session: &Session, renderer: &mut PlainTextRenderer) {
    for message in session.history().iter().skip(1) {
        match message.role {
            Role::User => println!("You: {}", message.content),
            Role::Assistant => {
                println!("Assistant:");
                renderer.print_reply(&message.content);
            }
            Role::System => {}
        }
    }
}

fn print_conversations(app: &App, session: &Session) -> Result<()> {
    let conversations = app.store.all_conversations()?;
    if conversations.is_empty() {
        println!("    No stored conversations.");
        return Ok(());
    }
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]");
    println!("    Conversations:");
    for conversation in conversations {
        let marker = if session.conversation_id() == Some(conversation.id) {
            "*"
        } else {
            " "
        };
        let created = conversation
            .created_at
            .format(format)
            .unwrap_or_else(|_| "?".to_string());
        println!(
            "    {marker} {:>4}  {}  {}  [{}; {} messages; {} tokens]",
            conversation.id,
            created,
            conversation.title,
            conversation.deployment_name,
            conversation.message_count,
            conversation.tokens
        );
    }
    Ok(())
}

fn print_stats(session: &Session) {
    let stats = session.stats();
    println!("    Session Statistics:");
    println!("      Deployment: {}", stats.deployment);
    match stats.conversation_id {
        Some(id) => println!("      Conversation: {id}"),
        None => println!("      Conversation: (not stored)"),
    }
    println!("      Messages: {}", stats.message_count);
    println!(
        "      Context tokens: {} / {}",
        stats.context_tokens, stats.max_context_tokens
    );
    println!("      Last request total tokens: {}", stats.last_total_tokens);
    if stats.attached_files.is_empty() {
        println!("      Attached files: (none)");
    } else {
        println!("      Attached files:");
        for file in &stats.attached_files {
            println!("        - {file}");
        }
    }
}
