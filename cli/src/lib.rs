//! `retcon` command-line front end
//!
//! Each invocation loads the config, opens the conversation store and runs a
//! single command. `send` and `edit` stream the reply to stdout while it is
//! generated.

pub mod error;
mod ids;
mod render;

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::ArgAction;
use clap::Parser;
use clap::Subcommand;
use retcon_core::Config;
use retcon_core::Content;
use retcon_core::ConversationManager;
use retcon_core::ConversationStore;
use retcon_core::Direction;
use retcon_core::GeminiProvider;
use retcon_core::GenerationEvent;
use retcon_core::GenerationEventKind;
use retcon_core::GenerationOutcome;
use retcon_core::ImageAttachment;
use retcon_core::InMemoryPersistence;
use retcon_core::Persistence;
use retcon_core::Turn;
use retcon_core::config::API_KEY_ENV_VAR;
use retcon_core::config::resolve_api_key;
use retcon_persistence::FileStore;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::debug;
use tracing::info;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use uuid::Uuid;

pub use error::CliError;
pub use error::Result;

/// Chat with Gemini and rewrite history: edit any earlier message and flip
/// between the versions it produced.
#[derive(Parser, Debug)]
#[command(name = "retcon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.retcon/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Gemini API key
    #[arg(
        long,
        global = true,
        value_name = "KEY",
        env = API_KEY_ENV_VAR,
        hide_env_values = true
    )]
    pub api_key: Option<String>,

    /// Keep conversations in memory; nothing is read from or written to disk
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Verbosity level
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start an empty conversation and print its id
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// List conversations, newest first
    List,
    /// Print the active timeline of a conversation
    Show { conversation: String },
    /// Send a message and stream the reply
    Send {
        conversation: String,
        text: String,
        /// Attach an image (repeatable)
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
    },
    /// Replace a user message with new content and regenerate from there
    Edit {
        conversation: String,
        message: String,
        text: String,
        /// Attach an image (repeatable)
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
    },
    /// Show the previous version of a message
    Prev {
        conversation: String,
        message: String,
    },
    /// Show the next version of a message
    Next {
        conversation: String,
        message: String,
    },
    /// Delete a conversation
    Delete { conversation: String },
    /// Delete every conversation
    Clear,
}

impl Command {
    /// Whether the command talks to the model.
    pub const fn generates(&self) -> bool {
        matches!(self, Self::Send { .. } | Self::Edit { .. })
    }

    const fn mutates(&self) -> bool {
        !matches!(self, Self::List | Self::Show { .. })
    }
}

/// Map `-v` occurrences to a default log level; `RUST_LOG` overrides it.
pub const fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

pub struct App {
    manager: ConversationManager,
}

impl App {
    pub const fn new(manager: ConversationManager) -> Self {
        Self { manager }
    }

    /// Wire config, store and provider for one invocation.
    pub async fn from_cli(cli: &Cli) -> Result<Self> {
        let config = Config::load(cli.config.as_deref())?;

        let persistence: Arc<dyn Persistence> = if cli.ephemeral {
            debug!("Using in-memory conversation store");
            Arc::new(InMemoryPersistence::new())
        } else {
            let path = config.storage_path()?;
            info!("Using conversation store at {}", path.display());
            Arc::new(FileStore::from_config(path, &config.storage))
        };
        let store = ConversationStore::open(persistence).await?;

        // Only send and edit reach the provider, so the key is optional for
        // everything else.
        let api_key = match resolve_api_key(cli.api_key.clone()) {
            Ok(key) => key,
            Err(e) if cli.command.generates() => return Err(e.into()),
            Err(_) => String::new(),
        };
        let mut provider = GeminiProvider::new(api_key, config.model.clone())
            .with_system_instruction(config.system_instruction.clone());
        if let Some(endpoint) = &config.api_endpoint {
            provider = provider.with_endpoint(endpoint.clone());
        }

        let manager = ConversationManager::new(store, Arc::new(provider))
            .with_title_max_chars(config.title_max_chars);
        Ok(Self::new(manager))
    }

    pub async fn execute(&self, command: Command, out: &mut impl Write) -> Result<()> {
        let mutates = command.mutates();
        match command {
            Command::New { title } => {
                let conversation = self.manager.new_conversation(title).await;
                writeln!(out, "{}", conversation.id)?;
            }
            Command::List => {
                for summary in self.manager.conversations().await {
                    render::summary_line(out, &summary)?;
                }
            }
            Command::Show { conversation } => {
                let id = self.conversation_id(&conversation).await?;
                render::conversation(out, &self.manager.conversation(id).await?)?;
            }
            Command::Send {
                conversation,
                text,
                images,
            } => {
                let id = self.conversation_id(&conversation).await?;
                let content = load_content(text, &images).await?;
                let events = self.manager.subscribe();
                let turn = self.manager.send_message(id, content).await?;
                self.stream_reply(turn, events, out).await?;
            }
            Command::Edit {
                conversation,
                message,
                text,
                images,
            } => {
                let id = self.conversation_id(&conversation).await?;
                let message_id = self.message_id(id, &message).await?;
                let content = load_content(text, &images).await?;
                let events = self.manager.subscribe();
                let turn = self.manager.edit_message(id, message_id, content).await?;
                self.stream_reply(turn, events, out).await?;
            }
            Command::Prev {
                conversation,
                message,
            } => {
                self.switch(&conversation, &message, Direction::Previous, out)
                    .await?;
            }
            Command::Next {
                conversation,
                message,
            } => {
                self.switch(&conversation, &message, Direction::Next, out)
                    .await?;
            }
            Command::Delete { conversation } => {
                let id = self.conversation_id(&conversation).await?;
                self.manager.delete_conversation(id).await?;
                writeln!(out, "Deleted {id}")?;
            }
            Command::Clear => {
                self.manager.clear_all().await;
                writeln!(out, "Deleted all conversations")?;
            }
        }

        if mutates {
            self.manager.flush().await?;
        }
        Ok(())
    }

    async fn conversation_id(&self, input: &str) -> Result<Uuid> {
        let candidates = self.manager.conversations().await;
        ids::resolve("conversation", input, candidates.iter().map(|c| c.id))
    }

    async fn message_id(&self, conversation_id: Uuid, input: &str) -> Result<Uuid> {
        let conversation = self.manager.conversation(conversation_id).await?;
        ids::resolve(
            "message",
            input,
            conversation.messages.iter().map(|m| m.id),
        )
    }

    async fn switch(
        &self,
        conversation: &str,
        message: &str,
        direction: Direction,
        out: &mut impl Write,
    ) -> Result<()> {
        let id = self.conversation_id(conversation).await?;
        let message_id = self.message_id(id, message).await?;
        self.manager
            .switch_version(id, message_id, direction)
            .await?;
        render::conversation(out, &self.manager.conversation(id).await?)?;
        Ok(())
    }

    /// Print deltas for the turn's placeholder until its generation ends,
    /// then the citations it collected.
    async fn stream_reply(
        &self,
        turn: Turn,
        mut events: broadcast::Receiver<GenerationEvent>,
        out: &mut impl Write,
    ) -> Result<()> {
        let conversation_id = turn.conversation_id;
        let placeholder_id = turn.placeholder_id;
        let wait = turn.generation.wait();
        tokio::pin!(wait);

        let outcome = loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(event) => write_delta(out, placeholder_id, &event)?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Skipped {skipped} generation events");
                    }
                    Err(RecvError::Closed) => break (&mut wait).await?,
                },
                outcome = &mut wait => {
                    // Everything the task published is already buffered.
                    loop {
                        match events.try_recv() {
                            Ok(event) => write_delta(out, placeholder_id, &event)?,
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break outcome?;
                }
            }
        };
        writeln!(out)?;

        match outcome {
            GenerationOutcome::Completed => {
                let conversation = self.manager.conversation(conversation_id).await?;
                if let Some(message) = conversation.message(placeholder_id) {
                    render::citations(out, &message.citations)?;
                }
                Ok(())
            }
            GenerationOutcome::Failed(kind) => Err(CliError::General(kind.user_message().to_string())),
            GenerationOutcome::Discarded => Err(CliError::General(
                "the conversation was deleted before the reply finished".to_string(),
            )),
        }
    }
}

fn write_delta(out: &mut impl Write, placeholder_id: Uuid, event: &GenerationEvent) -> Result<()> {
    if event.message_id != placeholder_id {
        return Ok(());
    }
    if let GenerationEventKind::Delta(text) = &event.kind {
        write!(out, "{text}")?;
        out.flush()?;
    }
    Ok(())
}

async fn load_content(text: String, images: &[PathBuf]) -> Result<Content> {
    let mut attachments = Vec::with_capacity(images.len());
    for path in images {
        attachments.push(load_image(path).await?);
    }
    Ok(Content::with_images(text, attachments))
}

async fn load_image(path: &Path) -> Result<ImageAttachment> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_().as_str() != "image" {
        return Err(CliError::UnsupportedImage {
            path: path.to_path_buf(),
            mime: mime.to_string(),
        });
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(ImageAttachment {
        mime_type: mime.essence_str().to_string(),
        data: STANDARD.encode(bytes),
    })
}
