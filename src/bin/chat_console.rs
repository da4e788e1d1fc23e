use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use aula_messaging::{
    Backend, ChannelSpec, ChatSession, Message, Messaging, MessagingConfig, ParticipantId,
    SessionIdentity, SessionState,
};

/// Console client for the Aula messaging core
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Directory for application data
    #[clap(long, value_name = "PATH", env = "AULA_DATA_DIR")]
    data_dir: PathBuf,

    /// Directory for application logs
    #[clap(long, value_name = "PATH", env = "AULA_LOGS_DIR")]
    logs_dir: PathBuf,

    /// Print results as JSON
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message as a participant
    Send {
        /// Sending participant
        #[clap(long = "as", value_name = "ID")]
        viewer: String,

        #[clap(flatten)]
        target: Target,

        /// Message text
        content: String,
    },

    /// Print the most recent messages of a conversation
    History {
        /// Participant viewing the conversation
        #[clap(long = "as", value_name = "ID")]
        viewer: String,

        #[clap(flatten)]
        target: Target,
    },

    /// Assign a counterpart to a supervisor
    Assign {
        #[clap(long, value_name = "ID")]
        supervisor: String,

        #[clap(long, value_name = "ID")]
        counterpart: String,

        /// Label shown in the supervisor's overview
        #[clap(long, default_value = "")]
        name: String,
    },

    /// Remove a counterpart from a supervisor's roster
    Deactivate {
        #[clap(long, value_name = "ID")]
        supervisor: String,

        #[clap(long, value_name = "ID")]
        counterpart: String,
    },

    /// Print a supervisor's conversation overview
    Threads {
        #[clap(long, value_name = "ID")]
        supervisor: String,
    },
}

/// Which conversation a command applies to.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Target {
    /// A named channel, such as `general`
    #[clap(long, value_name = "NAME")]
    channel: Option<String>,

    /// The other participant of a direct conversation
    #[clap(long, value_name = "ID")]
    to: Option<String>,
}

impl Target {
    fn spec(&self) -> ChannelSpec {
        match (&self.channel, &self.to) {
            (Some(name), _) => ChannelSpec::Named(name.clone()),
            (None, Some(counterpart)) => {
                ChannelSpec::WithCounterpart(ParticipantId::new(counterpart.as_str()))
            }
            // clap rejects a missing target before we get here.
            (None, None) => ChannelSpec::Named("general".to_string()),
        }
    }
}

async fn open_session(messaging: &Messaging, viewer: &str, target: &Target) -> Result<ChatSession> {
    let session = messaging
        .open_chat_session(target.spec(), Some(ParticipantId::new(viewer)))
        .await;
    if session.state() != SessionState::Ready {
        match session.error() {
            Some(err) => bail!("Failed to open conversation: {}", err),
            None => bail!("Failed to open conversation"),
        }
    }
    Ok(session)
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}: {}",
        message.created_at.format("%Y-%m-%d %H:%M:%S"),
        message.sender,
        message.content
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = MessagingConfig::new(&cli.data_dir, &cli.logs_dir);
    let backend = Backend::open(&config).await?;
    let messaging = Messaging::from_backend(config, &backend, Arc::new(SessionIdentity::pending()))?;

    match cli.command {
        Command::Send {
            viewer,
            target,
            content,
        } => {
            let mut session = open_session(&messaging, &viewer, &target).await?;
            match session.send(&content).await? {
                Some(message) if cli.json => println!("{}", serde_json::to_string_pretty(&message)?),
                Some(message) => print_message(&message),
                None => eprintln!("Nothing to send"),
            }
            session.close();
        }
        Command::History { viewer, target } => {
            let mut session = open_session(&messaging, &viewer, &target).await?;
            if cli.json {
                let messages: Vec<&Message> = session.messages().collect();
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else {
                session.messages().for_each(print_message);
            }
            session.close();
        }
        Command::Assign {
            supervisor,
            counterpart,
            name,
        } => {
            backend
                .roster
                .assign(
                    &ParticipantId::new(supervisor),
                    &ParticipantId::new(counterpart),
                    &name,
                )
                .await?;
        }
        Command::Deactivate {
            supervisor,
            counterpart,
        } => {
            let changed = backend
                .roster
                .set_active(
                    &ParticipantId::new(supervisor),
                    &ParticipantId::new(counterpart.as_str()),
                    false,
                )
                .await?;
            if !changed {
                bail!("{} is not assigned to this supervisor", counterpart);
            }
        }
        Command::Threads { supervisor } => {
            let mut aggregator = messaging
                .open_thread_aggregator(ParticipantId::new(supervisor))
                .await;
            if let aula_messaging::AggregatorState::Failed(err) = aggregator.state() {
                bail!("Failed to load conversations: {}", err);
            }
            let summaries = aggregator.summaries();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for summary in summaries {
                    let when = summary
                        .last_message_at
                        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!(
                        "{:<24} {:>3} {:<16} {}",
                        summary.counterpart_label,
                        summary.unread_count,
                        when,
                        summary.preview()
                    );
                }
            }
            aggregator.close();
        }
    }

    Ok(())
}
