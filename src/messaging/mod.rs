use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

pub mod channels;
pub mod chat_session;
pub mod collaborators;
pub mod database;
pub mod error;
pub mod message_store;
pub mod message_streaming;
pub mod thread_aggregator;

use crate::init_tracing;

use channels::{ChannelSpec, ParticipantId};
use chat_session::ChatSession;
use collaborators::{IdentityProvider, RosterProvider};
use database::{Database, SqliteMessageStore, SqliteRoster};
use error::{MessagingError, Result};
use message_store::MessageStore;
use message_streaming::{MessageBus, RealtimeBus};
use thread_aggregator::{AggregatorConfig, ThreadAggregator};

const DEFAULT_HISTORY_LIMIT: usize = 200;
const DEFAULT_AGGREGATE_LIMIT: usize = 400;
const DEFAULT_PREVIEW_CHARS: usize = 80;
const DEFAULT_STREAM_BUFFER: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagingConfig {
    /// Directory for application data
    pub data_dir: PathBuf,

    /// Directory for application logs
    pub logs_dir: PathBuf,

    /// Most recent messages loaded when a chat session opens
    pub history_limit: usize,

    /// Messages scanned when a thread aggregator builds its summaries
    pub aggregate_limit: usize,

    /// Characters kept in a conversation summary preview
    pub preview_chars: usize,

    /// Name of the shared channel every supervisor sees first
    pub general_channel: String,

    /// Label shown for the shared channel
    pub general_label: String,

    /// Per-filter buffer of the realtime bus
    pub stream_buffer: usize,
}

impl MessagingConfig {
    pub fn new(data_dir: &Path, logs_dir: &Path) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };

        Self {
            data_dir: data_dir.join(env_suffix),
            logs_dir: logs_dir.join(env_suffix),
            history_limit: DEFAULT_HISTORY_LIMIT,
            aggregate_limit: DEFAULT_AGGREGATE_LIMIT,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            general_channel: "general".to_string(),
            general_label: "General".to_string(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            general_channel: channels::ChannelId::named(&self.general_channel),
            general_label: self.general_label.clone(),
            aggregate_limit: self.aggregate_limit,
            preview_chars: self.preview_chars,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.history_limit == 0 || self.aggregate_limit == 0 {
            return Err(MessagingError::Configuration(
                "history_limit and aggregate_limit must be positive".to_string(),
            ));
        }
        if self.general_channel.trim().is_empty() {
            return Err(MessagingError::Configuration(
                "general_channel must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// SQLite-backed collaborators: database, bus, message store and roster.
pub struct Backend {
    pub database: Arc<Database>,
    pub bus: Arc<MessageBus>,
    pub store: Arc<SqliteMessageStore>,
    pub roster: Arc<SqliteRoster>,
}

impl Backend {
    /// Creates the data and log directories, initialises logging and opens
    /// the database (running migrations).
    pub async fn open(config: &MessagingConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;
        std::fs::create_dir_all(&config.logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", config.logs_dir))?;

        init_tracing(&config.logs_dir);

        tracing::debug!(
            target: "aula_messaging::backend",
            "Logging initialized in directory: {:?}",
            config.logs_dir
        );

        let database = Arc::new(Database::new(config.data_dir.join("aula.sqlite")).await?);
        Ok(Self::with_database(database, config.stream_buffer))
    }

    pub fn with_database(database: Arc<Database>, stream_buffer: usize) -> Self {
        let bus = Arc::new(MessageBus::with_buffer_size(stream_buffer));
        let store = Arc::new(SqliteMessageStore::new(database.clone(), bus.clone()));
        let roster = Arc::new(SqliteRoster::new(database.clone()));
        Self {
            database,
            bus,
            store,
            roster,
        }
    }
}

/// Entry point for views: opens chat sessions and thread aggregators over a
/// fixed set of collaborators.
pub struct Messaging {
    pub config: MessagingConfig,
    store: Arc<dyn MessageStore>,
    bus: Arc<dyn RealtimeBus>,
    identity: Arc<dyn IdentityProvider>,
    roster: Arc<dyn RosterProvider>,
}

impl std::fmt::Debug for Messaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messaging")
            .field("config", &self.config)
            .field("store", &"<REDACTED>")
            .field("bus", &"<REDACTED>")
            .field("identity", &"<REDACTED>")
            .field("roster", &"<REDACTED>")
            .finish()
    }
}

impl Messaging {
    pub fn new(
        config: MessagingConfig,
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn RealtimeBus>,
        identity: Arc<dyn IdentityProvider>,
        roster: Arc<dyn RosterProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            bus,
            identity,
            roster,
        })
    }

    /// Wires the SQLite backend as store, bus and roster.
    pub fn from_backend(
        config: MessagingConfig,
        backend: &Backend,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        Self::new(
            config,
            backend.store.clone(),
            backend.bus.clone(),
            identity,
            backend.roster.clone(),
        )
    }

    /// Opens a conversation view. When `viewer` is `None` the identity
    /// provider is asked once; until it answers the session stays `Loading`.
    pub async fn open_chat_session(
        &self,
        spec: ChannelSpec,
        viewer: Option<ParticipantId>,
    ) -> ChatSession {
        ChatSession::open(
            spec,
            viewer,
            self.store.clone(),
            self.bus.clone(),
            self.identity.clone(),
            self.config.history_limit,
        )
        .await
    }

    /// Opens the multi-conversation overview for a supervisor.
    pub async fn open_thread_aggregator(&self, supervisor: ParticipantId) -> ThreadAggregator {
        ThreadAggregator::open(
            supervisor,
            self.store.clone(),
            self.bus.clone(),
            self.roster.clone(),
            self.config.aggregator_config(),
        )
        .await
    }
}
