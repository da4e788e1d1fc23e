//! Messaging core for the Aula education platform: conversation addressing,
//! message persistence, realtime delivery, the single-conversation chat
//! session and the supervisor's multi-conversation overview.

use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

pub mod messaging;

pub use crate::messaging::channels::{
    ChannelError, ChannelFilter, ChannelId, ChannelSpec, ParticipantId, resolve,
};
pub use crate::messaging::chat_session::{ChatSession, SessionState, SessionUpdate};
pub use crate::messaging::collaborators::{
    Counterpart, IdentityProvider, RosterProvider, SessionIdentity,
};
pub use crate::messaging::error::{ConversationError, MessagingError, Result};
pub use crate::messaging::message_store::{Message, MessageId, MessageStore};
pub use crate::messaging::message_streaming::{
    LiveStatus, MessageBus, RealtimeBus, Subscription, SubscriptionLost,
};
pub use crate::messaging::thread_aggregator::{
    AggregatorConfig, AggregatorState, AggregatorUpdate, ConversationSummary, ThreadAggregator,
};
pub use crate::messaging::{Backend, Messaging, MessagingConfig};

static TRACING_GUARDS: OnceLock<Mutex<Option<(WorkerGuard, WorkerGuard)>>> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Sets up stdout and daily-rolling file logging. Only the first call has
/// any effect.
pub(crate) fn init_tracing(logs_dir: &std::path::Path) {
    TRACING_INIT.get_or_init(|| {
        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("aula")
            .filename_suffix("log")
            .build(logs_dir)
            .expect("Failed to create file appender");

        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

        TRACING_GUARDS
            .set(Mutex::new(Some((file_guard, stdout_guard))))
            .ok();

        let stdout_layer = Layer::new()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(true);

        let file_layer = Layer::new()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true);

        // A test harness may already have installed a global subscriber.
        Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .ok();
    });
}
