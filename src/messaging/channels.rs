//! Conversation identity.
//!
//! A channel is either a fixed, well-known name (the shared "general"
//! conversation) or a name derived from an unordered pair of participants.
//! Derivation sorts the pair first, so both sides of a direct conversation
//! always compute the same id. Each id in the pair has `%` and `_` escaped,
//! so the separator only ever appears between the two halves.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of every derived pairwise channel id.
pub const DIRECT_PREFIX: &str = "dm";

/// Separator between the prefix and the two participant ids.
pub const SEPARATOR: char = '_';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("A channel needs an explicit name or two participants")]
    InsufficientArguments,
}

/// Identity of a participant (student, teacher, admin).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Canonical identifier of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// A fixed channel name, used unchanged.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The derived pairwise channel for two participants.
    ///
    /// Commutative: `direct(a, b) == direct(b, a)` for every pair. Ids are
    /// written as `dm_{low}_{high}` with `%` and `_` inside them escaped as
    /// `%25` and `%5F`.
    pub fn direct(a: &ParticipantId, b: &ParticipantId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!(
            "{DIRECT_PREFIX}{SEPARATOR}{}{SEPARATOR}{}",
            escape_part(low.as_str()),
            escape_part(high.as_str())
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a derived pairwise channel.
    pub fn is_direct(&self) -> bool {
        self.direct_pair().is_some()
    }

    /// Whether `participant` is one side of this derived pairwise channel.
    ///
    /// Named channels involve nobody in particular and always return false.
    pub fn involves(&self, participant: &ParticipantId) -> bool {
        let Some((low, high)) = self.direct_pair() else {
            return false;
        };
        let id = escape_part(participant.as_str());
        low == id || high == id
    }

    /// The two escaped halves of a derived pairwise id.
    fn direct_pair(&self) -> Option<(&str, &str)> {
        let (low, high) = self
            .0
            .strip_prefix(DIRECT_PREFIX)?
            .strip_prefix(SEPARATOR)?
            .split_once(SEPARATOR)?;
        (!high.contains(SEPARATOR)).then_some((low, high))
    }
}

fn escape_part(id: &str) -> Cow<'_, str> {
    if id.contains(['%', SEPARATOR]) {
        Cow::Owned(id.replace('%', "%25").replace(SEPARATOR, "%5F"))
    } else {
        Cow::Borrowed(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves a channel from either an explicit name or a participant pair.
///
/// An explicit name wins and is returned unchanged. Otherwise both
/// participants are required.
pub fn resolve(
    explicit_name: Option<&str>,
    participant_a: Option<&ParticipantId>,
    participant_b: Option<&ParticipantId>,
) -> Result<ChannelId, ChannelError> {
    match (explicit_name, participant_a, participant_b) {
        (Some(name), _, _) => Ok(ChannelId::named(name)),
        (None, Some(a), Some(b)) => Ok(ChannelId::direct(a, b)),
        _ => Err(ChannelError::InsufficientArguments),
    }
}

/// What a viewer asks to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSpec {
    /// A fixed, shared conversation such as "general".
    Named(String),
    /// The direct conversation between the viewer and a counterpart.
    WithCounterpart(ParticipantId),
    /// The direct conversation between two explicit participants.
    Pair(ParticipantId, ParticipantId),
}

impl ChannelSpec {
    /// Resolves the channel id. `WithCounterpart` needs the viewer.
    pub fn resolve(&self, viewer: Option<&ParticipantId>) -> Result<ChannelId, ChannelError> {
        match self {
            ChannelSpec::Named(name) => resolve(Some(name.as_str()), None, None),
            ChannelSpec::WithCounterpart(counterpart) => resolve(None, viewer, Some(counterpart)),
            ChannelSpec::Pair(a, b) => resolve(None, Some(a), Some(b)),
        }
    }

    /// Whether resolving this spec depends on knowing the viewer.
    pub fn needs_viewer(&self) -> bool {
        matches!(self, ChannelSpec::WithCounterpart(_))
    }
}

/// Which inserts a subscription wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelFilter {
    /// Exactly one channel.
    Exact(ChannelId),
    /// Every derived pairwise channel that involves this participant.
    DirectWith(ParticipantId),
    /// Any of the inner filters.
    AnyOf(Vec<ChannelFilter>),
}

impl ChannelFilter {
    pub fn matches(&self, channel: &ChannelId) -> bool {
        match self {
            ChannelFilter::Exact(expected) => expected == channel,
            ChannelFilter::DirectWith(participant) => channel.involves(participant),
            ChannelFilter::AnyOf(filters) => filters.iter().any(|f| f.matches(channel)),
        }
    }
}
