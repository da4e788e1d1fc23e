//! Contracts for the external collaborators the messaging core consumes.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::messaging::channels::ParticipantId;
use crate::messaging::error::{MessagingError, Result};

/// Answers "who is viewing". `Ok(None)` means the session is still pending.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_viewer_id(&self) -> Result<Option<ParticipantId>>;
}

/// A counterpart (typically a student) assigned to a supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterpart {
    pub id: ParticipantId,
    pub display_name: String,
}

/// Lists the active counterparts assigned to a supervisor.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn active_counterparts_for(&self, supervisor: &ParticipantId) -> Result<Vec<Counterpart>>;
}

/// Identity held by the host's auth session. Starts pending unless signed in.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    current: RwLock<Option<ParticipantId>>,
}

impl SessionIdentity {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn signed_in(viewer: ParticipantId) -> Self {
        Self {
            current: RwLock::new(Some(viewer)),
        }
    }

    pub fn sign_in(&self, viewer: ParticipantId) -> Result<()> {
        let mut current = self
            .current
            .write()
            .map_err(|e| MessagingError::Identity(e.to_string()))?;
        *current = Some(viewer);
        Ok(())
    }

    pub fn sign_out(&self) -> Result<()> {
        let mut current = self
            .current
            .write()
            .map_err(|e| MessagingError::Identity(e.to_string()))?;
        *current = None;
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    async fn current_viewer_id(&self) -> Result<Option<ParticipantId>> {
        let current = self
            .current
            .read()
            .map_err(|e| MessagingError::Identity(e.to_string()))?;
        Ok(current.clone())
    }
}
