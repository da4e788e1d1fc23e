use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;

use super::{Database, DatabaseError, utils::now_millis};
use crate::messaging::channels::ParticipantId;
use crate::messaging::collaborators::{Counterpart, RosterProvider};
use crate::messaging::error::Result;

/// Display label for a counterpart.
///
/// Falls back to the counterpart id when no display name is stored.
fn resolve_display_name(display_name: &str, id: &ParticipantId) -> String {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        id.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Supervisor-to-counterpart assignments kept in SQLite.
pub struct SqliteRoster {
    database: Arc<Database>,
}

impl SqliteRoster {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Assigns a counterpart to a supervisor, or reactivates and renames an
    /// existing assignment.
    pub async fn assign(
        &self,
        supervisor: &ParticipantId,
        counterpart: &ParticipantId,
        display_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO counterparts (supervisor_id, counterpart_id, display_name, active, created_at)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(supervisor_id, counterpart_id)
             DO UPDATE SET display_name = excluded.display_name, active = 1",
        )
        .bind(supervisor.as_str())
        .bind(counterpart.as_str())
        .bind(display_name)
        .bind(now_millis().timestamp_millis())
        .execute(&self.database.pool)
        .await
        .map_err(DatabaseError::from)?;

        tracing::debug!(
            target: "aula_messaging::database::counterparts",
            "Assigned {} to supervisor {}",
            counterpart,
            supervisor
        );
        Ok(())
    }

    /// Activates or deactivates an assignment. Returns false when there was
    /// no such assignment.
    pub async fn set_active(
        &self,
        supervisor: &ParticipantId,
        counterpart: &ParticipantId,
        active: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE counterparts SET active = ?
             WHERE supervisor_id = ? AND counterpart_id = ?",
        )
        .bind(active)
        .bind(supervisor.as_str())
        .bind(counterpart.as_str())
        .execute(&self.database.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RosterProvider for SqliteRoster {
    async fn active_counterparts_for(&self, supervisor: &ParticipantId) -> Result<Vec<Counterpart>> {
        let rows = sqlx::query(
            "SELECT counterpart_id, display_name FROM counterparts
             WHERE supervisor_id = ? AND active = 1
             ORDER BY created_at, counterpart_id",
        )
        .bind(supervisor.as_str())
        .fetch_all(&self.database.pool)
        .await
        .map_err(DatabaseError::from)?;

        let mut counterparts = Vec::with_capacity(rows.len());
        for row in rows {
            let id = ParticipantId::new(row.try_get::<String, _>("counterpart_id")?);
            let display_name: String = row.try_get("display_name")?;
            counterparts.push(Counterpart {
                display_name: resolve_display_name(&display_name, &id),
                id,
            });
        }
        Ok(counterparts)
    }
}
