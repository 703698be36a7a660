use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;

use super::{ts_from_sql, ts_to_sql, Store};

impl Store {
    /// Advisory lock guarding one scheduler run per workspace.
    ///
    /// Returns `true` when the lock was acquired. A lock older than
    /// `stale_after` is taken over (a crashed planner must not wedge the
    /// workspace forever).
    pub async fn acquire_workspace_lock(
        &self,
        workspace: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool, StoreError> {
        let workspace = workspace.to_string();
        let now_str = ts_to_sql(&now);
        self.conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT acquired_at FROM workspace_locks WHERE workspace = ?1",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![workspace])?;
                    match rows.next()? {
                        Some(row) => Some(row.get(0)?),
                        None => None,
                    }
                };

                let acquired = match existing {
                    None => {
                        tx.execute(
                            "INSERT INTO workspace_locks (workspace, acquired_at) VALUES (?1, ?2)",
                            rusqlite::params![workspace, now_str],
                        )?;
                        true
                    }
                    Some(acquired_at) => {
                        let held_since = ts_from_sql(&acquired_at);
                        let now = ts_from_sql(&now_str);
                        if now - held_since > stale_after {
                            tx.execute(
                                "UPDATE workspace_locks SET acquired_at = ?1 WHERE workspace = ?2",
                                rusqlite::params![now_str, workspace],
                            )?;
                            true
                        } else {
                            false
                        }
                    }
                };
                tx.commit()?;
                Ok(acquired)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn release_workspace_lock(&self, workspace: &str) -> Result<(), StoreError> {
        let workspace = workspace.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM workspace_locks WHERE workspace = ?1",
                    rusqlite::params![workspace],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }
}
