use log::info;
use rusqlite::params;

use crate::error::TraceError;

use super::{SessionId, Timestamp, TraceStore};

impl TraceStore {
    /// Start a new session. Both dates are set to now, `end_date` is
    /// overwritten by [`TraceStore::close_session`].
    pub fn open_session(&mut self) -> rusqlite::Result<SessionId> {
        self.seed_clock()?;
        let now = self.clock.now();
        self.conn
            .prepare_cached("INSERT INTO session (start_date, end_date) VALUES (?1, ?1)")?
            .execute(params![now])?;
        let id = SessionId(self.conn.last_insert_rowid());
        info!("opened trace session {id} at {now}");
        Ok(id)
    }

    pub fn close_session(&mut self, session: SessionId) -> Result<(), TraceError> {
        let now = self.clock.now();
        let changed = self
            .conn
            .prepare_cached("UPDATE session SET end_date = ?1 WHERE id = ?2")
            .and_then(|mut stmt| stmt.execute(params![now, session]))
            .map_err(|source| TraceError::SessionClose { session, source })?;
        if changed == 0 {
            return Err(TraceError::SessionClose {
                session,
                source: rusqlite::Error::QueryReturnedNoRows,
            });
        }
        info!("closed trace session {session} at {now}");
        Ok(())
    }

    /// Start the clock after everything already in the store, so rows from
    /// this handle always sort after rows from earlier runs.
    fn seed_clock(&mut self) -> rusqlite::Result<()> {
        let latest: Option<i64> = self.conn.query_row(
            "SELECT MAX(d) FROM (
                SELECT MAX(end_date) AS d FROM session
                UNION ALL SELECT MAX(date) FROM allocation
                UNION ALL SELECT MAX(date) FROM deallocation
            )",
            [],
            |row| row.get(0),
        )?;
        if let Some(latest) = latest {
            self.clock.observe(Timestamp::from_micros(latest));
        }
        Ok(())
    }
}
