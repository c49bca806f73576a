use log::debug;
use rusqlite::params;

use crate::error::SchemaError;

use super::TraceStore;

pub(crate) const TABLES: [&str; 3] = ["session", "allocation", "deallocation"];

const CREATE_SCHEMA: &str = "
    CREATE TABLE session (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_date INTEGER NOT NULL,
        end_date INTEGER
    );
    CREATE TABLE allocation (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES session(id),
        date INTEGER NOT NULL,
        size INTEGER NOT NULL,
        address INTEGER NOT NULL,
        is_reallocation INTEGER NOT NULL,
        file TEXT,
        line INTEGER
    );
    CREATE TABLE deallocation (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES session(id),
        date INTEGER NOT NULL,
        address INTEGER NOT NULL,
        allocation_id INTEGER REFERENCES allocation(id),
        is_reallocation INTEGER NOT NULL,
        file TEXT,
        line INTEGER
    );
    CREATE INDEX allocation_address_date ON allocation(address, date);
";

/// What [`TraceStore::ensure_schema`] found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaState {
    /// The store was empty and now has the tracer's tables
    Created,
    /// The tables were already there and were left alone
    Existing,
}

impl TraceStore {
    /// Create the tracer's tables if the store has no tables at all. A store
    /// that already has them is never modified, and one that has other tables
    /// but not ours is rejected.
    pub fn ensure_schema(&mut self) -> Result<SchemaState, SchemaError> {
        if self.is_empty()? {
            let tx = self.conn.transaction()?;
            tx.execute_batch(CREATE_SCHEMA)?;
            tx.commit()?;
            debug!("created trace schema");
            return Ok(SchemaState::Created);
        }

        let mut missing = Vec::new();
        for table in TABLES {
            if !self.has_table(table)? {
                missing.push(table);
            }
        }
        if !missing.is_empty() {
            return Err(SchemaError::Incompatible { missing });
        }
        Ok(SchemaState::Existing)
    }

    fn is_empty(&self) -> rusqlite::Result<bool> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(name) FROM sqlite_master", [], |row| row.get(0))?;
        Ok(count == 0)
    }

    fn has_table(&self, name: &str) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_sql(store: &TraceStore) -> Vec<String> {
        let mut stmt = store
            .conn
            .prepare("SELECT sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY name")
            .unwrap();
        let rows = stmt.query_map([], |row| row.get(0)).unwrap();
        rows.collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn empty_store_gets_the_tables() {
        let mut store = TraceStore::open_in_memory().unwrap();
        assert_eq!(store.ensure_schema().unwrap(), SchemaState::Created);
        for table in TABLES {
            assert!(store.has_table(table).unwrap(), "{table} missing");
        }
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let mut store = TraceStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        let session = store.open_session().unwrap();
        let before = schema_sql(&store);

        assert_eq!(store.ensure_schema().unwrap(), SchemaState::Existing);
        assert_eq!(schema_sql(&store), before);
        assert_eq!(store.sessions().unwrap().len(), 1);
        assert_eq!(store.sessions().unwrap()[0].id, session);
    }

    #[test]
    fn foreign_store_is_rejected_untouched() {
        let mut store = TraceStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch("CREATE TABLE session (name TEXT); INSERT INTO session VALUES ('x');")
            .unwrap();
        let before = schema_sql(&store);

        let err = store.ensure_schema().unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Incompatible { ref missing } if missing == &["allocation", "deallocation"]
        ));
        assert_eq!(schema_sql(&store), before);
    }
}
