use std::fmt;

use rusqlite::{
    types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef},
    ToSql,
};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Microseconds since the Unix epoch, UTC. Stored as-is in the `date`,
/// `start_date` and `end_date` columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Wall clock time. Not monotonic, see [`Clock`] for that.
    pub fn now() -> Self {
        let micros = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000;
        Self(i64::try_from(micros).unwrap_or(i64::MAX))
    }

    pub fn to_date_time(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000).ok()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_date_time().and_then(|t| t.format(&Rfc3339).ok()) {
            Some(formatted) => f.write_str(&formatted),
            None => write!(f, "{}us", self.0),
        }
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

/// Hands out strictly increasing timestamps, so that "most recent" is never a
/// tie between two rows written through the same store handle.
#[derive(Debug)]
pub(crate) struct Clock {
    last: Option<Timestamp>,
}

impl Clock {
    pub(crate) const fn new() -> Self {
        Self { last: None }
    }

    /// Make sure every later `now()` is after `seen`
    pub(crate) fn observe(&mut self, seen: Timestamp) {
        if self.last.map_or(true, |last| last < seen) {
            self.last = Some(seen);
        }
    }

    pub(crate) fn now(&mut self) -> Timestamp {
        let wall = Timestamp::now();
        let ts = match self.last {
            Some(last) if wall <= last => Timestamp(last.0.saturating_add(1)),
            _ => wall,
        };
        self.last = Some(ts);
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_never_repeats() {
        let mut clock = Clock::new();
        let mut prev = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn clock_stays_ahead_of_observed_time() {
        let mut clock = Clock::new();
        let future = Timestamp::from_micros(Timestamp::now().as_micros() + 60_000_000);
        clock.observe(future);
        assert!(clock.now() > future);
        clock.observe(Timestamp::from_micros(0));
        assert!(clock.now() > future);
    }

    #[test]
    fn timestamps_display_as_rfc3339() {
        let ts = Timestamp::from_micros(1_000_000);
        assert_eq!(ts.to_string(), "1970-01-01T00:00:01Z");
    }
}
