//! Process identifiers.
//!
//! Every exporter instance picks a `ProcessId` at startup. It owns the claims
//! this process creates in the store and names its heartbeat record, so peers
//! can tell whether the owner of a claim is still alive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::ports::Clock;

const PREFIX: &str = "process-";

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(Ulid);

impl ProcessId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Time-ordered id built from the clock plus random bits, so that two
    /// processes started on the same `FixedClock` still get distinct ids.
    pub fn generate(clock: &dyn Clock) -> Self {
        let timestamp_ms = clock.now().timestamp_millis().max(0) as u64;
        Self(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for ProcessId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid process id: {0}")]
pub struct ParseProcessIdError(String);

impl FromStr for ProcessId {
    type Err = ParseProcessIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|_| ParseProcessIdError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generated_ids_are_unique() {
        let a = ProcessId::generate(&SystemClock);
        let b = ProcessId::generate(&SystemClock);
        assert_ne!(a, b);
    }

    #[test]
    fn fixed_clock_sets_the_timestamp_part() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(at);

        let a = ProcessId::generate(&clock);
        let b = ProcessId::generate(&clock);

        // random part differs, timestamp part does not
        assert_ne!(a, b);
        assert_eq!(a.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
        assert_eq!(b.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
    }

    #[test]
    fn display_and_parse_agree() {
        let id = ProcessId::generate(&SystemClock);
        let rendered = id.to_string();
        assert!(rendered.starts_with("process-"));
        assert_eq!(rendered.parse::<ProcessId>().unwrap(), id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("process-not-a-ulid".parse::<ProcessId>().is_err());
    }
}
