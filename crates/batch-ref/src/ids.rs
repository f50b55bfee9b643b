use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($name:ident) => {
        /// Time-sortable identifier: 48-bit millisecond timestamp followed by
        /// an 80-bit random/counter tail, rendered as 26-character Crockford
        /// base32.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(BatchId);
ulid_id!(ChunkId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_time_sortable() {
        let first = ChunkId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ChunkId::new();
        assert!(first < second);
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = BatchId::new();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 26);
        let parsed: BatchId = rendered.parse().unwrap();
        assert_eq!(id, parsed);
    }
}
