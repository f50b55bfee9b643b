use std::fmt;

use serde::{Deserialize, Serialize};

/// A stable Blake3 content hash, used to dedup chunks whose
/// whitespace-normalized text is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hashes already-normalized bytes. Normalization (whitespace collapse)
    /// is the chunker's responsibility; this type only stores the digest.
    pub fn of(normalized_content: &[u8]) -> Self {
        Self(*blake3::hash(normalized_content).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_hashes_equal() {
        let a = ContentHash::of(b"fn main() {}");
        let b = ContentHash::of(b"fn main() {}");
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_hashes_differ() {
        let a = ContentHash::of(b"fn main() {}");
        let b = ContentHash::of(b"fn other() {}");
        assert_ne!(a, b);
    }

    #[test]
    fn hex_round_trips_through_display() {
        let hash = ContentHash::of(b"payload");
        assert_eq!(hash.to_string(), hash.to_hex());
        assert_eq!(hash.to_hex().len(), 64);
    }
}
