use std::sync::Mutex;
use ulid::{Generator, Ulid};

/// Produces monotonic ULIDs safe for concurrent use.
///
/// Ids generated within the same millisecond still sort in generation order,
/// which keeps room listings stable under bursts of creations.
pub struct IdGenerator {
    entropy: Mutex<Generator>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            entropy: Mutex::new(Generator::new()),
        }
    }

    /// Generate a new ULID string.
    pub fn next_id(&self) -> String {
        let mut entropy = self
            .entropy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entropy.generate() {
            Ok(id) => id.to_string(),
            // Random-part overflow within a single millisecond; a fresh
            // non-monotonic ULID is still unique and time-ordered.
            Err(_) => Ulid::new().to_string(),
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_sortable() {
        let generator = IdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        assert_ne!(first, second);
        assert!(first < second, "ulids must sort in generation order");
    }

    #[test]
    fn ids_are_canonical_length() {
        let generator = IdGenerator::new();
        assert_eq!(generator.next_id().len(), 26);
    }
}
