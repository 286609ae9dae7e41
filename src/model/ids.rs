//! Identifier generation for experiments and runs.
//!
//! Reproducible (sequential) identifiers are produced from a counter owned by
//! the generator value, so independent generators never share state.

use uuid::Uuid;

/// Source of experiment and run identifiers
#[derive(Debug, Clone)]
pub enum IdGenerator {
    /// Random UUIDv4 values
    Random,
    /// Ascending UUIDs: each call adds `inc` to the counter
    Sequential {
        /// Last value handed out (the first id is `next + inc`)
        next: u128,
        /// Increment between consecutive ids
        inc: u128,
    },
}

impl IdGenerator {
    /// Random identifiers
    pub fn random() -> Self {
        IdGenerator::Random
    }

    /// Sequential identifiers starting after `seed`
    pub fn sequential(seed: u128, inc: u128) -> Self {
        IdGenerator::Sequential { next: seed, inc }
    }

    /// Produce the next identifier
    pub fn next_uuid(&mut self) -> Uuid {
        match self {
            IdGenerator::Random => Uuid::new_v4(),
            IdGenerator::Sequential { next, inc } => {
                *next = next.wrapping_add(*inc) % u128::MAX;
                Uuid::from_u128(*next)
            }
        }
    }

    /// Produce the next identifier in hyphenated string form
    pub fn next_id(&mut self) -> String {
        self.next_uuid().hyphenated().to_string()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let mut ids = IdGenerator::sequential(0, 1);
        assert_eq!(ids.next_uuid(), Uuid::from_u128(1));
        assert_eq!(ids.next_uuid(), Uuid::from_u128(2));
        assert_eq!(ids.next_id(), "00000000-0000-0000-0000-000000000003");
    }

    #[test]
    fn test_generators_are_independent() {
        let mut a = IdGenerator::sequential(10, 5);
        let mut b = IdGenerator::sequential(10, 5);
        assert_eq!(a.next_uuid(), Uuid::from_u128(15));
        assert_eq!(a.next_uuid(), Uuid::from_u128(20));
        assert_eq!(b.next_uuid(), Uuid::from_u128(15));
    }

    #[test]
    fn test_random_ids_differ() {
        let mut ids = IdGenerator::random();
        assert_ne!(ids.next_uuid(), ids.next_uuid());
    }
}
