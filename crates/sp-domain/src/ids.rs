//! Identifier generation.
//!
//! All entity ids are 26-character Crockford-base32 ULIDs: lexicographically
//! sortable by creation time, opaque to everything else. Stored as `TEXT`.

use ulid::Ulid;

/// Mint a fresh id.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_26_chars() {
        assert_eq!(new_id().len(), 26);
    }

    #[test]
    fn ids_sort_by_creation() {
        let a = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id();
        assert!(a < b, "later id must sort after earlier id");
    }
}
