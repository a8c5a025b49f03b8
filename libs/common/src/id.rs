use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = scenecast_common::id::prefixed_ulid("scn");
/// assert!(id.starts_with("scn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Process discovery ids, used as the session id prefix.
    pub const NODE: &str = "node";
    pub const SCENE: &str = "scn";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_ulid_format() {
        let id = prefixed_ulid("node");
        assert!(id.starts_with("node_"));
        // ULID is 26 chars, plus prefix + underscore
        assert_eq!(id.len(), 5 + 26);
    }

    #[test]
    fn test_uniqueness() {
        let a = prefixed_ulid("scn");
        let b = prefixed_ulid("scn");
        assert_ne!(a, b);
    }

    #[test]
    fn test_well_known_prefixes() {
        assert!(prefixed_ulid(prefix::SCENE).starts_with("scn_"));
        assert!(prefixed_ulid(prefix::NODE).starts_with("node_"));
    }
}
