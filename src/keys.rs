//! Key derivation for both cache tiers.
//!
//! The memory tier is keyed by identity alone.  The disk tier is keyed by identity plus a size tag, hashed with
//! SHA-256 so keys are safe file names, stable across runs, and distinct for every `(identity, size tag)` pair.
use sha2::{Digest, Sha256};

use crate::Size;

/// Identity strings are compared after trimming surrounding whitespace.
pub fn normalize_identity(identity: &str) -> &str {
    identity.trim()
}

/// The memory tier key for an identity.  Size-agnostic.
pub fn identity_key(identity: &str) -> String {
    normalize_identity(identity).to_string()
}

/// The disk tier key for an identity at a given size tag.
///
/// Used both for a request's own rendition and for reuse candidates, so an entry written by one request is found by
/// another that names the same tag.
pub fn disk_key(identity: &str, size_tag: &str) -> String {
    let identity = normalize_identity(identity);
    let mut hasher = Sha256::new();
    // Length-prefix the identity so no split point between the two strings can collide.
    hasher.update((identity.len() as u64).to_le_bytes());
    hasher.update(identity.as_bytes());
    hasher.update(size_tag.as_bytes());
    hex::encode(hasher.finalize())
}

/// The size tag a request uses when the caller didn't name one.
pub fn size_tag(size: Size) -> String {
    size.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_known_key_shape() {
        let key = disk_key("http://example.com/a.png", "100x100");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, disk_key("  http://example.com/a.png\n", "100x100"));
    }

    #[test]
    fn test_split_point_does_not_collide() {
        assert_ne!(disk_key("ab", "c"), disk_key("a", "bc"));
    }

    proptest! {
        #[test]
        fn test_disk_key_deterministic(identity in "[a-z:/.]{1,40}", w in 1..5000u32, h in 1..5000u32) {
            let tag = size_tag(Size::new(w, h));
            prop_assert_eq!(disk_key(&identity, &tag), disk_key(&identity, &tag));
        }

        #[test]
        fn test_sizes_never_share_a_disk_key(
            identity in "[a-z:/.]{1,40}",
            a in (1..5000u32, 1..5000u32),
            b in (1..5000u32, 1..5000u32),
        ) {
            prop_assume!(a != b);
            let ka = disk_key(&identity, &size_tag(Size::new(a.0, a.1)));
            let kb = disk_key(&identity, &size_tag(Size::new(b.0, b.1)));
            prop_assert_ne!(ka, kb);
            prop_assert_eq!(identity_key(&identity), identity_key(&identity));
        }
    }
}
