//! SHA-256 checksum utilities
//!
//! Every checksum produced here uses the canonical `sha256:<hex>` format so
//! fingerprints persisted by one invocation compare equal in the next.

use sha2::{Digest, Sha256};

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Compute a checksum over an ordered list of parts.
///
/// Each part is length-prefixed before hashing, so `["ab", "c"]` and
/// `["a", "bc"]` never collide.
pub fn compute_parts_checksum<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    format!("{}{:x}", PREFIX, hasher.finalize())
}

/// Return the hex digest without the `sha256:` prefix, truncated to `len`.
pub fn short_digest(checksum: &str, len: usize) -> &str {
    let hex = checksum.strip_prefix(PREFIX).unwrap_or(checksum);
    &hex[..len.min(hex.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_checksum_is_deterministic() {
        let a = compute_parts_checksum(["3.6", "mypy==0.470"]);
        let b = compute_parts_checksum(vec!["3.6".to_string(), "mypy==0.470".to_string()]);
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
    }

    #[test]
    fn test_parts_checksum_respects_boundaries() {
        assert_ne!(
            compute_parts_checksum(["ab", "c"]),
            compute_parts_checksum(["a", "bc"])
        );
    }

    #[test]
    fn test_short_digest_strips_prefix() {
        let checksum = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        assert_eq!(short_digest(checksum, 8), "b94d27b9");
        assert_eq!(short_digest("abc", 8), "abc");
    }
}
