//! Per-node connection secrets.
//!
//! A node's secret is `hex(sha256(agent_secret ":" node_name))`. It is handed
//! to the instance at launch and must be presented back by the agent when
//! it reports online.

use flotilla_registry::Secret;
use sha2::{Digest, Sha256};

pub fn connection_secret(agent_secret: &Secret, node: &str) -> Secret {
    let mut hasher = Sha256::new();
    hasher.update(agent_secret.expose().as_bytes());
    hasher.update(b":");
    hasher.update(node.as_bytes());
    Secret::new(hex::encode(hasher.finalize()))
}

/// Compare without short-circuiting on the first differing byte.
pub fn verify_connection_secret(expected: &Secret, presented: &str) -> bool {
    let expected = expected.expose().as_bytes();
    let presented = presented.as_bytes();
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .iter()
        .zip(presented)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_hex_sha256() {
        let secret = connection_secret(&Secret::new("k"), "linux-1");
        assert_eq!(secret.expose().len(), 64);
        assert!(secret.expose().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn secret_depends_on_node_and_key() {
        let key = Secret::new("k");
        let a = connection_secret(&key, "a");
        assert_eq!(a, connection_secret(&key, "a"));
        assert_ne!(a, connection_secret(&key, "b"));
        assert_ne!(a, connection_secret(&Secret::new("other"), "a"));
    }

    #[test]
    fn verify_matches_only_exact_secret() {
        let secret = connection_secret(&Secret::new("k"), "a");
        assert!(verify_connection_secret(&secret, secret.expose()));
        assert!(!verify_connection_secret(&secret, "nope"));
        assert!(!verify_connection_secret(&secret, ""));
    }
}
