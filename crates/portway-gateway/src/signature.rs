//! Keyed digest over token material.
//!
//! The platform signs `message ‖ secret` with SHA-256 — plain
//! concatenation in that order, not an HMAC construction; the order is
//! part of the wire protocol and must not change. Digests are lowercase
//! hex. Comparison is constant-time: every signature check sits on a
//! trust boundary.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of the hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute the keyed digest of `message` under `secret`.
pub fn sign(message: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute the digest and compare against `candidate` in constant time.
///
/// Hex case is insignificant; everything else is.
pub fn verify(message: &str, secret: &str, candidate: &str) -> bool {
    let expected = sign(message, secret);
    constant_time_eq(&expected, &candidate.to_ascii_lowercase())
}

/// Compare two strings in constant time.
///
/// The comparison takes the same amount of time regardless of how many
/// characters match. A length mismatch still performs a dummy comparison
/// so timing stays consistent.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    if a_bytes.len() == b_bytes.len() {
        a_bytes.ct_eq(b_bytes).into()
    } else {
        let _ = a_bytes.ct_eq(a_bytes);
        false
    }
}
