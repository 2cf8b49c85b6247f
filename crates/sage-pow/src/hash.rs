//! Hashing helpers shared by the verifier and the solver.

use sha2::{Digest, Sha256};

/// SHA-256 of the input, as lowercase hex.
pub fn hash_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

/// Check whether a hex hash starts with `difficulty` '0' characters.
///
/// Difficulty counts leading hex characters, not bits.
pub fn meets_difficulty(hash: &str, difficulty: u8) -> bool {
    hash.len() >= difficulty as usize
        && hash.bytes().take(difficulty as usize).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_is_lowercase_sha256() {
        // Known vector: sha256("abc")
        assert_eq!(
            hash_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00abc", 2));
        assert!(meets_difficulty("000", 3));
        assert!(!meets_difficulty("0abc", 2));
        assert!(!meets_difficulty("", 1));
        // Zero difficulty is satisfied by anything
        assert!(meets_difficulty("ff", 0));
    }
}
