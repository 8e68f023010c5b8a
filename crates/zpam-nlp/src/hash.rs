use sha1::{Digest, Sha1};

/// Spec §6: "Token strings longer than 64 bytes are replaced with
/// `hash_` followed by hex of a SHA-1 of the token." Applied at the
/// storage boundary so a tokenizer's raw output is always available
/// for testing, but nothing ever writes a >64-byte key to the store.
pub fn hash_if_long(token: &str) -> String {
    const MAX_LEN: usize = 64;
    if token.len() <= MAX_LEN {
        token.to_string()
    } else {
        let mut hasher = Sha1::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        format!("hash_{:x}", digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tokens_pass_through() {
        assert_eq!(hash_if_long("free|money|3"), "free|money|3");
    }

    #[test]
    fn long_tokens_are_hashed() {
        let long = "a".repeat(65);
        let hashed = hash_if_long(&long);
        assert!(hashed.starts_with("hash_"));
        assert_eq!(hashed.len(), "hash_".len() + 40);
    }
}
