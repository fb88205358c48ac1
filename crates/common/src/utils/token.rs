use rand::RngCore;
use rand::rngs::OsRng;

use crate::constants::SECRET_TOKEN_BYTES;

/// Issue the per-run secret that inbound requests must present
///
/// 256 bits straight from the operating system CSPRNG, hex encoded to a
/// fixed 64-character string. Nothing time- or pid-derived goes in.
pub fn issue_secret_token() -> String {
    let mut bytes = [0u8; SECRET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_format() {
        let token = issue_secret_token();
        assert_eq!(token.len(), SECRET_TOKEN_BYTES * 2);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn test_token_uniqueness() {
        let mut tokens = HashSet::new();

        for _ in 0..10_000 {
            assert!(
                tokens.insert(issue_secret_token()),
                "Generated duplicate token"
            );
        }
    }

    #[test]
    fn test_token_bits_are_balanced() {
        // Over many tokens roughly half of all bits should be set
        let mut ones = 0u64;
        let samples = 1000;
        for _ in 0..samples {
            let bytes = hex::decode(issue_secret_token()).unwrap();
            ones += bytes.iter().map(|b| b.count_ones() as u64).sum::<u64>();
        }

        let total = samples * SECRET_TOKEN_BYTES as u64 * 8;
        let ratio = ones as f64 / total as f64;
        assert!((0.48..0.52).contains(&ratio), "Bit ratio {} looks biased", ratio);
    }
}
