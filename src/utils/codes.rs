use rand::Rng;

/// Unambiguous alphabet for human-readable codes (no 0/O, 1/I/L).
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

fn random_block(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Codes are convenience handles for support staff, not identifiers;
/// uniqueness is enforced by the primary key, not the code.
pub fn session_code() -> String {
    format!("SES-{}", random_block(8))
}

pub fn subscription_code() -> String {
    format!("SUB-{}", random_block(8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_expected_prefix_and_length() {
        let code = session_code();
        assert!(code.starts_with("SES-"));
        assert_eq!(code.len(), 12);
        assert!(subscription_code().starts_with("SUB-"));
    }

    #[test]
    fn codes_avoid_ambiguous_characters() {
        for _ in 0..50 {
            let code = session_code();
            assert!(!code[4..].contains(['0', 'O', '1', 'I', 'L']));
        }
    }
}
