use rand::Rng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 26;

/// Generates an opaque, uniformly random, 26-character identifier.
///
/// Entities never reuse identifiers (spec §3 invariants); the core does not
/// rely on any structure inside the token (no embedded timestamp), just
/// uniqueness and a stable short ASCII form suitable for URLs and SQL
/// `VARCHAR(26)` columns.
pub fn new_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_ids_of_expected_length() {
        let id = new_id();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generates_distinct_ids() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }
}
