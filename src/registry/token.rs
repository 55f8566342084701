use rand::distr::Alphanumeric;
use rand::Rng;

/// Permitted configured token length range (spec §4.1); outside this range
/// the minter falls back to a UUID.
const MIN_LEN: usize = 6;
const MAX_LEN: usize = 32;

/// Mints a single token of the requested length, or a canonical 36-char
/// hyphenated UUID v4 if `length` falls outside `[6, 32]`.
pub fn mint(length: usize) -> String {
    if (MIN_LEN..=MAX_LEN).contains(&length) {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    } else {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_requested_length_within_bounds() {
        for len in [MIN_LEN, 12, MAX_LEN] {
            let token = mint(len);
            assert_eq!(token.len(), len);
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn falls_back_to_uuid_outside_bounds() {
        for len in [0, 1, MIN_LEN - 1, MAX_LEN + 1, 1000] {
            let token = mint(len);
            assert_eq!(token.len(), 36, "expected canonical UUID for length {len}");
            assert!(uuid::Uuid::parse_str(&token).is_ok());
        }
    }

    #[test]
    fn mints_are_not_trivially_repeated() {
        let a = mint(16);
        let b = mint(16);
        assert_ne!(a, b);
    }
}
