//! Bearer token validation for the HTTP API.

/// Compares a provided token against the expected one in constant time.
///
/// Empty tokens are never valid.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    // XOR accumulator over the overlapping bytes; any difference leaves
    // a non-zero residue.
    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively per RFC 6750.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();

    // byte-indexed split; a non-ASCII prefix cannot match the scheme
    let prefix = header.get(..7)?;
    let token = header.get(7..)?;
    if prefix.eq_ignore_ascii_case("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_token_matching() {
        assert!(validate_token("secret123", "secret123"));
        assert!(validate_token("a", "a"));
    }

    #[test]
    fn test_validate_token_mismatch() {
        assert!(!validate_token("secret123", "secret124"));
        assert!(!validate_token("secret123", "SECRET123"));
        assert!(!validate_token("short", "longer"));
        assert!(!validate_token("longer", "short"));
    }

    #[test]
    fn test_validate_token_empty() {
        assert!(!validate_token("", ""));
        assert!(!validate_token("", "secret"));
        assert!(!validate_token("secret", ""));
    }

    #[test]
    fn test_extract_bearer_token_valid() {
        assert_eq!(extract_bearer_token("Bearer secret123"), Some("secret123"));
        assert_eq!(extract_bearer_token("bearer secret123"), Some("secret123"));
        assert_eq!(
            extract_bearer_token("  Bearer secret123  "),
            Some("secret123")
        );
    }

    #[test]
    fn test_extract_bearer_token_invalid() {
        assert_eq!(extract_bearer_token(""), None);
        assert_eq!(extract_bearer_token("Basic secret123"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Bearersecret123"), None);
        assert_eq!(extract_bearer_token("secret123"), None);
    }
}
