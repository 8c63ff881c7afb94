//! Code normalization shared by ingestion and lookup.

/// Trim surrounding whitespace and uppercase.
///
/// Returns `None` when nothing is left, which callers treat as "no code".
pub fn normalize_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_and_uppercases() {
        assert_eq!(normalize_code(" abc123 ").as_deref(), Some("ABC123"));
        assert_eq!(normalize_code("\tFiftyOff\r").as_deref(), Some("FIFTYOFF"));
    }

    #[test]
    fn test_blank_is_none() {
        assert_eq!(normalize_code(""), None);
        assert_eq!(normalize_code("   \t "), None);
    }

    #[test]
    fn test_equivalent_forms_match() {
        assert_eq!(normalize_code(" abc123 "), normalize_code("ABC123"));
    }
}
