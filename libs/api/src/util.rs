use std::collections::BTreeSet;

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Parse an identity list as written in configuration.
///
/// Entries are separated by commas and/or newlines; surrounding whitespace
/// is trimmed and empty entries are skipped:
/// - `"alice,bob"` → `{alice, bob}`
/// - `"alice\n  bob,\n"` → `{alice, bob}`
pub fn parse_identity_list(raw: &str) -> BTreeSet<String> {
    raw.split([',', '\n', '\r'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_split_on_commas_and_newlines() {
        let ids = parse_identity_list("alice, bob\ncarol\r\n,,");
        let expected: Vec<&str> = vec!["alice", "bob", "carol"];
        assert_eq!(ids.iter().map(String::as_str).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn blank_list_is_empty() {
        assert!(parse_identity_list("  ,\n ").is_empty());
    }
}
