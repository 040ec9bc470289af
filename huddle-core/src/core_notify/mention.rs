//! `@handle` extraction from message text

use std::collections::HashSet;

fn is_handle_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Extract mentioned handles in first-occurrence order, without duplicates.
///
/// A handle is `[A-Za-z0-9_-]+` following an `@` that is not itself preceded
/// by a handle character, so `bob@example.com` mentions nobody. Matching is
/// case-sensitive.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut handles = Vec::new();
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if c == '@' && !prev.is_some_and(is_handle_char) {
            let start = idx + c.len_utf8();
            let mut end = start;
            while let Some(&(i, next)) = chars.peek() {
                if !is_handle_char(next) {
                    break;
                }
                end = i + next.len_utf8();
                chars.next();
            }
            if end > start {
                let handle = &text[start..end];
                if seen.insert(handle) {
                    handles.push(handle.to_string());
                }
                // The last consumed char was a handle char
                prev = text[..end].chars().next_back();
                continue;
            }
        }
        prev = Some(c);
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_basic_mentions() {
        assert_eq!(extract_mentions("hi @bob and @carol"), vec!["bob", "carol"]);
    }

    #[test]
    fn test_duplicates_collapse_in_order() {
        assert_eq!(extract_mentions("hi @bob and @bob"), vec!["bob"]);
        assert_eq!(extract_mentions("@carol @bob @carol"), vec!["carol", "bob"]);
    }

    #[test]
    fn test_email_addresses_are_not_mentions() {
        assert!(extract_mentions("mail bob@example.com").is_empty());
        assert_eq!(extract_mentions("(@bob) @ alone"), vec!["bob"]);
    }

    #[test]
    fn test_handle_charset_and_punctuation() {
        assert_eq!(extract_mentions("@dev-ops_1, ping"), vec!["dev-ops_1"]);
        assert_eq!(extract_mentions("@bob.@carol!"), vec!["bob", "carol"]);
        assert_eq!(extract_mentions("@@bob"), vec!["bob"]);
    }

    #[test]
    fn test_case_sensitive() {
        assert_eq!(extract_mentions("@Bob @bob"), vec!["Bob", "bob"]);
    }

    #[test]
    fn test_unicode_neighbours() {
        assert_eq!(extract_mentions("héllo @bob"), vec!["bob"]);
        assert_eq!(extract_mentions("é@bob"), vec!["bob"]);
    }

    proptest! {
        #[test]
        fn prop_handles_are_well_formed_and_unique(text in "\\PC{0,80}") {
            let handles = extract_mentions(&text);
            let unique: HashSet<_> = handles.iter().collect();
            prop_assert_eq!(unique.len(), handles.len());
            for h in &handles {
                prop_assert!(!h.is_empty());
                prop_assert!(h.chars().all(is_handle_char));
                let needle = format!("@{}", h);
                prop_assert!(text.contains(&needle));
            }
        }

        #[test]
        fn prop_spaced_mentions_are_found(names in prop::collection::vec("[A-Za-z0-9_-]{1,12}", 1..6)) {
            let text = names.iter().map(|n| format!("@{}", n)).collect::<Vec<_>>().join(" ");
            let mut expected = Vec::new();
            for n in &names {
                if !expected.contains(n) {
                    expected.push(n.clone());
                }
            }
            prop_assert_eq!(extract_mentions(&text), expected);
        }
    }
}
