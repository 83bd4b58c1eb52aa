//! Subject wildcard matching for subscription lookup.
//!
//! Supports exactly one `*` wildcard as a prefix+suffix match. This is
//! distinct from NATS's own token-based `*`/`>` wildcards — it is a
//! client-side filter over already-declared [`SubscriptionSpec`](crate::subscription::SubscriptionSpec)
//! subjects, not a broker subscription pattern.

/// Returns true if `subject` matches `pattern`.
///
/// A pattern with no `*` requires an exact match. A pattern with exactly one
/// `*` matches if `subject` starts with the text before it and ends with the
/// text after it (and is long enough for both). A pattern with two or more
/// `*` never matches anything.
pub fn wildcard_match(subject: &str, pattern: &str) -> bool {
    let star_count = pattern.matches('*').count();
    match star_count {
        0 => subject == pattern,
        1 => {
            let idx = pattern.find('*').unwrap();
            let (prefix, suffix) = (&pattern[..idx], &pattern[idx + 1..]);
            subject.len() >= prefix.len() + suffix.len()
                && subject.starts_with(prefix)
                && subject.ends_with(suffix)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(wildcard_match("a.b.c", "a.b.c"));
        assert!(!wildcard_match("a.b.c", "a.b.d"));
    }

    #[test]
    fn single_wildcard() {
        assert!(wildcard_match("a.b.c", "a.*.c"));
        assert!(!wildcard_match("a.b.d", "a.*.c"));
    }

    #[test]
    fn double_wildcard_never_matches() {
        assert!(!wildcard_match("a.b.c", "a.*.*"));
        assert!(!wildcard_match("a.b.c", "*.*.*"));
    }

    #[test]
    fn wildcard_requires_minimum_length() {
        assert!(!wildcard_match("ac", "a.*.c"));
    }
}
