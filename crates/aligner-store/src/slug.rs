//! Canonical corpus keys for problem names.

/// Canonical corpus key for a problem name: `"Two Sum"` → `"two-sum"`.
///
/// A leading problem number such as `"1. "` is dropped.
pub fn canonical_slug(name: &str) -> String {
    let trimmed = name.trim();
    let without_number = match trimmed.split_once(". ") {
        Some((number, rest)) if number.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => trimmed,
    };
    let mut slug = String::with_capacity(without_number.len());
    for ch in without_number.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_slug() {
        assert_eq!(canonical_slug("Two Sum"), "two-sum");
        assert_eq!(canonical_slug("two-sum"), "two-sum");
        assert_eq!(canonical_slug("1. Two Sum"), "two-sum");
        assert_eq!(canonical_slug("  Best Time to Buy & Sell Stock II "), "best-time-to-buy-sell-stock-ii");
        assert_eq!(canonical_slug("longest_common_prefix"), "longest-common-prefix");
        assert_eq!(canonical_slug("???"), "");
    }
}
