//! Cache key derivation from source URLs.

/// Maximum number of characters kept from the source URL.
pub const MAX_KEY_LENGTH: usize = 64;

/// Filesystem-safe identifier shared by the memory and disk tiers.
///
/// Keys are derived with [`CacheKey::from_url`]: the first
/// [`MAX_KEY_LENGTH`] characters of the URL, lower-cased, with every
/// character outside `[a-z0-9_-]` replaced by `_`.
///
/// Two URLs sharing the same 64-character prefix map to the same key.
/// This is a known limitation of the scheme and is not corrected here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives a key from a source URL.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        Self(normalize(url))
    }

    /// Wraps an already-normalized key, e.g. one read back from a file name.
    ///
    /// Returns `None` if `raw` is not a valid normalized key.
    #[must_use]
    pub fn from_normalized(raw: &str) -> Option<Self> {
        is_normalized(raw).then(|| Self(raw.to_string()))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalizes a source identifier into a key string.
///
/// Truncation counts characters, not bytes, and happens before
/// substitution, so the output never exceeds [`MAX_KEY_LENGTH`].
#[must_use]
pub fn normalize(url: &str) -> String {
    url.chars()
        .take(MAX_KEY_LENGTH)
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if is_key_char(c) { c } else { '_' }
        })
        .collect()
}

const fn is_key_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '-')
}

fn is_normalized(raw: &str) -> bool {
    !raw.is_empty() && raw.len() <= MAX_KEY_LENGTH && raw.chars().all(is_key_char)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("https://x/a.png", "https___x_a_png" ; "simple_url")]
    #[test_case("HTTP://EXAMPLE.COM/IMG", "http___example_com_img" ; "uppercase_is_lowered")]
    #[test_case("keep-this_key09", "keep-this_key09" ; "already_safe")]
    #[test_case("", "" ; "empty_input")]
    #[test_case("caf\u{e9}/\u{1F600}", "caf___" ; "non_ascii_replaced_per_char")]
    fn test_normalize(input: &str, expected: &str) {
        assert_eq!(normalize(input), expected);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let url = "https://cdn.example.com/attachments/123/456/image.png?size=large";
        assert_eq!(CacheKey::from_url(url), CacheKey::from_url(url));
    }

    #[test]
    fn test_normalize_bounds_length_and_alphabet() {
        let inputs = [
            "https://example.com/".repeat(10),
            "\u{130}".repeat(100),
            "a b\tc\nd/e?f=g&h#i".to_string(),
            "ÄÖÜ日本語".repeat(30),
        ];

        for input in &inputs {
            let key = normalize(input);
            assert!(key.chars().count() <= MAX_KEY_LENGTH, "too long: {key}");
            assert!(key.chars().all(is_key_char), "bad alphabet: {key}");
        }
    }

    #[test]
    fn test_shared_prefix_collides() {
        let prefix = "https://example.com/".repeat(4);
        let a = format!("{prefix}a.png");
        let b = format!("{prefix}b.png");
        assert_eq!(CacheKey::from_url(&a), CacheKey::from_url(&b));
    }

    #[test]
    fn test_from_normalized() {
        assert!(CacheKey::from_normalized("https___x_a_png").is_some());
        assert!(CacheKey::from_normalized("Has.Dots").is_none());
        assert!(CacheKey::from_normalized("").is_none());
        assert!(CacheKey::from_normalized(&"a".repeat(65)).is_none());
    }
}
