//! Key comparison utilities.
//!
//! Every column family orders its keys with one comparator. The comparator's
//! name is persisted when the column family is created and checked on every
//! reopen, so a name must identify one ordering forever.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Trait for comparing keys.
pub trait Comparator: Send + Sync + fmt::Debug {
    /// Compare two keys. Must be a total order.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Stable name used for persisted identity matching.
    fn name(&self) -> &str;
}

/// Default bytewise comparator (lexicographic ordering).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl BytewiseComparator {
    /// Create a new bytewise comparator.
    pub fn new() -> Self {
        Self
    }
}

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "kvcore.BytewiseComparator"
    }
}

/// Bytewise comparator in descending order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseBytewiseComparator;

impl ReverseBytewiseComparator {
    /// Create a new descending bytewise comparator.
    pub fn new() -> Self {
        Self
    }
}

impl Comparator for ReverseBytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }

    fn name(&self) -> &str {
        "kvcore.ReverseBytewiseComparator"
    }
}

/// Text ordering over UTF-8 keys.
///
/// Keys are decoded lossily, compared case-insensitively by Unicode scalar
/// values, and ties are broken bytewise so distinct keys never compare equal.
#[derive(Debug, Clone, Copy)]
pub struct StringComparator {
    descending: bool,
}

impl StringComparator {
    /// Ascending text order.
    pub fn ascending() -> Self {
        Self { descending: false }
    }

    /// Descending text order.
    pub fn descending() -> Self {
        Self { descending: true }
    }

    fn compare_ascending(a: &[u8], b: &[u8]) -> Ordering {
        let left = String::from_utf8_lossy(a);
        let right = String::from_utf8_lossy(b);
        let folded = left
            .chars()
            .flat_map(char::to_lowercase)
            .cmp(right.chars().flat_map(char::to_lowercase));
        folded.then_with(|| a.cmp(b))
    }
}

impl Comparator for StringComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let ord = Self::compare_ascending(a, b);
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }

    fn name(&self) -> &str {
        if self.descending {
            "kvcore.StringCompareDescending"
        } else {
            "kvcore.StringCompareAscending"
        }
    }
}

/// Reverse comparator - inverts the ordering of another comparator.
#[derive(Debug, Clone)]
pub struct ReverseComparator<C: Comparator> {
    inner: C,
    name: String,
}

impl<C: Comparator> ReverseComparator<C> {
    /// Create a new reverse comparator.
    pub fn new(inner: C) -> Self {
        let name = format!("kvcore.Reverse({})", inner.name());
        Self { inner, name }
    }
}

impl<C: Comparator> Comparator for ReverseComparator<C> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.inner.compare(b, a)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The shared default comparator instance.
pub fn default_comparator() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytewise_compare() {
        let cmp = BytewiseComparator::new();

        assert_eq!(cmp.compare(b"abc", b"abc"), Ordering::Equal);
        assert_eq!(cmp.compare(b"abc", b"abd"), Ordering::Less);
        assert_eq!(cmp.compare(b"abd", b"abc"), Ordering::Greater);
        assert_eq!(cmp.compare(b"ab", b"abc"), Ordering::Less);
        assert_eq!(cmp.compare(b"", b""), Ordering::Equal);
        assert_eq!(cmp.compare(b"", b"a"), Ordering::Less);
        assert_eq!(cmp.compare(b"a\0b", b"a\0c"), Ordering::Less);
    }

    #[test]
    fn test_reverse_bytewise() {
        let cmp = ReverseBytewiseComparator::new();

        assert_eq!(cmp.compare(b"abc", b"abd"), Ordering::Greater);
        assert_eq!(cmp.compare(b"abd", b"abc"), Ordering::Less);
        assert_eq!(cmp.compare(b"abc", b"abc"), Ordering::Equal);
        assert_ne!(cmp.name(), BytewiseComparator::new().name());
    }

    #[test]
    fn test_string_comparator_folds_case() {
        let cmp = StringComparator::ascending();

        // Bytewise "B" < "a", text order puts "a" first.
        assert_eq!(cmp.compare(b"a", b"B"), Ordering::Less);
        assert_eq!(cmp.compare(b"apple", b"Banana"), Ordering::Less);
        // Case-only differences still order deterministically.
        assert_ne!(cmp.compare(b"a", b"A"), Ordering::Equal);

        let desc = StringComparator::descending();
        assert_eq!(desc.compare(b"a", b"B"), Ordering::Greater);
        assert_ne!(cmp.name(), desc.name());
    }

    #[test]
    fn test_reverse_comparator() {
        let cmp = ReverseComparator::new(BytewiseComparator::new());

        assert_eq!(cmp.compare(b"abc", b"abd"), Ordering::Greater);
        assert_eq!(cmp.compare(b"abd", b"abc"), Ordering::Less);
        assert_eq!(cmp.name(), "kvcore.Reverse(kvcore.BytewiseComparator)");
    }
}
