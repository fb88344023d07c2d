//! Hierarchical addresses and prefix patterns.
//!
//! Every entity a protocol can talk about, a platform, a group, a member,
//! a message, is addressed by a [`Selector`]: an ordered path of
//! `(segment, value)` pairs from a root namespace, e.g.
//! `land(qq).group(123).member(5)`. Registrations are keyed by a
//! [`Pattern`]: the segment-name path without values, matched as a strict
//! left-to-right prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A concrete hierarchical address: an ordered path of `(segment, value)`
/// pairs.
///
/// Segment order is fixed by the namespace vocabulary; two selectors are
/// equal only if their full paths (names and values) are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    segments: Vec<(String, String)>,
}

impl Selector {
    /// An empty selector at the namespace root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arbitrary segment.
    pub fn push(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.segments.push((name.into(), value.into()));
        self
    }

    /// Append a `land` segment (the platform root, e.g. `qq`).
    pub fn land(self, value: impl Into<String>) -> Self {
        self.push("land", value)
    }

    /// Append a `group` segment.
    pub fn group(self, value: impl Into<String>) -> Self {
        self.push("group", value)
    }

    /// Append a `member` segment.
    pub fn member(self, value: impl Into<String>) -> Self {
        self.push("member", value)
    }

    /// Append a `user` segment.
    pub fn user(self, value: impl Into<String>) -> Self {
        self.push("user", value)
    }

    /// Append an `account` segment.
    pub fn account(self, value: impl Into<String>) -> Self {
        self.push("account", value)
    }

    /// Append a `message` segment.
    pub fn message(self, value: impl Into<String>) -> Self {
        self.push("message", value)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the selector has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Value of the named segment, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Name of the final segment, if any.
    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(|(n, _)| n.as_str())
    }

    /// Value of the final segment, if any.
    pub fn last_value(&self) -> Option<&str> {
        self.segments.last().map(|(_, v)| v.as_str())
    }

    /// The dotted segment-name path, e.g. `land.group.member`.
    pub fn path(&self) -> Pattern {
        Pattern {
            segments: self.segments.iter().map(|(n, _)| n.clone()).collect(),
        }
    }

    /// Whether this selector matches a dotted pattern over its **full**
    /// length.
    ///
    /// Each pattern piece is either a segment name (`account`) or a name
    /// with a literal value (`land(qq)`). The pattern must cover every
    /// segment; values are checked only where given.
    ///
    /// ```
    /// use sprawl::selector::Selector;
    ///
    /// let route = Selector::new().land("qq").account("123");
    /// assert!(route.follows("land.account"));
    /// assert!(route.follows("land(qq).account"));
    /// assert!(!route.follows("land(tg).account"));
    /// assert!(!route.follows("land"));
    /// ```
    pub fn follows(&self, pattern: &str) -> bool {
        let pieces: Vec<&str> = pattern.split('.').collect();
        if pieces.len() != self.segments.len() {
            return false;
        }
        self.segments.iter().zip(pieces).all(|((name, value), piece)| {
            match piece.split_once('(') {
                Some((n, rest)) => {
                    n == name && rest.strip_suffix(')') == Some(value.as_str())
                }
                None => piece == name,
            }
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{name}({value})")?;
        }
        Ok(())
    }
}

/// A registration key: an ordered path of segment **names** forming a
/// prefix pattern.
///
/// A pattern matches a concrete key when every one of its segments equals,
/// in order, a prefix of the key's segments. The pattern may be shorter,
/// never longer; there are no wildcards beyond absent trailing segments.
/// The empty pattern is a catch-all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Pattern {
    segments: Vec<String>,
}

impl Pattern {
    /// Parse a dotted path such as `land.group.member`. The empty string
    /// yields the catch-all pattern.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// A single-segment pattern, used by discriminator overloads.
    pub fn single(segment: impl Into<String>) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    /// The segment names.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Specificity of this pattern: its segment count. Longer prefixes are
    /// more specific.
    pub fn specificity(&self) -> usize {
        self.segments.len()
    }

    /// Whether the pattern has no segments (catch-all).
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether this pattern is a segment-wise prefix of `key`.
    pub fn matches(&self, key: &Pattern) -> bool {
        key.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&key.segments).all(|(a, b)| a == b)
    }
}

impl std::borrow::Borrow<[String]> for Pattern {
    fn borrow(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_display_and_access() {
        let target = Selector::new().land("qq").group("123").member("5");
        assert_eq!(target.to_string(), "land(qq).group(123).member(5)");
        assert_eq!(target.get("group"), Some("123"));
        assert_eq!(target.get("channel"), None);
        assert_eq!(target.last_segment(), Some("member"));
        assert_eq!(target.last_value(), Some("5"));
        assert_eq!(target.path().to_string(), "land.group.member");
    }

    #[test]
    fn pattern_prefix_matching() {
        let key = Pattern::parse("land.group.member");
        assert!(Pattern::parse("land").matches(&key));
        assert!(Pattern::parse("land.group").matches(&key));
        assert!(Pattern::parse("land.group.member").matches(&key));
        assert!(!Pattern::parse("land.group.member.x").matches(&key));
        assert!(!Pattern::parse("land.user").matches(&key));
        assert!(!Pattern::parse("group").matches(&key));
    }

    #[test]
    fn empty_pattern_is_catch_all() {
        let catch_all = Pattern::parse("");
        assert!(catch_all.is_empty());
        assert!(catch_all.matches(&Pattern::parse("land")));
        assert!(catch_all.matches(&Pattern::parse("")));
    }

    #[test]
    fn specificity_is_segment_count() {
        assert_eq!(Pattern::parse("land").specificity(), 1);
        assert_eq!(Pattern::parse("land.group.member").specificity(), 3);
        assert!(
            Pattern::parse("land.group").specificity()
                > Pattern::parse("land").specificity()
        );
    }

    #[test]
    fn follows_checks_names_and_literal_values() {
        let route = Selector::new().land("qq").account("99");
        assert!(route.follows("land.account"));
        assert!(route.follows("land(qq).account"));
        assert!(route.follows("land(qq).account(99)"));
        assert!(!route.follows("land(tg).account"));
        assert!(!route.follows("land.account.extra"));
        assert!(!route.follows("land"));
    }
}
