//! Loose version comparison.
//!
//! Plugin and host versions are free-form dotted strings (`17.10`,
//! `1.0.0-5`, `2021.4.01`). They are compared component-wise: runs of
//! digits order numerically, everything else orders as text, and a version
//! that is a strict prefix of another orders first. Strings that produce no
//! components at all fall back to plain lexical ordering.

use std::cmp::Ordering;

/// One parsed component of a loose version.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Num(u64),
    Text(String),
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Num(left), Component::Num(right)) => left.cmp(right),
            (Component::Text(left), Component::Text(right)) => left.cmp(right),
            // numeric components sort before textual ones
            (Component::Num(_), Component::Text(_)) => Ordering::Less,
            (Component::Text(_), Component::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A version parsed into ordered components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LooseVersion {
    components: Vec<Component>,
}

impl LooseVersion {
    /// Parse a version string. Returns `None` when the string yields no
    /// component at all (empty or whitespace), signalling the caller to
    /// fall back to lexical comparison.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut components = Vec::new();
        let mut chars = raw.chars().peekable();

        while let Some(&c) = chars.peek() {
            if c == '.' {
                chars.next();
            } else if c.is_ascii_digit() {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match digits.parse::<u64>() {
                    Ok(n) => components.push(Component::Num(n)),
                    Err(_) => components.push(Component::Text(digits)),
                }
            } else if c.is_ascii_lowercase() {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_lowercase() {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                components.push(Component::Text(text));
            } else {
                // separator runs (`-`, `~`, uppercase, ...) are kept as a
                // single textual component, like `1.0.0-1` -> [1,0,0,"-",1]
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d == '.' || d.is_ascii_digit() || d.is_ascii_lowercase() {
                        break;
                    }
                    text.push(d);
                    chars.next();
                }
                components.push(Component::Text(text));
            }
        }

        if components.is_empty() {
            None
        } else {
            Some(Self { components })
        }
    }
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings, falling back to lexical ordering when
/// either side does not parse.
pub fn compare(left: &str, right: &str) -> Ordering {
    match (LooseVersion::parse(left), LooseVersion::parse(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => left.cmp(right),
    }
}

/// `left < right` with the catalog's edge rules: a missing or empty left
/// side is less than anything, a missing or empty right side is greater
/// than anything.
pub fn less_than(left: Option<&str>, right: Option<&str>) -> bool {
    let left = left.filter(|s| !s.is_empty());
    let right = right.filter(|s| !s.is_empty());
    match (left, right) {
        (None, _) => true,
        (_, None) => false,
        (Some(left), Some(right)) => compare(left, right) == Ordering::Less,
    }
}
