//! The security gate consulted before a type is resolved.
//!
//! Two layers apply. The mandatory [`DisallowList`] is checked first on every
//! use of a type, registered or not, on write and on read. For types that
//! are not registered, a pluggable [`TypeChecker`] decides afterwards.

use std::{collections::HashSet, fmt::Debug};

use fory_meta::types::TypeName;


/// A set of exact qualified names and `prefix*` patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamePatterns {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl NamePatterns {
    /// Adds a pattern. A trailing `*` matches every name with that prefix.
    pub fn insert(&mut self, pattern: &str) {
        let Some(prefix) = pattern.strip_suffix('*') else {
            self.exact.insert(pattern.to_owned());
            return;
        };

        self.prefixes.push(prefix.to_owned());
    }

    /// Whether the qualified name matches any pattern.
    #[must_use]
    pub fn matches(&self, qualified: &str) -> bool {
        self.exact.contains(qualified)
            || self.prefixes.iter().any(|prefix| qualified.starts_with(prefix))
    }

    /// Whether no pattern was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for NamePatterns {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut patterns = Self::default();
        for pattern in iter {
            patterns.insert(pattern.as_ref());
        }
        patterns
    }
}

/// Types that may never cross the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisallowList(NamePatterns);

impl DisallowList {
    /// Builds the list from patterns.
    #[must_use]
    pub fn new<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self(patterns.into_iter().collect())
    }

    /// Whether the type is on the list.
    #[must_use]
    pub fn contains(&self, name: &TypeName) -> bool {
        !self.0.is_empty() && self.0.matches(&name.to_string())
    }
}

/// Decides whether an unregistered type may be resolved by name.
pub trait TypeChecker: Send + Sync + Debug {
    /// Whether the type may be used.
    fn is_allowed(&self, name: &TypeName) -> bool;
}

/// How strictly an [`AllowListChecker`] enforces its allow list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CheckLevel {
    /// Everything not disallowed passes.
    Disable,

    /// Types outside the allow list pass with a warning.
    #[default]
    Warn,

    /// Only types on the allow list pass.
    Strict,
}

/// A checker with an allow list and an extra disallow list.
#[derive(Debug, Clone, Default)]
pub struct AllowListChecker {
    level: CheckLevel,
    allowed: NamePatterns,
    disallowed: NamePatterns,
}

impl AllowListChecker {
    /// A checker with empty lists.
    #[must_use]
    pub fn new(level: CheckLevel) -> Self {
        Self { level, ..Self::default() }
    }

    /// Allows a name or `prefix*` pattern.
    #[must_use]
    pub fn allow(mut self, pattern: &str) -> Self {
        self.allowed.insert(pattern);
        self
    }

    /// Disallows a name or `prefix*` pattern.
    #[must_use]
    pub fn disallow(mut self, pattern: &str) -> Self {
        self.disallowed.insert(pattern);
        self
    }

    /// The enforcement level.
    #[must_use]
    pub const fn level(&self) -> CheckLevel { self.level }
}

impl TypeChecker for AllowListChecker {
    fn is_allowed(&self, name: &TypeName) -> bool {
        let qualified = name.to_string();

        if self.disallowed.matches(&qualified) {
            return false;
        }

        match self.level {
            CheckLevel::Disable => true,
            CheckLevel::Warn => {
                if !self.allowed.matches(&qualified) {
                    log::warn!(
                        "type `{qualified}` is not on the allow list; it will \
                         be rejected under strict checking"
                    );
                }
                true
            }
            CheckLevel::Strict => self.allowed.matches(&qualified),
        }
    }
}
