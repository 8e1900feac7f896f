// Copyright 2021-2023 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! String helpers.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use either::Either;
use thiserror::Error;

/// Error occurred during pattern string parsing.
#[derive(Debug, Error)]
pub enum StringPatternParseError {
    /// Failed to parse glob pattern.
    #[error(transparent)]
    GlobPattern(glob::PatternError),
    /// Failed to parse regular expression.
    #[error("invalid regular expression: {0}")]
    Regex(regex::Error),
}

/// Pattern to be tested against names such as tags, bookmarks, and branches.
///
/// The source string may carry a `literal:`, `re:`, or `glob:` prefix. Any
/// other prefix is part of the literal name, so `foo:bar` matches the name
/// `foo:bar` exactly.
#[derive(Clone, Debug)]
pub enum StringPattern {
    /// Matches strings exactly.
    Literal(String),
    /// Unix-style shell wildcard pattern.
    Glob(glob::Pattern),
    /// Regular expression searched anywhere in the string.
    Regex(regex::Regex),
}

impl StringPattern {
    /// Parses the given string as a [`StringPattern`].
    pub fn parse(src: &str) -> Result<StringPattern, StringPatternParseError> {
        if let Some(pattern) = src.strip_prefix("re:") {
            StringPattern::regex(pattern)
        } else if let Some(pattern) = src.strip_prefix("glob:") {
            StringPattern::glob(pattern)
        } else if let Some(literal) = src.strip_prefix("literal:") {
            Ok(StringPattern::literal(literal))
        } else {
            Ok(StringPattern::literal(src))
        }
    }

    /// Creates pattern that matches exactly.
    pub fn literal(src: impl Into<String>) -> Self {
        StringPattern::Literal(src.into())
    }

    /// Parses the given string as a glob pattern.
    pub fn glob(src: &str) -> Result<Self, StringPatternParseError> {
        let pattern = glob::Pattern::new(src).map_err(StringPatternParseError::GlobPattern)?;
        Ok(StringPattern::Glob(pattern))
    }

    /// Parses the given string as a regular expression.
    pub fn regex(src: &str) -> Result<Self, StringPatternParseError> {
        let regex = regex::Regex::new(src).map_err(StringPatternParseError::Regex)?;
        Ok(StringPattern::Regex(regex))
    }

    /// Name of the pattern kind, as written in the prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            StringPattern::Literal(_) => "literal",
            StringPattern::Glob(_) => "glob",
            StringPattern::Regex(_) => "re",
        }
    }

    /// Returns a literal pattern if this should match input strings exactly.
    ///
    /// This can be used to optimize map lookup by exact key.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            StringPattern::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    /// Returns the original string of this pattern without the kind prefix.
    pub fn as_str(&self) -> &str {
        match self {
            StringPattern::Literal(literal) => literal,
            StringPattern::Glob(pattern) => pattern.as_str(),
            StringPattern::Regex(regex) => regex.as_str(),
        }
    }

    /// Returns true if this pattern matches the `haystack`.
    pub fn matches(&self, haystack: &str) -> bool {
        match self {
            StringPattern::Literal(literal) => haystack == literal,
            StringPattern::Glob(pattern) => pattern.matches(haystack),
            StringPattern::Regex(regex) => regex.is_match(haystack),
        }
    }

    /// Iterates entries of the given `map` whose keys matches this pattern.
    pub fn filter_btree_map<'a: 'b, 'b, K: Borrow<str> + Ord, V>(
        &'b self,
        map: &'a BTreeMap<K, V>,
    ) -> impl Iterator<Item = (&'a K, &'a V)> + 'b {
        if let Some(key) = self.as_literal() {
            Either::Left(map.get_key_value(key).into_iter())
        } else {
            Either::Right(map.iter().filter(|&(key, _)| self.matches(key.borrow())))
        }
    }
}

impl fmt::Display for StringPattern {
    /// Shows the original string of this pattern.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
