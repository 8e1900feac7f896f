// Copyright 2020 The Jujutsu Authors
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

//! Interface to the revision graph the query engine runs against.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use thiserror::Error;

use crate::dagop;

/// Position of a changeset in the append-only changelog.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Rev(pub u32);

impl Rev {
    /// Index usable for slices.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Rev {
    fn from(value: u32) -> Self {
        Rev(value)
    }
}

/// Content-derived identifier of a changeset.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(Vec<u8>);

impl NodeId {
    pub const HEX_LEN: usize = 40;

    pub fn new(value: Vec<u8>) -> Self {
        NodeId(value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        NodeId(bytes.to_vec())
    }

    /// Parses the given hex string into a node id.
    pub fn try_from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(hex).map(NodeId)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeId").field(&self.hex()).finish()
    }
}

/// A node id prefix with facilities for converting between bytes and a hex
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexPrefix {
    // For odd-length prefixes, the lower 4 bits of the last byte are
    // zero-filled (e.g. the prefix "abc" is stored in two bytes as "abc0").
    min_prefix_bytes: Vec<u8>,
    has_odd_byte: bool,
}

impl HexPrefix {
    /// Returns a new `HexPrefix` or `None` if `prefix` cannot be decoded from
    /// hex to bytes.
    pub fn new(prefix: &str) -> Option<HexPrefix> {
        let has_odd_byte = prefix.len() & 1 != 0;
        let min_prefix_bytes = if has_odd_byte {
            hex::decode(prefix.to_owned() + "0").ok()?
        } else {
            hex::decode(prefix).ok()?
        };
        Some(HexPrefix {
            min_prefix_bytes,
            has_odd_byte,
        })
    }

    pub fn hex(&self) -> String {
        let mut hex_string = hex::encode(&self.min_prefix_bytes);
        if self.has_odd_byte {
            hex_string.pop().unwrap();
        }
        hex_string
    }

    /// Returns whether the stored prefix matches the prefix of `id`.
    pub fn matches(&self, id: &NodeId) -> bool {
        let id_bytes = id.as_bytes();
        let (maybe_odd, prefix) = self.split_odd_byte();
        if id_bytes.starts_with(prefix) {
            if let Some(odd) = maybe_odd {
                matches!(id_bytes.get(prefix.len()), Some(v) if v & 0xf0 == odd)
            } else {
                true
            }
        } else {
            false
        }
    }

    fn split_odd_byte(&self) -> (Option<u8>, &[u8]) {
        if self.has_odd_byte {
            let (&odd, prefix) = self.min_prefix_bytes.split_last().unwrap();
            (Some(odd), prefix)
        } else {
            (None, &self.min_prefix_bytes)
        }
    }
}

/// Result of looking up a node id prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixResolution<T> {
    NoMatch,
    SingleMatch(T),
    AmbiguousMatch,
}

impl<T: Clone> PrefixResolution<T> {
    fn plus(&self, other: &PrefixResolution<T>) -> PrefixResolution<T> {
        match (self, other) {
            (PrefixResolution::NoMatch, other) => other.clone(),
            (local, PrefixResolution::NoMatch) => local.clone(),
            (PrefixResolution::AmbiguousMatch, _) => PrefixResolution::AmbiguousMatch,
            (_, PrefixResolution::AmbiguousMatch) => PrefixResolution::AmbiguousMatch,
            (PrefixResolution::SingleMatch(_), PrefixResolution::SingleMatch(_)) => {
                PrefixResolution::AmbiguousMatch
            }
        }
    }
}

/// Publishing state of a changeset. Ordered from least to most restricted.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Phase {
    Public,
    Draft,
    Secret,
}

/// Error resolving a name to a revision.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum LookupError {
    #[error("unknown revision '{0}'")]
    UnknownRevision(String),
    #[error("ambiguous identifier '{0}'")]
    AmbiguousPrefix(String),
    #[error("empty string is not a valid revision")]
    EmptyName,
    #[error("{kind} '{name}' does not exist")]
    MissingName { kind: &'static str, name: String },
    #[error("revision in set has more than one child")]
    AmbiguousChild,
}

/// Read-only view of a changelog and the names pointing into it.
///
/// Revisions are numbered `0..revision_count()` in topological order: parents
/// always have smaller numbers than their children.
pub trait Repo {
    fn revision_count(&self) -> usize;

    /// First and second parents. A root revision has neither.
    fn parent_revisions(&self, rev: Rev) -> (Option<Rev>, Option<Rev>);

    fn node_for_revision(&self, rev: Rev) -> NodeId;

    fn revision_for_node(&self, node: &NodeId) -> Result<Rev, LookupError>;

    /// Revisions filtered out of every query result.
    fn hidden_revisions(&self) -> &HashSet<Rev>;

    /// Lazily walks ancestors of `revs` in descending order, not going below
    /// `stop_at`. The `revs` themselves are included only if `inclusive`.
    fn ancestors_of(
        &self,
        revs: &[Rev],
        stop_at: Rev,
        inclusive: bool,
    ) -> Box<dyn Iterator<Item = Rev> + '_> {
        Box::new(dagop::AncestorsIter::new(self, revs, stop_at, inclusive))
    }

    fn tags(&self) -> BTreeMap<String, Rev> {
        BTreeMap::new()
    }

    fn bookmarks(&self) -> BTreeMap<String, Rev> {
        BTreeMap::new()
    }

    fn branch(&self, _rev: Rev) -> &str {
        "default"
    }

    fn phase(&self, _rev: Rev) -> Phase {
        Phase::Public
    }

    /// Resolves tag, bookmark, or branch name. A branch name resolves to its
    /// most recent revision.
    fn lookup_name(&self, name: &str) -> Option<Rev> {
        if let Some(&rev) = self.tags().get(name) {
            return Some(rev);
        }
        if let Some(&rev) = self.bookmarks().get(name) {
            return Some(rev);
        }
        (0..self.revision_count() as u32)
            .rev()
            .map(Rev)
            .find(|&rev| self.branch(rev) == name && !self.hidden_revisions().contains(&rev))
    }

    fn resolve_node_prefix(&self, prefix: &HexPrefix) -> PrefixResolution<Rev> {
        (0..self.revision_count() as u32)
            .map(Rev)
            .filter(|rev| !self.hidden_revisions().contains(rev))
            .filter(|&rev| prefix.matches(&self.node_for_revision(rev)))
            .fold(PrefixResolution::NoMatch, |acc, rev| {
                acc.plus(&PrefixResolution::SingleMatch(rev))
            })
    }

    fn parents(&self, rev: Rev) -> Vec<Rev> {
        let (p1, p2) = self.parent_revisions(rev);
        p1.into_iter().chain(p2.filter(|p2| Some(*p2) != p1)).collect()
    }

    fn tip(&self) -> Option<Rev> {
        (0..self.revision_count() as u32)
            .rev()
            .map(Rev)
            .find(|rev| !self.hidden_revisions().contains(rev))
    }
}

/// Resolves a single revision symbol.
///
/// Tried in order: a revision number (negative numbers count from the end),
/// `tip`, a full hex node id, a tag/bookmark/branch name, and a unique node id
/// prefix.
pub fn resolve_symbol(repo: &(impl Repo + ?Sized), symbol: &str) -> Result<Rev, LookupError> {
    if symbol.is_empty() {
        return Err(LookupError::EmptyName);
    }
    if let Some(rev) = resolve_revision_number(repo, symbol) {
        return Ok(rev);
    }
    if symbol == "tip" {
        return repo
            .tip()
            .ok_or_else(|| LookupError::UnknownRevision(symbol.to_owned()));
    }
    if symbol.len() == NodeId::HEX_LEN {
        if let Ok(node) = NodeId::try_from_hex(symbol) {
            if let Ok(rev) = repo.revision_for_node(&node) {
                return Ok(rev);
            }
        }
    }
    if let Some(rev) = repo.lookup_name(symbol) {
        return Ok(rev);
    }
    if let Some(prefix) = HexPrefix::new(symbol) {
        match repo.resolve_node_prefix(&prefix) {
            PrefixResolution::SingleMatch(rev) => return Ok(rev),
            PrefixResolution::AmbiguousMatch => {
                return Err(LookupError::AmbiguousPrefix(symbol.to_owned()))
            }
            PrefixResolution::NoMatch => {}
        }
    }
    Err(LookupError::UnknownRevision(symbol.to_owned()))
}

fn resolve_revision_number(repo: &(impl Repo + ?Sized), symbol: &str) -> Option<Rev> {
    let number: i64 = symbol.parse().ok()?;
    // "007" and "+7" are names, not numbers
    if number.to_string() != symbol {
        return None;
    }
    let count = i64::try_from(repo.revision_count()).ok()?;
    let number = if number < 0 { number + count } else { number };
    if !(0..count).contains(&number) {
        return None;
    }
    Some(Rev(u32::try_from(number).ok()?))
}
