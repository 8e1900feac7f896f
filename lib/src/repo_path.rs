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

#![allow(missing_docs)]

use std::fmt::{self, Debug, Formatter};
use std::iter;

use itertools::Itertools as _;
use thiserror::Error;

/// Repository-relative path of a file or directory.
///
/// Components are separated by `/`. The root directory is the empty path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoPath {
    value: String,
}

impl Debug for RepoPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl RepoPath {
    pub fn root() -> Self {
        RepoPath {
            value: String::new(),
        }
    }

    /// Creates path from `/`-separated string. Empty components are dropped.
    pub fn from_internal_string(value: impl AsRef<str>) -> Self {
        let value = value.as_ref();
        if value.is_empty() || !value.split('/').any(str::is_empty) {
            return RepoPath {
                value: value.to_owned(),
            };
        }
        let value = value.split('/').filter(|c| !c.is_empty()).join("/");
        RepoPath { value }
    }

    /// Parses a user-provided `input` path relative to the `cwd` directory.
    ///
    /// `.` and `..` components are resolved. Absolute paths and paths
    /// escaping the repository are rejected.
    pub fn parse_fs_path(cwd: &RepoPath, input: &str) -> Result<Self, FsPathParseError> {
        let not_in_repo = || FsPathParseError::InputNotInRepo(input.to_owned());
        if input.starts_with('/') {
            return Err(not_in_repo());
        }
        let mut components = cwd.components().collect_vec();
        for component in input.split(['/', std::path::MAIN_SEPARATOR]) {
            match component {
                "" | "." => {}
                ".." => {
                    components.pop().ok_or_else(not_in_repo)?;
                }
                name => components.push(name),
            }
        }
        Ok(RepoPath {
            value: components.join("/"),
        })
    }

    /// The full string form used internally, not for presenting to users.
    pub fn as_internal_file_string(&self) -> &str {
        &self.value
    }

    pub fn is_root(&self) -> bool {
        self.value.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.value.split('/').filter(|c| !c.is_empty())
    }

    pub fn parent(&self) -> Option<RepoPath> {
        if self.is_root() {
            return None;
        }
        let value = match self.value.rsplit_once('/') {
            Some((dir, _)) => dir.to_owned(),
            None => String::new(),
        };
        Some(RepoPath { value })
    }

    /// Last component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.components().last()
    }

    pub fn join(&self, name: &str) -> RepoPath {
        if self.is_root() {
            RepoPath::from_internal_string(name)
        } else {
            RepoPath::from_internal_string(format!("{}/{name}", self.value))
        }
    }

    /// Whether `self` is `base` or a path under the `base` directory.
    pub fn starts_with(&self, base: &RepoPath) -> bool {
        base.is_root()
            || self.value == base.value
                || self
                    .value
                    .strip_prefix(&base.value)
                    .is_some_and(|rest| rest.starts_with('/'))
    }

    /// This path followed by its parent directories up to the root, which
    /// is included.
    pub fn ancestors(&self) -> impl Iterator<Item = RepoPath> {
        iter::successors(Some(self.clone()), RepoPath::parent)
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum FsPathParseError {
    #[error(r#"Path "{0}" is not in the repo"#)]
    InputNotInRepo(String),
}
