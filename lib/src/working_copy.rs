// Copyright 2023 The Jujutsu Authors
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

//! Defines the interface to file states that fileset predicates consult.

#![allow(missing_docs)]

use thiserror::Error;

use crate::matchers::Matcher;
use crate::repo::Rev;
use crate::repo_path::RepoPath;

/// File tree a fileset is matched against.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Snapshot {
    /// Tree without files, e.g. the parent of a root revision.
    Empty,
    /// Committed revision.
    Revision(Rev),
    /// Files on disk.
    WorkingCopy,
}

/// Which of the expensive status lists should be computed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatusOptions {
    pub list_unknown: bool,
    pub list_ignored: bool,
    pub list_clean: bool,
}

/// Seven lists of paths describing how one tree differs from another.
///
/// The `unknown`, `ignored`, and `clean` lists are empty unless requested by
/// [`StatusOptions`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Status {
    pub modified: Vec<RepoPath>,
    pub added: Vec<RepoPath>,
    pub removed: Vec<RepoPath>,
    /// Tracked but missing from disk.
    pub deleted: Vec<RepoPath>,
    pub unknown: Vec<RepoPath>,
    pub ignored: Vec<RepoPath>,
    pub clean: Vec<RepoPath>,
}

/// Name of a [`Status`] list.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StatusKind {
    Modified,
    Added,
    Removed,
    Deleted,
    Unknown,
    Ignored,
    Clean,
}

impl Status {
    pub fn paths(&self, kind: StatusKind) -> &[RepoPath] {
        match kind {
            StatusKind::Modified => &self.modified,
            StatusKind::Added => &self.added,
            StatusKind::Removed => &self.removed,
            StatusKind::Deleted => &self.deleted,
            StatusKind::Unknown => &self.unknown,
            StatusKind::Ignored => &self.ignored,
            StatusKind::Clean => &self.clean,
        }
    }
}

impl StatusOptions {
    /// Options listing everything the `kinds` need.
    pub fn for_kinds(kinds: impl IntoIterator<Item = StatusKind>) -> Self {
        let mut options = StatusOptions::default();
        for kind in kinds {
            match kind {
                StatusKind::Unknown => options.list_unknown = true,
                StatusKind::Ignored => options.list_ignored = true,
                StatusKind::Clean => options.list_clean = true,
                StatusKind::Modified
                | StatusKind::Added
                | StatusKind::Removed
                | StatusKind::Deleted => {}
            }
        }
        options
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    Normal { executable: bool },
    Symlink,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileMetadata {
    pub size: u64,
    pub file_type: FileType,
}

/// Error reading file states.
#[derive(Debug, Error)]
pub enum WorkingCopyError {
    #[error("Revision {0} is not available")]
    MissingRevision(Rev),
    #[error("Failed to read {path}")]
    ReadFile {
        path: RepoPath,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Collaborator giving access to file states of revisions and of the working
/// copy.
///
/// Missing files are reported as `Ok(None)`, not as errors.
pub trait WorkingCopy {
    /// Revision the working copy is based on.
    fn parent(&self) -> Snapshot;

    /// Changes from `base` to `current` of the paths the `matcher` selects.
    fn status(
        &self,
        base: Snapshot,
        current: Snapshot,
        matcher: &dyn Matcher,
        options: StatusOptions,
    ) -> Result<Status, WorkingCopyError>;

    /// Files tracked in the `snapshot`, sorted.
    fn tracked_files(&self, snapshot: Snapshot) -> Result<Vec<RepoPath>, WorkingCopyError>;

    fn file_metadata(
        &self,
        snapshot: Snapshot,
        path: &RepoPath,
    ) -> Result<Option<FileMetadata>, WorkingCopyError>;

    fn file_content(
        &self,
        snapshot: Snapshot,
        path: &RepoPath,
    ) -> Result<Option<Vec<u8>>, WorkingCopyError>;
}
