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

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

use itertools::Itertools;
use revquery_lib::matchers::Matcher;
use revquery_lib::repo::{LookupError, NodeId, Phase, Repo, Rev};
use revquery_lib::repo_path::RepoPath;
use revquery_lib::settings::QuerySettings;
use revquery_lib::smartset::Revs;
use revquery_lib::working_copy::{
    FileMetadata, FileType, Snapshot, Status, StatusOptions, WorkingCopy, WorkingCopyError,
};

pub fn repo_path(value: &str) -> RepoPath {
    RepoPath::from_internal_string(value)
}

/// Parses query settings from the TOML text.
pub fn settings_from_toml(text: &str) -> QuerySettings {
    QuerySettings::from_toml_str(text).unwrap()
}

/// In-memory changelog.
///
/// Node ids are generated from the revision number, so they are stable
/// across runs.
#[derive(Debug, Default)]
pub struct TestRepo {
    parents: Vec<(Option<Rev>, Option<Rev>)>,
    nodes: Vec<NodeId>,
    branches: Vec<String>,
    phases: Vec<Phase>,
    tags: BTreeMap<String, Rev>,
    bookmarks: BTreeMap<String, Rev>,
    hidden: HashSet<Rev>,
}

impl TestRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a repo from the parent revision numbers of each revision.
    ///
    /// ```text
    /// TestRepo::from_parents(&[&[], &[0], &[0], &[1, 2]])
    /// ```
    /// is a diamond with the merge at 3.
    pub fn from_parents(parents: &[&[u32]]) -> Self {
        let mut repo = TestRepo::new();
        for revs in parents {
            let revs = revs.iter().map(|&rev| Rev(rev)).collect_vec();
            repo.commit(&revs);
        }
        repo
    }

    /// Linear history of `count` revisions.
    pub fn linear(count: u32) -> Self {
        let mut repo = TestRepo::new();
        for rev in 0..count {
            let parents = rev.checked_sub(1).map(Rev).into_iter().collect_vec();
            repo.commit(&parents);
        }
        repo
    }

    /// Appends a draft revision on the "default" branch.
    pub fn commit(&mut self, parents: &[Rev]) -> Rev {
        let rev = Rev(u32::try_from(self.nodes.len()).unwrap());
        self.commit_with_node(parents, &generated_node(rev).hex())
    }

    pub fn commit_with_node(&mut self, parents: &[Rev], node_hex: &str) -> Rev {
        assert!(parents.len() <= 2, "at most two parents");
        let rev = Rev(u32::try_from(self.nodes.len()).unwrap());
        assert!(parents.iter().all(|parent| *parent < rev));
        self.parents
            .push((parents.first().copied(), parents.get(1).copied()));
        self.nodes.push(NodeId::try_from_hex(node_hex).unwrap());
        self.branches.push("default".to_owned());
        self.phases.push(Phase::Draft);
        rev
    }

    pub fn set_branch(&mut self, rev: Rev, name: &str) {
        self.branches[rev.index()] = name.to_owned();
    }

    pub fn set_phase(&mut self, rev: Rev, phase: Phase) {
        self.phases[rev.index()] = phase;
    }

    pub fn add_tag(&mut self, name: &str, rev: Rev) {
        self.tags.insert(name.to_owned(), rev);
    }

    pub fn add_bookmark(&mut self, name: &str, rev: Rev) {
        self.bookmarks.insert(name.to_owned(), rev);
    }

    pub fn hide(&mut self, rev: Rev) {
        self.hidden.insert(rev);
    }

    pub fn node_hex(&self, rev: Rev) -> String {
        self.nodes[rev.index()].hex()
    }
}

fn generated_node(rev: Rev) -> NodeId {
    let mut state = u64::from(rev.0) + 1;
    let bytes = (0..NodeId::HEX_LEN / 2)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect();
    NodeId::new(bytes)
}

impl Repo for TestRepo {
    fn revision_count(&self) -> usize {
        self.nodes.len()
    }

    fn parent_revisions(&self, rev: Rev) -> (Option<Rev>, Option<Rev>) {
        self.parents[rev.index()]
    }

    fn node_for_revision(&self, rev: Rev) -> NodeId {
        self.nodes[rev.index()].clone()
    }

    fn revision_for_node(&self, node: &NodeId) -> Result<Rev, LookupError> {
        self.nodes
            .iter()
            .position(|n| n == node)
            .map(|index| Rev(u32::try_from(index).unwrap()))
            .ok_or_else(|| LookupError::UnknownRevision(node.hex()))
    }

    fn hidden_revisions(&self) -> &HashSet<Rev> {
        &self.hidden
    }

    fn tags(&self) -> BTreeMap<String, Rev> {
        self.tags.clone()
    }

    fn bookmarks(&self) -> BTreeMap<String, Rev> {
        self.bookmarks.clone()
    }

    fn branch(&self, rev: Rev) -> &str {
        &self.branches[rev.index()]
    }

    fn phase(&self, rev: Rev) -> Phase {
        self.phases[rev.index()]
    }
}

/// Collects the revision numbers in iteration order.
pub fn rev_numbers(revs: &Revs<'_>) -> Vec<u32> {
    revs.iter().map(|rev| rev.0).collect()
}

/// File stored in a [`TestWorkingCopy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestFile {
    pub content: Vec<u8>,
    pub file_type: FileType,
}

impl TestFile {
    pub fn normal(content: impl AsRef<[u8]>) -> Self {
        TestFile {
            content: content.as_ref().to_vec(),
            file_type: FileType::Normal { executable: false },
        }
    }

    pub fn executable(content: impl AsRef<[u8]>) -> Self {
        TestFile {
            content: content.as_ref().to_vec(),
            file_type: FileType::Normal { executable: true },
        }
    }

    pub fn symlink(target: &str) -> Self {
        TestFile {
            content: target.as_bytes().to_vec(),
            file_type: FileType::Symlink,
        }
    }

    fn metadata(&self) -> FileMetadata {
        FileMetadata {
            size: self.content.len() as u64,
            file_type: self.file_type,
        }
    }
}

type Tree = BTreeMap<RepoPath, TestFile>;

/// In-memory committed trees plus a working copy on top of one of them.
///
/// Ignored paths are exact paths. Reads of files marked unreadable or corrupt
/// fail in the working copy.
#[derive(Debug)]
pub struct TestWorkingCopy {
    parent: Snapshot,
    trees: HashMap<Rev, Tree>,
    tracked: BTreeSet<RepoPath>,
    disk: Tree,
    ignored: BTreeSet<RepoPath>,
    read_errors: BTreeMap<RepoPath, io::ErrorKind>,
}

impl TestWorkingCopy {
    pub fn new() -> Self {
        TestWorkingCopy {
            parent: Snapshot::Empty,
            trees: HashMap::new(),
            tracked: BTreeSet::new(),
            disk: Tree::new(),
            ignored: BTreeSet::new(),
            read_errors: BTreeMap::new(),
        }
    }

    pub fn set_tree(&mut self, rev: Rev, files: &[(&str, TestFile)]) {
        let tree = files
            .iter()
            .map(|(path, file)| (repo_path(path), file.clone()))
            .collect();
        self.trees.insert(rev, tree);
    }

    /// Replaces the working copy with the tree of the `rev`.
    pub fn checkout(&mut self, rev: Rev) {
        let tree = self.trees.get(&rev).cloned().unwrap_or_default();
        self.parent = Snapshot::Revision(rev);
        self.tracked = tree.keys().cloned().collect();
        self.disk = tree;
    }

    /// Writes a tracked file.
    pub fn write_file(&mut self, path: &str, file: TestFile) {
        self.tracked.insert(repo_path(path));
        self.disk.insert(repo_path(path), file);
    }

    pub fn write_untracked_file(&mut self, path: &str, file: TestFile) {
        self.disk.insert(repo_path(path), file);
    }

    /// Untracks and deletes the file.
    pub fn remove_file(&mut self, path: &str) {
        self.tracked.remove(&repo_path(path));
        self.disk.remove(&repo_path(path));
    }

    /// Deletes the file from disk without untracking it.
    pub fn delete_file(&mut self, path: &str) {
        self.disk.remove(&repo_path(path));
    }

    pub fn ignore(&mut self, path: &str) {
        self.ignored.insert(repo_path(path));
    }

    pub fn make_unreadable(&mut self, path: &str) {
        self.read_errors
            .insert(repo_path(path), io::ErrorKind::PermissionDenied);
    }

    pub fn make_corrupt(&mut self, path: &str) {
        self.read_errors
            .insert(repo_path(path), io::ErrorKind::InvalidData);
    }

    fn tree(&self, snapshot: Snapshot) -> Result<Tree, WorkingCopyError> {
        match snapshot {
            Snapshot::Empty => Ok(Tree::new()),
            Snapshot::Revision(rev) => self
                .trees
                .get(&rev)
                .cloned()
                .ok_or(WorkingCopyError::MissingRevision(rev)),
            Snapshot::WorkingCopy => Ok(self
                .disk
                .iter()
                .filter(|(path, _)| self.tracked.contains(*path))
                .map(|(path, file)| (path.clone(), file.clone()))
                .collect()),
        }
    }

    fn file(&self, snapshot: Snapshot, path: &RepoPath) -> Result<Option<TestFile>, WorkingCopyError> {
        if snapshot == Snapshot::WorkingCopy {
            return Ok(self.disk.get(path).cloned());
        }
        Ok(self.tree(snapshot)?.get(path).cloned())
    }
}

impl Default for TestWorkingCopy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkingCopy for TestWorkingCopy {
    fn parent(&self) -> Snapshot {
        self.parent
    }

    fn status(
        &self,
        base: Snapshot,
        current: Snapshot,
        matcher: &dyn Matcher,
        options: StatusOptions,
    ) -> Result<Status, WorkingCopyError> {
        let base_tree = self.tree(base)?;
        let mut status = Status::default();
        let current_paths = if current == Snapshot::WorkingCopy {
            self.tracked.clone()
        } else {
            self.tree(current)?.keys().cloned().collect()
        };
        let current_tree = self.tree(current)?;
        for path in current_paths.iter().filter(|path| matcher.matches(path)) {
            let Some(file) = current_tree.get(path) else {
                status.deleted.push(path.clone());
                continue;
            };
            match base_tree.get(path) {
                None => status.added.push(path.clone()),
                Some(base_file) if base_file != file => status.modified.push(path.clone()),
                Some(_) if options.list_clean => status.clean.push(path.clone()),
                Some(_) => {}
            }
        }
        status.removed = base_tree
            .keys()
            .filter(|path| !current_paths.contains(*path) && matcher.matches(path))
            .cloned()
            .collect();
        if current == Snapshot::WorkingCopy {
            for path in self
                .disk
                .keys()
                .filter(|path| !self.tracked.contains(*path) && matcher.matches(path))
            {
                if self.ignored.contains(path) {
                    if options.list_ignored {
                        status.ignored.push(path.clone());
                    }
                } else if options.list_unknown {
                    status.unknown.push(path.clone());
                }
            }
        }
        Ok(status)
    }

    fn tracked_files(&self, snapshot: Snapshot) -> Result<Vec<RepoPath>, WorkingCopyError> {
        if snapshot == Snapshot::WorkingCopy {
            return Ok(self.tracked.iter().cloned().collect());
        }
        Ok(self.tree(snapshot)?.into_keys().collect())
    }

    fn file_metadata(
        &self,
        snapshot: Snapshot,
        path: &RepoPath,
    ) -> Result<Option<FileMetadata>, WorkingCopyError> {
        Ok(self.file(snapshot, path)?.map(|file| file.metadata()))
    }

    fn file_content(
        &self,
        snapshot: Snapshot,
        path: &RepoPath,
    ) -> Result<Option<Vec<u8>>, WorkingCopyError> {
        if snapshot == Snapshot::WorkingCopy {
            if let Some(&kind) = self.read_errors.get(path) {
                return Err(WorkingCopyError::ReadFile {
                    path: path.clone(),
                    source: io::Error::from(kind),
                });
            }
        }
        Ok(self.file(snapshot, path)?.map(|file| file.content))
    }
}

pub fn assert_no_forgotten_test_files(test_dir: &Path) {
    let runner_path = test_dir.join("runner.rs");
    let runner = fs::read_to_string(&runner_path).unwrap();
    let entries = fs::read_dir(test_dir).unwrap();
    for entry in entries {
        let path = entry.unwrap().path();
        if let Some(ext) = path.extension() {
            let name = path.file_stem().unwrap();
            if ext == "rs" && name != "runner" {
                let search = format!("mod {};", name.to_str().unwrap());
                assert!(
                    runner.contains(&search),
                    "missing `{search}` declaration in {}",
                    runner_path.display()
                );
            }
        }
    }
}
