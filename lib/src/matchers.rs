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

use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::rc::Rc;

use itertools::Itertools as _;

use crate::repo_path::RepoPath;

/// Selects repository paths.
pub trait Matcher: Debug {
    fn matches(&self, file: &RepoPath) -> bool;
}

impl<T: Matcher + ?Sized> Matcher for &T {
    fn matches(&self, file: &RepoPath) -> bool {
        <T as Matcher>::matches(self, file)
    }
}

impl<T: Matcher + ?Sized> Matcher for Box<T> {
    fn matches(&self, file: &RepoPath) -> bool {
        <T as Matcher>::matches(self, file)
    }
}

impl<T: Matcher + ?Sized> Matcher for Rc<T> {
    fn matches(&self, file: &RepoPath) -> bool {
        <T as Matcher>::matches(self, file)
    }
}

#[derive(PartialEq, Eq, Debug)]
pub struct NothingMatcher;

impl Matcher for NothingMatcher {
    fn matches(&self, _file: &RepoPath) -> bool {
        false
    }
}

#[derive(PartialEq, Eq, Debug)]
pub struct EverythingMatcher;

impl Matcher for EverythingMatcher {
    fn matches(&self, _file: &RepoPath) -> bool {
        true
    }
}

/// Matches the exact paths.
#[derive(PartialEq, Eq, Debug)]
pub struct FilesMatcher {
    files: HashSet<RepoPath>,
}

impl FilesMatcher {
    pub fn new(files: impl IntoIterator<Item = RepoPath>) -> Self {
        FilesMatcher {
            files: files.into_iter().collect(),
        }
    }
}

impl Matcher for FilesMatcher {
    fn matches(&self, file: &RepoPath) -> bool {
        self.files.contains(file)
    }
}

/// Matches the paths and everything under them.
#[derive(PartialEq, Eq, Debug)]
pub struct PrefixMatcher {
    prefixes: Vec<RepoPath>,
}

impl PrefixMatcher {
    pub fn new(prefixes: impl IntoIterator<Item = RepoPath>) -> Self {
        let prefixes = prefixes.into_iter().sorted().dedup().collect();
        PrefixMatcher { prefixes }
    }
}

impl Matcher for PrefixMatcher {
    fn matches(&self, file: &RepoPath) -> bool {
        self.prefixes.iter().any(|prefix| file.starts_with(prefix))
    }
}

/// Matches files directly in the directories, not in their subdirectories.
#[derive(PartialEq, Eq, Debug)]
pub struct FilesInMatcher {
    dirs: HashSet<RepoPath>,
}

impl FilesInMatcher {
    pub fn new(dirs: impl IntoIterator<Item = RepoPath>) -> Self {
        FilesInMatcher {
            dirs: dirs.into_iter().collect(),
        }
    }
}

impl Matcher for FilesInMatcher {
    fn matches(&self, file: &RepoPath) -> bool {
        file.parent().is_some_and(|dir| self.dirs.contains(&dir))
    }
}

/// Matches paths, or paths under directories, selected by a shell glob.
///
/// `*` and `?` never match `/`. `**` as a whole component matches any number
/// of directories.
#[derive(Debug)]
pub struct GlobMatcher {
    pattern: glob::Pattern,
}

const GLOB_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl GlobMatcher {
    pub fn new(pattern: glob::Pattern) -> Self {
        GlobMatcher { pattern }
    }
}

impl Matcher for GlobMatcher {
    fn matches(&self, file: &RepoPath) -> bool {
        file.ancestors()
            .take_while(|path| !path.is_root())
            .any(|path| {
                self.pattern
                    .matches_with(path.as_internal_file_string(), GLOB_OPTIONS)
            })
    }
}

/// Matches paths by regular expression. The expression should be anchored
/// by the caller if needed.
#[derive(Debug)]
pub struct RegexMatcher {
    regex: regex::Regex,
}

impl RegexMatcher {
    pub fn new(regex: regex::Regex) -> Self {
        RegexMatcher { regex }
    }
}

impl Matcher for RegexMatcher {
    fn matches(&self, file: &RepoPath) -> bool {
        self.regex.is_match(file.as_internal_file_string())
    }
}

/// Matches paths for which the function returns true.
pub struct PredicateMatcher<F> {
    predicate: F,
    name: String,
}

impl<F: Fn(&RepoPath) -> bool> PredicateMatcher<F> {
    /// The `name` is shown in debug output.
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        PredicateMatcher {
            predicate,
            name: name.into(),
        }
    }
}

impl<F> Debug for PredicateMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateMatcher")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F: Fn(&RepoPath) -> bool> Matcher for PredicateMatcher<F> {
    fn matches(&self, file: &RepoPath) -> bool {
        (self.predicate)(file)
    }
}

/// Matches paths that are matched by any of the input matchers.
#[derive(Clone, Debug)]
pub struct UnionMatcher<M1, M2> {
    input1: M1,
    input2: M2,
}

impl<M1: Matcher, M2: Matcher> UnionMatcher<M1, M2> {
    pub fn new(input1: M1, input2: M2) -> Self {
        UnionMatcher { input1, input2 }
    }
}

impl<M1: Matcher, M2: Matcher> Matcher for UnionMatcher<M1, M2> {
    fn matches(&self, file: &RepoPath) -> bool {
        self.input1.matches(file) || self.input2.matches(file)
    }
}

/// Matches paths that are matched by the first input matcher but not by the
/// second.
#[derive(Clone, Debug)]
pub struct DifferenceMatcher<M1, M2> {
    /// The minuend
    wanted: M1,
    /// The subtrahend
    unwanted: M2,
}

impl<M1: Matcher, M2: Matcher> DifferenceMatcher<M1, M2> {
    pub fn new(wanted: M1, unwanted: M2) -> Self {
        DifferenceMatcher { wanted, unwanted }
    }
}

impl<M1: Matcher, M2: Matcher> Matcher for DifferenceMatcher<M1, M2> {
    fn matches(&self, file: &RepoPath) -> bool {
        self.wanted.matches(file) && !self.unwanted.matches(file)
    }
}

/// Matches paths that are matched by both input matchers. The second input
/// is only consulted for paths the first one matches.
#[derive(Clone, Debug)]
pub struct IntersectionMatcher<M1, M2> {
    input1: M1,
    input2: M2,
}

impl<M1: Matcher, M2: Matcher> IntersectionMatcher<M1, M2> {
    pub fn new(input1: M1, input2: M2) -> Self {
        IntersectionMatcher { input1, input2 }
    }
}

impl<M1: Matcher, M2: Matcher> Matcher for IntersectionMatcher<M1, M2> {
    fn matches(&self, file: &RepoPath) -> bool {
        self.input1.matches(file) && self.input2.matches(file)
    }
}
