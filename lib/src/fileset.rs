// Copyright 2024 The Jujutsu Authors
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

//! Functional language for selecting a set of paths.

#![allow(missing_docs)]

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::rc::Rc;

use itertools::Itertools as _;
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::instrument;

use crate::dsl_util::{
    collect_similar, get_args, get_string, get_symbol, pretty_format, Diagnostics,
    ExpressionKind, ParseError, ParseErrorKind,
};
use crate::fileset_parser::{self, FilesetNode, FilesetOp};
use crate::matchers::{
    DifferenceMatcher, EverythingMatcher, FilesInMatcher, FilesMatcher, GlobMatcher,
    IntersectionMatcher, Matcher, NothingMatcher, PredicateMatcher, PrefixMatcher, RegexMatcher,
    UnionMatcher,
};
use crate::repo::{Repo, Rev};
use crate::repo_path::{FsPathParseError, RepoPath};
use crate::revset::{self, RevsetError};
use crate::settings::QuerySettings;
use crate::working_copy::{
    FileType, Snapshot, Status, StatusKind, StatusOptions, WorkingCopy, WorkingCopyError,
};

/// Error occurred during file pattern parsing.
#[derive(Debug, Error)]
pub enum FilePatternParseError {
    /// Unknown pattern kind is specified.
    #[error("invalid pattern kind: {0}")]
    InvalidKind(String),
    /// Failed to parse input cwd-relative path.
    #[error(transparent)]
    FsPath(#[from] FsPathParseError),
    #[error(transparent)]
    Glob(#[from] glob::PatternError),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Error occurred while compiling or matching a fileset.
#[derive(Debug, Error)]
pub enum FilesetError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("unknown identifier: {name}")]
    UnknownIdentifier {
        name: String,
        candidates: Vec<String>,
    },
    #[error(transparent)]
    Pattern(#[from] FilePatternParseError),
    #[error(transparent)]
    Revset(#[from] RevsetError),
    #[error(transparent)]
    WorkingCopy(#[from] WorkingCopyError),
    #[error("empty revision set: {0}")]
    EmptyRevisionSet(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type FilesetResult<T> = Result<T, FilesetError>;

type MatcherRc<'a> = Rc<dyn Matcher + 'a>;

// Relative costs of evaluating predicates. Only used to order the operands
// of `and`.
const WEIGHT_CHECK_FILENAME: f64 = 0.5;
const WEIGHT_READ_CONTENTS: f64 = 30.0;
const WEIGHT_STATUS: f64 = 10.0;
const WEIGHT_STATUS_THOROUGH: f64 = 50.0;

/// Parses the `value` as a pattern of the given `kind`.
///
/// `glob` and `relpath` patterns are relative to the `cwd`. `path`,
/// `rootglob`, `re`, and `rootfilesin` patterns are relative to the
/// repository root. `relglob` and `relre` match anywhere.
pub fn parse_file_pattern(
    kind: &str,
    value: &str,
    cwd: &RepoPath,
) -> Result<Box<dyn Matcher>, FilePatternParseError> {
    let root = RepoPath::root();
    let matcher: Box<dyn Matcher> = match kind {
        "path" => Box::new(PrefixMatcher::new([RepoPath::parse_fs_path(&root, value)?])),
        "relpath" => Box::new(PrefixMatcher::new([RepoPath::parse_fs_path(cwd, value)?])),
        "rootfilesin" => Box::new(FilesInMatcher::new([RepoPath::parse_fs_path(
            &root, value,
        )?])),
        "glob" => {
            let pattern = if cwd.is_root() {
                value.to_owned()
            } else {
                let prefix = glob::Pattern::escape(cwd.as_internal_file_string());
                format!("{prefix}/{value}")
            };
            Box::new(GlobMatcher::new(glob::Pattern::new(&pattern)?))
        }
        "rootglob" => Box::new(GlobMatcher::new(glob::Pattern::new(value)?)),
        "relglob" => Box::new(GlobMatcher::new(glob::Pattern::new(&format!("**/{value}"))?)),
        "re" => Box::new(RegexMatcher::new(regex::Regex::new(&format!("^(?:{value})"))?)),
        "relre" => Box::new(RegexMatcher::new(regex::Regex::new(value)?)),
        _ => return Err(FilePatternParseError::InvalidKind(kind.to_owned())),
    };
    Ok(matcher)
}

/// Repository state a fileset is evaluated against.
pub struct FilesetContext<'a> {
    pub repo: &'a dyn Repo,
    pub working_copy: &'a dyn WorkingCopy,
    pub settings: &'a QuerySettings,
    /// Directory relative patterns are anchored at.
    pub cwd: &'a RepoPath,
}

impl FilesetContext<'_> {
    /// Tree the changes of the `snapshot` are compared against: the first
    /// parent of a revision, or the parent of the working copy.
    pub fn default_base(&self, snapshot: Snapshot) -> Snapshot {
        match snapshot {
            Snapshot::Empty => Snapshot::Empty,
            Snapshot::Revision(rev) => parent_snapshot(self.repo, rev),
            Snapshot::WorkingCopy => self.working_copy.parent(),
        }
    }
}

fn parent_snapshot(repo: &dyn Repo, rev: Rev) -> Snapshot {
    match repo.parent_revisions(rev).0 {
        Some(parent) => Snapshot::Revision(parent),
        None => Snapshot::Empty,
    }
}

/// State shared by matchers built for one expression.
///
/// Predicates that read files can't fail while matching, so their errors are
/// parked here and reported by [`FilesetMatcher::matches()`].
#[derive(Clone)]
struct MatchCtx<'a> {
    repo: &'a dyn Repo,
    working_copy: &'a dyn WorkingCopy,
    settings: &'a QuerySettings,
    cwd: &'a RepoPath,
    base: Snapshot,
    current: Snapshot,
    narrow: MatcherRc<'a>,
    status: Option<Rc<Status>>,
    error: Rc<RefCell<Option<WorkingCopyError>>>,
}

impl<'a> MatchCtx<'a> {
    fn new(ctx: &FilesetContext<'a>, base: Snapshot, current: Snapshot) -> Self {
        MatchCtx {
            repo: ctx.repo,
            working_copy: ctx.working_copy,
            settings: ctx.settings,
            cwd: ctx.cwd,
            base,
            current,
            narrow: Rc::new(EverythingMatcher),
            status: None,
            error: Rc::new(RefCell::new(None)),
        }
    }

    /// Context whose status only needs to cover files the `matcher` selects.
    /// Precomputed status is kept.
    fn narrowed(&self, matcher: MatcherRc<'a>) -> Self {
        MatchCtx {
            narrow: matcher,
            ..self.clone()
        }
    }

    /// Context comparing other trees. Narrowing and precomputed status are
    /// dropped.
    fn switch(&self, base: Snapshot, current: Snapshot) -> Self {
        MatchCtx {
            base,
            current,
            narrow: Rc::new(EverythingMatcher),
            status: None,
            ..self.clone()
        }
    }

    /// Context with status of the requested `kinds` computed once.
    fn with_status(&self, kinds: &BTreeSet<StatusKind>) -> FilesetResult<Self> {
        tracing::debug!(?kinds, base = ?self.base, current = ?self.current, "computing status");
        let status = self.compute_status(kinds.iter().copied())?;
        Ok(MatchCtx {
            status: Some(Rc::new(status)),
            ..self.clone()
        })
    }

    fn compute_status(
        &self,
        kinds: impl IntoIterator<Item = StatusKind>,
    ) -> Result<Status, WorkingCopyError> {
        self.working_copy.status(
            self.base,
            self.current,
            &*self.narrow,
            StatusOptions::for_kinds(kinds),
        )
    }

    fn status(&self, kind: StatusKind) -> FilesetResult<Rc<Status>> {
        match &self.status {
            Some(status) => Ok(status.clone()),
            None => Ok(Rc::new(self.compute_status([kind])?)),
        }
    }

    fn predicate(
        &self,
        name: &str,
        predicate: impl Fn(&RepoPath) -> bool + 'a,
    ) -> MatcherRc<'a> {
        Rc::new(PredicateMatcher::new(name, predicate))
    }

    /// Wraps a test of the file state in the current tree. Missing and
    /// inaccessible files never match. Other failures are reported by
    /// [`FilesetMatcher::matches()`].
    fn fpredicate<F>(&self, name: &str, predicate: F) -> MatcherRc<'a>
    where
        F: Fn(&dyn WorkingCopy, Snapshot, &RepoPath) -> Result<Option<bool>, WorkingCopyError>
            + 'a,
    {
        let working_copy = self.working_copy;
        let snapshot = self.current;
        let error = self.error.clone();
        self.predicate(name, move |path| {
            match predicate(working_copy, snapshot, path) {
                Ok(matched) => matched.unwrap_or(false),
                Err(err) if is_inaccessible(&err) => {
                    tracing::debug!(?err, %path, "skipping inaccessible file");
                    false
                }
                Err(err) => {
                    tracing::debug!(?err, %path, "failed to read file");
                    let mut slot = error.borrow_mut();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                    false
                }
            }
        })
    }

    fn revisions(&self, spec: &str) -> FilesetResult<Vec<Rev>> {
        let revs = revset::match_any(self.repo, &[spec], self.settings)?;
        Ok(revs.iter().collect())
    }
}

fn is_inaccessible(err: &WorkingCopyError) -> bool {
    match err {
        WorkingCopyError::ReadFile { source, .. } => matches!(
            source.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ),
        _ => false,
    }
}

/// Compiled fileset.
#[derive(Debug)]
pub struct FilesetMatcher<'a> {
    matcher: MatcherRc<'a>,
    error: Rc<RefCell<Option<WorkingCopyError>>>,
}

impl FilesetMatcher<'_> {
    /// Tests the `path`. Fails if a predicate couldn't read a file state.
    pub fn matches(&self, path: &RepoPath) -> FilesetResult<bool> {
        let matched = self.matcher.matches(path);
        match self.error.borrow_mut().take() {
            Some(err) => Err(err.into()),
            None => Ok(matched),
        }
    }

    pub fn as_matcher(&self) -> &dyn Matcher {
        &*self.matcher
    }
}

type FilesetFunction =
    for<'a> fn(&MatchCtx<'a>, Option<&FilesetNode>) -> FilesetResult<MatcherRc<'a>>;

static BUILTIN_FUNCTION_MAP: Lazy<HashMap<&'static str, FilesetFunction>> = Lazy::new(|| {
    // Not using maplit::hashmap!{} or custom declarative macro here because
    // code completion inside macro is quite restricted.
    let mut map: HashMap<&'static str, FilesetFunction> = HashMap::new();
    map.insert("all", |_ctx, args| {
        get_args(args, 0, Some(0), "all takes no arguments")?;
        Ok(Rc::new(EverythingMatcher))
    });
    map.insert("none", |_ctx, args| {
        get_args(args, 0, Some(0), "none takes no arguments")?;
        Ok(Rc::new(NothingMatcher))
    });
    map.insert("modified", |ctx, args| {
        status_predicate(ctx, args, "modified", StatusKind::Modified)
    });
    map.insert("added", |ctx, args| {
        status_predicate(ctx, args, "added", StatusKind::Added)
    });
    map.insert("removed", |ctx, args| {
        status_predicate(ctx, args, "removed", StatusKind::Removed)
    });
    map.insert("deleted", |ctx, args| {
        status_predicate(ctx, args, "deleted", StatusKind::Deleted)
    });
    map.insert("missing", |ctx, args| {
        status_predicate(ctx, args, "missing", StatusKind::Deleted)
    });
    map.insert("unknown", |ctx, args| {
        status_predicate(ctx, args, "unknown", StatusKind::Unknown)
    });
    map.insert("ignored", |ctx, args| {
        status_predicate(ctx, args, "ignored", StatusKind::Ignored)
    });
    map.insert("clean", |ctx, args| {
        status_predicate(ctx, args, "clean", StatusKind::Clean)
    });
    map.insert("tracked", |ctx, args| {
        get_args(args, 0, Some(0), "tracked takes no arguments")?;
        let files = ctx.working_copy.tracked_files(ctx.current)?;
        Ok(Rc::new(FilesMatcher::new(files)))
    });
    map.insert("binary", |ctx, args| {
        get_args(args, 0, Some(0), "binary takes no arguments")?;
        Ok(ctx.fpredicate("binary", |wc, snapshot, path| {
            let content = wc.file_content(snapshot, path)?;
            Ok(content.map(|content| content.contains(&0)))
        }))
    });
    map.insert("exec", |ctx, args| {
        get_args(args, 0, Some(0), "exec takes no arguments")?;
        Ok(ctx.fpredicate("exec", |wc, snapshot, path| {
            let metadata = wc.file_metadata(snapshot, path)?;
            Ok(metadata.map(|metadata| {
                metadata.file_type == FileType::Normal { executable: true }
            }))
        }))
    });
    map.insert("symlink", |ctx, args| {
        get_args(args, 0, Some(0), "symlink takes no arguments")?;
        Ok(ctx.fpredicate("symlink", |wc, snapshot, path| {
            let metadata = wc.file_metadata(snapshot, path)?;
            Ok(metadata.map(|metadata| metadata.file_type == FileType::Symlink))
        }))
    });
    map.insert("grep", |ctx, args| {
        let [arg] = expect_args(args, "grep takes one argument")?;
        let text = get_string(arg, "grep requires a pattern")?;
        let regex = regex::bytes::Regex::new(text).map_err(|err| {
            ParseError::with_location(
                ParseErrorKind::Expression(format!("invalid match pattern: {err}")),
                arg.location,
            )
        })?;
        Ok(ctx.fpredicate("grep", move |wc, snapshot, path| {
            let content = wc.file_content(snapshot, path)?;
            Ok(content.map(|content| regex.is_match(&content)))
        }))
    });
    map.insert("size", |ctx, args| {
        let [arg] = expect_args(args, "size takes one argument")?;
        let expr = get_string(arg, "size requires an expression")?;
        let range = parse_size_range(expr)?;
        Ok(ctx.fpredicate("size", move |wc, snapshot, path| {
            let metadata = wc.file_metadata(snapshot, path)?;
            Ok(metadata.map(|metadata| range.contains(metadata.size)))
        }))
    });
    map.insert("status", |ctx, args| {
        let [base, rev, pattern] = expect_args(args, "status takes three arguments")?;
        let base_err = "first argument to status must be a revision";
        let base_spec = get_string(base, base_err)?;
        if base_spec.is_empty() {
            return Err(ParseError::invalid_arguments(base_err).into());
        }
        let rev_err = "second argument to status must be a revision";
        let rev_spec = get_string(rev, rev_err)?;
        if rev_spec.is_empty() {
            return Err(ParseError::invalid_arguments(rev_err).into());
        }
        let base_rev = ctx
            .revisions(base_spec)?
            .first()
            .copied()
            .ok_or_else(|| FilesetError::EmptyRevisionSet(base_spec.to_owned()))?;
        let rev = ctx
            .revisions(rev_spec)?
            .last()
            .copied()
            .ok_or_else(|| FilesetError::EmptyRevisionSet(rev_spec.to_owned()))?;
        let ctx = ctx.switch(Snapshot::Revision(base_rev), Snapshot::Revision(rev));
        get_match(&ctx, pattern)
    });
    map.insert("revs", |ctx, args| {
        let [revs, pattern] = expect_args(args, "revs takes two arguments")?;
        let spec = get_string(revs, "first argument to revs must be a revision")?;
        let matchers: Vec<MatcherRc<'_>> = ctx
            .revisions(spec)?
            .into_iter()
            .map(|rev| {
                let ctx = ctx.switch(parent_snapshot(ctx.repo, rev), Snapshot::Revision(rev));
                get_match(&ctx, pattern)
            })
            .try_collect()?;
        Ok(union_all(matchers))
    });
    map
});

fn expect_args<'n, const N: usize>(
    args: Option<&'n FilesetNode>,
    message: &str,
) -> Result<[&'n FilesetNode; N], ParseError> {
    get_args(args, N, Some(N), message)?
        .try_into()
        .map_err(|_| ParseError::invalid_arguments(message))
}

fn status_predicate<'a>(
    ctx: &MatchCtx<'a>,
    args: Option<&FilesetNode>,
    name: &str,
    kind: StatusKind,
) -> FilesetResult<MatcherRc<'a>> {
    get_args(args, 0, Some(0), &format!("{name} takes no arguments"))?;
    let status = ctx.status(kind)?;
    Ok(Rc::new(FilesMatcher::new(status.paths(kind).iter().cloned())))
}

/// Status list the function reads, if any.
fn status_kind(name: &str) -> Option<StatusKind> {
    match name {
        "modified" => Some(StatusKind::Modified),
        "added" => Some(StatusKind::Added),
        "removed" => Some(StatusKind::Removed),
        "deleted" | "missing" => Some(StatusKind::Deleted),
        "unknown" => Some(StatusKind::Unknown),
        "ignored" => Some(StatusKind::Ignored),
        "clean" => Some(StatusKind::Clean),
        _ => None,
    }
}

/// Estimated cost of calling the function.
pub fn function_weight(name: &str) -> f64 {
    match name {
        "modified" | "added" | "removed" | "deleted" | "missing" | "clean" => WEIGHT_STATUS,
        "unknown" | "ignored" => WEIGHT_STATUS_THOROUGH,
        "binary" | "grep" => WEIGHT_READ_CONTENTS,
        "size" | "status" | "revs" => WEIGHT_STATUS,
        _ => 1.0,
    }
}

fn node_weight(node: &FilesetNode) -> f64 {
    match &node.kind {
        ExpressionKind::Symbol(_) | ExpressionKind::String(_) | ExpressionKind::AliasArg(_) => {
            WEIGHT_CHECK_FILENAME
        }
        ExpressionKind::Operation(op, args) => match op {
            FilesetOp::KindPat => WEIGHT_CHECK_FILENAME,
            FilesetOp::Func => {
                let name_weight = args
                    .first()
                    .and_then(|name| name.as_symbol())
                    .map_or(1.0, function_weight);
                name_weight + args.iter().skip(1).map(node_weight).sum::<f64>()
            }
            FilesetOp::And => args.iter().map(node_weight).fold(f64::INFINITY, f64::min),
            FilesetOp::Or => args.iter().map(node_weight).fold(0.0, f64::max),
            _ => args.iter().map(node_weight).sum(),
        },
    }
}

/// Collects status lists the subtree reads in the same match context.
fn collect_status_kinds(node: &FilesetNode, kinds: &mut BTreeSet<StatusKind>) {
    if let Some((name, _)) = node.as_function_call() {
        // arguments of status() and revs() are matched against other trees
        kinds.extend(status_kind(name));
    } else if let Some((_, args)) = node.as_operation() {
        for arg in args {
            collect_status_kinds(arg, kinds);
        }
    }
}

fn union_all(matchers: Vec<MatcherRc<'_>>) -> MatcherRc<'_> {
    matchers
        .into_iter()
        .reduce(|acc, m| Rc::new(UnionMatcher::new(acc, m)))
        .unwrap_or_else(|| Rc::new(NothingMatcher))
}

/// Builds matcher of the analyzed `node`.
///
/// Status needed by the subtree is computed once on entry, except for `and`
/// whose right operand is matched in a context narrowed by the left one.
fn get_match<'a>(ctx: &MatchCtx<'a>, node: &FilesetNode) -> FilesetResult<MatcherRc<'a>> {
    let is_and = matches!(node.as_operation(), Some((FilesetOp::And, _)));
    if ctx.status.is_none() && !is_and {
        let mut kinds = BTreeSet::new();
        collect_status_kinds(node, &mut kinds);
        if !kinds.is_empty() {
            return get_match_in(&ctx.with_status(&kinds)?, node);
        }
    }
    get_match_in(ctx, node)
}

fn get_match_in<'a>(ctx: &MatchCtx<'a>, node: &FilesetNode) -> FilesetResult<MatcherRc<'a>> {
    let (op, args) = match &node.kind {
        ExpressionKind::Symbol(value) | ExpressionKind::String(value) => {
            return Ok(parse_file_pattern("glob", value, ctx.cwd)?.into());
        }
        ExpressionKind::AliasArg(_) => {
            return Err(FilesetError::Internal(format!(
                "unexpected alias parameter:\n{}",
                pretty_format(node)
            )));
        }
        ExpressionKind::Operation(op, args) => (*op, args.as_slice()),
    };
    match (op, args) {
        (FilesetOp::KindPat, [kind, value]) => {
            let kind = get_symbol(kind)?;
            let value = get_string(value, "pattern must be a string")?;
            Ok(parse_file_pattern(kind, value, ctx.cwd)?.into())
        }
        (FilesetOp::And, [x, y]) => {
            let (x, y) = if node_weight(y) < node_weight(x) {
                (y, x)
            } else {
                (x, y)
            };
            let xm = get_match(ctx, x)?;
            let narrowed = ctx.narrowed(xm.clone());
            match y.as_operation() {
                Some((FilesetOp::Not, [z])) => {
                    let zm = get_match(&narrowed, z)?;
                    Ok(Rc::new(DifferenceMatcher::new(xm, zm)))
                }
                _ => {
                    let ym = get_match(&narrowed, y)?;
                    Ok(Rc::new(IntersectionMatcher::new(xm, ym)))
                }
            }
        }
        (FilesetOp::Or, items) => {
            let matchers: Vec<_> = items.iter().map(|item| get_match(ctx, item)).try_collect()?;
            Ok(union_all(matchers))
        }
        (FilesetOp::Not, [x]) => {
            let m = get_match(ctx, x)?;
            Ok(Rc::new(DifferenceMatcher::new(EverythingMatcher, m)))
        }
        (FilesetOp::List, _) => Err(ParseError::with_location(
            ParseErrorKind::Expression("can't use a list in this context".to_owned()),
            node.location,
        )
        .with_hint("see 'or' for combining patterns")
        .into()),
        (FilesetOp::Func, [name, rest @ ..]) => {
            let func_name = get_symbol(name)?;
            let Some(func) = BUILTIN_FUNCTION_MAP.get(func_name) else {
                return Err(FilesetError::UnknownIdentifier {
                    name: func_name.to_owned(),
                    candidates: collect_similar(func_name, BUILTIN_FUNCTION_MAP.keys()),
                });
            };
            func(ctx, rest.first())
        }
        _ => Err(FilesetError::Internal(format!(
            "unexpected tree:\n{}",
            pretty_format(node)
        ))),
    }
}

/// Inclusive range of file sizes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct SizeRange {
    min: u64,
    max: u64,
}

impl SizeRange {
    const EMPTY: SizeRange = SizeRange { min: 1, max: 0 };

    fn contains(&self, size: u64) -> bool {
        self.min <= size && size <= self.max
    }
}

// "kb" must be tested before "b"
const SIZE_UNITS: &[(&str, u64)] = &[
    ("m", 1 << 20),
    ("k", 1 << 10),
    ("g", 1 << 30),
    ("kb", 1 << 10),
    ("mb", 1 << 20),
    ("gb", 1 << 30),
    ("b", 1),
];

fn size_error(text: &str) -> ParseError {
    ParseError::expression(format!("couldn't parse size: {text}"))
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
}

/// Parses size with optional unit, e.g. `1.5k`.
fn size_to_int(text: &str) -> Result<u64, ParseError> {
    let t = text.trim().to_ascii_lowercase();
    for &(suffix, unit) in SIZE_UNITS {
        if let Some(n) = t.strip_suffix(suffix) {
            let n = parse_number(n).ok_or_else(|| size_error(text))?;
            return Ok((n * unit as f64) as u64);
        }
    }
    t.parse().map_err(|_| size_error(text))
}

/// Largest size the imprecise `text` stands for: `4k` is up to `5k - 1`, and
/// `4.5k` is up to `4.6k - 1`.
fn size_to_max(text: &str) -> Result<u64, ParseError> {
    let t = text.trim().to_ascii_lowercase();
    for &(suffix, unit) in SIZE_UNITS {
        if let Some(n) = t.strip_suffix(suffix) {
            let value = parse_number(n).ok_or_else(|| size_error(text))?;
            let decimals = n.trim().split_once('.').map_or(0, |(_, frac)| frac.len());
            let inc = 10f64.powi(-i32::try_from(decimals).map_err(|_| size_error(text))?);
            return Ok((((value + inc) * unit as f64) as u64).saturating_sub(1));
        }
    }
    t.parse().map_err(|_| size_error(text))
}

fn parse_size_range(expr: &str) -> Result<SizeRange, ParseError> {
    let expr = expr.trim();
    let range = if let Some((a, b)) = expr.split_once('-') {
        SizeRange {
            min: size_to_int(a)?,
            max: size_to_int(b)?,
        }
    } else if let Some(a) = expr.strip_prefix("<=") {
        SizeRange {
            min: 0,
            max: size_to_int(a)?,
        }
    } else if let Some(a) = expr.strip_prefix('<') {
        match size_to_int(a)?.checked_sub(1) {
            Some(max) => SizeRange { min: 0, max },
            None => SizeRange::EMPTY,
        }
    } else if let Some(a) = expr.strip_prefix(">=") {
        SizeRange {
            min: size_to_int(a)?,
            max: u64::MAX,
        }
    } else if let Some(a) = expr.strip_prefix('>') {
        SizeRange {
            min: size_to_int(a)?.saturating_add(1),
            max: u64::MAX,
        }
    } else {
        SizeRange {
            min: size_to_int(expr)?,
            max: size_to_max(expr)?,
        }
    };
    Ok(range)
}

/// Parses, expands aliases of, and analyzes the fileset `text`.
pub fn parse(
    text: &str,
    settings: &QuerySettings,
    diagnostics: &mut Diagnostics,
) -> FilesetResult<FilesetNode> {
    let tree = fileset_parser::parse(text)?;
    let aliases = fileset_parser::build_aliases_map(
        settings
            .fileset_aliases()
            .iter()
            .map(|(decl, defn)| (decl, defn)),
    );
    let tree = fileset_parser::expand_aliases(&tree, &aliases, diagnostics)?;
    let tree = fileset_parser::analyze(&tree)?;
    tracing::debug!("analyzed fileset:\n{}", pretty_format(&tree));
    Ok(tree)
}

/// Compiles the fileset `text` into a matcher of paths in the `snapshot`.
pub fn match_fileset<'a>(
    ctx: &FilesetContext<'a>,
    snapshot: Snapshot,
    text: &str,
) -> FilesetResult<FilesetMatcher<'a>> {
    match_fileset_with_diagnostics(ctx, snapshot, text, &mut Diagnostics::new())
}

/// Like [`match_fileset()`], but also returns alias warnings.
#[instrument(skip(ctx, diagnostics))]
pub fn match_fileset_with_diagnostics<'a>(
    ctx: &FilesetContext<'a>,
    snapshot: Snapshot,
    text: &str,
    diagnostics: &mut Diagnostics,
) -> FilesetResult<FilesetMatcher<'a>> {
    let tree = parse(text, ctx.settings, diagnostics)?;
    let match_ctx = MatchCtx::new(ctx, ctx.default_base(snapshot), snapshot);
    let matcher = get_match(&match_ctx, &tree)?;
    Ok(FilesetMatcher {
        matcher,
        error: match_ctx.error,
    })
}

/// Lists files of the `snapshot` selected by the fileset `text`, sorted.
///
/// For the working copy, removed, unknown, and ignored files are candidates
/// as well as tracked ones.
pub fn matching_files(
    ctx: &FilesetContext,
    snapshot: Snapshot,
    text: &str,
) -> FilesetResult<Vec<RepoPath>> {
    let matcher = match_fileset(ctx, snapshot, text)?;
    let mut candidates = ctx.working_copy.tracked_files(snapshot)?;
    if snapshot == Snapshot::WorkingCopy {
        let options = StatusOptions {
            list_unknown: true,
            list_ignored: true,
            list_clean: false,
        };
        let status = ctx.working_copy.status(
            ctx.default_base(snapshot),
            snapshot,
            &EverythingMatcher,
            options,
        )?;
        candidates.extend(status.removed);
        candidates.extend(status.unknown);
        candidates.extend(status.ignored);
    }
    let mut files = vec![];
    for path in candidates.into_iter().sorted().dedup() {
        if matcher.matches(&path)? {
            files.push(path);
        }
    }
    Ok(files)
}
