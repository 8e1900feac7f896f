// Copyright 2021-2024 The Jujutsu Authors
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

//! Graph walks over the revision DAG.

#![allow(missing_docs)]

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::iter;

use itertools::Itertools as _;

use crate::repo::Repo;
use crate::repo::Rev;
use crate::smartset::BaseSet;
use crate::smartset::GeneratorSet;

/// Depth limit meaning "unbounded".
pub const MAX_LOG_DEPTH: u32 = 0x8000_0000;

type ParentsFn<'a> = Box<dyn Fn(Rev) -> Vec<Rev> + 'a>;

/// Lazily walks ancestors in descending order.
pub struct AncestorsIter<'r, R: Repo + ?Sized> {
    repo: &'r R,
    visit: BinaryHeap<Rev>,
    seen: HashSet<Rev>,
    stop_at: Rev,
}

impl<'r, R: Repo + ?Sized> AncestorsIter<'r, R> {
    pub fn new(repo: &'r R, revs: &[Rev], stop_at: Rev, inclusive: bool) -> Self {
        let mut iter = AncestorsIter {
            repo,
            visit: BinaryHeap::new(),
            seen: HashSet::new(),
            stop_at,
        };
        for &rev in revs {
            if inclusive {
                iter.schedule(rev);
            } else {
                for parent in repo.parents(rev) {
                    iter.schedule(parent);
                }
            }
        }
        iter
    }

    fn schedule(&mut self, rev: Rev) {
        if rev >= self.stop_at && self.seen.insert(rev) {
            self.visit.push(rev);
        }
    }
}

impl<R: Repo + ?Sized> Iterator for AncestorsIter<'_, R> {
    type Item = Rev;

    fn next(&mut self) -> Option<Rev> {
        let rev = self.visit.pop()?;
        for parent in self.repo.parents(rev) {
            self.schedule(parent);
        }
        Some(rev)
    }
}

fn parent_revs<R: Repo + ?Sized>(repo: &R, rev: Rev, follow_first: bool) -> Vec<Rev> {
    if follow_first {
        repo.parent_revisions(rev).0.into_iter().collect()
    } else {
        repo.parents(rev)
    }
}

/// Walks DAG from `revs` through `parents_fn`, yielding revisions whose
/// distance from the nearest input is within `start_depth..stop_depth`.
///
/// Revisions are yielded in descending order if `reverse`, in ascending
/// order otherwise. Inputs are loaded lazily so that early revisions can be
/// produced before the whole input is consumed.
fn walk_rev_tree<'a>(
    parents_fn: ParentsFn<'a>,
    mut revs: Vec<Rev>,
    start_depth: u32,
    stop_depth: u32,
    reverse: bool,
) -> impl Iterator<Item = Rev> + 'a {
    // min-heap keyed by (revision in walk order, depth): lower depth first
    let key = move |rev: Rev| {
        if reverse {
            -i64::from(rev.0)
        } else {
            i64::from(rev.0)
        }
    };
    revs.sort_unstable_by_key(|&rev| key(rev));
    revs.dedup();
    let mut inputs = revs.into_iter();
    let mut pending = BinaryHeap::new();
    let mut input_rev = inputs.next();
    if stop_depth > 0 {
        if let Some(rev) = input_rev {
            pending.push(Reverse((key(rev), 0, rev)));
        }
    }
    let mut last_rev = None;
    iter::from_fn(move || {
        while let Some(Reverse((_, cur_depth, cur_rev))) = pending.pop() {
            if Some(cur_rev) == input_rev {
                input_rev = inputs.next();
                if let Some(rev) = input_rev {
                    pending.push(Reverse((key(rev), 0, rev)));
                }
            }
            // Queued entries of the same revision come out from the lowest
            // depth, so parents are rescanned until the depth reaches
            // start_depth.
            let found_new = Some(cur_rev) != last_rev;
            let parent_depth = cur_depth + 1;
            if found_new && parent_depth < stop_depth {
                for parent in parents_fn(cur_rev) {
                    pending.push(Reverse((key(parent), parent_depth, parent)));
                }
            }
            if found_new && cur_depth >= start_depth {
                last_rev = Some(cur_rev);
                return Some(cur_rev);
            }
        }
        None
    })
}

/// Ancestors of `revs` including themselves, in descending order.
///
/// `cut` prunes revisions (and everything reachable only through them) from
/// the walk.
pub fn revancestors<'a, R: Repo + ?Sized>(
    repo: &'a R,
    mut revs: Vec<Rev>,
    follow_first: bool,
    start_depth: Option<u32>,
    stop_depth: Option<u32>,
    cut: Option<Box<dyn Fn(Rev) -> bool + 'a>>,
) -> GeneratorSet<'a> {
    let parents_fn: ParentsFn<'a> = match cut {
        None => Box::new(move |rev| parent_revs(repo, rev, follow_first)),
        Some(cut) => {
            revs.retain(|&rev| !cut(rev));
            Box::new(move |rev| {
                let mut parents = parent_revs(repo, rev, follow_first);
                parents.retain(|&parent| !cut(parent));
                parents
            })
        }
    };
    let walk = walk_rev_tree(
        parents_fn,
        revs,
        start_depth.unwrap_or(0),
        stop_depth.unwrap_or(MAX_LOG_DEPTH),
        true,
    );
    GeneratorSet::descending(walk)
}

/// Descendants of `revs` including themselves, in ascending order.
pub fn revdescendants<'a, R: Repo + ?Sized>(
    repo: &'a R,
    revs: Vec<Rev>,
    follow_first: bool,
    start_depth: Option<u32>,
    stop_depth: Option<u32>,
) -> GeneratorSet<'a> {
    let Some(&first) = revs.iter().min() else {
        return GeneratorSet::ascending(iter::empty());
    };
    if start_depth.is_none() && stop_depth.map_or(true, |depth| depth >= MAX_LOG_DEPTH) {
        return GeneratorSet::ascending(scan_descendants(repo, revs, first, follow_first));
    }
    let children = build_children_map(repo, first, follow_first);
    let parents_fn: ParentsFn<'a> = Box::new(move |rev| {
        let index = (rev.0 - first.0) as usize;
        children.get(index).cloned().unwrap_or_default()
    });
    let walk = walk_rev_tree(
        parents_fn,
        revs,
        start_depth.unwrap_or(0),
        stop_depth.unwrap_or(MAX_LOG_DEPTH),
        false,
    );
    GeneratorSet::ascending(walk)
}

// Single forward pass over the changelog, which is topologically sorted.
fn scan_descendants<'a, R: Repo + ?Sized>(
    repo: &'a R,
    revs: Vec<Rev>,
    first: Rev,
    follow_first: bool,
) -> impl Iterator<Item = Rev> + 'a {
    let hidden = repo.hidden_revisions();
    let mut seen: HashSet<Rev> = revs.into_iter().collect();
    (first.0..repo.revision_count() as u32)
        .map(Rev)
        .filter(move |rev| !hidden.contains(rev))
        .filter(move |&rev| {
            if seen.contains(&rev) {
                return true;
            }
            let parents = parent_revs(repo, rev, follow_first);
            if parents.iter().any(|parent| seen.contains(parent)) {
                seen.insert(rev);
                true
            } else {
                false
            }
        })
}

// Maps `rev - start_rev` to the children of rev.
fn build_children_map<R: Repo + ?Sized>(
    repo: &R,
    start_rev: Rev,
    follow_first: bool,
) -> Vec<Vec<Rev>> {
    let count = repo.revision_count() as u32;
    let hidden = repo.hidden_revisions();
    let mut children = vec![vec![]; count.saturating_sub(start_rev.0) as usize];
    for rev in (start_rev.0 + 1..count).map(Rev) {
        if hidden.contains(&rev) {
            continue;
        }
        for parent in parent_revs(repo, rev, follow_first) {
            if parent >= start_rev {
                children[(parent.0 - start_rev.0) as usize].push(rev);
            }
        }
    }
    children
}

/// Subset of `roots` reachable from `heads`. If `include_path`, revisions on
/// the paths between them are included too. The result is sorted.
pub fn reachable_roots<R: Repo + ?Sized>(
    repo: &R,
    roots: &[Rev],
    heads: &[Rev],
    include_path: bool,
) -> BaseSet {
    let Some(&min_root) = roots.iter().min() else {
        return BaseSet::default();
    };
    let roots: HashSet<Rev> = roots.iter().copied().collect();
    let mut visit = heads.to_vec();
    let mut reachable = HashSet::new();
    let mut seen: HashMap<Rev, Vec<Rev>> = HashMap::new();
    // post-order traversal without recursion
    while let Some(rev) = visit.pop() {
        if roots.contains(&rev) {
            reachable.insert(rev);
            if !include_path {
                continue;
            }
        }
        let parents = repo.parents(rev);
        visit.extend(
            parents
                .iter()
                .filter(|&&parent| parent >= min_root && !seen.contains_key(&parent)),
        );
        seen.insert(rev, parents);
    }
    if include_path && !reachable.is_empty() {
        for (&rev, parents) in seen.iter().sorted_by_key(|(rev, _)| **rev) {
            if parents.iter().any(|parent| reachable.contains(parent)) {
                reachable.insert(rev);
            }
        }
    }
    BaseSet::from_set(reachable)
}

/// Heads of the set of revisions that are ancestors of every one of `revs`.
pub fn common_ancestor_heads<R: Repo + ?Sized>(repo: &R, revs: &[Rev]) -> Vec<Rev> {
    let Some((&first, rest)) = revs.split_first() else {
        return vec![];
    };
    let mut common: HashSet<Rev> = repo.ancestors_of(&[first], Rev(0), true).collect();
    for &rev in rest {
        let Some(&stop_at) = common.iter().min() else {
            return vec![];
        };
        let ancestors: HashSet<Rev> = repo.ancestors_of(&[rev], stop_at, true).collect();
        common.retain(|rev| ancestors.contains(rev));
    }
    // the common set is closed under ancestry, so a non-head is a parent of
    // another member
    let parents: HashSet<Rev> = common.iter().flat_map(|&rev| repo.parents(rev)).collect();
    common
        .into_iter()
        .filter(|rev| !parents.contains(rev))
        .sorted()
        .collect()
}

/// Greatest common ancestor of two revisions. Ties between multiple heads are
/// broken by the smallest node id.
pub fn ancestor<R: Repo + ?Sized>(repo: &R, a: Rev, b: Rev) -> Option<Rev> {
    common_ancestor_heads(repo, &[a, b])
        .into_iter()
        .min_by_key(|&rev| repo.node_for_revision(rev))
}

/// Ancestors of `heads` that aren't ancestors of `common`, both inclusive.
pub fn missing_ancestors<R: Repo + ?Sized>(
    repo: &R,
    heads: &[Rev],
    common: &[Rev],
) -> HashSet<Rev> {
    let common: HashSet<Rev> = repo.ancestors_of(common, Rev(0), true).collect();
    repo.ancestors_of(heads, Rev(0), true)
        .filter(|rev| !common.contains(rev))
        .collect()
}

/// Visible revisions without visible children.
pub fn head_revisions<R: Repo + ?Sized>(repo: &R) -> Vec<Rev> {
    let hidden = repo.hidden_revisions();
    let count = repo.revision_count();
    let mut is_head = vec![true; count];
    let visible = || {
        (0..count as u32)
            .map(Rev)
            .filter(move |rev| !hidden.contains(rev))
    };
    for rev in visible() {
        for parent in repo.parents(rev) {
            is_head[parent.index()] = false;
        }
    }
    visible().filter(|rev| is_head[rev.index()]).collect()
}
