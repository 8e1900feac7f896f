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

//! Lazy, order-aware sets of revisions.
//!
//! A [`SmartSet`] knows whether it iterates in ascending, descending, or
//! unspecified order, and may offer cheap ascending/descending iterators
//! ("fast paths") that combinators use to merge operands without sorting.
//! Membership and iteration always agree: iterating yields exactly the
//! revisions for which [`SmartSet::contains()`] returns true, each once.

#![allow(missing_docs)]

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use itertools::Itertools as _;
use once_cell::unsync::OnceCell;

use crate::repo::Rev;

/// Boxed iterator over revisions.
pub type RevIter<'s> = Box<dyn Iterator<Item = Rev> + 's>;

/// Boxed smart set.
pub type Revs<'a> = Box<dyn SmartSet<'a> + 'a>;

/// Common interface of the lazy revision set representations.
pub trait SmartSet<'a>: fmt::Debug {
    fn contains(&self, rev: Rev) -> bool;

    /// Iterates in the current order.
    fn iter(&self) -> RevIter<'_>;

    /// Iterates in ascending order if it can be done without sorting.
    fn fast_asc(&self) -> Option<RevIter<'_>>;

    /// Iterates in descending order if it can be done without sorting.
    fn fast_desc(&self) -> Option<RevIter<'_>>;

    fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn len(&self) -> usize {
        self.iter().count()
    }

    /// First revision in the current order.
    fn first(&self) -> Option<Rev> {
        self.iter().next()
    }

    /// Last revision in the current order.
    fn last(&self) -> Option<Rev> {
        let fast = if self.is_ascending() {
            self.fast_desc()
        } else if self.is_descending() {
            self.fast_asc()
        } else {
            None
        };
        match fast {
            Some(mut iter) => iter.next(),
            None => self.iter().last(),
        }
    }

    fn min(&self) -> Option<Rev> {
        match self.fast_asc() {
            Some(mut iter) => iter.next(),
            None => self.iter().min(),
        }
    }

    fn max(&self) -> Option<Rev> {
        match self.fast_desc() {
            Some(mut iter) => iter.next(),
            None => self.iter().max(),
        }
    }

    fn is_ascending(&self) -> bool;

    fn is_descending(&self) -> bool;

    /// Whether the iteration order is topological (and not revision order).
    fn is_topo(&self) -> bool {
        false
    }

    /// Sets the iteration order to ascending, or descending if `descending`.
    fn sort(&mut self, descending: bool);

    /// Flips the iteration order. Unordered sets reverse their current
    /// iteration order.
    fn reverse(&mut self);

    fn boxed_clone(&self) -> Revs<'a>;

    /// Selects revisions `start..stop` in the current order.
    fn slice(&self, start: usize, stop: usize) -> Revs<'a> {
        if start >= stop {
            return Box::new(BaseSet::default());
        }
        let revs = self.iter().skip(start).take(stop - start).collect_vec();
        Box::new(BaseSet::from_list(revs).with_topo(self.is_topo()))
    }

    /// Whether this set contains every visible revision.
    fn is_full_repo(&self) -> bool {
        false
    }

    fn as_base_set(&self) -> Option<&BaseSet> {
        None
    }
}

impl<'a> Clone for Revs<'a> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Set operations on boxed smart sets.
pub trait SmartSetExt<'a> {
    /// Revisions in both sets, in the order of `self`.
    fn intersection(self, other: Revs<'a>) -> Revs<'a>;

    /// Revisions in either set.
    fn union(self, other: Revs<'a>) -> Revs<'a>;

    /// Revisions in `self` but not in `other`, in the order of `self`.
    fn difference(self, other: Revs<'a>) -> Revs<'a>;

    /// Revisions for which the `predicate` holds. The predicate result is
    /// cached per revision.
    fn filtered(self, predicate: impl Fn(Rev) -> bool + 'a) -> Revs<'a>;
}

impl<'a> SmartSetExt<'a> for Revs<'a> {
    fn intersection(self, mut other: Revs<'a>) -> Revs<'a> {
        if self.is_full_repo() {
            // Everything in the other set should be in the repo.
            other.sort(self.is_descending());
            return other;
        }
        if let Some(result) = fast_set_op(&*self, &*other, SetOp::Intersection) {
            return Box::new(result);
        }
        Box::new(FilteredSet::new(self, move |rev| other.contains(rev)))
    }

    fn union(self, other: Revs<'a>) -> Revs<'a> {
        Box::new(AddSet::new(self, other, None))
    }

    fn difference(self, other: Revs<'a>) -> Revs<'a> {
        if let Some(result) = fast_set_op(&*self, &*other, SetOp::Difference) {
            return Box::new(result);
        }
        Box::new(FilteredSet::new(self, move |rev| !other.contains(rev)))
    }

    fn filtered(self, predicate: impl Fn(Rev) -> bool + 'a) -> Revs<'a> {
        let cache = RefCell::new(HashMap::new());
        Box::new(FilteredSet::new(self, move |rev| {
            if let Some(&cached) = cache.borrow().get(&rev) {
                return cached;
            }
            let matched = predicate(rev);
            cache.borrow_mut().insert(rev, matched);
            matched
        }))
    }
}

#[derive(Clone, Copy, Debug)]
enum SetOp {
    Intersection,
    Difference,
}

// Native set operations if both sides are materialized.
fn fast_set_op<'a>(
    left: &dyn SmartSet<'a>,
    right: &dyn SmartSet<'a>,
    op: SetOp,
) -> Option<BaseSet> {
    let left = left.as_base_set()?;
    let right = right.as_base_set()?;
    let ascending = left.ascending?;
    let (left_set, right_set) = (left.set(), right.set());
    let data: HashSet<Rev> = match op {
        SetOp::Intersection => left_set.intersection(right_set).copied().collect(),
        SetOp::Difference => left_set.difference(right_set).copied().collect(),
    };
    let mut result = BaseSet::from_set(data).with_topo(left.is_topo);
    result.ascending = Some(ascending);
    Some(result)
}

/// Set of revisions backed by a list or a hash set.
///
/// A set built from a list iterates in list order until sorted. A set built
/// from a hash set has no natural order, and iterates in ascending order.
#[derive(Clone, Default)]
pub struct BaseSet {
    list: OnceCell<Vec<Rev>>,
    set: OnceCell<HashSet<Rev>>,
    asc_list: OnceCell<Vec<Rev>>,
    ascending: Option<bool>,
    is_topo: bool,
}

impl BaseSet {
    /// Creates set iterating in the order of `revs`. Duplicates are dropped.
    pub fn from_list(revs: Vec<Rev>) -> Self {
        let list = if revs.iter().all_unique() {
            revs
        } else {
            revs.into_iter().unique().collect()
        };
        BaseSet {
            list: OnceCell::with_value(list),
            ..BaseSet::default()
        }
    }

    /// Creates ascending set.
    pub fn from_set(revs: HashSet<Rev>) -> Self {
        BaseSet {
            set: OnceCell::with_value(revs),
            ascending: Some(true),
            ..BaseSet::default()
        }
    }

    /// Creates set of a single revision.
    pub fn single(rev: Rev) -> Self {
        BaseSet::from_list(vec![rev])
    }

    /// Marks the list order as topological.
    pub fn with_topo(mut self, is_topo: bool) -> Self {
        self.is_topo = is_topo;
        self
    }

    fn list(&self) -> &Vec<Rev> {
        self.list.get_or_init(|| {
            let set = self.set.get().map(|set| set.iter().copied().collect_vec());
            set.unwrap_or_default()
        })
    }

    fn set(&self) -> &HashSet<Rev> {
        self.set
            .get_or_init(|| self.list().iter().copied().collect())
    }

    fn asc_list(&self) -> &Vec<Rev> {
        self.asc_list.get_or_init(|| {
            let mut revs = self.list().clone();
            revs.sort_unstable();
            revs
        })
    }
}

impl fmt::Debug for BaseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.ascending {
            None => "",
            Some(true) => "+",
            Some(false) => "-",
        };
        write!(f, "<baseset{order} {:?}>", self.iter().collect_vec())
    }
}

impl<'a> SmartSet<'a> for BaseSet {
    fn contains(&self, rev: Rev) -> bool {
        self.set().contains(&rev)
    }

    fn iter(&self) -> RevIter<'_> {
        match self.ascending {
            None => Box::new(self.list().iter().copied()),
            Some(true) => Box::new(self.asc_list().iter().copied()),
            Some(false) => Box::new(self.asc_list().iter().rev().copied()),
        }
    }

    fn fast_asc(&self) -> Option<RevIter<'_>> {
        Some(Box::new(self.asc_list().iter().copied()))
    }

    fn fast_desc(&self) -> Option<RevIter<'_>> {
        Some(Box::new(self.asc_list().iter().rev().copied()))
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn len(&self) -> usize {
        match self.list.get() {
            Some(list) => list.len(),
            None => self.set().len(),
        }
    }

    fn first(&self) -> Option<Rev> {
        match self.ascending {
            None => self.list().first().copied(),
            Some(true) => self.asc_list().first().copied(),
            Some(false) => self.asc_list().last().copied(),
        }
    }

    fn last(&self) -> Option<Rev> {
        match self.ascending {
            None => self.list().last().copied(),
            Some(true) => self.asc_list().last().copied(),
            Some(false) => self.asc_list().first().copied(),
        }
    }

    fn is_ascending(&self) -> bool {
        self.len() <= 1 || self.ascending == Some(true)
    }

    fn is_descending(&self) -> bool {
        self.len() <= 1 || self.ascending == Some(false)
    }

    fn is_topo(&self) -> bool {
        self.len() <= 1 || self.is_topo
    }

    fn sort(&mut self, descending: bool) {
        self.ascending = Some(!descending);
        self.is_topo = false;
    }

    fn reverse(&mut self) {
        match self.ascending {
            None => {
                self.list();
                if let Some(list) = self.list.get_mut() {
                    list.reverse();
                }
            }
            Some(ascending) => self.ascending = Some(!ascending),
        }
        self.is_topo = false;
    }

    fn boxed_clone(&self) -> Revs<'a> {
        Box::new(self.clone())
    }

    fn slice(&self, start: usize, stop: usize) -> Revs<'a> {
        // creating new list should be generally cheaper than iterating items
        if start >= stop {
            return Box::new(BaseSet::default());
        }
        let Some(ascending) = self.ascending else {
            let list = self.list();
            let revs = list[start.min(list.len())..stop.min(list.len())].to_vec();
            return Box::new(BaseSet::from_list(revs).with_topo(self.is_topo));
        };
        let data = self.asc_list();
        let (start, stop) = if ascending {
            (start.min(data.len()), stop.min(data.len()))
        } else {
            (
                data.len().saturating_sub(stop),
                data.len().saturating_sub(start),
            )
        };
        let revs = data.get(start..stop).unwrap_or_default().to_vec();
        let mut result = BaseSet::from_list(revs).with_topo(self.is_topo);
        result.ascending = Some(ascending);
        Box::new(result)
    }

    fn as_base_set(&self) -> Option<&BaseSet> {
        Some(self)
    }
}

/// Revisions excluded from iteration of a [`SpanSet`].
pub trait RevFilter: fmt::Debug {
    /// Returns true if nothing is excluded, which allows computing length and
    /// slices arithmetically.
    fn is_empty(&self) -> bool;

    fn contains(&self, rev: Rev) -> bool;
}

impl RevFilter for HashSet<Rev> {
    fn is_empty(&self) -> bool {
        HashSet::is_empty(self)
    }

    fn contains(&self, rev: Rev) -> bool {
        HashSet::contains(self, &rev)
    }
}

/// Contiguous range `start..end` of revisions minus the hidden ones.
#[derive(Clone, Copy)]
pub struct SpanSet<'a> {
    start: u32,
    end: u32,
    ascending: bool,
    hidden: &'a dyn RevFilter,
}

impl<'a> SpanSet<'a> {
    /// Creates span of `start..end`. Empty if `start >= end`.
    pub fn new(start: Rev, end: Rev, ascending: bool, hidden: &'a dyn RevFilter) -> Self {
        SpanSet {
            start: start.0,
            end: end.0.max(start.0),
            ascending,
            hidden,
        }
    }

    /// Creates span from `first` to `last` inclusive, iterating in descending
    /// order if `first` is greater than `last`.
    pub fn between(first: Rev, last: Rev, hidden: &'a dyn RevFilter) -> Self {
        if first <= last {
            SpanSet::new(first, Rev(last.0 + 1), true, hidden)
        } else {
            SpanSet::new(last, Rev(first.0 + 1), false, hidden)
        }
    }

    fn filter_range(
        &self,
        range: impl Iterator<Item = u32> + 'a,
    ) -> impl Iterator<Item = Rev> + 'a {
        let hidden = self.hidden;
        range.map(Rev).filter(move |&rev| !hidden.contains(rev))
    }
}

impl fmt::Debug for SpanSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = if self.ascending { '+' } else { '-' };
        write!(f, "<spanset{order} {}:{}>", self.start, self.end)
    }
}

impl<'a> SmartSet<'a> for SpanSet<'a> {
    fn contains(&self, rev: Rev) -> bool {
        (self.start..self.end).contains(&rev.0) && !self.hidden.contains(rev)
    }

    fn iter(&self) -> RevIter<'_> {
        if self.ascending {
            Box::new(self.filter_range(self.start..self.end))
        } else {
            Box::new(self.filter_range((self.start..self.end).rev()))
        }
    }

    fn fast_asc(&self) -> Option<RevIter<'_>> {
        Some(Box::new(self.filter_range(self.start..self.end)))
    }

    fn fast_desc(&self) -> Option<RevIter<'_>> {
        Some(Box::new(self.filter_range((self.start..self.end).rev())))
    }

    fn len(&self) -> usize {
        if self.hidden.is_empty() {
            (self.end - self.start) as usize
        } else {
            self.iter().count()
        }
    }

    fn first(&self) -> Option<Rev> {
        self.iter().next()
    }

    fn last(&self) -> Option<Rev> {
        if self.ascending {
            self.filter_range((self.start..self.end).rev()).next()
        } else {
            self.filter_range(self.start..self.end).next()
        }
    }

    fn is_ascending(&self) -> bool {
        self.ascending
    }

    fn is_descending(&self) -> bool {
        !self.ascending
    }

    fn sort(&mut self, descending: bool) {
        self.ascending = !descending;
    }

    fn reverse(&mut self) {
        self.ascending = !self.ascending;
    }

    fn boxed_clone(&self) -> Revs<'a> {
        Box::new(*self)
    }

    fn slice(&self, start: usize, stop: usize) -> Revs<'a> {
        if !self.hidden.is_empty() {
            // every hidden revision in range would have to be scanned
            let revs = self.iter().skip(start).take(stop.saturating_sub(start));
            let mut result = BaseSet::from_list(revs.collect());
            result.ascending = Some(self.ascending);
            return Box::new(result);
        }
        let len = self.end - self.start;
        let start = u32::try_from(start).unwrap_or(u32::MAX).min(len);
        let stop = u32::try_from(stop).unwrap_or(u32::MAX).min(len).max(start);
        let (x, y) = if self.ascending {
            (self.start + start, self.start + stop)
        } else {
            (self.end - stop, self.end - start)
        };
        Box::new(SpanSet {
            start: x,
            end: y,
            ..*self
        })
    }
}

/// Every visible revision of the repository.
#[derive(Clone, Copy)]
pub struct FullRepoSet<'a> {
    span: SpanSet<'a>,
}

impl<'a> FullRepoSet<'a> {
    pub fn new(revision_count: usize, hidden: &'a dyn RevFilter) -> Self {
        let end = u32::try_from(revision_count).unwrap_or(u32::MAX);
        FullRepoSet {
            span: SpanSet::new(Rev(0), Rev(end), true, hidden),
        }
    }
}

impl fmt::Debug for FullRepoSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = if self.span.ascending { '+' } else { '-' };
        write!(f, "<fullreposet{order} 0:{}>", self.span.end)
    }
}

impl<'a> SmartSet<'a> for FullRepoSet<'a> {
    fn contains(&self, rev: Rev) -> bool {
        self.span.contains(rev)
    }

    fn iter(&self) -> RevIter<'_> {
        self.span.iter()
    }

    fn fast_asc(&self) -> Option<RevIter<'_>> {
        self.span.fast_asc()
    }

    fn fast_desc(&self) -> Option<RevIter<'_>> {
        self.span.fast_desc()
    }

    fn len(&self) -> usize {
        self.span.len()
    }

    fn first(&self) -> Option<Rev> {
        self.span.first()
    }

    fn last(&self) -> Option<Rev> {
        self.span.last()
    }

    fn is_ascending(&self) -> bool {
        self.span.is_ascending()
    }

    fn is_descending(&self) -> bool {
        self.span.is_descending()
    }

    fn sort(&mut self, descending: bool) {
        self.span.sort(descending);
    }

    fn reverse(&mut self) {
        self.span.reverse();
    }

    fn boxed_clone(&self) -> Revs<'a> {
        Box::new(*self)
    }

    fn slice(&self, start: usize, stop: usize) -> Revs<'a> {
        self.span.slice(start, stop)
    }

    fn is_full_repo(&self) -> bool {
        true
    }
}

/// Known iteration order of a generator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GeneratorOrder {
    Unknown,
    Ascending,
    Descending,
}

struct GeneratorState<'a> {
    generator: Box<dyn Iterator<Item = Rev> + 'a>,
    gen_list: Vec<Rev>,
    cache: HashMap<Rev, bool>,
    finished: bool,
}

impl GeneratorState<'_> {
    fn pull(&mut self) -> Option<Rev> {
        if self.finished {
            return None;
        }
        match self.generator.next() {
            Some(rev) => {
                self.cache.insert(rev, true);
                self.gen_list.push(rev);
                Some(rev)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

struct GeneratorShared<'a> {
    state: RefCell<GeneratorState<'a>>,
    asc_list: OnceCell<Vec<Rev>>,
}

impl GeneratorShared<'_> {
    fn consume_all(&self) {
        let mut state = self.state.borrow_mut();
        while state.pull().is_some() {}
    }

    /// Sorted revisions, available once the generator is exhausted.
    fn asc_list(&self) -> Option<&Vec<Rev>> {
        if let Some(list) = self.asc_list.get() {
            return Some(list);
        }
        let state = self.state.borrow();
        if !state.finished {
            return None;
        }
        let mut revs = state.gen_list.clone();
        revs.sort_unstable();
        drop(state);
        Some(self.asc_list.get_or_init(|| revs))
    }
}

// Walks the cached list, pulling from the generator once past the end. Many
// iterators may be active at the same time.
struct GeneratorIter<'s, 'a> {
    shared: &'s GeneratorShared<'a>,
    index: usize,
}

impl Iterator for GeneratorIter<'_, '_> {
    type Item = Rev;

    fn next(&mut self) -> Option<Rev> {
        let mut state = self.shared.state.borrow_mut();
        let rev = match state.gen_list.get(self.index) {
            Some(&rev) => Some(rev),
            None => state.pull(),
        };
        if rev.is_some() {
            self.index += 1;
        }
        rev
    }
}

/// Set backed by a lazy revision producer.
///
/// Produced revisions are cached, so the set can be iterated many times and
/// shared by clones. If the generator is known to produce revisions in
/// ascending or descending order, membership tests stop pulling as soon as the
/// generator passes the revision in question.
#[derive(Clone)]
pub struct GeneratorSet<'a> {
    shared: Rc<GeneratorShared<'a>>,
    order: GeneratorOrder,
    ascending: bool,
}

impl<'a> GeneratorSet<'a> {
    pub fn new(generator: impl Iterator<Item = Rev> + 'a, order: GeneratorOrder) -> Self {
        let state = GeneratorState {
            generator: Box::new(generator),
            gen_list: vec![],
            cache: HashMap::new(),
            finished: false,
        };
        GeneratorSet {
            shared: Rc::new(GeneratorShared {
                state: RefCell::new(state),
                asc_list: OnceCell::new(),
            }),
            order,
            ascending: order != GeneratorOrder::Descending,
        }
    }

    pub fn ascending(generator: impl Iterator<Item = Rev> + 'a) -> Self {
        GeneratorSet::new(generator, GeneratorOrder::Ascending)
    }

    pub fn descending(generator: impl Iterator<Item = Rev> + 'a) -> Self {
        GeneratorSet::new(generator, GeneratorOrder::Descending)
    }

    fn lazy_iter(&self) -> RevIter<'_> {
        Box::new(GeneratorIter {
            shared: &self.shared,
            index: 0,
        })
    }
}

impl fmt::Debug for GeneratorSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = if self.ascending { '+' } else { '-' };
        write!(f, "<generatorset{order}>")
    }
}

impl<'a> SmartSet<'a> for GeneratorSet<'a> {
    fn contains(&self, rev: Rev) -> bool {
        let mut state = self.shared.state.borrow_mut();
        if let Some(&found) = state.cache.get(&rev) {
            return found;
        }
        // existing values would have been cached
        while let Some(produced) = state.pull() {
            if produced == rev {
                return true;
            }
            let passed = match self.order {
                GeneratorOrder::Unknown => false,
                GeneratorOrder::Ascending => produced > rev,
                GeneratorOrder::Descending => produced < rev,
            };
            if passed {
                break;
            }
        }
        state.cache.insert(rev, false);
        false
    }

    fn iter(&self) -> RevIter<'_> {
        let fast = if self.ascending {
            self.fast_asc()
        } else {
            self.fast_desc()
        };
        if let Some(iter) = fast {
            return iter;
        }
        self.shared.consume_all();
        let list = self.shared.asc_list().map(Vec::as_slice).unwrap_or_default();
        if self.ascending {
            Box::new(list.iter().copied())
        } else {
            Box::new(list.iter().rev().copied())
        }
    }

    fn fast_asc(&self) -> Option<RevIter<'_>> {
        if let Some(list) = self.shared.asc_list() {
            return Some(Box::new(list.iter().copied()));
        }
        (self.order == GeneratorOrder::Ascending).then(|| self.lazy_iter())
    }

    fn fast_desc(&self) -> Option<RevIter<'_>> {
        if let Some(list) = self.shared.asc_list() {
            return Some(Box::new(list.iter().rev().copied()));
        }
        (self.order == GeneratorOrder::Descending).then(|| self.lazy_iter())
    }

    fn is_empty(&self) -> bool {
        // Don't iterate in the current order, which might consume a whole
        // generator producing the other order.
        let mut state = self.shared.state.borrow_mut();
        state.gen_list.is_empty() && state.pull().is_none()
    }

    fn len(&self) -> usize {
        self.shared.consume_all();
        self.shared.state.borrow().gen_list.len()
    }

    fn first(&self) -> Option<Rev> {
        self.iter().next()
    }

    fn last(&self) -> Option<Rev> {
        let fast = if self.ascending {
            self.fast_desc()
        } else {
            self.fast_asc()
        };
        match fast {
            Some(mut iter) => iter.next(),
            None => {
                self.shared.consume_all();
                let list = self.shared.asc_list()?;
                if self.ascending {
                    list.last().copied()
                } else {
                    list.first().copied()
                }
            }
        }
    }

    fn is_ascending(&self) -> bool {
        self.ascending
    }

    fn is_descending(&self) -> bool {
        !self.ascending
    }

    fn sort(&mut self, descending: bool) {
        self.ascending = !descending;
    }

    fn reverse(&mut self) {
        self.ascending = !self.ascending;
    }

    fn boxed_clone(&self) -> Revs<'a> {
        Box::new(self.clone())
    }
}

/// Union of two sets.
///
/// Without a known order, yields `r1` then the revisions of `r2` not in `r1`.
/// With a known order, merges both sides.
pub struct AddSet<'a> {
    r1: Revs<'a>,
    r2: Revs<'a>,
    ascending: Option<bool>,
    gen_list: OnceCell<Vec<Rev>>,
    asc_list: OnceCell<Vec<Rev>>,
}

impl<'a> AddSet<'a> {
    pub fn new(r1: Revs<'a>, r2: Revs<'a>, ascending: Option<bool>) -> Self {
        AddSet {
            r1,
            r2,
            ascending,
            gen_list: OnceCell::new(),
            asc_list: OnceCell::new(),
        }
    }

    fn list(&self) -> &Vec<Rev> {
        self.gen_list.get_or_init(|| self.iter().collect())
    }

    fn materialized_asc_list(&self) -> Option<&Vec<Rev>> {
        let gen_list = self.gen_list.get()?;
        Some(self.asc_list.get_or_init(|| {
            let mut revs = gen_list.clone();
            revs.sort_unstable();
            revs
        }))
    }
}

// Merges two sorted iterators, dropping duplicates.
fn iter_ordered<'s>(ascending: bool, iter1: RevIter<'s>, iter2: RevIter<'s>) -> RevIter<'s> {
    let merged = iter1.merge_join_by(iter2, move |a: &Rev, b: &Rev| {
        if ascending {
            a.cmp(b)
        } else {
            b.cmp(a)
        }
    });
    Box::new(merged.map(|item| item.reduce(|a, _| a)))
}

impl fmt::Debug for AddSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.ascending {
            None => "",
            Some(true) => "+",
            Some(false) => "-",
        };
        f.debug_tuple(&format!("addset{order}"))
            .field(&self.r1)
            .field(&self.r2)
            .finish()
    }
}

impl<'a> SmartSet<'a> for AddSet<'a> {
    fn contains(&self, rev: Rev) -> bool {
        self.r1.contains(rev) || self.r2.contains(rev)
    }

    fn iter(&self) -> RevIter<'_> {
        let Some(ascending) = self.ascending else {
            if let Some(list) = self.gen_list.get() {
                return Box::new(list.iter().copied());
            }
            let r1 = &self.r1;
            let rest = self.r2.iter().filter(move |&rev| !r1.contains(rev));
            return Box::new(self.r1.iter().chain(rest));
        };
        let fast = if ascending {
            self.fast_asc()
        } else {
            self.fast_desc()
        };
        if let Some(iter) = fast {
            return iter;
        }
        // maybe half of the operands support fast iteration
        iter_ordered(
            ascending,
            iter_directed(&*self.r1, ascending),
            iter_directed(&*self.r2, ascending),
        )
    }

    fn fast_asc(&self) -> Option<RevIter<'_>> {
        if let Some(list) = self.materialized_asc_list() {
            return Some(Box::new(list.iter().copied()));
        }
        let iter1 = self.r1.fast_asc()?;
        let iter2 = self.r2.fast_asc()?;
        Some(iter_ordered(true, iter1, iter2))
    }

    fn fast_desc(&self) -> Option<RevIter<'_>> {
        if let Some(list) = self.materialized_asc_list() {
            return Some(Box::new(list.iter().rev().copied()));
        }
        let iter1 = self.r1.fast_desc()?;
        let iter2 = self.r2.fast_desc()?;
        Some(iter_ordered(false, iter1, iter2))
    }

    fn is_empty(&self) -> bool {
        self.r1.is_empty() && self.r2.is_empty()
    }

    fn len(&self) -> usize {
        self.list().len()
    }

    fn is_ascending(&self) -> bool {
        self.ascending == Some(true)
    }

    fn is_descending(&self) -> bool {
        self.ascending == Some(false)
    }

    fn sort(&mut self, descending: bool) {
        self.ascending = Some(!descending);
    }

    fn reverse(&mut self) {
        match self.ascending {
            None => {
                self.list();
                if let Some(list) = self.gen_list.get_mut() {
                    list.reverse();
                }
            }
            Some(ascending) => self.ascending = Some(!ascending),
        }
    }

    fn boxed_clone(&self) -> Revs<'a> {
        Box::new(AddSet {
            r1: self.r1.clone(),
            r2: self.r2.clone(),
            ascending: self.ascending,
            gen_list: self.gen_list.clone(),
            asc_list: self.asc_list.clone(),
        })
    }
}

/// Revisions of the subset matching a condition. Iterates in the order of
/// the subset.
pub struct FilteredSet<'a> {
    subset: Revs<'a>,
    condition: Rc<dyn Fn(Rev) -> bool + 'a>,
    first: Cell<Option<Option<Rev>>>,
    last: Cell<Option<Option<Rev>>>,
}

impl<'a> FilteredSet<'a> {
    pub fn new(subset: Revs<'a>, condition: impl Fn(Rev) -> bool + 'a) -> Self {
        FilteredSet {
            subset,
            condition: Rc::new(condition),
            first: Cell::new(None),
            last: Cell::new(None),
        }
    }

    fn filter_iter<'s>(&'s self, iter: RevIter<'s>) -> RevIter<'s> {
        let condition = &self.condition;
        Box::new(iter.filter(move |&rev| condition(rev)))
    }

    fn forget_ends(&self) {
        self.first.set(None);
        self.last.set(None);
    }
}

impl fmt::Debug for FilteredSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("filteredset").field(&self.subset).finish()
    }
}

impl<'a> SmartSet<'a> for FilteredSet<'a> {
    fn contains(&self, rev: Rev) -> bool {
        self.subset.contains(rev) && (self.condition)(rev)
    }

    fn iter(&self) -> RevIter<'_> {
        self.filter_iter(self.subset.iter())
    }

    fn fast_asc(&self) -> Option<RevIter<'_>> {
        Some(self.filter_iter(self.subset.fast_asc()?))
    }

    fn fast_desc(&self) -> Option<RevIter<'_>> {
        Some(self.filter_iter(self.subset.fast_desc()?))
    }

    fn is_empty(&self) -> bool {
        let fast = if self.is_ascending() {
            self.fast_asc()
        } else if self.is_descending() {
            self.fast_desc()
        } else {
            None
        };
        let mut iter = fast
            .or_else(|| self.fast_asc())
            .or_else(|| self.fast_desc())
            .unwrap_or_else(|| self.iter());
        iter.next().is_none()
    }

    fn first(&self) -> Option<Rev> {
        if let Some(first) = self.first.get() {
            return first;
        }
        let first = self.iter().next();
        self.first.set(Some(first));
        first
    }

    fn last(&self) -> Option<Rev> {
        if let Some(last) = self.last.get() {
            return last;
        }
        let fast = if self.is_ascending() {
            self.fast_desc()
        } else if self.is_descending() {
            self.fast_asc()
        } else {
            None
        };
        let last = match fast {
            Some(mut iter) => iter.next(),
            None => self.iter().last(),
        };
        self.last.set(Some(last));
        last
    }

    fn is_ascending(&self) -> bool {
        self.subset.is_ascending()
    }

    fn is_descending(&self) -> bool {
        self.subset.is_descending()
    }

    fn is_topo(&self) -> bool {
        self.subset.is_topo()
    }

    fn sort(&mut self, descending: bool) {
        self.subset.sort(descending);
        self.forget_ends();
    }

    fn reverse(&mut self) {
        self.subset.reverse();
        self.forget_ends();
    }

    fn boxed_clone(&self) -> Revs<'a> {
        Box::new(FilteredSet {
            subset: self.subset.clone(),
            condition: self.condition.clone(),
            first: self.first.clone(),
            last: self.last.clone(),
        })
    }
}

/// Creates empty set.
pub fn empty<'a>() -> Revs<'a> {
    Box::new(BaseSet::default())
}

/// Compares revisions in the given direction.
pub fn compare_revs(ascending: bool) -> impl Fn(&Rev, &Rev) -> Ordering {
    move |a, b| if ascending { a.cmp(b) } else { b.cmp(a) }
}

/// Creates set from the revisions produced by `iter`, keeping their order.
pub fn from_iter<'a>(iter: impl IntoIterator<Item = Rev>) -> Revs<'a> {
    Box::new(BaseSet::from_list(iter.into_iter().collect()))
}

/// Iterates over the set in the given direction, using the fast path if any.
pub fn iter_directed<'s, 'a>(
    revs: &'s (impl SmartSet<'a> + ?Sized),
    ascending: bool,
) -> RevIter<'s> {
    let fast = if ascending {
        revs.fast_asc()
    } else {
        revs.fast_desc()
    };
    fast.unwrap_or_else(|| {
        let mut sorted = revs.iter().collect_vec();
        sorted.sort_unstable_by(compare_revs(ascending));
        Box::new(sorted.into_iter())
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use maplit::hashset;
    use test_case::test_case;

    use super::*;

    fn revs(values: &[u32]) -> Vec<Rev> {
        values.iter().copied().map(Rev).collect()
    }

    fn base(values: &[u32]) -> Revs<'static> {
        Box::new(BaseSet::from_list(revs(values)))
    }

    fn collect(set: &Revs<'_>) -> Vec<u32> {
        set.iter().map(|rev| rev.0).collect()
    }

    static NO_HIDDEN: once_cell::sync::Lazy<HashSet<Rev>> =
        once_cell::sync::Lazy::new(HashSet::new);

    #[derive(Debug, Default)]
    struct RecordingFilter {
        probed: RefCell<Vec<Rev>>,
    }

    impl RevFilter for RecordingFilter {
        fn is_empty(&self) -> bool {
            true
        }

        fn contains(&self, rev: Rev) -> bool {
            self.probed.borrow_mut().push(rev);
            false
        }
    }

    #[test]
    fn test_base_set_order() {
        let mut set = base(&[3, 0, 2]);
        assert_eq!(collect(&set), vec![3, 0, 2]);
        assert!(!set.is_ascending());
        assert_eq!(set.first(), Some(Rev(3)));
        assert_eq!(set.last(), Some(Rev(2)));
        assert_eq!(set.min(), Some(Rev(0)));
        assert_eq!(set.max(), Some(Rev(3)));

        set.reverse();
        assert_eq!(collect(&set), vec![2, 0, 3]);
        set.sort(false);
        assert_eq!(collect(&set), vec![0, 2, 3]);
        assert!(set.is_ascending());
        set.reverse();
        assert_eq!(collect(&set), vec![3, 2, 0]);
        assert_eq!(set.first(), Some(Rev(3)));
        assert_eq!(set.last(), Some(Rev(0)));

        let set: Revs = Box::new(BaseSet::from_set(hashset! {Rev(5), Rev(1), Rev(3)}));
        assert_eq!(collect(&set), vec![1, 3, 5]);
        assert_eq!(set.len(), 3);
        assert!(set.contains(Rev(3)));
        assert!(!set.contains(Rev(2)));
    }

    #[test]
    fn test_base_set_drops_duplicates() {
        let set = base(&[1, 2, 1]);
        assert_eq!(collect(&set), vec![1, 2]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_base_set_slice() {
        let set = base(&[4, 0, 3, 1]);
        assert_eq!(collect(&set.slice(1, 3)), vec![0, 3]);
        assert_eq!(collect(&set.slice(3, 10)), vec![1]);
        assert_eq!(collect(&set.slice(2, 2)), Vec::<u32>::new());

        let mut set = base(&[4, 0, 3, 1]);
        set.sort(true);
        assert_eq!(collect(&set.slice(0, 2)), vec![4, 3]);
        assert_eq!(collect(&set.slice(1, 10)), vec![3, 1, 0]);
        assert!(set.slice(0, 2).is_descending());
    }

    #[test]
    fn test_span_set() {
        let hidden = hashset! {Rev(3)};
        let mut set: Revs = Box::new(SpanSet::new(Rev(1), Rev(6), true, &hidden));
        assert_eq!(collect(&set), vec![1, 2, 4, 5]);
        assert_eq!(set.len(), 4);
        assert!(set.contains(Rev(5)));
        assert!(!set.contains(Rev(3)));
        assert!(!set.contains(Rev(6)));
        assert_eq!(set.first(), Some(Rev(1)));
        assert_eq!(set.last(), Some(Rev(5)));
        set.reverse();
        assert_eq!(collect(&set), vec![5, 4, 2, 1]);
        assert_eq!(collect(&set.slice(1, 3)), vec![4, 2]);

        let set: Revs = Box::new(SpanSet::between(Rev(4), Rev(2), &*NO_HIDDEN));
        assert_eq!(collect(&set), vec![4, 3, 2]);
        assert!(set.is_descending());
    }

    #[test]
    fn test_span_set_slice_does_not_scan_outside_range() {
        let filter = RecordingFilter::default();
        let set = SpanSet::new(Rev(0), Rev(10), true, &filter);
        let sliced = set.slice(2, 5);
        assert!(filter.probed.borrow().is_empty());
        assert_eq!(collect(&sliced), vec![2, 3, 4]);
        assert_eq!(*filter.probed.borrow(), revs(&[2, 3, 4]));

        let mut set = SpanSet::new(Rev(0), Rev(10), true, &*NO_HIDDEN);
        set.reverse();
        assert_eq!(collect(&set.slice(2, 5)), vec![7, 6, 5]);
        assert_eq!(collect(&set.slice(8, 20)), vec![1, 0]);
        assert!(set.slice(5, 20).is_descending());
    }

    #[test]
    fn test_full_repo_intersection_returns_other() {
        let full: Revs = Box::new(FullRepoSet::new(10, &*NO_HIDDEN));
        let result = full.intersection(base(&[5, 2, 7]));
        assert_eq!(collect(&result), vec![2, 5, 7]);
        assert_matches!(result.as_base_set(), Some(_));

        let mut full: Revs = Box::new(FullRepoSet::new(10, &*NO_HIDDEN));
        full.reverse();
        assert_eq!(collect(&full.intersection(base(&[5, 2, 7]))), vec![7, 5, 2]);
    }

    #[test]
    fn test_add_set_order() {
        let set = AddSet::new(base(&[0, 3, 2]), base(&[5, 2, 4]), None);
        assert_eq!(set.iter().map(|rev| rev.0).collect_vec(), vec![0, 3, 2, 5, 4]);
        let set = AddSet::new(base(&[0, 3, 2]), base(&[5, 2, 4]), Some(true));
        assert_eq!(set.iter().map(|rev| rev.0).collect_vec(), vec![0, 2, 3, 4, 5]);
        let set = AddSet::new(base(&[0, 3, 2]), base(&[5, 2, 4]), Some(false));
        assert_eq!(set.iter().map(|rev| rev.0).collect_vec(), vec![5, 4, 3, 2, 0]);
        assert_eq!(set.first(), Some(Rev(5)));
        assert_eq!(set.last(), Some(Rev(0)));
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn test_add_set_reverse_unordered() {
        let mut set: Revs = Box::new(AddSet::new(base(&[0, 3]), base(&[5, 3]), None));
        set.reverse();
        assert_eq!(collect(&set), vec![5, 3, 0]);
        assert_eq!(collect(&set.clone()), vec![5, 3, 0]);
        set.sort(false);
        assert_eq!(collect(&set), vec![0, 3, 5]);
    }

    #[test]
    fn test_add_set_merges_generators() {
        let asc = GeneratorSet::ascending(revs(&[1, 4, 6]).into_iter());
        let desc = GeneratorSet::descending(revs(&[5, 4, 0]).into_iter());
        let set = AddSet::new(Box::new(asc), Box::new(desc), Some(true));
        assert_eq!(set.iter().map(|rev| rev.0).collect_vec(), vec![0, 1, 4, 5, 6]);
    }

    #[test]
    fn test_generator_set_caches_produced_revisions() {
        let pulled = Rc::new(Cell::new(0));
        let counter = pulled.clone();
        let generator = revs(&[2, 5, 7, 9]).into_iter().inspect(move |_| {
            counter.set(counter.get() + 1);
        });
        let set = GeneratorSet::ascending(generator);
        assert!(!set.contains(Rev(3)));
        // stopped at 5, which is past 3
        assert_eq!(pulled.get(), 2);
        assert!(set.contains(Rev(5)));
        assert!(!set.contains(Rev(3)));
        assert_eq!(pulled.get(), 2);
        assert_eq!(set.first(), Some(Rev(2)));

        let cloned = set.boxed_clone();
        assert_eq!(collect(&cloned), vec![2, 5, 7, 9]);
        assert_eq!(set.iter().map(|rev| rev.0).collect_vec(), vec![2, 5, 7, 9]);
        assert_eq!(pulled.get(), 4);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_generator_set_unknown_order() {
        let mut set = GeneratorSet::new(revs(&[4, 1, 8]).into_iter(), GeneratorOrder::Unknown);
        assert!(set.fast_asc().is_none());
        assert!(!set.is_empty());
        assert!(!set.contains(Rev(2)));
        // the whole generator was consumed
        assert!(set.fast_asc().is_some());
        assert_eq!(set.iter().map(|rev| rev.0).collect_vec(), vec![1, 4, 8]);
        set.reverse();
        assert_eq!(set.first(), Some(Rev(8)));
        assert_eq!(set.last(), Some(Rev(1)));
    }

    #[test]
    fn test_generator_set_concurrent_iterators() {
        let set = GeneratorSet::descending(revs(&[9, 6, 3]).into_iter());
        let mut iter1 = set.iter();
        let mut iter2 = set.iter();
        assert_eq!(iter1.next(), Some(Rev(9)));
        assert_eq!(iter1.next(), Some(Rev(6)));
        assert_eq!(iter2.next(), Some(Rev(9)));
        assert_eq!(iter2.next(), Some(Rev(6)));
        assert_eq!(iter2.next(), Some(Rev(3)));
        assert_eq!(iter1.next(), Some(Rev(3)));
        assert_eq!(iter1.next(), None);
    }

    #[test]
    fn test_filtered_set() {
        let mut set = base(&[1, 2, 3, 4, 5, 6]).filtered(|rev| rev.0 % 2 == 0);
        assert_eq!(collect(&set), vec![2, 4, 6]);
        assert!(set.contains(Rev(4)));
        assert!(!set.contains(Rev(3)));
        assert_eq!(set.first(), Some(Rev(2)));
        assert_eq!(set.last(), Some(Rev(6)));
        set.sort(true);
        assert_eq!(set.first(), Some(Rev(6)));
        assert_eq!(set.last(), Some(Rev(2)));
        assert!(set.is_descending());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_set_ops_preserve_left_order() {
        let left = base(&[5, 1, 3, 2]);
        assert_eq!(collect(&left.clone().intersection(base(&[2, 5]))), vec![5, 2]);
        assert_eq!(collect(&left.difference(base(&[2, 5]))), vec![1, 3]);

        let mut left = base(&[5, 1, 3, 2]);
        left.sort(true);
        let result = left.intersection(base(&[2, 5, 9]));
        assert_matches!(result.as_base_set(), Some(_));
        assert_eq!(collect(&result), vec![5, 2]);
    }

    fn make_set(kind: &str, values: &[u32]) -> Revs<'static> {
        let values = revs(values);
        match kind {
            "base" => Box::new(BaseSet::from_list(values)),
            "hashed" => Box::new(BaseSet::from_set(values.into_iter().collect())),
            "generator" => Box::new(GeneratorSet::new(values.into_iter(), GeneratorOrder::Unknown)),
            "filtered" => {
                let span: Revs = Box::new(SpanSet::new(Rev(0), Rev(20), true, &*NO_HIDDEN));
                let members: HashSet<Rev> = values.into_iter().collect();
                span.filtered(move |rev| members.contains(&rev))
            }
            "add" => {
                let (r1, r2) = values.split_at(values.len() / 2);
                Box::new(AddSet::new(
                    Box::new(BaseSet::from_list(r1.to_vec())),
                    Box::new(BaseSet::from_list(r2.to_vec())),
                    None,
                ))
            }
            _ => unreachable!(),
        }
    }

    #[test_case("base", "generator")]
    #[test_case("hashed", "filtered")]
    #[test_case("generator", "add")]
    #[test_case("filtered", "base")]
    #[test_case("add", "hashed")]
    fn test_set_ops_closure(kind1: &str, kind2: &str) {
        let a = [0, 3, 2, 7, 11];
        let b = [5, 2, 4, 11, 13];
        let span: Revs = Box::new(SpanSet::new(Rev(0), Rev(15), true, &*NO_HIDDEN));
        let cases: [(&str, fn(bool, bool) -> bool); 3] = [
            ("and", |x, y| x && y),
            ("or", |x, y| x || y),
            ("minus", |x, y| x && !y),
        ];
        for (op, expected) in cases {
            let (set1, set2) = (make_set(kind1, &a), make_set(kind2, &b));
            let result = match op {
                "and" => set1.intersection(set2),
                "or" => set1.union(set2),
                _ => set1.difference(set2),
            };
            let produced = collect(&result);
            assert!(produced.iter().all_unique(), "{op}: {produced:?}");
            for rev in span.iter() {
                let want = expected(a.contains(&rev.0), b.contains(&rev.0));
                assert_eq!(result.contains(rev), want, "{op} contains {rev}");
                assert_eq!(produced.contains(&rev.0), want, "{op} iterates {rev}");
            }
        }
    }
}
