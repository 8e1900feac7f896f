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

//! Revset analysis, optimization, and evaluation.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools as _;
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::instrument;

use crate::dagop::{self, MAX_LOG_DEPTH};
use crate::dsl_util::{
    build_args_map, collect_similar, get_args, get_integer, get_list, get_string, get_symbol,
    pretty_format, Diagnostics, ExpressionKind, LookupFn, OperatorKind as _, ParseError,
    ParseErrorKind,
};
use crate::repo::{resolve_symbol, HexPrefix, LookupError, NodeId, Phase, PrefixResolution, Repo, Rev};
use crate::revset_parser::{self, get_int_range, RevsetNode, RevsetOp};
use crate::settings::QuerySettings;
use crate::smartset::{self, BaseSet, FullRepoSet, Revs, SmartSet as _, SmartSetExt as _, SpanSet};
use crate::str_util::StringPattern;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum RevsetError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("unknown identifier: {name}")]
    UnknownIdentifier {
        name: String,
        candidates: Vec<String>,
    },
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// Tree shape that the analysis passes should never produce.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type RevsetResult<T> = Result<T, RevsetError>;

/// How the result of a sub-expression should be ordered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    /// Whatever order is cheapest.
    Any,
    /// The expression defines the order, e.g. `x` in `x and y`.
    Define,
    /// Follow the order of the subset, e.g. `y` in `x and y`.
    Follow,
}

fn follow_order(order: Order) -> Order {
    match order {
        Order::Any => Order::Any,
        Order::Define | Order::Follow => Order::Follow,
    }
}

fn expression_error(message: impl Into<String>, location: usize) -> ParseError {
    ParseError::with_location(ParseErrorKind::Expression(message.into()), location)
}

fn internal_error(node: &RevsetNode) -> RevsetError {
    let name = match &node.kind {
        ExpressionKind::Operation(op, _) => op.name(),
        ExpressionKind::Symbol(_) => "symbol",
        ExpressionKind::String(_) => "string",
        ExpressionKind::AliasArg(_) => "_aliasarg",
    };
    RevsetError::Internal(format!("invalid operator {name}"))
}

/// Builds `name(args...)`, packing multiple arguments into a list.
fn function_call(name: &str, mut args: Vec<RevsetNode>, location: usize) -> RevsetNode {
    let name = RevsetNode::symbol(name, location);
    let args = match args.len() {
        0 => vec![name],
        1 => vec![name, args.remove(0)],
        _ => vec![name, RevsetNode::operation(RevsetOp::List, args, location)],
    };
    RevsetNode::operation(RevsetOp::Func, args, location)
}

/// Rewrites surface syntax into the operators the evaluator understands.
///
/// `x - y` becomes `x and not y`, `::x` becomes `ancestors(x)`, `-n` becomes
/// the string `'-n'`, and groups are unwrapped.
pub fn analyze(node: &RevsetNode) -> RevsetResult<RevsetNode> {
    let location = node.location;
    let (op, args) = match &node.kind {
        ExpressionKind::Symbol(_) | ExpressionKind::String(_) => return Ok(node.clone()),
        ExpressionKind::AliasArg(_) => return Err(internal_error(node)),
        ExpressionKind::Operation(op, args) => (*op, args.as_slice()),
    };
    let analyze_all = |args: &[RevsetNode]| -> RevsetResult<Vec<RevsetNode>> {
        args.iter().map(analyze).try_collect()
    };
    match (op, args) {
        (RevsetOp::Minus, [x, y]) => {
            let not_y = RevsetNode::operation(RevsetOp::Not, vec![y.clone()], location);
            analyze(&RevsetNode::operation(
                RevsetOp::And,
                vec![x.clone(), not_y],
                location,
            ))
        }
        (RevsetOp::Only, [x, y]) => {
            analyze(&function_call("only", vec![x.clone(), y.clone()], location))
        }
        (RevsetOp::OnlyPost, [x]) => analyze(&function_call("only", vec![x.clone()], location)),
        (RevsetOp::DagRangeAll, _) => {
            Err(expression_error("can't use '::' in this context", location).into())
        }
        (RevsetOp::DagRangePre, [x]) => {
            analyze(&function_call("ancestors", vec![x.clone()], location))
        }
        (RevsetOp::DagRangePost, [x]) => {
            analyze(&function_call("descendants", vec![x.clone()], location))
        }
        (RevsetOp::Negate, [x]) => {
            let value = x
                .as_string_like()
                .ok_or_else(|| expression_error("can't negate that", x.location))?;
            Ok(RevsetNode::string(format!("-{value}"), location))
        }
        (RevsetOp::Group, [x]) => analyze(x),
        (RevsetOp::Group, []) => {
            Err(ParseError::with_location(ParseErrorKind::MissingArgument, location).into())
        }
        (RevsetOp::KeyValue, [key, value]) => Ok(RevsetNode::operation(
            op,
            vec![key.clone(), analyze(value)?],
            location,
        )),
        (RevsetOp::Func, [name, rest @ ..]) => {
            let args = [Ok(name.clone())]
                .into_iter()
                .chain(rest.iter().map(analyze))
                .try_collect()?;
            Ok(RevsetNode::operation(op, args, location))
        }
        (
            RevsetOp::Or
            | RevsetOp::Not
            | RevsetOp::RangeAll
            | RevsetOp::RangePre
            | RevsetOp::RangePost
            | RevsetOp::ParentPost
            | RevsetOp::And
            | RevsetOp::DagRange
            | RevsetOp::Range
            | RevsetOp::Parent
            | RevsetOp::Ancestor
            | RevsetOp::Relation
            | RevsetOp::Subscript
            | RevsetOp::RelSubscript
            | RevsetOp::List,
            _,
        ) => Ok(RevsetNode::operation(op, analyze_all(args)?, location)),
        _ => Err(internal_error(node)),
    }
}

/// Estimated cost of the builtin function, relative to a plain symbol.
pub fn function_weight(name: &str) -> f64 {
    match name {
        "ancestor" => 0.5,
        "branch" | "sort" => 10.0,
        "first" | "limit" | "reverse" => 0.0,
        _ => 1.0,
    }
}

/// Reorders the analyzed tree for faster evaluation.
///
/// Cheaper operands of `and` are evaluated first, runs of plain symbols in
/// `or` are batched into a single `_list()`, and a few patterns are replaced
/// by functions that have a fast path.
pub fn optimize(tree: &RevsetNode) -> RevsetResult<RevsetNode> {
    let (_weight, tree) = optimize_node(tree)?;
    Ok(tree)
}

// Returns the single positional argument of `name(arg)`.
fn single_arg_of<'n>(node: &'n RevsetNode, name: &str) -> Option<&'n RevsetNode> {
    match node.as_operation()? {
        (RevsetOp::Func, [func, arg]) if func.as_symbol() == Some(name) => {
            match arg.as_operation() {
                Some((RevsetOp::List | RevsetOp::KeyValue, _)) => None,
                _ => Some(arg),
            }
        }
        _ => None,
    }
}

fn nullary_call_name(node: &RevsetNode) -> Option<&str> {
    match node.as_operation()? {
        (RevsetOp::Func, [func]) => func.as_symbol(),
        _ => None,
    }
}

// `::x and not ::y`
fn match_only(revs: &RevsetNode, bases: &RevsetNode, location: usize) -> Option<RevsetNode> {
    let heads = single_arg_of(revs, "ancestors")?;
    let excluded = match bases.as_operation()? {
        (RevsetOp::Not, [negated]) => single_arg_of(negated, "ancestors")?,
        _ => return None,
    };
    Some(function_call(
        "only",
        vec![heads.clone(), excluded.clone()],
        location,
    ))
}

// `draft() and ::x`
fn match_phase_and_ancestors(
    phase: &RevsetNode,
    ancestors: &RevsetNode,
    location: usize,
) -> Option<RevsetNode> {
    let phase_name = nullary_call_name(phase)?;
    if !matches!(phase_name, "draft" | "secret" | "_notpublic") {
        return None;
    }
    let heads = single_arg_of(ancestors, "ancestors")?;
    Some(function_call(
        "_phaseandancestors",
        vec![RevsetNode::symbol(phase_name, location), heads.clone()],
        location,
    ))
}

fn optimize_node(node: &RevsetNode) -> RevsetResult<(f64, RevsetNode)> {
    let location = node.location;
    let (op, args) = match &node.kind {
        // single revisions are small
        ExpressionKind::Symbol(_) | ExpressionKind::String(_) | ExpressionKind::AliasArg(_) => {
            return Ok((0.5, node.clone()))
        }
        ExpressionKind::Operation(op, args) => (*op, args.as_slice()),
    };
    let new_node = |op, args| RevsetNode::operation(op, args, location);
    match (op, args) {
        (RevsetOp::And, [x, y]) => {
            let (wa, ta) = optimize_node(x)?;
            let (wb, tb) = optimize_node(y)?;
            let w = wa.min(wb);
            if let Some(tree) = match_phase_and_ancestors(&ta, &tb, location) {
                return Ok((w, tree));
            }
            if let Some(tree) =
                match_only(&ta, &tb, location).or_else(|| match_only(&tb, &ta, location))
            {
                return Ok((w, tree));
            }
            if let Some((RevsetOp::Not, [negated])) = tb.as_operation() {
                let negated = negated.clone();
                return Ok((wa, new_node(RevsetOp::Difference, vec![ta, negated])));
            }
            let op = if wa > wb {
                RevsetOp::AndSmally
            } else {
                RevsetOp::And
            };
            Ok((w, new_node(op, vec![ta, tb])))
        }
        (RevsetOp::Or, [list]) => {
            let mut weights = vec![];
            let mut trees = vec![];
            let mut leaves: Vec<(f64, RevsetNode)> = vec![];
            for item in get_list(Some(list)) {
                let (w, t) = optimize_node(item)?;
                if t.as_string_like().is_some() {
                    leaves.push((w, t));
                    continue;
                }
                flush_leaves(&mut leaves, &mut weights, &mut trees, location)?;
                weights.push(w);
                trees.push(t);
            }
            flush_leaves(&mut leaves, &mut weights, &mut trees, location)?;
            if trees.len() == 1 {
                // or is fully optimized out
                return Ok((weights[0], trees.remove(0)));
            }
            let w = weights.iter().copied().fold(0.0, f64::max);
            let list = new_node(RevsetOp::List, trees);
            Ok((w, new_node(RevsetOp::Or, vec![list])))
        }
        (RevsetOp::Not, [x]) => {
            if nullary_call_name(x) == Some("public") {
                return optimize_node(&function_call("_notpublic", vec![], location));
            }
            let (w, t) = optimize_node(x)?;
            Ok((w, new_node(op, vec![t])))
        }
        (RevsetOp::RangeAll, []) => Ok((1.0, node.clone())),
        (RevsetOp::RangePre | RevsetOp::RangePost | RevsetOp::ParentPost, [x]) => {
            let (w, t) = optimize_node(x)?;
            Ok((w, new_node(op, vec![t])))
        }
        (RevsetOp::DagRange | RevsetOp::Range, [x, y]) => {
            let (wa, ta) = optimize_node(x)?;
            let (wb, tb) = optimize_node(y)?;
            Ok((wa + wb, new_node(op, vec![ta, tb])))
        }
        (
            RevsetOp::Parent
            | RevsetOp::Ancestor
            | RevsetOp::Relation
            | RevsetOp::Subscript
            | RevsetOp::RelSubscript,
            [x, rest @ ..],
        ) => {
            let (w, t) = optimize_node(x)?;
            let args = [t].into_iter().chain(rest.iter().cloned()).collect();
            Ok((w, new_node(op, args)))
        }
        (RevsetOp::List, items) => {
            let mut weight = 0.0;
            let mut trees = Vec::with_capacity(items.len());
            for item in items {
                let (w, t) = optimize_node(item)?;
                weight += w;
                trees.push(t);
            }
            Ok((weight, new_node(op, trees)))
        }
        (RevsetOp::KeyValue, [key, value]) => {
            let (w, t) = optimize_node(value)?;
            Ok((w, new_node(op, vec![key.clone(), t])))
        }
        (RevsetOp::Func, [name, rest @ ..]) => {
            let func_name = get_symbol(name)?;
            let (wa, ta) = match rest {
                [] => (0.0, None),
                [arg] => {
                    let (w, t) = optimize_node(arg)?;
                    (w, Some(t))
                }
                _ => return Err(internal_error(node)),
            };
            let w = function_weight(func_name);
            if func_name == "heads" {
                if let Some(arg) = ta.as_ref().and_then(|t| single_arg_of(t, "commonancestors")) {
                    let tree = function_call("_commonancestorheads", vec![arg.clone()], location);
                    return Ok((w + wa, tree));
                }
            }
            let args = [name.clone()].into_iter().chain(ta).collect();
            Ok((w + wa, new_node(op, args)))
        }
        _ => Err(internal_error(node)),
    }
}

// Replaces a run of plain symbols with `_list('a\0b')`.
fn flush_leaves(
    leaves: &mut Vec<(f64, RevsetNode)>,
    weights: &mut Vec<f64>,
    trees: &mut Vec<RevsetNode>,
    location: usize,
) -> RevsetResult<()> {
    match leaves.len() {
        0 => {}
        1 => {
            let (w, t) = leaves.remove(0);
            weights.push(w);
            trees.push(t);
        }
        _ => {
            let joined = leaves
                .iter()
                .filter_map(|(_, t)| t.as_string_like())
                .join("\0");
            let list = function_call(
                "_list",
                vec![RevsetNode::string(joined, location)],
                location,
            );
            let (w, t) = optimize_node(&list)?;
            weights.push(w);
            trees.push(t);
            leaves.clear();
        }
    }
    Ok(())
}

type RevsetFunction = for<'a> fn(
    &RevsetEvaluator<'a>,
    Revs<'a>,
    Option<&RevsetNode>,
    Order,
) -> RevsetResult<Revs<'a>>;

static BUILTIN_FUNCTION_MAP: Lazy<HashMap<&'static str, RevsetFunction>> = Lazy::new(|| {
    // Not using maplit::hashmap!{} or custom declarative macro here because
    // code completion inside macro is quite restricted.
    let mut map: HashMap<&'static str, RevsetFunction> = HashMap::new();
    map.insert("all", |ev, subset, args, _order| {
        get_args(args, 0, Some(0), "all takes no arguments")?;
        Ok(subset.intersection(ev.full_repo()))
    });
    map.insert("none", |_ev, _subset, args, _order| {
        get_args(args, 0, Some(0), "none takes no arguments")?;
        Ok(smartset::empty())
    });
    map.insert("ancestors", |ev, subset, args, _order| {
        let (set, start, stop) = depth_args(args, "ancestors")?;
        ancestors_of(ev, subset, set, false, start, stop)
    });
    map.insert("_firstancestors", |ev, subset, args, _order| {
        let set = one_arg(args, "_firstancestors takes one argument")?;
        ancestors_of(ev, subset, set, true, None, None)
    });
    map.insert("descendants", |ev, subset, args, _order| {
        let (set, start, stop) = depth_args(args, "descendants")?;
        descendants_of(ev, subset, set, false, start, stop)
    });
    map.insert("_firstdescendants", |ev, subset, args, _order| {
        let set = one_arg(args, "_firstdescendants takes one argument")?;
        descendants_of(ev, subset, set, true, None, None)
    });
    map.insert("ancestor", ancestor);
    map.insert("commonancestors", common_ancestors);
    map.insert("_commonancestorheads", |ev, subset, args, _order| {
        let set = one_arg(args, "_commonancestorheads takes one argument")?;
        let start = ev.collect(set, Order::Any)?;
        let heads = dagop::common_ancestor_heads(ev.repo, &start);
        Ok(subset.intersection(Box::new(BaseSet::from_list(heads))))
    });
    map.insert("heads", heads);
    map.insert("roots", roots);
    map.insert("parents", |ev, subset, args, _order| {
        let set = one_arg(args, "parents takes one argument")?;
        let parents: HashSet<Rev> = ev
            .collect(set, Order::Define)?
            .into_iter()
            .flat_map(|rev| ev.repo.parents(rev))
            .collect();
        Ok(subset.intersection(Box::new(BaseSet::from_set(parents))))
    });
    map.insert("p1", |ev, subset, args, _order| {
        let set = one_arg(args, "p1 takes one argument")?;
        first_parent(ev, subset, set)
    });
    map.insert("p2", |ev, subset, args, _order| {
        let set = one_arg(args, "p2 takes one argument")?;
        let parents: HashSet<Rev> = ev
            .collect(set, Order::Define)?
            .into_iter()
            .filter_map(|rev| ev.repo.parent_revisions(rev).1)
            .collect();
        Ok(subset.intersection(Box::new(BaseSet::from_set(parents))))
    });
    map.insert("children", children);
    map.insert("only", only);
    map.insert("first", limit);
    map.insert("limit", limit);
    map.insert("last", last);
    map.insert("reverse", |ev, subset, args, order| {
        let set = one_arg(args, "reverse takes one argument")?;
        let mut revs = ev.get_set(subset, set, order)?;
        if order == Order::Define {
            revs.reverse();
        }
        Ok(revs)
    });
    map.insert("sort", sort);
    map.insert("min", |ev, subset, args, _order| {
        let set = one_arg(args, "min takes one argument")?;
        let revs = ev.eval_full(set)?;
        Ok(single_if_contained(subset, revs.min()))
    });
    map.insert("max", |ev, subset, args, _order| {
        let set = one_arg(args, "max takes one argument")?;
        let revs = ev.eval_full(set)?;
        Ok(single_if_contained(subset, revs.max()))
    });
    map.insert("present", |ev, subset, args, order| {
        let set = one_arg(args, "present takes one argument")?;
        match ev.get_set(subset, set, order) {
            Err(RevsetError::Lookup(_)) => Ok(smartset::empty()),
            result => result,
        }
    });
    map.insert("rev", rev);
    map.insert("id", id);
    map.insert("_list", |ev, subset, args, order| {
        let arg = one_arg(args, "internal error")?;
        let text = get_string(arg, "internal error")?;
        if order == Order::Follow {
            // slow path to take the subset order
            let list = ordered_list(ev, &*ev.full_repo(), text)?;
            return Ok(subset.intersection(list));
        }
        ordered_list(ev, &*subset, text)
    });
    map.insert("draft", |ev, subset, args, _order| {
        get_args(args, 0, Some(0), "draft takes no arguments")?;
        Ok(phase_filter(ev, subset, &[Phase::Draft]))
    });
    map.insert("public", |ev, subset, args, _order| {
        get_args(args, 0, Some(0), "public takes no arguments")?;
        Ok(phase_filter(ev, subset, &[Phase::Public]))
    });
    map.insert("secret", |ev, subset, args, _order| {
        get_args(args, 0, Some(0), "secret takes no arguments")?;
        Ok(phase_filter(ev, subset, &[Phase::Secret]))
    });
    map.insert("_notpublic", |ev, subset, args, _order| {
        get_args(args, 0, Some(0), "_notpublic takes no arguments")?;
        Ok(phase_filter(ev, subset, &[Phase::Draft, Phase::Secret]))
    });
    map.insert("_phaseandancestors", phase_and_ancestors);
    map.insert("tag", |ev, subset, args, _order| {
        let args = get_args(args, 0, Some(1), "tag takes one or no arguments")?;
        let tags = ev.repo.tags();
        let revs = match args.first() {
            Some(arg) => {
                let pattern = name_pattern(arg, "the argument to tag must be a string")?;
                named_revs(&tags, &pattern, "tag")?
            }
            None => tags
                .iter()
                .filter(|(name, _)| *name != "tip")
                .map(|(_, &rev)| rev)
                .collect(),
        };
        Ok(subset.intersection(ev.visible_set(revs)))
    });
    map.insert("bookmark", |ev, subset, args, _order| {
        let args = get_args(args, 0, Some(1), "bookmark takes one or no arguments")?;
        let bookmarks = ev.repo.bookmarks();
        let revs = match args.first() {
            Some(arg) => {
                let pattern = name_pattern(arg, "the argument to bookmark must be a string")?;
                named_revs(&bookmarks, &pattern, "bookmark")?
            }
            None => bookmarks.values().copied().collect(),
        };
        Ok(subset.intersection(ev.visible_set(revs)))
    });
    map.insert("branch", branch);
    map.insert("hidden", |ev, subset, args, _order| {
        get_args(args, 0, Some(0), "hidden takes no arguments")?;
        let hidden = ev.repo.hidden_revisions().clone();
        Ok(subset.intersection(Box::new(BaseSet::from_set(hidden))))
    });
    map.insert("merge", |ev, subset, args, _order| {
        get_args(args, 0, Some(0), "merge takes no arguments")?;
        let repo = ev.repo;
        Ok(subset.filtered(move |rev| repo.parent_revisions(rev).1.is_some()))
    });
    map.insert("head", |ev, subset, args, _order| {
        get_args(args, 0, Some(0), "head takes no arguments")?;
        Ok(subset.intersection(Box::new(BaseSet::from_list(ev.branch_heads()))))
    });
    map.insert("revset", |ev, subset, args, order| {
        let set = one_arg(args, "revset takes one argument")?;
        ev.get_set(subset, set, order)
    });
    map
});

fn one_arg<'n>(args: Option<&'n RevsetNode>, message: &str) -> Result<&'n RevsetNode, ParseError> {
    Ok(get_args(args, 1, Some(1), message)?[0])
}

fn to_depth(n: i64) -> u32 {
    n.clamp(0, i64::from(MAX_LOG_DEPTH)) as u32
}

fn to_count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

// Parses `(set[, depth[, startdepth]])` of ancestors() and descendants().
fn depth_args<'n>(
    args: Option<&'n RevsetNode>,
    func_name: &str,
) -> Result<(&'n RevsetNode, Option<u32>, Option<u32>), ParseError> {
    let items = get_list(args);
    let args_map = build_args_map(&items, func_name, &["set", "depth", "startdepth"])?;
    let Some(set) = args_map.get("set").copied() else {
        return Err(ParseError::invalid_arguments(format!(
            "{func_name} takes at least 1 argument"
        )));
    };
    let start_depth = match args_map.get("startdepth").copied() {
        Some(node) => {
            let message = format!("{func_name} expects an integer startdepth");
            let n = get_integer(node, &message)?;
            if n < 0 {
                return Err(ParseError::invalid_arguments("negative startdepth"));
            }
            Some(to_depth(n))
        }
        None => None,
    };
    let stop_depth = match args_map.get("depth").copied() {
        Some(node) => {
            let message = format!("{func_name} expects an integer depth");
            let n = get_integer(node, &message)?;
            if n < 0 {
                return Err(ParseError::invalid_arguments("negative depth"));
            }
            Some(to_depth(n.saturating_add(1)))
        }
        None => None,
    };
    Ok((set, start_depth, stop_depth))
}

fn ancestors_of<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    set: &RevsetNode,
    follow_first: bool,
    start_depth: Option<u32>,
    stop_depth: Option<u32>,
) -> RevsetResult<Revs<'a>> {
    let heads = ev.collect(set, Order::Define)?;
    if heads.is_empty() {
        return Ok(smartset::empty());
    }
    let ancestors =
        dagop::revancestors(ev.repo, heads, follow_first, start_depth, stop_depth, None);
    Ok(subset.intersection(Box::new(ancestors)))
}

fn descendants_of<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    set: &RevsetNode,
    follow_first: bool,
    start_depth: Option<u32>,
    stop_depth: Option<u32>,
) -> RevsetResult<Revs<'a>> {
    let roots = ev.collect(set, Order::Define)?;
    if roots.is_empty() {
        return Ok(smartset::empty());
    }
    let descendants =
        dagop::revdescendants(ev.repo, roots, follow_first, start_depth, stop_depth);
    Ok(subset.intersection(Box::new(descendants)))
}

fn ancestor<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let items = get_list(args);
    if items.is_empty() {
        return Ok(smartset::empty());
    }
    let revs = ev.or_items(ev.full_repo(), &items, Order::Any)?;
    let mut iter = revs.iter();
    let Some(first) = iter.next() else {
        return Ok(smartset::empty());
    };
    let common = iter.try_fold(first, |acc, rev| dagop::ancestor(ev.repo, acc, rev));
    Ok(single_if_contained(subset, common))
}

fn common_ancestors<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let set = one_arg(args, "commonancestors takes one argument")?;
    let start = ev.collect(set, Order::Any)?;
    if start.is_empty() {
        return Ok(smartset::empty());
    }
    let mut result = subset;
    for rev in start {
        let ancestors = dagop::revancestors(ev.repo, vec![rev], false, None, None, None);
        result = result.intersection(Box::new(ancestors));
    }
    Ok(result)
}

fn heads<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    order: Order,
) -> RevsetResult<Revs<'a>> {
    let set = one_arg(args, "heads takes one argument")?;
    // argument set should never define order
    let order = if order == Order::Define {
        Order::Follow
    } else {
        order
    };
    let input = ev.get_set(ev.full_repo(), set, order)?;
    let parents: HashSet<Rev> = input.iter().flat_map(|rev| ev.repo.parents(rev)).collect();
    let heads = input.difference(Box::new(BaseSet::from_set(parents)));
    Ok(subset.intersection(heads))
}

fn roots<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let set = one_arg(args, "roots takes one argument")?;
    let revs = ev.eval_full(set)?;
    let members = revs.clone();
    let repo = ev.repo;
    let roots = revs.filtered(move |rev| {
        !repo
            .parents(rev)
            .into_iter()
            .any(|parent| members.contains(parent))
    });
    Ok(subset.intersection(roots))
}

fn first_parent<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    set: &RevsetNode,
) -> RevsetResult<Revs<'a>> {
    let parents: HashSet<Rev> = ev
        .collect(set, Order::Define)?
        .into_iter()
        .filter_map(|rev| ev.repo.parent_revisions(rev).0)
        .collect();
    Ok(subset.intersection(Box::new(BaseSet::from_set(parents))))
}

fn children<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let set = one_arg(args, "children takes one argument")?;
    let parents = ev.eval_full(set)?;
    let Some(min_rev) = parents.min() else {
        return Ok(smartset::empty());
    };
    let repo = ev.repo;
    Ok(subset.filtered(move |rev| {
        rev > min_rev
            && repo
                .parents(rev)
                .into_iter()
                .any(|parent| parents.contains(parent))
    }))
}

fn only<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let args = get_args(args, 1, Some(2), "only takes one or two arguments")?;
    let include = ev.collect(args[0], Order::Define)?;
    let exclude = match args.get(1) {
        Some(arg) => ev.collect(arg, Order::Define)?,
        None => {
            if include.is_empty() {
                return Ok(smartset::empty());
            }
            let descendants: HashSet<Rev> =
                dagop::revdescendants(ev.repo, include.clone(), false, None, None)
                    .iter()
                    .collect();
            let included: HashSet<Rev> = include.iter().copied().collect();
            dagop::head_revisions(ev.repo)
                .into_iter()
                .filter(|rev| !descendants.contains(rev) && !included.contains(rev))
                .collect()
        }
    };
    let missing = dagop::missing_ancestors(ev.repo, &include, &exclude);
    Ok(subset.intersection(Box::new(BaseSet::from_set(missing))))
}

fn limit<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    order: Order,
) -> RevsetResult<Revs<'a>> {
    let items = get_list(args);
    let args_map = build_args_map(&items, "limit", &["set", "n", "offset"])?;
    let Some(set) = args_map.get("set").copied() else {
        return Err(ParseError::invalid_arguments("limit requires one to three arguments").into());
    };
    let lim = match args_map.get("n").copied() {
        Some(node) => get_integer(node, "limit expects a number")?,
        None => 1,
    };
    if lim < 0 {
        return Err(ParseError::invalid_arguments("negative number to select").into());
    }
    let offset = match args_map.get("offset").copied() {
        Some(node) => get_integer(node, "limit expects a number")?,
        None => 0,
    };
    if offset < 0 {
        return Err(ParseError::invalid_arguments("negative offset").into());
    }
    let revs = ev.eval_full(set)?;
    let start = to_count(offset);
    let selected = revs.slice(start, start.saturating_add(to_count(lim)));
    if order == Order::Follow && lim > 1 {
        return Ok(subset.intersection(selected));
    }
    Ok(selected.intersection(subset))
}

fn last<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    order: Order,
) -> RevsetResult<Revs<'a>> {
    let args = get_args(args, 1, Some(2), "last requires one or two arguments")?;
    let lim = match args.get(1) {
        Some(node) => get_integer(node, "last expects a number")?,
        None => 1,
    };
    if lim < 0 {
        return Err(ParseError::invalid_arguments("negative number to select").into());
    }
    let mut revs = ev.eval_full(args[0])?;
    revs.reverse();
    let mut selected = revs.slice(0, to_count(lim));
    if order == Order::Follow && lim > 1 {
        return Ok(subset.intersection(selected));
    }
    selected.reverse();
    Ok(selected.intersection(subset))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SortKey {
    Rev,
    Node,
    Branch,
}

impl SortKey {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "rev" => Some(SortKey::Rev),
            "node" => Some(SortKey::Node),
            "branch" => Some(SortKey::Branch),
            _ => None,
        }
    }

    fn compare(self, repo: &dyn Repo, a: Rev, b: Rev) -> Ordering {
        match self {
            SortKey::Rev => a.cmp(&b),
            SortKey::Node => repo.node_for_revision(a).cmp(&repo.node_for_revision(b)),
            SortKey::Branch => repo.branch(a).cmp(repo.branch(b)),
        }
    }
}

fn sort<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    order: Order,
) -> RevsetResult<Revs<'a>> {
    let items = get_list(args);
    let args_map = build_args_map(&items, "sort", &["set", "keys"])?;
    let Some(set) = args_map.get("set").copied() else {
        return Err(ParseError::invalid_arguments("sort requires one or two arguments").into());
    };
    let keys = match args_map.get("keys").copied() {
        Some(node) => get_string(node, "sort spec must be a string")?,
        None => "rev",
    };
    let mut key_flags = vec![];
    for key in keys.split_whitespace() {
        let (name, descending) = match key.strip_prefix('-') {
            Some(name) => (name, true),
            None => (key, false),
        };
        let sort_key = SortKey::parse(name).ok_or_else(|| {
            ParseError::invalid_arguments(format!("unknown sort key '{key}'"))
        })?;
        key_flags.push((sort_key, descending));
    }
    let mut revs = ev.get_set(subset, set, order)?;
    if key_flags.is_empty() || order != Order::Define {
        return Ok(revs);
    }
    if let [(SortKey::Rev, descending)] = key_flags[..] {
        revs.sort(descending);
        return Ok(revs);
    }
    let mut sorted = revs.iter().collect_vec();
    // stable sorts, least significant key first
    for &(key, descending) in key_flags.iter().rev() {
        sorted.sort_by(|&a, &b| {
            let ordering = key.compare(ev.repo, a, b);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
    Ok(smartset::from_iter(sorted))
}

fn single_if_contained<'a>(subset: Revs<'a>, rev: Option<Rev>) -> Revs<'a> {
    match rev {
        Some(rev) if subset.contains(rev) => Box::new(BaseSet::single(rev)),
        _ => smartset::empty(),
    }
}

fn rev<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let arg = one_arg(args, "rev requires a number")?;
    let number: i64 = get_string(arg, "rev requires a number")?
        .parse()
        .map_err(|_| ParseError::invalid_arguments("rev expects a number"))?;
    let Some(rev) = u32::try_from(number)
        .ok()
        .map(Rev)
        .filter(|rev| rev.index() < ev.repo.revision_count())
    else {
        return Ok(smartset::empty());
    };
    Ok(subset.intersection(ev.visible_set([rev])))
}

fn id<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let arg = one_arg(args, "id requires one argument")?;
    let hex = get_string(arg, "id requires a string")?;
    let found = if hex.len() == NodeId::HEX_LEN {
        NodeId::try_from_hex(hex)
            .ok()
            .and_then(|node| ev.repo.revision_for_node(&node).ok())
    } else {
        // ambiguous prefixes match nothing
        match HexPrefix::new(hex).map(|prefix| ev.repo.resolve_node_prefix(&prefix)) {
            Some(PrefixResolution::SingleMatch(rev)) => Some(rev),
            _ => None,
        }
    };
    let Some(rev) = found else {
        return Ok(smartset::empty());
    };
    let single: Revs<'a> = Box::new(BaseSet::single(rev));
    Ok(single.intersection(subset))
}

// Resolves the '\0'-separated symbols in order, dropping duplicates and
// revisions outside the subset.
fn ordered_list<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: &dyn smartset::SmartSet<'a>,
    text: &str,
) -> RevsetResult<Revs<'a>> {
    if text.is_empty() {
        return Ok(smartset::empty());
    }
    let mut revs = vec![];
    let mut seen = HashSet::new();
    for item in text.split('\0') {
        let rev = match ev.revision_number(item) {
            Some(rev) => rev,
            None => resolve_symbol(ev.repo, item)?,
        };
        if seen.insert(rev) && subset.contains(rev) {
            revs.push(rev);
        }
    }
    Ok(smartset::from_iter(revs))
}

fn phase_filter<'a>(ev: &RevsetEvaluator<'a>, subset: Revs<'a>, phases: &[Phase]) -> Revs<'a> {
    let repo = ev.repo;
    let phases = phases.to_vec();
    subset.filtered(move |rev| phases.contains(&repo.phase(rev)))
}

fn phase_and_ancestors<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let args = get_args(args, 2, Some(2), "_phaseandancestors requires two arguments")?;
    let phase_name = get_symbol(args[0])?;
    let minimal_phase = match phase_name {
        "_notpublic" | "draft" => Phase::Draft,
        "secret" => Phase::Secret,
        _ => {
            return Err(ParseError::invalid_arguments(format!(
                "'{phase_name}' is not a valid phasename"
            ))
            .into())
        }
    };
    let heads = ev.collect(args[1], Order::Define)?;
    let repo = ev.repo;
    let cut: Box<dyn Fn(Rev) -> bool + 'a> = Box::new(move |rev| repo.phase(rev) < minimal_phase);
    let mut revs: Revs<'a> =
        Box::new(dagop::revancestors(repo, heads, false, None, None, Some(cut)));
    if phase_name == "draft" {
        // secret changesets were walked through
        revs = revs.filtered(move |rev| repo.phase(rev) == Phase::Draft);
    }
    Ok(subset.intersection(revs))
}

fn name_pattern(node: &RevsetNode, message: &str) -> RevsetResult<StringPattern> {
    let text = get_string(node, message)?;
    StringPattern::parse(text).map_err(|err| {
        ParseError::with_location(
            ParseErrorKind::InvalidArguments(err.to_string()),
            node.location,
        )
        .into()
    })
}

fn named_revs(
    names: &BTreeMap<String, Rev>,
    pattern: &StringPattern,
    kind: &'static str,
) -> RevsetResult<HashSet<Rev>> {
    let revs: HashSet<Rev> = pattern
        .filter_btree_map(names)
        .map(|(_, &rev)| rev)
        .collect();
    if let Some(name) = pattern.as_literal() {
        if revs.is_empty() {
            return Err(LookupError::MissingName {
                kind,
                name: name.to_owned(),
            }
            .into());
        }
    }
    Ok(revs)
}

fn branch<'a>(
    ev: &RevsetEvaluator<'a>,
    subset: Revs<'a>,
    args: Option<&RevsetNode>,
    _order: Order,
) -> RevsetResult<Revs<'a>> {
    let arg = one_arg(args, "branch takes one argument")?;
    let repo = ev.repo;
    if let Some(text) = arg.as_string_like() {
        let pattern = name_pattern(arg, "branch requires a string")?;
        let Some(name) = pattern.as_literal().map(str::to_owned) else {
            return Ok(subset.filtered(move |rev| pattern.matches(repo.branch(rev))));
        };
        if ev.has_branch(&name) {
            return Ok(subset.filtered(move |rev| repo.branch(rev) == name));
        }
        // falls through to the revset case unless forced to be a name
        if text.starts_with("literal:") {
            return Err(LookupError::MissingName {
                kind: "branch",
                name,
            }
            .into());
        }
    }
    let revs = ev.eval_full(arg)?;
    let branches: HashSet<String> = revs
        .iter()
        .map(|rev| repo.branch(rev).to_owned())
        .collect();
    Ok(subset.filtered(move |rev| revs.contains(rev) || branches.contains(repo.branch(rev))))
}

/// Evaluates analyzed and optimized trees against a repository.
pub struct RevsetEvaluator<'a> {
    repo: &'a dyn Repo,
}

impl<'a> RevsetEvaluator<'a> {
    pub fn new(repo: &'a dyn Repo) -> Self {
        RevsetEvaluator { repo }
    }

    /// Set of all visible revisions.
    pub fn full_repo(&self) -> Revs<'a> {
        Box::new(FullRepoSet::new(
            self.repo.revision_count(),
            self.repo.hidden_revisions(),
        ))
    }

    fn eval_full(&self, node: &RevsetNode) -> RevsetResult<Revs<'a>> {
        self.get_set(self.full_repo(), node, Order::Define)
    }

    fn collect(&self, node: &RevsetNode, order: Order) -> RevsetResult<Vec<Rev>> {
        let revs = self.get_set(self.full_repo(), node, order)?;
        let collected = revs.iter().collect();
        Ok(collected)
    }

    fn visible_set(&self, revs: impl IntoIterator<Item = Rev>) -> Revs<'a> {
        let hidden = self.repo.hidden_revisions();
        let visible = revs
            .into_iter()
            .filter(|rev| !hidden.contains(rev))
            .collect();
        Box::new(BaseSet::from_set(visible))
    }

    // Plain revision number, without the negative and name forms.
    fn revision_number(&self, text: &str) -> Option<Rev> {
        let number: u32 = text.parse().ok()?;
        (number.to_string() == text && (number as usize) < self.repo.revision_count())
            .then_some(Rev(number))
    }

    fn has_branch(&self, name: &str) -> bool {
        let hidden = self.repo.hidden_revisions();
        (0..self.repo.revision_count() as u32)
            .map(Rev)
            .any(|rev| !hidden.contains(&rev) && self.repo.branch(rev) == name)
    }

    // Visible revisions without a visible child on the same branch.
    fn branch_heads(&self) -> Vec<Rev> {
        let hidden = self.repo.hidden_revisions();
        let count = self.repo.revision_count();
        let visible = || {
            (0..count as u32)
                .map(Rev)
                .filter(move |rev| !hidden.contains(rev))
        };
        let mut is_head = vec![true; count];
        for rev in visible() {
            let branch = self.repo.branch(rev);
            for parent in self.repo.parents(rev) {
                if self.repo.branch(parent) == branch {
                    is_head[parent.index()] = false;
                }
            }
        }
        visible().filter(|rev| is_head[rev.index()]).collect()
    }

    fn children_of(&self, rev: Rev) -> Vec<Rev> {
        let hidden = self.repo.hidden_revisions();
        (rev.0 + 1..self.repo.revision_count() as u32)
            .map(Rev)
            .filter(|child| !hidden.contains(child))
            .filter(|&child| self.repo.parents(child).contains(&rev))
            .collect()
    }

    /// Evaluates `node` within `subset`.
    pub fn get_set(
        &self,
        subset: Revs<'a>,
        node: &RevsetNode,
        order: Order,
    ) -> RevsetResult<Revs<'a>> {
        let (op, args) = match &node.kind {
            ExpressionKind::Symbol(name) | ExpressionKind::String(name) => {
                let rev = resolve_symbol(self.repo, name)?;
                return Ok(single_if_contained(subset, Some(rev)));
            }
            ExpressionKind::AliasArg(_) => return Err(internal_error(node)),
            ExpressionKind::Operation(op, args) => (*op, args.as_slice()),
        };
        match (op, args) {
            (RevsetOp::Range, [x, y]) => self.range_set(subset, Some(x), Some(y), order),
            (RevsetOp::RangePre, [y]) => self.range_set(subset, None, Some(y), order),
            (RevsetOp::RangePost, [x]) => self.range_set(subset, Some(x), None, order),
            (RevsetOp::RangeAll, []) => self.range_set(subset, None, None, order),
            (RevsetOp::DagRange, [x, y]) => {
                let roots = self.collect(x, Order::Define)?;
                let heads = self.collect(y, Order::Define)?;
                let reachable = dagop::reachable_roots(self.repo, &roots, &heads, true);
                Ok(subset.intersection(Box::new(reachable)))
            }
            (RevsetOp::And, [x, y]) => {
                let xs = self.get_set(subset, x, order)?;
                self.get_set(xs, y, follow_order(order))
            }
            (RevsetOp::AndSmally, [x, y]) => {
                // equivalent to 'and', but faster when y is small
                let ys = self.get_set(subset, y, follow_order(order))?;
                self.get_set(ys, x, order)
            }
            (RevsetOp::Difference, [x, y]) => {
                let xs = self.get_set(subset.clone(), x, order)?;
                let ys = self.get_set(subset, y, Order::Any)?;
                Ok(xs.difference(ys))
            }
            (RevsetOp::Or, [list]) => {
                let items = get_list(Some(list));
                if items.is_empty() {
                    return Ok(smartset::empty());
                }
                if order == Order::Follow {
                    // slow path to take the subset order
                    let union = self.or_items(self.full_repo(), &items, Order::Any)?;
                    return Ok(subset.intersection(union));
                }
                self.or_items(subset, &items, order)
            }
            (RevsetOp::Not, [x]) => {
                let xs = self.get_set(subset.clone(), x, Order::Any)?;
                Ok(subset.difference(xs))
            }
            (RevsetOp::Relation, [x, rel]) => self.relation_set(subset, x, rel, None),
            (RevsetOp::RelSubscript, [x, rel, z]) => self.relation_set(subset, x, rel, Some(z)),
            (RevsetOp::Subscript, _) => {
                Err(expression_error("can't use a subscript in this context", node.location).into())
            }
            (RevsetOp::List, _) => Err(expression_error(
                "can't use a list in this context",
                node.location,
            )
            .with_hint("use 'x or y' to combine sets")
            .into()),
            (RevsetOp::KeyValue, _) => Err(expression_error(
                "can't use a key-value pair in this context",
                node.location,
            )
            .into()),
            (RevsetOp::Func, [name, rest @ ..]) => {
                let func_name = get_symbol(name)?;
                let Some(func) = BUILTIN_FUNCTION_MAP.get(func_name) else {
                    return Err(RevsetError::UnknownIdentifier {
                        name: func_name.to_owned(),
                        candidates: collect_similar(
                            func_name,
                            BUILTIN_FUNCTION_MAP
                                .keys()
                                .filter(|name| !name.starts_with('_')),
                        ),
                    });
                };
                func(self, subset, rest.first(), order)
            }
            (RevsetOp::ParentPost, [x]) => first_parent(self, subset, x),
            (RevsetOp::Parent, [x, n]) => self.parent_spec(subset, x, n),
            (RevsetOp::Ancestor, [x, n]) => self.ancestor_spec(subset, x, n),
            _ => Err(internal_error(node)),
        }
    }

    fn range_set(
        &self,
        subset: Revs<'a>,
        first: Option<&RevsetNode>,
        last: Option<&RevsetNode>,
        order: Order,
    ) -> RevsetResult<Revs<'a>> {
        let Some(tip) = self.repo.revision_count().checked_sub(1) else {
            return Ok(smartset::empty());
        };
        let start = match first {
            Some(node) => self.eval_full(node)?.first(),
            None => Some(Rev(0)),
        };
        let end = match last {
            Some(node) => self.eval_full(node)?.last(),
            None => Some(Rev(tip as u32)),
        };
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(smartset::empty());
        };
        let range: Revs<'a> = if start == end {
            Box::new(BaseSet::single(start))
        } else {
            Box::new(SpanSet::between(start, end, self.repo.hidden_revisions()))
        };
        if order == Order::Define {
            Ok(range.intersection(subset))
        } else {
            Ok(subset.intersection(range))
        }
    }

    fn or_items(
        &self,
        subset: Revs<'a>,
        items: &[&RevsetNode],
        order: Order,
    ) -> RevsetResult<Revs<'a>> {
        match items {
            [] => Ok(smartset::empty()),
            [item] => self.get_set(subset, item, order),
            _ => {
                let (left, right) = items.split_at(items.len() / 2);
                let a = self.or_items(subset.clone(), left, order)?;
                let b = self.or_items(subset, right, order)?;
                Ok(a.union(b))
            }
        }
    }

    fn relation_set(
        &self,
        subset: Revs<'a>,
        x: &RevsetNode,
        rel: &RevsetNode,
        subscript: Option<&RevsetNode>,
    ) -> RevsetResult<Revs<'a>> {
        let name = get_symbol(rel)?;
        match name {
            "g" | "generations" => self.generations_set(subset, x, subscript),
            _ => Err(RevsetError::UnknownIdentifier {
                name: name.to_owned(),
                candidates: collect_similar(name, ["generations"]),
            }),
        }
    }

    fn generations_set(
        &self,
        subset: Revs<'a>,
        x: &RevsetNode,
        subscript: Option<&RevsetNode>,
    ) -> RevsetResult<Revs<'a>> {
        let max_depth = i64::from(MAX_LOG_DEPTH) - 1;
        let (a, b) = match subscript {
            Some(node) => get_int_range(
                Some(node),
                "relation subscript must be an integer or a range",
                "relation subscript bounds must be integers",
                Some(-max_depth),
                Some(max_depth),
            )?,
            None => (-max_depth, max_depth),
        };
        let (ancestor_depths, descendant_depths) = split_range(a, b);
        if ancestor_depths.is_none() && descendant_depths.is_none() {
            return Ok(smartset::empty());
        }
        let revs = self.collect(x, Order::Define)?;
        if revs.is_empty() {
            return Ok(smartset::empty());
        }
        let ancestors = ancestor_depths.map(|(start, stop)| -> Revs<'a> {
            Box::new(dagop::revancestors(
                self.repo,
                revs.clone(),
                false,
                Some(start),
                Some(stop),
                None,
            ))
        });
        let descendants = descendant_depths.map(|(start, stop)| -> Revs<'a> {
            Box::new(dagop::revdescendants(
                self.repo,
                revs.clone(),
                false,
                Some(start),
                Some(stop),
            ))
        });
        let generations = match (ancestors, descendants) {
            (Some(ancestors), Some(descendants)) => ancestors.union(descendants),
            (Some(set), None) | (None, Some(set)) => set,
            (None, None) => smartset::empty(),
        };
        Ok(subset.intersection(generations))
    }

    fn parent_spec(&self, subset: Revs<'a>, x: &RevsetNode, n: &RevsetNode) -> RevsetResult<Revs<'a>> {
        let n = n
            .as_string_like()
            .and_then(|s| s.parse::<u8>().ok())
            .filter(|n| *n <= 2)
            .ok_or_else(|| expression_error("^ expects a number 0, 1, or 2", n.location))?;
        let mut parents = HashSet::new();
        for rev in self.collect(x, Order::Define)? {
            let (p1, p2) = self.repo.parent_revisions(rev);
            match n {
                0 => {
                    parents.insert(rev);
                }
                1 => parents.extend(p1),
                _ => parents.extend(p2),
            }
        }
        Ok(subset.intersection(Box::new(BaseSet::from_set(parents))))
    }

    fn ancestor_spec(
        &self,
        subset: Revs<'a>,
        x: &RevsetNode,
        n: &RevsetNode,
    ) -> RevsetResult<Revs<'a>> {
        let n: i64 = n
            .as_string_like()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| expression_error("~ expects a number", n.location))?;
        if n < 0 {
            return self.children_spec(subset, x, n.unsigned_abs());
        }
        let mut found = HashSet::new();
        for rev in self.collect(x, Order::Define)? {
            let mut current = Some(rev);
            for _ in 0..n {
                match current {
                    Some(rev) => current = self.repo.parent_revisions(rev).0,
                    None => break,
                }
            }
            found.extend(current);
        }
        Ok(subset.intersection(Box::new(BaseSet::from_set(found))))
    }

    // Nth child of each revision, which must be unique along the way.
    fn children_spec(&self, subset: Revs<'a>, x: &RevsetNode, n: u64) -> RevsetResult<Revs<'a>> {
        let mut found = HashSet::new();
        'revs: for rev in self.collect(x, Order::Define)? {
            let mut current = rev;
            for _ in 0..n {
                match self.children_of(current)[..] {
                    [] => continue 'revs,
                    [child] => current = child,
                    _ => return Err(LookupError::AmbiguousChild.into()),
                }
            }
            found.insert(current);
        }
        Ok(subset.intersection(Box::new(BaseSet::from_set(found))))
    }
}

// Splits the generations range a..=b at 0 into (start, stop) depths of the
// ancestors and descendants walks.
fn split_range(a: i64, b: i64) -> (Option<(u32, u32)>, Option<(u32, u32)>) {
    let mut ancestors = None;
    let mut descendants = None;
    if a == 0 && b == 0 {
        ancestors = Some((0, 1));
    }
    if a < 0 {
        ancestors = Some((to_depth(-b.min(0)), to_depth(1 - a)));
    }
    if b > 0 {
        descendants = Some((to_depth(a.max(0)), to_depth(b + 1)));
    }
    (ancestors, descendants)
}

/// Revset ready for evaluation.
#[derive(Clone, Debug)]
pub struct CompiledRevset {
    tree: Option<RevsetNode>,
}

impl CompiledRevset {
    /// Optimized tree, or `None` if no specs were given.
    pub fn tree(&self) -> Option<&RevsetNode> {
        self.tree.as_ref()
    }

    /// Evaluates against all visible revisions in the order the expression
    /// defines.
    pub fn evaluate<'a>(&self, repo: &'a dyn Repo) -> RevsetResult<Revs<'a>> {
        let evaluator = RevsetEvaluator::new(repo);
        self.evaluate_in(&evaluator, evaluator.full_repo(), Order::Define)
    }

    /// Evaluates within the `subset`. `Order::Follow` keeps the order of the
    /// subset.
    pub fn evaluate_in<'a>(
        &self,
        evaluator: &RevsetEvaluator<'a>,
        subset: Revs<'a>,
        order: Order,
    ) -> RevsetResult<Revs<'a>> {
        match &self.tree {
            Some(tree) => evaluator.get_set(subset, tree, order),
            None => Ok(smartset::empty()),
        }
    }
}

/// Parses, expands, and optimizes the union of `specs`.
///
/// Warnings about unreferenced broken aliases are added to `diagnostics`.
#[instrument(skip_all)]
pub fn compile(
    repo: &dyn Repo,
    specs: &[impl AsRef<str>],
    settings: &QuerySettings,
    diagnostics: &mut Diagnostics,
) -> RevsetResult<CompiledRevset> {
    if specs.is_empty() {
        return Ok(CompiledRevset { tree: None });
    }
    if specs.iter().any(|spec| spec.as_ref().is_empty()) {
        return Err(ParseError::without_location(ParseErrorKind::EmptyQuery).into());
    }
    let lookup_fn = |name: &str| resolve_symbol(repo, name).is_ok();
    let lookup: Option<LookupFn<'_>> = if settings.old_style_lookup() {
        Some(&lookup_fn)
    } else {
        None
    };
    let mut trees: Vec<RevsetNode> = specs
        .iter()
        .map(|spec| revset_parser::parse_with_lookup(spec.as_ref(), lookup))
        .try_collect()?;
    let tree = if trees.len() == 1 {
        trees.remove(0)
    } else {
        let list = RevsetNode::operation(RevsetOp::List, trees, 0);
        RevsetNode::operation(RevsetOp::Or, vec![list], 0)
    };
    tracing::debug!("parsed revset:\n{}", pretty_format(&tree));
    let aliases = revset_parser::build_aliases_map(
        settings
            .revset_aliases()
            .iter()
            .map(|(decl, defn)| (decl, defn)),
    );
    let tree = revset_parser::expand_aliases(&tree, &aliases, diagnostics)?;
    let tree = revset_parser::fold_concat(&tree)?;
    let tree = analyze(&tree)?;
    tracing::debug!("analyzed revset:\n{}", pretty_format(&tree));
    let tree = optimize(&tree)?;
    tracing::debug!("optimized revset:\n{}", pretty_format(&tree));
    Ok(CompiledRevset { tree: Some(tree) })
}

/// Evaluates the union of `specs`. No specs select nothing.
pub fn match_any<'a>(
    repo: &'a dyn Repo,
    specs: &[impl AsRef<str>],
    settings: &QuerySettings,
) -> RevsetResult<Revs<'a>> {
    match_any_with_diagnostics(repo, specs, settings, &mut Diagnostics::new())
}

/// Like [`match_any()`], but also returns alias warnings.
pub fn match_any_with_diagnostics<'a>(
    repo: &'a dyn Repo,
    specs: &[impl AsRef<str>],
    settings: &QuerySettings,
    diagnostics: &mut Diagnostics,
) -> RevsetResult<Revs<'a>> {
    compile(repo, specs, settings, diagnostics)?.evaluate(repo)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn analyze_format(text: &str) -> String {
        let tree = revset_parser::parse(text).unwrap();
        pretty_format(&analyze(&tree).unwrap())
    }

    fn optimize_format(text: &str) -> String {
        let tree = revset_parser::parse(text).unwrap();
        pretty_format(&optimize(&analyze(&tree).unwrap()).unwrap())
    }

    #[test]
    fn test_analyze_desugars() {
        insta::assert_snapshot!(analyze_format("a - b"), @r###"
        (and
          (symbol 'a')
          (not
            (symbol 'b')))
        "###);
        insta::assert_snapshot!(analyze_format("::x"), @r###"
        (func
          (symbol 'ancestors')
          (symbol 'x'))
        "###);
        insta::assert_snapshot!(analyze_format("x::"), @r###"
        (func
          (symbol 'descendants')
          (symbol 'x'))
        "###);
        insta::assert_snapshot!(analyze_format("a % b"), @r###"
        (func
          (symbol 'only')
          (list
            (symbol 'a')
            (symbol 'b')))
        "###);
        insta::assert_snapshot!(analyze_format("(-1)"), @"(string '-1')");
    }

    #[test]
    fn test_analyze_errors() {
        let analyze_err = |text: &str| analyze(&revset_parser::parse(text).unwrap()).unwrap_err();
        assert_matches!(
            analyze_err("::"),
            RevsetError::Parse(err) if err.to_string() == "can't use '::' in this context"
        );
        assert_matches!(
            analyze_err("-f()"),
            RevsetError::Parse(err) if err.to_string() == "can't negate that"
        );
        assert_matches!(
            analyze_err("()"),
            RevsetError::Parse(err) if *err.kind() == ParseErrorKind::MissingArgument
        );
    }

    #[test]
    fn test_optimize_and() {
        // the cheaper operand goes first
        insta::assert_snapshot!(optimize_format("all() and x"), @r###"
        (andsmally
          (func
            (symbol 'all'))
          (symbol 'x'))
        "###);
        insta::assert_snapshot!(optimize_format("x and all()"), @r###"
        (and
          (symbol 'x')
          (func
            (symbol 'all')))
        "###);
        insta::assert_snapshot!(optimize_format("x - y"), @r###"
        (difference
          (symbol 'x')
          (symbol 'y'))
        "###);
    }

    #[test]
    fn test_optimize_fast_paths() {
        insta::assert_snapshot!(optimize_format("::a and not ::b"), @r###"
        (func
          (symbol 'only')
          (list
            (symbol 'a')
            (symbol 'b')))
        "###);
        insta::assert_snapshot!(optimize_format("not ::b and ::a"), @r###"
        (func
          (symbol 'only')
          (list
            (symbol 'a')
            (symbol 'b')))
        "###);
        insta::assert_snapshot!(optimize_format("draft() and ::x"), @r###"
        (func
          (symbol '_phaseandancestors')
          (list
            (symbol 'draft')
            (symbol 'x')))
        "###);
        insta::assert_snapshot!(optimize_format("not public()"), @r###"
        (func
          (symbol '_notpublic'))
        "###);
        insta::assert_snapshot!(optimize_format("heads(commonancestors(x))"), @r###"
        (func
          (symbol '_commonancestorheads')
          (symbol 'x'))
        "###);
        // depth-limited ancestors have no fast path
        insta::assert_snapshot!(optimize_format("::a and not ancestors(b, 2)"), @r###"
        (difference
          (func
            (symbol 'ancestors')
            (symbol 'a'))
          (func
            (symbol 'ancestors')
            (list
              (symbol 'b')
              (symbol '2'))))
        "###);
    }

    #[test]
    fn test_optimize_or_batches_symbols() {
        insta::assert_snapshot!(optimize_format("a + b + c() + d"), @r###"
        (or
          (list
            (func
              (symbol '_list')
              (string 'a\x00b'))
            (func
              (symbol 'c'))
            (symbol 'd')))
        "###);
        insta::assert_snapshot!(optimize_format("a + b"), @r###"
        (func
          (symbol '_list')
          (string 'a\x00b'))
        "###);
    }

    #[test]
    fn test_split_range() {
        let max = i64::from(MAX_LOG_DEPTH) - 1;
        assert_eq!(split_range(0, 0), (Some((0, 1)), None));
        assert_eq!(split_range(-2, 0), (Some((0, 3)), None));
        assert_eq!(split_range(-2, -1), (Some((1, 3)), None));
        assert_eq!(split_range(1, 3), (None, Some((1, 4))));
        assert_eq!(split_range(-1, 1), (Some((0, 2)), Some((0, 2))));
        assert_eq!(
            split_range(-max, max),
            (Some((0, MAX_LOG_DEPTH)), Some((0, MAX_LOG_DEPTH)))
        );
    }
}
