// Copyright 2021 The Jujutsu Authors
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

use assert_matches::assert_matches;
use revquery_lib::dsl_util::{Diagnostics, ParseErrorKind};
use revquery_lib::repo::{LookupError, Phase, Rev};
use revquery_lib::revset::{match_any, match_any_with_diagnostics, RevsetError};
use revquery_lib::settings::QuerySettings;
use test_case::test_case;
use testutils::{rev_numbers, TestRepo};

//   4
//   |
//   3
//  / \
// 1   2
//  \ /
//   0
fn diamond() -> TestRepo {
    TestRepo::from_parents(&[&[], &[0], &[0], &[1, 2], &[3]])
}

fn eval_with(repo: &TestRepo, settings: &QuerySettings, spec: &str) -> Vec<u32> {
    let revs = match_any(repo, &[spec], settings).unwrap();
    rev_numbers(&revs)
}

fn eval(repo: &TestRepo, spec: &str) -> Vec<u32> {
    eval_with(repo, &QuerySettings::default(), spec)
}

fn eval_err(repo: &TestRepo, spec: &str) -> RevsetError {
    match match_any(repo, &[spec], &QuerySettings::default()) {
        Ok(revs) => panic!("unexpected success: {:?}", rev_numbers(&revs)),
        Err(err) => err,
    }
}

#[test_case("2", &[2]; "number")]
#[test_case("-1", &[4]; "negative number")]
#[test_case("tip", &[4]; "tip")]
#[test_case("2:4", &[2, 3, 4]; "range")]
#[test_case("3:1", &[3, 2, 1]; "descending range")]
#[test_case(":1", &[0, 1]; "range from root")]
#[test_case("3:", &[3, 4]; "range to tip")]
#[test_case(":", &[0, 1, 2, 3, 4]; "whole range")]
#[test_case("::2", &[0, 2]; "ancestors")]
#[test_case("1::", &[1, 3, 4]; "descendants")]
#[test_case("1::3", &[1, 3]; "dag range")]
#[test_case("0::4", &[0, 1, 2, 3, 4]; "dag range of everything")]
fn test_ranges_and_symbols(spec: &str, expected: &[u32]) {
    let repo = diamond();
    assert_eq!(eval(&repo, spec), expected);
}

#[test_case("3^", &[1]; "first parent")]
#[test_case("3^2", &[2]; "second parent")]
#[test_case("3^0", &[3]; "itself")]
#[test_case("4~2", &[1]; "first parent ancestor")]
#[test_case("1~-1", &[3]; "unique child")]
#[test_case("parents(3)", &[1, 2]; "parents")]
#[test_case("p1(3)", &[1]; "p1")]
#[test_case("p2(3)", &[2]; "p2")]
#[test_case("p2(4)", &[]; "no second parent")]
#[test_case("children(0)", &[1, 2]; "children")]
#[test_case("merge()", &[3]; "merge")]
#[test_case("heads(all())", &[4]; "heads")]
#[test_case("heads(0:2)", &[1, 2]; "heads of range")]
#[test_case("roots(1::)", &[1]; "roots")]
#[test_case("only(4, 1)", &[2, 3, 4]; "only")]
#[test_case("4 % 1", &[2, 3, 4]; "only operator")]
#[test_case("ancestor(1, 2)", &[0]; "ancestor")]
#[test_case("commonancestors(1 + 2)", &[0]; "common ancestors")]
#[test_case("heads(commonancestors(3 + 4))", &[3]; "common ancestor heads")]
#[test_case("ancestors(4, depth=1)", &[3, 4]; "ancestors with depth")]
#[test_case("ancestors(4, startdepth=2)", &[0, 1, 2]; "ancestors with start depth")]
#[test_case("ancestors(set=4)", &[0, 1, 2, 3, 4]; "ancestors by keyword")]
#[test_case("ancestors(set=4) and not ancestors(set=1)", &[2, 3, 4]; "only by keyword")]
#[test_case("ancestors(set=4) and not ancestors(1)", &[2, 3, 4]; "only by mixed keyword")]
#[test_case("ancestors(4) and not ancestors(1)", &[2, 3, 4]; "only by position")]
#[test_case("descendants(0, 1)", &[0, 1, 2]; "descendants with depth")]
#[test_case("3#g[-1]", &[1, 2]; "parent generation")]
#[test_case("1#generations[1]", &[3]; "child generation")]
fn test_graph_functions(spec: &str, expected: &[u32]) {
    let repo = diamond();
    assert_eq!(eval(&repo, spec), expected);
}

#[test]
fn test_ambiguous_child() {
    let repo = diamond();
    assert_matches!(
        eval_err(&repo, "0~-1"),
        RevsetError::Lookup(LookupError::AmbiguousChild)
    );
}

#[test_case("0:2 and not 1", &[0, 2]; "and not")]
#[test_case("0:2 - 1", &[0, 2]; "minus")]
#[test_case("not 0:2", &[3, 4]; "not")]
#[test_case("2 + 0 + 1", &[2, 0, 1]; "list keeps order")]
#[test_case("2 or 0 or 2", &[2, 0]; "list drops duplicates")]
#[test_case("0:1 or 4", &[0, 1, 4]; "union")]
#[test_case("0:4 & 2:1", &[1, 2]; "and follows left order")]
#[test_case("all() & 2:1", &[1, 2]; "and with cheap right side")]
#[test_case("none()", &[]; "none")]
fn test_set_operations(spec: &str, expected: &[u32]) {
    let repo = diamond();
    assert_eq!(eval(&repo, spec), expected);
}

#[test_case("limit(all(), 2)", &[0, 1]; "limit")]
#[test_case("limit(all(), 2, 1)", &[1, 2]; "limit with offset")]
#[test_case("first(4:0)", &[4]; "first")]
#[test_case("last(all(), 2)", &[3, 4]; "last")]
#[test_case("reverse(all())", &[4, 3, 2, 1, 0]; "reverse")]
#[test_case("sort(2 + 0 + 1)", &[0, 1, 2]; "sort by rev")]
#[test_case(r#"sort(all(), "-rev")"#, &[4, 3, 2, 1, 0]; "sort descending")]
#[test_case("min(1::)", &[1]; "min")]
#[test_case("max(::2)", &[2]; "max")]
#[test_case("rev(2)", &[2]; "rev")]
#[test_case("rev(10)", &[]; "rev out of range")]
fn test_selection_functions(spec: &str, expected: &[u32]) {
    let repo = diamond();
    assert_eq!(eval(&repo, spec), expected);
}

#[test]
fn test_selection_errors() {
    let repo = diamond();
    assert_matches!(
        eval_err(&repo, "limit(all(), -1)"),
        RevsetError::Parse(err) if err.to_string() == "negative number to select"
    );
    assert_matches!(
        eval_err(&repo, r#"sort(all(), "date")"#),
        RevsetError::Parse(err) if err.to_string() == "unknown sort key 'date'"
    );
    assert_matches!(
        eval_err(&repo, "limit(all(), x)"),
        RevsetError::Parse(err) if err.to_string() == "limit expects a number"
    );
}

#[test]
fn test_sort_by_branch() {
    let mut repo = diamond();
    repo.set_branch(Rev(2), "stable");
    assert_eq!(eval(&repo, r#"sort(all(), "branch -rev")"#), [4, 3, 1, 0, 2]);
}

#[test]
fn test_id() {
    let repo = diamond();
    let hex = repo.node_hex(Rev(2));
    assert_eq!(eval(&repo, &format!("id({hex})")), [2]);
    assert_eq!(eval(&repo, &hex), [2]);
    assert_eq!(eval(&repo, &format!("id({})", &hex[..12])), [2]);
    assert_eq!(eval(&repo, &format!("id({})", "0".repeat(40))), Vec::<u32>::new());
}

#[test]
fn test_phases() {
    let mut repo = diamond();
    repo.set_phase(Rev(0), Phase::Public);
    repo.set_phase(Rev(4), Phase::Secret);
    assert_eq!(eval(&repo, "public()"), [0]);
    assert_eq!(eval(&repo, "draft()"), [1, 2, 3]);
    assert_eq!(eval(&repo, "secret()"), [4]);
    assert_eq!(eval(&repo, "not public()"), [1, 2, 3, 4]);
    assert_eq!(eval(&repo, "draft() and ::4"), [1, 2, 3]);
    assert_eq!(eval(&repo, "draft() and ::1"), [1]);
    assert_eq!(eval(&repo, "draft() and ancestors(set=3)"), [1, 2, 3]);
    assert_eq!(eval(&repo, "secret() and ancestors(set=4, depth=1)"), [4]);
}

#[test]
fn test_names() {
    let mut repo = diamond();
    repo.add_tag("v1.0", Rev(1));
    repo.add_tag("v1.1", Rev(3));
    repo.add_tag("tip", Rev(4));
    repo.add_bookmark("feature", Rev(2));
    repo.set_branch(Rev(2), "stable");

    assert_eq!(eval(&repo, "v1.0"), [1]);
    assert_eq!(eval(&repo, "feature"), [2]);
    assert_eq!(eval(&repo, "stable"), [2]);
    assert_eq!(eval(&repo, "default"), [4]);

    assert_eq!(eval(&repo, "tag()"), [1, 3]);
    assert_eq!(eval(&repo, r#"tag("v1.1")"#), [3]);
    assert_eq!(eval(&repo, r#"tag("re:^v1")"#), [1, 3]);
    assert_eq!(eval(&repo, r#"tag("glob:v*.0")"#), [1]);
    assert_eq!(eval(&repo, "bookmark()"), [2]);
    assert_eq!(eval(&repo, "bookmark(feature)"), [2]);

    assert_eq!(eval(&repo, "branch(stable)"), [2]);
    assert_eq!(eval(&repo, r#"branch("re:^def")"#), [0, 1, 3, 4]);
    // a revision selects the branches it is on
    assert_eq!(eval(&repo, "branch(2)"), [2]);
    assert_eq!(eval(&repo, "branch(4)"), [0, 1, 3, 4]);

    assert_matches!(
        eval_err(&repo, r#"tag("v2")"#),
        RevsetError::Lookup(LookupError::MissingName { kind: "tag", name }) if name == "v2"
    );
    assert_matches!(
        eval_err(&repo, r#"branch("literal:nosuch")"#),
        RevsetError::Lookup(LookupError::MissingName { kind: "branch", .. })
    );
}

#[test]
fn test_head() {
    let mut repo = diamond();
    repo.set_branch(Rev(2), "stable");
    assert_eq!(eval(&repo, "head()"), [2, 4]);
}

#[test]
fn test_hidden_revisions() {
    let mut repo = diamond();
    repo.hide(Rev(4));
    assert_eq!(eval(&repo, "all()"), [0, 1, 2, 3]);
    assert_eq!(eval(&repo, "hidden()"), [4]);
    assert_eq!(eval(&repo, "tip"), [3]);
    assert_eq!(eval(&repo, "4"), Vec::<u32>::new());
    assert_eq!(eval(&repo, "rev(4)"), Vec::<u32>::new());
    assert_eq!(eval(&repo, "3:"), [3]);
}

#[test]
fn test_hyphenated_names() {
    let mut repo = diamond();
    repo.add_tag("release-1", Rev(2));
    repo.add_tag("release", Rev(3));

    assert_eq!(eval(&repo, "release-1"), [2]);
    // names that don't resolve are split at the hyphen
    assert_eq!(eval(&repo, "release-2"), [3]);
    // quoting or the revset() wrapper opts out of the lookup
    assert_eq!(eval(&repo, r#""release-1""#), [2]);
    assert_eq!(eval(&repo, "revset(release-1)"), [3]);

    let settings = QuerySettings::default().with_old_style_lookup(false);
    assert_eq!(eval_with(&repo, &settings, "release-1"), [3]);
}

#[test]
fn test_present() {
    let repo = diamond();
    assert_eq!(eval(&repo, "present(nosuch)"), Vec::<u32>::new());
    assert_eq!(eval(&repo, "present(nosuch) and 1"), Vec::<u32>::new());
    assert_eq!(eval(&repo, "present(nosuch) or 1"), [1]);
    assert_matches!(
        eval_err(&repo, "nosuch"),
        RevsetError::Lookup(LookupError::UnknownRevision(name)) if name == "nosuch"
    );
}

#[test]
fn test_multiple_specs() {
    let repo = diamond();
    let settings = QuerySettings::default();
    let revs = match_any(&repo, &["3", "0:1"], &settings).unwrap();
    assert_eq!(rev_numbers(&revs), [3, 0, 1]);

    let no_specs: [&str; 0] = [];
    let revs = match_any(&repo, &no_specs, &settings).unwrap();
    assert!(rev_numbers(&revs).is_empty());

    assert_matches!(
        match_any(&repo, &["0", ""], &settings),
        Err(RevsetError::Parse(err)) if *err.kind() == ParseErrorKind::EmptyQuery
    );
}

#[test]
fn test_aliases() {
    let repo = diamond();
    let settings = QuerySettings::default()
        .with_revset_alias("mine", "1 + 2")
        .with_revset_alias("up(x)", "children(x)")
        .with_revset_alias("rec", "rec")
        .with_revset_alias("ping", "pong")
        .with_revset_alias("pong", "ping")
        .with_revset_alias("f(x)", "f(x)");
    assert_eq!(eval_with(&repo, &settings, "mine"), [1, 2]);
    assert_eq!(eval_with(&repo, &settings, "up(0)"), [1, 2]);
    assert_eq!(eval_with(&repo, &settings, "up(mine)"), [3]);
    for (spec, expected_name) in [("rec", "rec"), ("ping", "ping"), ("f(0)", "f")] {
        assert_matches!(
            match_any(&repo, &[spec], &settings),
            Err(RevsetError::Parse(err)) if matches!(
                err.kind(),
                ParseErrorKind::InfiniteAliasExpansion { name, .. } if name == expected_name
            ),
            "{spec}"
        );
    }
}

#[test]
fn test_broken_alias_warning() {
    let repo = diamond();
    let settings = QuerySettings::default().with_revset_alias("bad", "(");
    let mut diagnostics = Diagnostics::new();
    let revs = match_any_with_diagnostics(&repo, &["0"], &settings, &mut diagnostics).unwrap();
    assert_eq!(rev_numbers(&revs), [0]);
    assert_eq!(diagnostics.len(), 1);
}

#[test]
fn test_errors() {
    let repo = diamond();
    assert_matches!(
        eval_err(&repo, "heds(all())"),
        RevsetError::UnknownIdentifier { name, candidates }
            if name == "heds" && candidates.contains(&"heads".to_owned())
    );
    assert_matches!(
        eval_err(&repo, "0 + (1"),
        RevsetError::Parse(_)
    );
    assert_matches!(
        eval_err(&repo, "all(1)"),
        RevsetError::Parse(err) if err.to_string() == "all takes no arguments"
    );
    assert_matches!(
        eval_err(&repo, "(0, 1)"),
        RevsetError::Parse(err) if err.hint() == Some("use 'x or y' to combine sets")
    );
    assert_matches!(
        eval_err(&repo, "3^3"),
        RevsetError::Parse(err) if err.to_string() == "^ expects a number 0, 1, or 2"
    );
}
