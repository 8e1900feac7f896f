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

#![allow(missing_docs)]

use std::convert::Infallible;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::instrument;

use crate::dsl_util::{
    self, evaluate_tree, get_integer, parse_tokens, quote_string, simplify_infix_ops, AliasRules,
    AliasesMap, Diagnostics, Element, ExpressionKind, ExpressionNode, LexicalRules, LookupFn,
    OperatorKind, OperatorTable, ParseError, ParseErrorKind, PrimaryRule, TokenKind, Tokenizer,
    TreeEvaluator,
};
use crate::repo::{NodeId, Rev};

/// Operator tags of the revset language.
///
/// Some of them only exist between parsing and analysis (e.g. `Minus`), and
/// some are introduced by the optimizer (e.g. `AndSmally`).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RevsetOp {
    Group,
    Func,
    Subscript,
    Relation,
    Concat,
    Ancestor,
    Parent,
    ParentPost,
    Negate,
    Minus,
    DagRange,
    DagRangePre,
    DagRangePost,
    DagRangeAll,
    Range,
    RangePre,
    RangePost,
    RangeAll,
    Not,
    And,
    Only,
    OnlyPost,
    Or,
    KeyValue,
    List,
    RelSubscript,
    AndSmally,
    Difference,
}

impl OperatorKind for RevsetOp {
    fn name(self) -> &'static str {
        match self {
            RevsetOp::Group => "group",
            RevsetOp::Func => "func",
            RevsetOp::Subscript => "subscript",
            RevsetOp::Relation => "relation",
            RevsetOp::Concat => "_concat",
            RevsetOp::Ancestor => "ancestor",
            RevsetOp::Parent => "parent",
            RevsetOp::ParentPost => "parentpost",
            RevsetOp::Negate => "negate",
            RevsetOp::Minus => "minus",
            RevsetOp::DagRange => "dagrange",
            RevsetOp::DagRangePre => "dagrangepre",
            RevsetOp::DagRangePost => "dagrangepost",
            RevsetOp::DagRangeAll => "dagrangeall",
            RevsetOp::Range => "range",
            RevsetOp::RangePre => "rangepre",
            RevsetOp::RangePost => "rangepost",
            RevsetOp::RangeAll => "rangeall",
            RevsetOp::Not => "not",
            RevsetOp::And => "and",
            RevsetOp::Only => "only",
            RevsetOp::OnlyPost => "onlypost",
            RevsetOp::Or => "or",
            RevsetOp::KeyValue => "keyvalue",
            RevsetOp::List => "list",
            RevsetOp::RelSubscript => "relsubscript",
            RevsetOp::AndSmally => "andsmally",
            RevsetOp::Difference => "difference",
        }
    }

    fn is_function_call(self) -> bool {
        self == RevsetOp::Func
    }

    fn is_list(self) -> bool {
        self == RevsetOp::List
    }

    fn is_key_value(self) -> bool {
        self == RevsetOp::KeyValue
    }
}

pub type RevsetNode = ExpressionNode<RevsetOp>;
pub type RevsetAliasesMap = AliasesMap<RevsetOp>;

fn is_initial_letter(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '_' | '@') || !c.is_ascii()
}

fn is_alias_initial_letter(c: char) -> bool {
    is_initial_letter(c) || c == '$'
}

fn is_symbol_letter(c: char) -> bool {
    is_initial_letter(c) || matches!(c, '-' | '/')
}

const LONG_OPERATORS: &[&str] = &["::", "..", "##"];
const OPERATORS: &[&str] = &[
    "(", ")", "[", "]", "#", ":", "=", ",", "-", "|", "&", "+", "!", "~", "^", "%",
];
const KEYWORDS: &[&str] = &["and", "or", "not"];

static REVSET_RULES: LexicalRules = LexicalRules {
    long_operators: LONG_OPERATORS,
    operators: OPERATORS,
    keywords: KEYWORDS,
    is_initial_letter,
    is_symbol_letter,
    split_hyphens: true,
};

// `$` may start a parameter name in alias declarations and definitions.
static REVSET_ALIAS_RULES: LexicalRules = LexicalRules {
    long_operators: LONG_OPERATORS,
    operators: OPERATORS,
    keywords: KEYWORDS,
    is_initial_letter: is_alias_initial_letter,
    is_symbol_letter,
    split_hyphens: true,
};

static REVSET_TABLE: Lazy<OperatorTable<RevsetOp>> = Lazy::new(|| {
    use RevsetOp as Op;
    use TokenKind::{Keyword, Operator};
    let dag_range = || {
        Element::new(17)
            .primary(PrimaryRule::Operation(Op::DagRangeAll))
            .prefix(Op::DagRangePre, 17, None)
            .infix(Op::DagRange, 17, None)
            .suffix(Op::DagRangePost)
    };
    OperatorTable::new([
        (
            Operator("("),
            Element::new(21)
                .prefix(Op::Group, 1, Some(")"))
                .infix(Op::Func, 1, Some(")")),
        ),
        (
            Operator("["),
            Element::new(21).infix(Op::Subscript, 1, Some("]")),
        ),
        (Operator("#"), Element::new(21).infix(Op::Relation, 21, None)),
        (Operator("##"), Element::new(20).infix(Op::Concat, 20, None)),
        (Operator("~"), Element::new(18).infix(Op::Ancestor, 18, None)),
        (
            Operator("^"),
            Element::new(18)
                .infix(Op::Parent, 18, None)
                .suffix(Op::ParentPost),
        ),
        (
            Operator("-"),
            Element::new(5)
                .prefix(Op::Negate, 19, None)
                .infix(Op::Minus, 5, None),
        ),
        (Operator("::"), dag_range()),
        // old-style alias of "::"
        (Operator(".."), dag_range()),
        (
            Operator(":"),
            Element::new(15)
                .primary(PrimaryRule::Operation(Op::RangeAll))
                .prefix(Op::RangePre, 15, None)
                .infix(Op::Range, 15, None)
                .suffix(Op::RangePost),
        ),
        (Keyword("not"), Element::new(10).prefix(Op::Not, 10, None)),
        (Operator("!"), Element::new(10).prefix(Op::Not, 10, None)),
        (Keyword("and"), Element::new(5).infix(Op::And, 5, None)),
        (Operator("&"), Element::new(5).infix(Op::And, 5, None)),
        (
            Operator("%"),
            Element::new(5).infix(Op::Only, 5, None).suffix(Op::OnlyPost),
        ),
        (Keyword("or"), Element::new(4).infix(Op::Or, 4, None)),
        (Operator("|"), Element::new(4).infix(Op::Or, 4, None)),
        (Operator("+"), Element::new(4).infix(Op::Or, 4, None)),
        (Operator("="), Element::new(3).infix(Op::KeyValue, 3, None)),
        (Operator(","), Element::new(2).infix(Op::List, 2, None)),
        (Operator(")"), Element::new(0)),
        (Operator("]"), Element::new(0)),
        (TokenKind::Symbol, Element::new(0).primary(PrimaryRule::Symbol)),
        (TokenKind::String, Element::new(0).primary(PrimaryRule::String)),
        (TokenKind::End, Element::new(0)),
    ])
});

/// Parses revset expression without resolving names.
pub fn parse(text: &str) -> Result<RevsetNode, ParseError> {
    parse_with_rules(text, &REVSET_RULES, None)
}

/// Parses revset expression.
///
/// If `lookup` is given, a hyphenated symbol known to the host is kept as one
/// name instead of being split into subtraction, and `name:name` of known
/// names is parsed as a range no matter what characters they contain. The
/// `revset(...)` wrapper turns the lookup off.
pub fn parse_with_lookup(text: &str, lookup: Option<LookupFn<'_>>) -> Result<RevsetNode, ParseError> {
    parse_with_rules(text, &REVSET_RULES, lookup)
}

fn parse_with_rules(
    text: &str,
    rules: &LexicalRules,
    lookup: Option<LookupFn<'_>>,
) -> Result<RevsetNode, ParseError> {
    if text.is_empty() {
        return Err(ParseError::without_location(ParseErrorKind::EmptyQuery));
    }
    let lookup = lookup.filter(|_| !(text.starts_with("revset(") && text.ends_with(')')));
    let tokens = Tokenizer::new(text, rules, lookup);
    let (tree, pos) = parse_tokens(&REVSET_TABLE, tokens)?;
    if pos != text.len() {
        return Err(ParseError::with_location(ParseErrorKind::InvalidToken, pos));
    }
    let tree = simplify_infix_ops(tree, &[RevsetOp::List, RevsetOp::Or]);
    Ok(fixops(tree))
}

/// Rewrites shapes the precedence table alone parses wrongly.
///
/// - `x^:y` is `(x^):y`, not `x^(:y)`.
/// - `or` holds its operands in a single `list`.
/// - `x#rel[n]` becomes the ternary `relsubscript`.
fn fixops(node: RevsetNode) -> RevsetNode {
    let ExpressionNode { kind, location } = node;
    let (op, args) = match kind {
        ExpressionKind::Operation(op, args) => (op, args),
        kind => return ExpressionNode::new(kind, location),
    };
    let mut args: Vec<RevsetNode> = args.into_iter().map(fixops).collect();
    let head_op = |node: Option<&RevsetNode>| {
        node.and_then(|node| node.as_operation())
            .map(|(op, _)| op)
    };
    match op {
        RevsetOp::Parent => {
            let rewritten = match head_op(args.get(1)) {
                Some(RevsetOp::DagRangePre) => RevsetOp::DagRange,
                Some(RevsetOp::DagRangeAll) => RevsetOp::DagRangePost,
                Some(RevsetOp::RangePre) => RevsetOp::Range,
                Some(RevsetOp::RangeAll) => RevsetOp::RangePost,
                _ => return ExpressionNode::operation(op, args, location),
            };
            let rhs_args = args.pop().map(into_operands).unwrap_or_default();
            let post = ExpressionNode::operation(RevsetOp::ParentPost, args, location);
            let args = [post].into_iter().chain(rhs_args).collect();
            ExpressionNode::operation(rewritten, args, location)
        }
        RevsetOp::Or => {
            let list = ExpressionNode::operation(RevsetOp::List, args, location);
            ExpressionNode::operation(op, vec![list], location)
        }
        RevsetOp::Subscript if head_op(args.first()) == Some(RevsetOp::Relation) => {
            let mut items = into_operands(args.remove(0));
            items.extend(args);
            ExpressionNode::operation(RevsetOp::RelSubscript, items, location)
        }
        _ => ExpressionNode::operation(op, args, location),
    }
}

fn into_operands(node: RevsetNode) -> Vec<RevsetNode> {
    match node.kind {
        ExpressionKind::Operation(_, args) => args,
        _ => vec![],
    }
}

/// Folds `a ## b ## 'c'` into a single string.
pub fn fold_concat(node: &RevsetNode) -> Result<RevsetNode, ParseError> {
    let (op, args) = match &node.kind {
        ExpressionKind::Operation(op, args) => (*op, args),
        _ => return Ok(node.clone()),
    };
    if op != RevsetOp::Concat {
        let args = args.iter().map(fold_concat).collect::<Result<_, _>>()?;
        return Ok(ExpressionNode::operation(op, args, node.location));
    }
    let mut pending = vec![node];
    let mut folded = String::new();
    while let Some(item) = pending.pop() {
        match &item.kind {
            ExpressionKind::Operation(RevsetOp::Concat, items) => {
                pending.extend(items.iter().rev());
            }
            ExpressionKind::Symbol(value) | ExpressionKind::String(value) => {
                folded.push_str(value);
            }
            ExpressionKind::Operation(op, _) => {
                return Err(concat_error(op.name(), item.location));
            }
            ExpressionKind::AliasArg(_) => {
                return Err(concat_error("_aliasarg", item.location));
            }
        }
    }
    Ok(ExpressionNode::string(folded, node.location))
}

fn concat_error(element: &str, location: usize) -> ParseError {
    ParseError::with_location(
        ParseErrorKind::Expression(format!(r###""##" can't concatenate "{element}" element"###)),
        location,
    )
}

static HASH_LIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{1,40}$").unwrap());

struct HashLikeCollector;

impl TreeEvaluator<RevsetOp> for HashLikeCollector {
    type Output = Vec<String>;
    type Error = Infallible;

    fn leaf(&mut self, node: &RevsetNode) -> Result<Vec<String>, Infallible> {
        Ok(node
            .as_symbol()
            .filter(|name| HASH_LIKE_RE.is_match(name))
            .map(|name| vec![name.to_owned()])
            .unwrap_or_default())
    }

    fn apply(
        &mut self,
        _op: RevsetOp,
        args: Vec<Vec<String>>,
        _location: usize,
    ) -> Result<Vec<String>, Infallible> {
        // Unary operators (e.g. a function call without arguments) can't
        // carry a node id.
        if args.len() < 2 {
            return Ok(vec![]);
        }
        Ok(args.concat())
    }
}

/// Returns the symbols in the tree that may be node id prefixes.
pub fn hash_like_symbols(tree: &RevsetNode) -> Vec<String> {
    match evaluate_tree(tree, &mut HashLikeCollector) {
        Ok(symbols) => symbols,
        Err(never) => match never {},
    }
}

/// Extracts `(first, last)` of an integer range such as `1`, `1:3`, `:3`,
/// `1:`, or `:`.
///
/// `err1` is reported if the node isn't a range, `err2` if an endpoint isn't
/// an integer. Omitted endpoints take the defaults, which must be given.
pub fn get_int_range(
    node: Option<&RevsetNode>,
    err1: &str,
    err2: &str,
    def_first: Option<i64>,
    def_last: Option<i64>,
) -> Result<(i64, i64), ParseError> {
    let Some(node) = node else {
        return Err(ParseError::invalid_arguments(err1));
    };
    if node.as_string_like().is_some() {
        let n = get_integer(node, err1)?;
        return Ok((n, n));
    }
    let (first, last) = match node.as_operation() {
        Some((RevsetOp::Range, [a, b])) => (Some(a), Some(b)),
        Some((RevsetOp::RangePre, [b])) => (None, Some(b)),
        Some((RevsetOp::RangePost, [a])) => (Some(a), None),
        Some((RevsetOp::RangeAll, [])) => (None, None),
        _ => {
            return Err(ParseError::with_location(
                ParseErrorKind::InvalidArguments(err1.to_owned()),
                node.location,
            ))
        }
    };
    let endpoint = |node: Option<&RevsetNode>, default: Option<i64>| match (node, default) {
        (Some(node), _) => get_integer(node, err2),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ParseError::invalid_arguments(err2)),
    };
    Ok((endpoint(first, def_first)?, endpoint(last, def_last)?))
}

/// Argument of [`format_spec()`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FormatArg {
    Int(i64),
    Str(String),
    Node(NodeId),
    List(Vec<FormatArg>),
}

impl From<i64> for FormatArg {
    fn from(value: i64) -> Self {
        FormatArg::Int(value)
    }
}

impl From<Rev> for FormatArg {
    fn from(rev: Rev) -> Self {
        FormatArg::Int(rev.0.into())
    }
}

impl From<&str> for FormatArg {
    fn from(value: &str) -> Self {
        FormatArg::Str(value.to_owned())
    }
}

impl From<String> for FormatArg {
    fn from(value: String) -> Self {
        FormatArg::Str(value)
    }
}

impl From<NodeId> for FormatArg {
    fn from(node: NodeId) -> Self {
        FormatArg::Node(node)
    }
}

impl<T: Into<FormatArg>> From<Vec<T>> for FormatArg {
    fn from(items: Vec<T>) -> Self {
        FormatArg::List(items.into_iter().map(Into::into).collect())
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum FormatSpecError {
    #[error("unexpected revspec format character {0}")]
    UnexpectedCharacter(char),
    #[error("incomplete revspec format character")]
    Incomplete,
    #[error("missing argument for revspec")]
    MissingArgument,
    #[error("too many revspec arguments specified")]
    TooManyArguments,
    #[error("invalid argument for revspec format character {0}")]
    ArgumentType(char),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Builds revset expression by quoting the given arguments.
///
/// - `%d` integer revision
/// - `%s` string, quoted
/// - `%r` revset expression, parenthesized after syntax check
/// - `%n` node id, as quoted hex
/// - `%b` branch name, quoted
/// - `%%` literal `%`
///
/// Prefixing the type with `l` (e.g. `%ld`) takes a list. Lists are expanded
/// to a single `_list(...)` lookup, or a balanced `or` tree for `%lr`.
pub fn format_spec(expr: &str, args: &[FormatArg]) -> Result<String, FormatSpecError> {
    let mut result = String::with_capacity(expr.len());
    let mut args = args.iter();
    let mut chars = expr.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }
        match chars.next().ok_or(FormatSpecError::Incomplete)? {
            '%' => result.push('%'),
            'l' => {
                let t = chars.next().ok_or(FormatSpecError::Incomplete)?;
                if !is_format_type(t) {
                    return Err(FormatSpecError::UnexpectedCharacter(t));
                }
                match args.next().ok_or(FormatSpecError::MissingArgument)? {
                    FormatArg::List(items) => result.push_str(&format_list(t, items)?),
                    _ => return Err(FormatSpecError::ArgumentType('l')),
                }
            }
            t if is_format_type(t) => {
                let arg = args.next().ok_or(FormatSpecError::MissingArgument)?;
                result.push_str(&format_arg(t, arg)?);
            }
            t => return Err(FormatSpecError::UnexpectedCharacter(t)),
        }
    }
    if args.next().is_some() {
        return Err(FormatSpecError::TooManyArguments);
    }
    Ok(result)
}

fn is_format_type(t: char) -> bool {
    matches!(t, 'd' | 's' | 'r' | 'n' | 'b')
}

fn format_arg(t: char, arg: &FormatArg) -> Result<String, FormatSpecError> {
    match (t, arg) {
        ('d', FormatArg::Int(n)) => Ok(n.to_string()),
        ('s' | 'b', FormatArg::Str(s)) => Ok(quote_string(s)),
        ('n', FormatArg::Node(node)) => Ok(quote_string(&node.hex())),
        ('r', FormatArg::Str(s)) => {
            parse(s)?;
            Ok(format!("({s})"))
        }
        _ => Err(FormatSpecError::ArgumentType(t)),
    }
}

fn format_list(t: char, items: &[FormatArg]) -> Result<String, FormatSpecError> {
    match items {
        [] => Ok("_list('')".to_owned()),
        [item] => format_arg(t, item),
        _ if t == 'r' => {
            let (left, right) = items.split_at(items.len() / 2);
            Ok(format!(
                "({} or {})",
                format_list(t, left)?,
                format_list(t, right)?
            ))
        }
        _ => {
            let values: Vec<String> = items
                .iter()
                .map(|item| match (t, item) {
                    ('d', FormatArg::Int(n)) => Ok(n.to_string()),
                    ('s' | 'b', FormatArg::Str(s)) => Ok(s.clone()),
                    ('n', FormatArg::Node(node)) => Ok(node.hex()),
                    _ => Err(FormatSpecError::ArgumentType(t)),
                })
                .collect::<Result<_, _>>()?;
            Ok(format!("_list({})", quote_string(&values.join("\0"))))
        }
    }
}

pub struct RevsetAliasRules;

impl AliasRules for RevsetAliasRules {
    type Op = RevsetOp;
    const SECTION: &'static str = "revset alias";

    fn parse(text: &str) -> Result<RevsetNode, ParseError> {
        parse_with_rules(text, &REVSET_ALIAS_RULES, None)
    }
}

/// Builds aliases map from `(declaration, definition)` pairs.
pub fn build_aliases_map<I, D, V>(items: I) -> RevsetAliasesMap
where
    I: IntoIterator<Item = (D, V)>,
    D: AsRef<str>,
    V: AsRef<str>,
{
    RevsetAliasesMap::build::<RevsetAliasRules, _, _, _>(items)
}

/// Expands aliases in the tree.
///
/// Malformed aliases that weren't referenced are reported to `diagnostics`
/// once.
#[instrument(skip_all)]
pub fn expand_aliases(
    tree: &RevsetNode,
    aliases: &RevsetAliasesMap,
    diagnostics: &mut Diagnostics,
) -> Result<RevsetNode, ParseError> {
    let expanded = dsl_util::expand_aliases(aliases, tree)?;
    for message in aliases.take_unreported_errors() {
        tracing::warn!("{message}");
        diagnostics.add_warning(message);
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::dsl_util::pretty_format;

    fn parse_format(text: &str) -> String {
        pretty_format(&parse(text).unwrap())
    }

    fn parse_err(text: &str) -> ParseErrorKind {
        parse(text).unwrap_err().kind().clone()
    }

    #[test]
    fn test_parse_ranges() {
        insta::assert_snapshot!(parse_format("x^:y"), @r###"
        (range
          (parentpost
            (symbol 'x'))
          (symbol 'y'))
        "###);
        insta::assert_snapshot!(parse_format("x^::"), @r###"
        (dagrangepost
          (parentpost
            (symbol 'x')))
        "###);
        insta::assert_snapshot!(parse_format("x^2::y"), @r###"
        (dagrange
          (parent
            (symbol 'x')
            (symbol '2'))
          (symbol 'y'))
        "###);
        insta::assert_snapshot!(parse_format("a..b"), @r###"
        (dagrange
          (symbol 'a')
          (symbol 'b'))
        "###);
        insta::assert_snapshot!(parse_format("::"), @"(dagrangeall)");
        insta::assert_snapshot!(parse_format(":tip"), @r###"
        (rangepre
          (symbol 'tip'))
        "###);
    }

    #[test]
    fn test_parse_or_list() {
        insta::assert_snapshot!(parse_format("a + b or c | d"), @r###"
        (or
          (list
            (symbol 'a')
            (symbol 'b')
            (symbol 'c')
            (symbol 'd')))
        "###);
        insta::assert_snapshot!(parse_format("limit(x, n=2)"), @r###"
        (func
          (symbol 'limit')
          (list
            (symbol 'x')
            (keyvalue
              (symbol 'n')
              (symbol '2'))))
        "###);
    }

    #[test]
    fn test_parse_relation_subscript() {
        insta::assert_snapshot!(parse_format("x#g[1:2]"), @r###"
        (relsubscript
          (symbol 'x')
          (symbol 'g')
          (range
            (symbol '1')
            (symbol '2')))
        "###);
        insta::assert_snapshot!(parse_format("x[0]"), @r###"
        (subscript
          (symbol 'x')
          (symbol '0'))
        "###);
    }

    #[test]
    fn test_parse_negate_and_only() {
        insta::assert_snapshot!(parse_format("-1 - x"), @r###"
        (minus
          (negate
            (symbol '1'))
          (symbol 'x'))
        "###);
        insta::assert_snapshot!(parse_format("a % b"), @r###"
        (only
          (symbol 'a')
          (symbol 'b'))
        "###);
        insta::assert_snapshot!(parse_format("a%"), @r###"
        (onlypost
          (symbol 'a'))
        "###);
        insta::assert_snapshot!(parse_format("x~2"), @r###"
        (ancestor
          (symbol 'x')
          (symbol '2'))
        "###);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_err(""), ParseErrorKind::EmptyQuery);
        assert_eq!(parse_err("a)"), ParseErrorKind::InvalidToken);
        assert_eq!(parse_err("a and"), ParseErrorKind::NotPrefix("end".to_owned()));
        assert_eq!(parse_err("'abc"), ParseErrorKind::UnterminatedString);
        assert_eq!(parse_err("a ? b"), ParseErrorKind::SyntaxError);
        let err = parse("x and )").unwrap_err();
        assert_eq!(err.location(), Some(6));
    }

    #[test]
    fn test_parse_with_lookup() {
        let lookup = |name: &str| name == "my-feature-3";
        assert_eq!(
            parse_with_lookup("my-feature-3", Some(&lookup)).unwrap(),
            RevsetNode::symbol("my-feature-3", 0)
        );
        insta::assert_snapshot!(pretty_format(&parse("my-feature-3").unwrap()), @r###"
        (minus
          (minus
            (symbol 'my')
            (symbol 'feature'))
          (symbol '3'))
        "###);
        // revset() turns the lookup off
        insta::assert_snapshot!(
            pretty_format(&parse_with_lookup("revset(my-feature-3)", Some(&lookup)).unwrap()),
            @r###"
        (func
          (symbol 'revset')
          (minus
            (minus
              (symbol 'my')
              (symbol 'feature'))
            (symbol '3')))
        "###);

        let lookup = |name: &str| matches!(name, "1.0-rc" | "x(y");
        insta::assert_snapshot!(
            pretty_format(&parse_with_lookup("1.0-rc:x(y", Some(&lookup)).unwrap()),
            @r###"
        (range
          (symbol '1.0-rc')
          (symbol 'x(y'))
        "###);
    }

    #[test]
    fn test_fold_concat() {
        let fold = |text: &str| fold_concat(&parse(text).unwrap());
        assert_eq!(
            fold("a ## 'b' ## c").unwrap(),
            RevsetNode::string("abc", 0)
        );
        assert_eq!(
            fold("f(x ## y)").unwrap(),
            parse("f('xy')").unwrap()
        );
        assert_eq!(
            fold("a ## f()").unwrap_err().to_string(),
            r###""##" can't concatenate "func" element"###
        );
    }

    #[test]
    fn test_hash_like_symbols() {
        let symbols = |text: &str| hash_like_symbols(&parse(text).unwrap());
        assert_eq!(symbols("3::abe3ff"), vec!["3", "abe3ff"]);
        assert_eq!(symbols("precursors(34)"), vec!["34"]);
        assert_eq!(symbols("abe3ffZ"), Vec::<String>::new());
        assert_eq!(symbols("not 12ab"), Vec::<String>::new());
        assert_eq!(symbols("a::b and cafe"), vec!["a", "b", "cafe"]);
    }

    #[test]
    fn test_get_int_range() {
        let range = |text: &str| {
            let tree = parse(text).unwrap();
            get_int_range(Some(&tree), "bad range", "bad number", Some(-5), Some(5))
        };
        assert_eq!(range("3").unwrap(), (3, 3));
        assert_eq!(range("1:2").unwrap(), (1, 2));
        assert_eq!(range(":2").unwrap(), (-5, 2));
        assert_eq!(range("1:").unwrap(), (1, 5));
        assert_eq!(range(":").unwrap(), (-5, 5));
        assert_eq!(range("a:2").unwrap_err().to_string(), "bad number");
        assert_eq!(range("f()").unwrap_err().to_string(), "bad range");

        let tree = parse("1:").unwrap();
        assert_matches!(
            get_int_range(Some(&tree), "bad range", "bad number", None, None),
            Err(err) if err.to_string() == "bad number"
        );
    }

    #[test]
    fn test_format_spec() {
        assert_eq!(
            format_spec("%d:: and not %d::", &[FormatArg::Int(10), Rev(20).into()]).unwrap(),
            "10:: and not 20::"
        );
        assert_eq!(
            format_spec("branch(%s)", &["it's".into()]).unwrap(),
            r"branch('it\'s')"
        );
        assert_eq!(format_spec("100%%", &[]).unwrap(), "100%");
        assert_eq!(
            format_spec("%ld", &[vec![1_i64, 2, 3].into()]).unwrap(),
            r"_list('1\x002\x003')"
        );
        assert_eq!(
            format_spec("%ls", &[Vec::<String>::new().into()]).unwrap(),
            "_list('')"
        );
        assert_eq!(format_spec("%ls", &[vec!["a"].into()]).unwrap(), "'a'");
        assert_eq!(
            format_spec("%lr", &[vec!["a", "b", "c"].into()]).unwrap(),
            "((a) or ((b) or (c)))"
        );
        let node = NodeId::from_bytes(&[0xab, 0xcd]);
        assert_eq!(format_spec("%n", &[node.into()]).unwrap(), "'abcd'");

        // the result parses back
        let spec = format_spec("%ls and %r", &[vec!["x", "y'"].into(), "a or b".into()]).unwrap();
        assert!(parse(&spec).is_ok());
    }

    #[test]
    fn test_format_spec_errors() {
        assert_eq!(format_spec("%", &[]), Err(FormatSpecError::Incomplete));
        assert_eq!(format_spec("%l", &[]), Err(FormatSpecError::Incomplete));
        assert_eq!(
            format_spec("%x", &[]),
            Err(FormatSpecError::UnexpectedCharacter('x'))
        );
        assert_eq!(
            format_spec("%d %d", &[FormatArg::Int(1)]),
            Err(FormatSpecError::MissingArgument)
        );
        assert_eq!(
            format_spec("%d", &[FormatArg::Int(1), FormatArg::Int(2)]),
            Err(FormatSpecError::TooManyArguments)
        );
        assert_eq!(
            format_spec("%d", &["x".into()]),
            Err(FormatSpecError::ArgumentType('d'))
        );
        assert_matches!(
            format_spec("%r", &["f(".into()]),
            Err(FormatSpecError::Parse(_))
        );
    }

    #[test]
    fn test_expand_aliases() {
        let aliases = build_aliases_map([
            ("foo($1, $2)", "$1 and not $2"),
            ("mine", "foo(draft(), public())"),
            ("bad", "$x"),
        ]);
        let mut diagnostics = Diagnostics::new();
        let expanded = expand_aliases(&parse("mine").unwrap(), &aliases, &mut diagnostics).unwrap();
        assert_eq!(expanded, parse("draft() and not public()").unwrap());
        assert_eq!(
            diagnostics.iter().collect::<Vec<_>>(),
            vec![r#"bad definition of revset alias "bad": at 0: invalid symbol '$x'"#]
        );

        // reported once per map
        let mut diagnostics = Diagnostics::new();
        expand_aliases(&parse("x").unwrap(), &aliases, &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty());

        let aliases = build_aliases_map([("a", "b"), ("b", "a")]);
        assert_matches!(
            expand_aliases(&parse("a").unwrap(), &aliases, &mut Diagnostics::new())
                .unwrap_err()
                .kind(),
            ParseErrorKind::InfiniteAliasExpansion { name, .. } if name == "a"
        );
    }
}
