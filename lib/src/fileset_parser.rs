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

//! Parser for the fileset language.

#![allow(missing_docs)]

use once_cell::sync::Lazy;
use tracing::instrument;

use crate::dsl_util::{
    self, parse_tokens, simplify_infix_ops, AliasRules, AliasesMap, Diagnostics, Element,
    ExpressionKind, ExpressionNode, LexicalRules, OperatorKind, OperatorTable, ParseError,
    ParseErrorKind, PrimaryRule, TokenKind, Tokenizer,
};

/// Operator tags of the fileset language.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FilesetOp {
    Group,
    Func,
    KindPat,
    Negate,
    Minus,
    Not,
    And,
    Or,
    List,
}

impl OperatorKind for FilesetOp {
    fn name(self) -> &'static str {
        match self {
            FilesetOp::Group => "group",
            FilesetOp::Func => "func",
            FilesetOp::KindPat => "kindpat",
            FilesetOp::Negate => "negate",
            FilesetOp::Minus => "minus",
            FilesetOp::Not => "not",
            FilesetOp::And => "and",
            FilesetOp::Or => "or",
            FilesetOp::List => "list",
        }
    }

    fn is_function_call(self) -> bool {
        self == FilesetOp::Func
    }

    fn is_list(self) -> bool {
        self == FilesetOp::List
    }
}

pub type FilesetNode = ExpressionNode<FilesetOp>;
pub type FilesetAliasesMap = AliasesMap<FilesetOp>;

// Glob metacharacters are part of the symbol, so `*.c` needs no quoting.
fn is_initial_letter(c: char) -> bool {
    c.is_alphanumeric() || ".*{}[]?/\\_".contains(c) || !c.is_ascii()
}

fn is_alias_initial_letter(c: char) -> bool {
    is_initial_letter(c) || c == '$'
}

fn is_symbol_letter(c: char) -> bool {
    is_initial_letter(c) || c == '-'
}

const OPERATORS: &[&str] = &["(", ")", ":", "-", "!", "&", "|", "+", ","];
const KEYWORDS: &[&str] = &["and", "or", "not"];

static FILESET_RULES: LexicalRules = LexicalRules {
    long_operators: &[],
    operators: OPERATORS,
    keywords: KEYWORDS,
    is_initial_letter,
    is_symbol_letter,
    split_hyphens: false,
};

static FILESET_ALIAS_RULES: LexicalRules = LexicalRules {
    long_operators: &[],
    operators: OPERATORS,
    keywords: KEYWORDS,
    is_initial_letter: is_alias_initial_letter,
    is_symbol_letter,
    split_hyphens: false,
};

static FILESET_TABLE: Lazy<OperatorTable<FilesetOp>> = Lazy::new(|| {
    use FilesetOp as Op;
    use TokenKind::{Keyword, Operator};
    OperatorTable::new([
        (
            Operator("("),
            Element::new(20)
                .prefix(Op::Group, 1, Some(")"))
                .infix(Op::Func, 1, Some(")")),
        ),
        (Operator(":"), Element::new(15).infix(Op::KindPat, 15, None)),
        (
            Operator("-"),
            Element::new(5)
                .prefix(Op::Negate, 19, None)
                .infix(Op::Minus, 5, None),
        ),
        (Keyword("not"), Element::new(10).prefix(Op::Not, 10, None)),
        (Operator("!"), Element::new(10).prefix(Op::Not, 10, None)),
        (Keyword("and"), Element::new(5).infix(Op::And, 5, None)),
        (Operator("&"), Element::new(5).infix(Op::And, 5, None)),
        (Keyword("or"), Element::new(4).infix(Op::Or, 4, None)),
        (Operator("|"), Element::new(4).infix(Op::Or, 4, None)),
        (Operator("+"), Element::new(4).infix(Op::Or, 4, None)),
        (Operator(","), Element::new(2).infix(Op::List, 2, None)),
        (Operator(")"), Element::new(0)),
        (TokenKind::Symbol, Element::new(0).primary(PrimaryRule::Symbol)),
        (TokenKind::String, Element::new(0).primary(PrimaryRule::String)),
        (TokenKind::End, Element::new(0)),
    ])
});

/// Parses fileset expression. `or` and `list` chains are flattened.
pub fn parse(text: &str) -> Result<FilesetNode, ParseError> {
    parse_with_rules(text, &FILESET_RULES)
}

fn parse_with_rules(text: &str, rules: &LexicalRules) -> Result<FilesetNode, ParseError> {
    if text.is_empty() {
        return Err(ParseError::without_location(ParseErrorKind::EmptyQuery));
    }
    let tokens = Tokenizer::new(text, rules, None);
    let (tree, pos) = parse_tokens(&FILESET_TABLE, tokens)?;
    if pos != text.len() {
        return Err(ParseError::with_location(ParseErrorKind::InvalidToken, pos));
    }
    Ok(simplify_infix_ops(tree, &[FilesetOp::List, FilesetOp::Or]))
}

pub struct FilesetAliasRules;

impl AliasRules for FilesetAliasRules {
    type Op = FilesetOp;
    const SECTION: &'static str = "fileset alias";

    fn parse(text: &str) -> Result<FilesetNode, ParseError> {
        parse_with_rules(text, &FILESET_ALIAS_RULES)
    }
}

/// Builds aliases map from `(declaration, definition)` pairs.
pub fn build_aliases_map<I, D, V>(items: I) -> FilesetAliasesMap
where
    I: IntoIterator<Item = (D, V)>,
    D: AsRef<str>,
    V: AsRef<str>,
{
    FilesetAliasesMap::build::<FilesetAliasRules, _, _, _>(items)
}

/// Expands aliases in the tree, reporting unreferenced broken aliases to
/// `diagnostics`.
#[instrument(skip_all)]
pub fn expand_aliases(
    tree: &FilesetNode,
    aliases: &FilesetAliasesMap,
    diagnostics: &mut Diagnostics,
) -> Result<FilesetNode, ParseError> {
    let expanded = dsl_util::expand_aliases(aliases, tree)?;
    for message in aliases.take_unreported_errors() {
        tracing::warn!("{message}");
        diagnostics.add_warning(message);
    }
    Ok(expanded)
}

fn expression_error(message: &str, location: usize) -> ParseError {
    ParseError::with_location(ParseErrorKind::Expression(message.to_owned()), location)
}

/// Desugars `x - y` into `x and not y` and unwraps groups.
///
/// Negation has no meaning on files, so `-x` is rejected here.
pub fn analyze(node: &FilesetNode) -> Result<FilesetNode, ParseError> {
    let location = node.location;
    let (op, args) = match &node.kind {
        ExpressionKind::Symbol(_) | ExpressionKind::String(_) | ExpressionKind::AliasArg(_) => {
            return Ok(node.clone())
        }
        ExpressionKind::Operation(op, args) => (*op, args.as_slice()),
    };
    match (op, args) {
        (FilesetOp::Group, [x]) => analyze(x),
        (FilesetOp::Group, []) => Err(ParseError::with_location(
            ParseErrorKind::MissingArgument,
            location,
        )),
        (FilesetOp::Minus, [x, y]) => {
            let not_y = FilesetNode::operation(FilesetOp::Not, vec![y.clone()], location);
            analyze(&FilesetNode::operation(
                FilesetOp::And,
                vec![x.clone(), not_y],
                location,
            ))
        }
        (FilesetOp::Negate, _) => Err(expression_error(
            "can't use negate operator in this context",
            location,
        )),
        (FilesetOp::KindPat, [kind, value]) => {
            let kind_name = dsl_util::get_symbol(kind)?;
            if value.as_string_like().is_none() {
                return Err(ParseError::with_location(
                    ParseErrorKind::InvalidArguments("pattern must be a string".to_owned()),
                    value.location,
                ));
            }
            Ok(FilesetNode::operation(
                op,
                vec![FilesetNode::symbol(kind_name, kind.location), value.clone()],
                location,
            ))
        }
        (FilesetOp::Func, [name, rest @ ..]) => {
            let mut new_args = vec![name.clone()];
            for arg in rest {
                new_args.push(analyze(arg)?);
            }
            Ok(FilesetNode::operation(op, new_args, location))
        }
        (FilesetOp::Not | FilesetOp::And | FilesetOp::Or | FilesetOp::List, _) => {
            let args = args.iter().map(analyze).collect::<Result<_, _>>()?;
            Ok(FilesetNode::operation(op, args, location))
        }
        _ => Err(expression_error(
            &format!("invalid operator {}", op.name()),
            location,
        )),
    }
}
