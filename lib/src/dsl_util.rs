// Copyright 2020-2024 The Jujutsu Authors
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

//! Domain-specific language helpers.
//!
//! The revset and fileset languages share one tokenizer, one operator
//! precedence parser, one expression tree shape, and one alias substitution
//! engine. Each language only supplies its lexical rules and operator table.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::mem;

use indexmap::IndexMap;
use itertools::Itertools as _;
use thiserror::Error;

/// Error occurred while tokenizing, parsing, or expanding an expression.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{kind}")]
pub struct ParseError {
    kind: ParseErrorKind,
    location: Option<usize>,
    hint: Option<String>,
}

/// Categories of [`ParseError`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParseErrorKind {
    /// Quoted string has no closing quote.
    #[error("unterminated string")]
    UnterminatedString,
    /// Character that cannot start any token.
    #[error("syntax error")]
    SyntaxError,
    /// Malformed backslash escape in a quoted string.
    #[error("{0}")]
    InvalidEscape(String),
    /// Token other than the expected closing token.
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    /// Token that cannot start an expression.
    #[error("not a prefix: {0}")]
    NotPrefix(String),
    /// Token that cannot continue an expression.
    #[error("not an infix: {0}")]
    NotInfix(String),
    /// Trailing input after a complete expression.
    #[error("invalid token")]
    InvalidToken,
    /// Empty input.
    #[error("empty query")]
    EmptyQuery,
    /// Operand is required but omitted, e.g. `()`.
    #[error("missing argument")]
    MissingArgument,
    /// Function arguments don't match the function signature.
    #[error("{0}")]
    InvalidArguments(String),
    /// Alias refers to itself directly or indirectly.
    #[error(r#"infinite expansion of {section} "{name}" detected"#)]
    InfiniteAliasExpansion {
        /// Configuration section the alias belongs to.
        section: &'static str,
        /// Alias name.
        name: String,
    },
    /// Function alias invoked with the wrong number of arguments.
    #[error("invalid number of arguments: {0}")]
    InvalidArgumentCount(usize),
    /// Malformed alias declaration or definition, reported at first use.
    #[error("{0}")]
    BadAlias(String),
    /// Expression can be parsed, but is not valid in the context.
    #[error("{0}")]
    Expression(String),
}

impl ParseError {
    /// Creates error pointing to the given byte offset.
    pub fn with_location(kind: ParseErrorKind, location: usize) -> Self {
        ParseError {
            kind,
            location: Some(location),
            hint: None,
        }
    }

    /// Creates error not associated with any particular input position.
    pub fn without_location(kind: ParseErrorKind) -> Self {
        ParseError {
            kind,
            location: None,
            hint: None,
        }
    }

    /// Creates semantic error with the given message.
    pub fn expression(message: impl Into<String>) -> Self {
        ParseError::without_location(ParseErrorKind::Expression(message.into()))
    }

    /// Creates function arguments error with the given message.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        ParseError::without_location(ParseErrorKind::InvalidArguments(message.into()))
    }

    /// Attaches hint message.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Category of this error.
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    /// Byte offset in the input text, if known.
    pub fn location(&self) -> Option<usize> {
        self.location
    }

    /// Hint message, if any.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Message prefixed by the location, e.g. `at 3: not a prefix: end`.
    pub fn detail(&self) -> String {
        match self.location {
            Some(location) => format!("at {location}: {}", self.kind),
            None => self.kind.to_string(),
        }
    }

    /// Renders the message followed by the input text and a caret pointing
    /// to the error location.
    ///
    /// Newlines in the `text` are replaced with spaces so the caret column
    /// matches the byte offset.
    pub fn with_caret(&self, text: &str) -> String {
        let mut rendered = self.detail();
        if let Some(location) = self.location {
            let line = text.replace(['\n', '\r'], " ");
            let column = line.get(..location).map_or(location, |s| s.chars().count());
            rendered.push('\n');
            rendered.push_str(&line);
            rendered.push('\n');
            rendered.push_str(&" ".repeat(column));
            rendered.push_str("^ here");
        }
        if let Some(hint) = &self.hint {
            rendered.push_str(&format!("\n({hint})"));
        }
        rendered
    }
}

/// Type of [`Token`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TokenKind {
    /// Operator or punctuation, e.g. `::` or `(`.
    Operator(&'static str),
    /// Word reserved as an operator, e.g. `and`.
    Keyword(&'static str),
    /// Bare identifier.
    Symbol,
    /// Quoted literal.
    String,
    /// End of input.
    End,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Operator(s) | TokenKind::Keyword(s) => f.write_str(s),
            TokenKind::Symbol => f.write_str("symbol"),
            TokenKind::String => f.write_str("string"),
            TokenKind::End => f.write_str("end"),
        }
    }
}

/// Lexical unit with its byte offset in the input text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    /// Token type.
    pub kind: TokenKind,
    /// Payload of symbol or string token.
    pub value: Option<String>,
    /// Byte offset.
    pub pos: usize,
}

impl Token {
    fn new(kind: TokenKind, value: Option<String>, pos: usize) -> Self {
        Token { kind, value, pos }
    }
}

/// Character classes and operators of a language.
#[derive(Clone, Copy, Debug)]
pub struct LexicalRules {
    /// Two-character operators, tested before single-character ones.
    pub long_operators: &'static [&'static str],
    /// Single-character operators.
    pub operators: &'static [&'static str],
    /// Words tokenized as operators rather than symbols.
    pub keywords: &'static [&'static str],
    /// Whether the character can start a symbol.
    pub is_initial_letter: fn(char) -> bool,
    /// Whether the character can continue a symbol.
    pub is_symbol_letter: fn(char) -> bool,
    /// Whether a hyphenated symbol unknown to the host is split into
    /// subtraction.
    pub split_hyphens: bool,
}

impl LexicalRules {
    fn splits_dot_dot(&self) -> bool {
        self.long_operators.contains(&"..")
    }
}

/// Callback telling whether the name is known to the host, e.g. an existing
/// tag name.
pub type LookupFn<'a> = &'a dyn Fn(&str) -> bool;

/// Single-pass lazy tokenizer.
pub struct Tokenizer<'t> {
    text: &'t str,
    rules: &'t LexicalRules,
    lookup: Option<LookupFn<'t>>,
    pos: usize,
    pending: VecDeque<Token>,
    finished: bool,
}

impl<'t> Tokenizer<'t> {
    /// Creates tokenizer of the `text`.
    ///
    /// If `lookup` is given, hyphenated symbols known to the host are kept as
    /// a single symbol, and the text is first tried as an old-style
    /// `name:name` range of known names.
    pub fn new(text: &'t str, rules: &'t LexicalRules, lookup: Option<LookupFn<'t>>) -> Self {
        let mut tokenizer = Tokenizer {
            text,
            rules,
            lookup,
            pos: 0,
            pending: VecDeque::new(),
            finished: false,
        };
        if let Some(lookup) = lookup {
            tokenizer.try_old_style_range(lookup);
        }
        tokenizer
    }

    // Names like "old-tag" may contain query metacharacters, so try them
    // as is before tokenizing.
    fn try_old_style_range(&mut self, lookup: LookupFn<'_>) {
        let text = self.text;
        if text.is_empty() {
            return;
        }
        let (head, tail) = match text.split_once(':') {
            Some((head, tail)) => (head, Some(tail)),
            None => (text, None),
        };
        let known = [Some(head), tail]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .all(lookup);
        if !known {
            return;
        }
        if !head.is_empty() {
            self.push_symbol(head, 0);
        }
        if let Some(tail) = tail {
            let colon = head.len();
            self.push(TokenKind::Operator(":"), None, colon);
            if !tail.is_empty() {
                self.push_symbol(tail, colon + 1);
            }
        }
        self.push(TokenKind::End, None, text.len());
        self.pos = text.len();
        self.finished = true;
    }

    fn push(&mut self, kind: TokenKind, value: Option<String>, pos: usize) {
        self.pending.push_back(Token::new(kind, value, pos));
    }

    fn push_symbol(&mut self, name: &str, pos: usize) {
        self.push(TokenKind::Symbol, Some(name.to_owned()), pos);
    }

    fn scan(&mut self) -> Result<(), ParseError> {
        let text = self.text;
        while let Some(c) = text[self.pos..].chars().next() {
            let pos = self.pos;
            let rest = &text[pos..];
            if c.is_whitespace() {
                self.pos += c.len_utf8();
                continue;
            }
            if let Some(&op) = self.rules.long_operators.iter().find(|op| rest.starts_with(**op)) {
                self.pos += op.len();
                self.push(TokenKind::Operator(op), None, pos);
                return Ok(());
            }
            let c_str = &rest[..c.len_utf8()];
            if let Some(&op) = self.rules.operators.iter().find(|op| **op == c_str) {
                self.pos += op.len();
                self.push(TokenKind::Operator(op), None, pos);
                return Ok(());
            }
            if c == '\'' || c == '"' || rest.starts_with("r'") || rest.starts_with("r\"") {
                return self.scan_string();
            }
            if (self.rules.is_initial_letter)(c) {
                self.scan_symbol();
                return Ok(());
            }
            return Err(ParseError::with_location(ParseErrorKind::SyntaxError, pos));
        }
        self.push(TokenKind::End, None, text.len());
        self.finished = true;
        Ok(())
    }

    fn scan_string(&mut self) -> Result<(), ParseError> {
        let text = self.text;
        let quote_pos = self.pos;
        let raw = text[quote_pos..].starts_with('r');
        let quote_pos = if raw { quote_pos + 1 } else { quote_pos };
        let start = quote_pos + 1;
        let quote = &text[quote_pos..start];
        let mut chars = text[start..].char_indices();
        while let Some((offset, d)) = chars.next() {
            if d == '\\' {
                chars.next();
                continue;
            }
            if text[start + offset..].starts_with(quote) {
                let content = &text[start..start + offset];
                let value = if raw {
                    content.to_owned()
                } else {
                    unescape_string(content).map_err(|message| {
                        ParseError::with_location(ParseErrorKind::InvalidEscape(message), start)
                    })?
                };
                self.pos = start + offset + 1;
                self.push(TokenKind::String, Some(value), start);
                return Ok(());
            }
        }
        Err(ParseError::with_location(
            ParseErrorKind::UnterminatedString,
            quote_pos,
        ))
    }

    fn scan_symbol(&mut self) {
        let text = self.text;
        let start = self.pos;
        let mut end = start;
        for (offset, d) in text[start..].char_indices() {
            let is_letter = if offset == 0 {
                (self.rules.is_initial_letter)(d)
            } else {
                (self.rules.is_symbol_letter)(d)
            };
            if !is_letter {
                break;
            }
            // "a..b" is a range, not a symbol
            if d == '.' && offset > 0 && self.rules.splits_dot_dot() && text[..end].ends_with('.')
            {
                end -= 1;
                break;
            }
            end = start + offset + d.len_utf8();
        }
        self.pos = end;
        let sym = &text[start..end];
        if let Some(&keyword) = self.rules.keywords.iter().find(|k| **k == sym) {
            self.push(TokenKind::Keyword(keyword), None, start);
        } else if self.rules.split_hyphens
            && sym.contains('-')
            && !self.lookup.is_some_and(|lookup| lookup(sym))
        {
            // Looks like an expression. Split at each hyphen.
            let mut pos = start;
            let mut parts = sym.split('-').peekable();
            while let Some(part) = parts.next() {
                if !part.is_empty() {
                    self.push_symbol(part, pos);
                }
                pos += part.len();
                if parts.peek().is_some() {
                    self.push(TokenKind::Operator("-"), None, pos);
                    pos += 1;
                }
            }
        } else {
            self.push_symbol(sym, start);
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() && !self.finished {
            if let Err(err) = self.scan() {
                self.finished = true;
                return Some(Err(err));
            }
        }
        self.pending.pop_front().map(Ok)
    }
}

/// Decodes backslash escape sequences in a quoted string.
pub fn unescape_string(s: &str) -> Result<String, String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        let Some((_, e)) = chars.next() else {
            return Err(r"trailing \ in string".to_owned());
        };
        match e {
            '\n' => {}
            '\\' | '\'' | '"' => result.push(e),
            'a' => result.push('\x07'),
            'b' => result.push('\x08'),
            'f' => result.push('\x0c'),
            'n' => result.push('\n'),
            'r' => result.push('\r'),
            't' => result.push('\t'),
            'v' => result.push('\x0b'),
            'x' => {
                let digits: String = (0..2)
                    .map_while(|_| chars.next_if(|(_, d)| d.is_ascii_hexdigit()))
                    .map(|(_, d)| d)
                    .collect();
                match u8::from_str_radix(&digits, 16) {
                    Ok(byte) if digits.len() == 2 => result.push(char::from(byte)),
                    _ => return Err(format!(r"invalid \x escape at position {pos}")),
                }
            }
            '0'..='7' => {
                let mut value = e.to_digit(8).unwrap_or_default();
                for _ in 0..2 {
                    match chars.next_if(|(_, d)| ('0'..='7').contains(d)) {
                        Some((_, d)) => value = value * 8 + d.to_digit(8).unwrap_or_default(),
                        None => break,
                    }
                }
                result.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            _ => {
                result.push('\\');
                result.push(e);
            }
        }
    }
    Ok(result)
}

/// Quotes the string so the tokenizer reads it back as the same string.
pub fn quote_string(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        match c {
            '\\' => quoted.push_str(r"\\"),
            '\'' => quoted.push_str(r"\'"),
            '\n' => quoted.push_str(r"\n"),
            '\r' => quoted.push_str(r"\r"),
            '\t' => quoted.push_str(r"\t"),
            c if c.is_ascii_control() => quoted.push_str(&format!(r"\x{:02x}", u32::from(c))),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Operator tag of a language.
pub trait OperatorKind: Copy + fmt::Debug + Eq + Hash + 'static {
    /// Tag name used by the tree printer.
    fn name(self) -> &'static str;
    /// Whether this is the `f(x)` operator.
    fn is_function_call(self) -> bool;
    /// Whether this is the `x, y` operator.
    fn is_list(self) -> bool;
    /// Whether this is the `key=value` operator.
    fn is_key_value(self) -> bool {
        false
    }
}

/// Expression tree node tagged with the byte offset it was parsed from.
///
/// Locations are not compared by `==`.
#[derive(Clone, Debug)]
pub struct ExpressionNode<Op> {
    /// Node payload.
    pub kind: ExpressionKind<Op>,
    /// Byte offset in the source text.
    pub location: usize,
}

/// Payload of [`ExpressionNode`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExpressionKind<Op> {
    /// Bare identifier.
    Symbol(String),
    /// Quoted literal.
    String(String),
    /// Function alias parameter in an alias definition.
    AliasArg(String),
    /// Operator applied to operands. An operand omitted before a closing
    /// token, as in `f()`, is not stored.
    Operation(Op, Vec<ExpressionNode<Op>>),
}

impl<Op: PartialEq> PartialEq for ExpressionNode<Op> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl<Op: Eq> Eq for ExpressionNode<Op> {}

impl<Op: OperatorKind> ExpressionNode<Op> {
    /// Creates node of the given `kind`.
    pub fn new(kind: ExpressionKind<Op>, location: usize) -> Self {
        ExpressionNode { kind, location }
    }

    /// Creates symbol leaf.
    pub fn symbol(name: impl Into<String>, location: usize) -> Self {
        ExpressionNode::new(ExpressionKind::Symbol(name.into()), location)
    }

    /// Creates string leaf.
    pub fn string(value: impl Into<String>, location: usize) -> Self {
        ExpressionNode::new(ExpressionKind::String(value.into()), location)
    }

    /// Creates operator node.
    pub fn operation(op: Op, args: Vec<Self>, location: usize) -> Self {
        ExpressionNode::new(ExpressionKind::Operation(op, args), location)
    }

    /// Returns the name if this is a symbol.
    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the value if this is a string or symbol.
    pub fn as_string_like(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Symbol(value) | ExpressionKind::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the operator and operands.
    pub fn as_operation(&self) -> Option<(Op, &[Self])> {
        match &self.kind {
            ExpressionKind::Operation(op, args) => Some((*op, args)),
            _ => None,
        }
    }

    /// Returns the function name and arguments if this is a call of a bare
    /// symbol.
    pub fn as_function_call(&self) -> Option<(&str, Vec<&Self>)> {
        let (op, args) = self.as_operation()?;
        if !op.is_function_call() {
            return None;
        }
        let name = args.first()?.as_symbol()?;
        Some((name, get_list(args.get(1))))
    }

    /// Returns true if this is a call of the function `name`.
    pub fn is_function_call_of(&self, name: &str) -> bool {
        self.as_function_call()
            .is_some_and(|(function, _)| function == name)
    }
}

/// Returns the items of the `x, y, ...` node, or the node itself.
pub fn get_list<Op: OperatorKind>(node: Option<&ExpressionNode<Op>>) -> Vec<&ExpressionNode<Op>> {
    match node {
        None => vec![],
        Some(node) => match node.as_operation() {
            Some((op, items)) if op.is_list() => items.iter().collect(),
            _ => vec![node],
        },
    }
}

/// Returns the items of the argument list, failing with `message` if the
/// count is out of `min..=max`.
pub fn get_args<'n, Op: OperatorKind>(
    node: Option<&'n ExpressionNode<Op>>,
    min: usize,
    max: Option<usize>,
    message: &str,
) -> Result<Vec<&'n ExpressionNode<Op>>, ParseError> {
    let items = get_list(node);
    if items.len() < min || max.is_some_and(|max| items.len() > max) {
        return Err(ParseError::invalid_arguments(message));
    }
    Ok(items)
}

/// Returns the name of the symbol node.
pub fn get_symbol<Op: OperatorKind>(node: &ExpressionNode<Op>) -> Result<&str, ParseError> {
    node.as_symbol().ok_or_else(|| {
        ParseError::with_location(
            ParseErrorKind::Expression("not a symbol".to_owned()),
            node.location,
        )
    })
}

/// Returns the value of the string or symbol node, failing with `message`
/// otherwise.
pub fn get_string<'n, Op: OperatorKind>(
    node: &'n ExpressionNode<Op>,
    message: &str,
) -> Result<&'n str, ParseError> {
    node.as_string_like().ok_or_else(|| {
        ParseError::with_location(
            ParseErrorKind::InvalidArguments(message.to_owned()),
            node.location,
        )
    })
}

/// Parses the string or symbol node as a decimal integer.
pub fn get_integer<Op: OperatorKind>(
    node: &ExpressionNode<Op>,
    message: &str,
) -> Result<i64, ParseError> {
    get_string(node, message)?.parse().map_err(|_| {
        ParseError::with_location(
            ParseErrorKind::InvalidArguments(message.to_owned()),
            node.location,
        )
    })
}

/// Maps positional and `key=value` arguments to the parameter `keys`.
///
/// Positional arguments must precede keyword arguments. Omitted parameters
/// are absent from the returned map.
pub fn build_args_map<'n, 'k, Op: OperatorKind>(
    args: &[&'n ExpressionNode<Op>],
    func_name: &str,
    keys: &[&'k str],
) -> Result<IndexMap<&'k str, &'n ExpressionNode<Op>>, ParseError> {
    let is_key_value = |node: &ExpressionNode<Op>| {
        node.as_operation()
            .is_some_and(|(op, _)| op.is_key_value())
    };
    let kw_start = args
        .iter()
        .position(|arg| is_key_value(arg))
        .unwrap_or(args.len());
    if kw_start > keys.len() {
        return Err(ParseError::invalid_arguments(format!(
            "{func_name} takes at most {} positional arguments",
            keys.len()
        )));
    }
    let mut map: IndexMap<&'k str, &'n ExpressionNode<Op>> =
        keys.iter().copied().zip(args[..kw_start].iter().copied()).collect();
    for arg in &args[kw_start..] {
        let (key, value) = match arg.as_operation() {
            Some((op, [key, value])) if op.is_key_value() => match key.as_symbol() {
                Some(key) => (key, value),
                None => {
                    return Err(ParseError::invalid_arguments(format!(
                        "{func_name} got an invalid argument"
                    )))
                }
            },
            _ => {
                return Err(ParseError::invalid_arguments(format!(
                    "{func_name} got an invalid argument"
                )))
            }
        };
        let Some(&key) = keys.iter().find(|k| **k == key) else {
            return Err(ParseError::invalid_arguments(format!(
                "{func_name} got an unexpected keyword argument '{key}'"
            )));
        };
        if map.insert(key, value).is_some() {
            return Err(ParseError::invalid_arguments(format!(
                "{func_name} got multiple values for keyword argument '{key}'"
            )));
        }
    }
    Ok(map)
}

/// Primary rule of an operator table entry.
#[derive(Clone, Copy, Debug)]
pub enum PrimaryRule<Op> {
    /// Symbol leaf carrying the token value.
    Symbol,
    /// String leaf carrying the token value.
    String,
    /// Operator node without operands, e.g. bare `::`.
    Operation(Op),
}

/// Prefix or infix rule of an operator table entry.
#[derive(Clone, Copy, Debug)]
pub struct OperatorRule<Op> {
    /// Tag of the produced node.
    pub op: Op,
    /// Binding strength required to continue the operand.
    pub binding: u8,
    /// Token that must close the operand, e.g. `)`.
    pub closing: Option<&'static str>,
}

/// Parsing rules of a token type.
#[derive(Clone, Copy, Debug)]
pub struct Element<Op> {
    binding: u8,
    primary: Option<PrimaryRule<Op>>,
    prefix: Option<OperatorRule<Op>>,
    infix: Option<OperatorRule<Op>>,
    suffix: Option<Op>,
}

impl<Op: Copy> Element<Op> {
    /// Creates entry with the given binding strength and no rules.
    pub fn new(binding: u8) -> Self {
        Element {
            binding,
            primary: None,
            prefix: None,
            infix: None,
            suffix: None,
        }
    }

    /// Sets primary rule.
    pub fn primary(mut self, rule: PrimaryRule<Op>) -> Self {
        self.primary = Some(rule);
        self
    }

    /// Sets prefix rule.
    pub fn prefix(mut self, op: Op, binding: u8, closing: Option<&'static str>) -> Self {
        self.prefix = Some(OperatorRule {
            op,
            binding,
            closing,
        });
        self
    }

    /// Sets infix rule.
    pub fn infix(mut self, op: Op, binding: u8, closing: Option<&'static str>) -> Self {
        self.infix = Some(OperatorRule {
            op,
            binding,
            closing,
        });
        self
    }

    /// Sets suffix rule.
    pub fn suffix(mut self, op: Op) -> Self {
        self.suffix = Some(op);
        self
    }
}

/// Maps token types to parsing rules.
#[derive(Clone, Debug)]
pub struct OperatorTable<Op> {
    elements: HashMap<TokenKind, Element<Op>>,
}

impl<Op: Copy> OperatorTable<Op> {
    /// Creates table from `(token type, rules)` pairs.
    pub fn new(elements: impl IntoIterator<Item = (TokenKind, Element<Op>)>) -> Self {
        OperatorTable {
            elements: elements.into_iter().collect(),
        }
    }

    fn get(&self, kind: TokenKind) -> Element<Op> {
        self.elements
            .get(&kind)
            .copied()
            .unwrap_or_else(|| Element::new(0))
    }
}

struct Parser<'t, Op, I> {
    table: &'t OperatorTable<Op>,
    tokens: I,
    current: Token,
}

impl<Op, I> Parser<'_, Op, I>
where
    Op: OperatorKind,
    I: Iterator<Item = Result<Token, ParseError>>,
{
    fn advance(&mut self) -> Result<Token, ParseError> {
        let next = match self.tokens.next() {
            Some(token) => token?,
            None => Token::new(TokenKind::End, None, self.current.pos),
        };
        Ok(mem::replace(&mut self.current, next))
    }

    fn has_new_term(&self) -> bool {
        let element = self.table.get(self.current.kind);
        element.primary.is_some() || element.prefix.is_some()
    }

    fn expect_closing(&mut self, closing: &'static str) -> Result<(), ParseError> {
        if self.current.kind != TokenKind::Operator(closing) {
            return Err(ParseError::with_location(
                ParseErrorKind::UnexpectedToken(self.current.kind.to_string()),
                self.current.pos,
            ));
        }
        self.advance()?;
        Ok(())
    }

    fn parse_operand(
        &mut self,
        rule: OperatorRule<Op>,
    ) -> Result<Option<ExpressionNode<Op>>, ParseError> {
        let operand = match rule.closing {
            Some(closing) if self.current.kind == TokenKind::Operator(closing) => None,
            _ => Some(self.parse_expression(rule.binding)?),
        };
        if let Some(closing) = rule.closing {
            self.expect_closing(closing)?;
        }
        Ok(operand)
    }

    fn parse_expression(&mut self, binding: u8) -> Result<ExpressionNode<Op>, ParseError> {
        let token = self.advance()?;
        let element = self.table.get(token.kind);
        // take as primary if no operand can follow
        let mut expr = match (element.primary, element.prefix) {
            (Some(primary), prefix) if !(prefix.is_some() && self.has_new_term()) => {
                let value = token.value.unwrap_or_default();
                let kind = match primary {
                    PrimaryRule::Symbol => ExpressionKind::Symbol(value),
                    PrimaryRule::String => ExpressionKind::String(value),
                    PrimaryRule::Operation(op) => ExpressionKind::Operation(op, vec![]),
                };
                ExpressionNode::new(kind, token.pos)
            }
            (_, Some(rule)) => {
                let operand = self.parse_operand(rule)?;
                ExpressionNode::operation(rule.op, operand.into_iter().collect(), token.pos)
            }
            (_, None) => {
                return Err(ParseError::with_location(
                    ParseErrorKind::NotPrefix(token.kind.to_string()),
                    token.pos,
                ))
            }
        };
        while binding < self.table.get(self.current.kind).binding {
            let token = self.advance()?;
            let element = self.table.get(token.kind);
            // take as suffix if no operand can follow
            expr = match (element.infix, element.suffix) {
                (infix, Some(suffix)) if !(infix.is_some() && self.has_new_term()) => {
                    ExpressionNode::operation(suffix, vec![expr], token.pos)
                }
                (Some(rule), _) => {
                    let operand = self.parse_operand(rule)?;
                    let args = [expr].into_iter().chain(operand).collect();
                    ExpressionNode::operation(rule.op, args, token.pos)
                }
                (None, _) => {
                    return Err(ParseError::with_location(
                        ParseErrorKind::NotInfix(token.kind.to_string()),
                        token.pos,
                    ))
                }
            };
        }
        Ok(expr)
    }
}

/// Parses the token stream with the operator precedence `table`.
///
/// Returns the tree and the position where parsing stopped. The caller
/// should check that the stop position is the end of the input.
pub fn parse_tokens<Op: OperatorKind>(
    table: &OperatorTable<Op>,
    tokens: impl IntoIterator<Item = Result<Token, ParseError>>,
) -> Result<(ExpressionNode<Op>, usize), ParseError> {
    let mut parser = Parser {
        table,
        tokens: tokens.into_iter(),
        current: Token::new(TokenKind::End, None, 0),
    };
    parser.advance()?;
    let tree = parser.parse_expression(0)?;
    Ok((tree, parser.current.pos))
}

/// Flattens left-nested chains of the `targets` operators into one n-ary
/// node: `(or (or a b) c)` becomes `(or a b c)`.
pub fn simplify_infix_ops<Op: OperatorKind>(
    node: ExpressionNode<Op>,
    targets: &[Op],
) -> ExpressionNode<Op> {
    let ExpressionNode { kind, location } = node;
    let (op, args) = match kind {
        ExpressionKind::Operation(op, args) => (op, args),
        kind => return ExpressionNode::new(kind, location),
    };
    if !targets.contains(&op) {
        let args = args
            .into_iter()
            .map(|arg| simplify_infix_ops(arg, targets))
            .collect();
        return ExpressionNode::operation(op, args, location);
    }
    // Infix operators are left-associative, so only the left side is deep.
    let mut items = vec![];
    let mut args = args;
    loop {
        match <[ExpressionNode<Op>; 2]>::try_from(args) {
            Ok([left, right]) => {
                items.push(simplify_infix_ops(right, targets));
                match left.kind {
                    ExpressionKind::Operation(left_op, left_args) if left_op == op => {
                        args = left_args;
                    }
                    kind => {
                        items.push(simplify_infix_ops(
                            ExpressionNode::new(kind, left.location),
                            targets,
                        ));
                        break;
                    }
                }
            }
            Err(rest) => {
                items.extend(
                    rest.into_iter()
                        .rev()
                        .map(|arg| simplify_infix_ops(arg, targets)),
                );
                break;
            }
        }
    }
    items.reverse();
    ExpressionNode::operation(op, items, location)
}

/// Reduces expression tree bottom-up.
pub trait TreeEvaluator<Op> {
    /// Reduced value.
    type Output;
    /// Error type.
    type Error;

    /// Maps leaf node.
    fn leaf(&mut self, node: &ExpressionNode<Op>) -> Result<Self::Output, Self::Error>;

    /// Combines reduced operands of the `op` node.
    fn apply(
        &mut self,
        op: Op,
        args: Vec<Self::Output>,
        location: usize,
    ) -> Result<Self::Output, Self::Error>;
}

/// Evaluates the tree by reducing operands first.
pub fn evaluate_tree<Op: OperatorKind, E: TreeEvaluator<Op>>(
    node: &ExpressionNode<Op>,
    evaluator: &mut E,
) -> Result<E::Output, E::Error> {
    match &node.kind {
        ExpressionKind::Operation(op, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate_tree(arg, evaluator))
                .try_collect()?;
            evaluator.apply(*op, args, node.location)
        }
        _ => evaluator.leaf(node),
    }
}

/// Formats the tree as indented s-expression.
pub fn pretty_format<Op: OperatorKind>(node: &ExpressionNode<Op>) -> String {
    fn format_node<Op: OperatorKind>(
        node: &ExpressionNode<Op>,
        level: usize,
        lines: &mut Vec<(usize, String)>,
    ) {
        match &node.kind {
            ExpressionKind::Symbol(name) => {
                lines.push((level, format!("(symbol {})", quote_string(name))));
            }
            ExpressionKind::String(value) => {
                lines.push((level, format!("(string {})", quote_string(value))));
            }
            ExpressionKind::AliasArg(name) => {
                lines.push((level, format!("(_aliasarg {})", quote_string(name))));
            }
            ExpressionKind::Operation(op, args) => {
                lines.push((level, format!("({}", op.name())));
                for arg in args {
                    format_node(arg, level + 1, lines);
                }
                if let Some((_, last)) = lines.last_mut() {
                    last.push(')');
                }
            }
        }
    }

    let mut lines = vec![];
    format_node(node, 0, &mut lines);
    lines
        .iter()
        .map(|(level, line)| format!("{}{line}", "  ".repeat(*level)))
        .join("\n")
}

/// Collects similar names from the `candidates` list.
pub fn collect_similar<I>(name: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    candidates
        .into_iter()
        .filter(|cand| {
            // The parameter is borrowed from clap f5540d26
            strsim::jaro(name, cand.as_ref()) > 0.7
        })
        .map(|s| s.as_ref().to_owned())
        .sorted_unstable()
        .dedup()
        .collect()
}

/// Warnings collected while compiling an expression.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<String>,
}

impl Diagnostics {
    /// Creates empty diagnostics.
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Records warning message.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Returns true if no warnings were recorded.
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Number of warnings.
    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// Iterates over warning messages.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }
}

/// Language-specific part of the alias engine.
pub trait AliasRules {
    /// Operator tag of the language.
    type Op: OperatorKind;

    /// Name used in error messages, e.g. "revset alias".
    const SECTION: &'static str;

    /// Parses alias declaration or definition. `$`-prefixed symbols should
    /// be accepted.
    fn parse(text: &str) -> Result<ExpressionNode<Self::Op>, ParseError>;
}

/// Symbol or function alias.
#[derive(Clone, Debug)]
pub struct Alias<Op> {
    /// Alias name.
    pub name: String,
    /// Parameter names of a function alias. `None` for a symbol alias.
    pub args: Option<Vec<String>>,
    /// Definition tree with parameters marked, or the message describing why
    /// the alias couldn't be built.
    pub replacement: Result<ExpressionNode<Op>, String>,
    warned: Cell<bool>,
}

impl<Op> Alias<Op> {
    /// Build error, if any.
    pub fn error(&self) -> Option<&str> {
        self.replacement.as_ref().err().map(String::as_str)
    }

    /// Whether the build error has already been reported.
    pub fn is_warned(&self) -> bool {
        self.warned.get()
    }
}

/// Builds alias from the `decl = defn` pair.
///
/// Malformed declaration or definition doesn't fail immediately. It's
/// recorded in the alias, and reported when the alias is substituted.
pub fn build_alias<R: AliasRules>(decl: &str, defn: &str) -> Alias<R::Op> {
    let (name, args, decl_error) = build_declaration::<R>(decl);
    let replacement = match decl_error {
        Some(err) => Err(format!(
            r#"bad declaration of {} "{name}": {err}"#,
            R::SECTION
        )),
        None => build_definition::<R>(defn, args.as_deref().unwrap_or_default()).map_err(
            |err| {
                format!(
                    r#"bad definition of {} "{name}": {}"#,
                    R::SECTION,
                    err.detail()
                )
            },
        ),
    };
    Alias {
        name,
        args,
        replacement,
        warned: Cell::new(false),
    }
}

fn build_declaration<R: AliasRules>(decl: &str) -> (String, Option<Vec<String>>, Option<String>) {
    let tree = match R::parse(decl) {
        Ok(tree) => tree,
        Err(err) => return (decl.to_owned(), None, Some(err.detail())),
    };
    if let Some(name) = tree.as_symbol() {
        if name.starts_with('$') {
            return (decl.to_owned(), None, Some(format!("invalid symbol '{name}'")));
        }
        return (name.to_owned(), None, None);
    }
    if let Some((name, args)) = tree.as_function_call() {
        if name.starts_with('$') {
            return (decl.to_owned(), None, Some(format!("invalid function '{name}'")));
        }
        let Some(params) = args.iter().map(|arg| arg.as_symbol()).collect::<Option<Vec<_>>>()
        else {
            return (decl.to_owned(), None, Some("invalid argument list".to_owned()));
        };
        if !params.iter().all_unique() {
            return (
                name.to_owned(),
                None,
                Some("argument names collide with each other".to_owned()),
            );
        }
        let params = params.into_iter().map(str::to_owned).collect();
        return (name.to_owned(), Some(params), None);
    }
    (decl.to_owned(), None, Some("invalid format".to_owned()))
}

fn build_definition<R: AliasRules>(
    defn: &str,
    params: &[String],
) -> Result<ExpressionNode<R::Op>, ParseError> {
    let tree = R::parse(defn)?;
    relabel_params(tree, params)
}

// Marks parameter symbols. String literals are left intact.
fn relabel_params<Op: OperatorKind>(
    node: ExpressionNode<Op>,
    params: &[String],
) -> Result<ExpressionNode<Op>, ParseError> {
    let ExpressionNode { kind, location } = node;
    let kind = match kind {
        ExpressionKind::Symbol(name) if params.contains(&name) => ExpressionKind::AliasArg(name),
        ExpressionKind::Symbol(name) if name.starts_with('$') => {
            return Err(ParseError::with_location(
                ParseErrorKind::Expression(format!("invalid symbol '{name}'")),
                location,
            ));
        }
        ExpressionKind::Operation(op, args) => {
            let args = args
                .into_iter()
                .map(|arg| relabel_params(arg, params))
                .try_collect()?;
            ExpressionKind::Operation(op, args)
        }
        kind => kind,
    };
    Ok(ExpressionNode::new(kind, location))
}

/// Aliases of one language, keyed by name.
#[derive(Clone, Debug)]
pub struct AliasesMap<Op> {
    section: &'static str,
    aliases: BTreeMap<String, Alias<Op>>,
}

impl<Op: OperatorKind> AliasesMap<Op> {
    /// Creates empty map for the `R` language.
    pub fn new<R: AliasRules<Op = Op>>() -> Self {
        AliasesMap {
            section: R::SECTION,
            aliases: BTreeMap::new(),
        }
    }

    /// Builds map from `(declaration, definition)` pairs. Later
    /// declarations of the same name win.
    pub fn build<R, I, D, V>(items: I) -> Self
    where
        R: AliasRules<Op = Op>,
        I: IntoIterator<Item = (D, V)>,
        D: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = Self::new::<R>();
        for (decl, defn) in items {
            map.insert(build_alias::<R>(decl.as_ref(), defn.as_ref()));
        }
        map
    }

    /// Adds or replaces alias.
    pub fn insert(&mut self, alias: Alias<Op>) {
        self.aliases.insert(alias.name.clone(), alias);
    }

    /// Looks up alias by name.
    pub fn get(&self, name: &str) -> Option<&Alias<Op>> {
        self.aliases.get(name)
    }

    /// Returns true if there are no aliases.
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Iterates over alias names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    /// Returns build errors of aliases that haven't been reported yet, and
    /// marks them reported.
    pub fn take_unreported_errors(&self) -> Vec<String> {
        self.aliases
            .values()
            .filter(|alias| !alias.warned.get())
            .filter_map(|alias| {
                let message = alias.error()?;
                alias.warned.set(true);
                Some(message.to_owned())
            })
            .collect()
    }

    fn find_alias<'m, 'n>(
        &'m self,
        node: &'n ExpressionNode<Op>,
    ) -> Option<(&'m Alias<Op>, Option<Vec<&'n ExpressionNode<Op>>>)> {
        if let Some(name) = node.as_symbol() {
            let alias = self.aliases.get(name)?;
            return alias.args.is_none().then_some((alias, None));
        }
        let (name, args) = node.as_function_call()?;
        let alias = self.aliases.get(name)?;
        alias.args.is_some().then_some((alias, Some(args)))
    }
}

struct AliasExpander<'m, Op> {
    aliases: &'m AliasesMap<Op>,
    cache: HashMap<&'m str, ExpressionNode<Op>>,
}

impl<'m, Op: OperatorKind> AliasExpander<'m, Op> {
    fn expand(
        &mut self,
        node: &ExpressionNode<Op>,
        expanding: &mut Vec<&'m str>,
    ) -> Result<ExpressionNode<Op>, ParseError> {
        let aliases = self.aliases;
        let Some((alias, call_args)) = aliases.find_alias(node) else {
            return match &node.kind {
                ExpressionKind::Operation(op, args) => {
                    let args = args
                        .iter()
                        .map(|arg| self.expand(arg, expanding))
                        .try_collect()?;
                    Ok(ExpressionNode::operation(*op, args, node.location))
                }
                _ => Ok(node.clone()),
            };
        };
        let replacement = match &alias.replacement {
            Ok(replacement) => replacement,
            Err(message) => {
                alias.warned.set(true);
                return Err(ParseError::with_location(
                    ParseErrorKind::BadAlias(message.clone()),
                    node.location,
                ));
            }
        };
        let name = alias.name.as_str();
        // The stack should be short, so let's simply do linear search.
        if expanding.contains(&name) {
            return Err(ParseError::with_location(
                ParseErrorKind::InfiniteAliasExpansion {
                    section: aliases.section,
                    name: name.to_owned(),
                },
                node.location,
            ));
        }
        expanding.push(name);
        let result = match self.cache.get(name) {
            Some(expanded) => Ok(expanded.clone()),
            None => self.expand(replacement, expanding),
        };
        expanding.pop();
        let result = result?;
        self.cache.entry(name).or_insert_with(|| result.clone());

        let (Some(params), Some(call_args)) = (&alias.args, call_args) else {
            return Ok(result);
        };
        if call_args.len() != params.len() {
            return Err(ParseError::with_location(
                ParseErrorKind::InvalidArgumentCount(call_args.len()),
                node.location,
            ));
        }
        // Arguments are expanded in the caller's scope.
        let values: HashMap<&str, ExpressionNode<Op>> = params
            .iter()
            .zip(call_args)
            .map(|(param, arg)| Ok((param.as_str(), self.expand(arg, &mut vec![])?)))
            .try_collect::<_, _, ParseError>()?;
        Ok(substitute_args(result, &values))
    }
}

fn substitute_args<Op: OperatorKind>(
    node: ExpressionNode<Op>,
    values: &HashMap<&str, ExpressionNode<Op>>,
) -> ExpressionNode<Op> {
    let ExpressionNode { kind, location } = node;
    match kind {
        ExpressionKind::AliasArg(name) => match values.get(name.as_str()) {
            Some(value) => value.clone(),
            None => ExpressionNode::new(ExpressionKind::AliasArg(name), location),
        },
        ExpressionKind::Operation(op, args) => {
            let args = args
                .into_iter()
                .map(|arg| substitute_args(arg, values))
                .collect();
            ExpressionNode::operation(op, args, location)
        }
        kind => ExpressionNode::new(kind, location),
    }
}

/// Expands aliases in the tree recursively.
pub fn expand_aliases<Op: OperatorKind>(
    aliases: &AliasesMap<Op>,
    tree: &ExpressionNode<Op>,
) -> Result<ExpressionNode<Op>, ParseError> {
    if aliases.is_empty() {
        return Ok(tree.clone());
    }
    let mut expander = AliasExpander {
        aliases,
        cache: HashMap::new(),
    };
    expander.expand(tree, &mut vec![])
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    enum TestOp {
        Group,
        Func,
        Minus,
        Negate,
        Not,
        And,
        Or,
        List,
        Post,
    }

    impl OperatorKind for TestOp {
        fn name(self) -> &'static str {
            match self {
                TestOp::Group => "group",
                TestOp::Func => "func",
                TestOp::Minus => "minus",
                TestOp::Negate => "negate",
                TestOp::Not => "not",
                TestOp::And => "and",
                TestOp::Or => "or",
                TestOp::List => "list",
                TestOp::Post => "post",
            }
        }

        fn is_function_call(self) -> bool {
            self == TestOp::Func
        }

        fn is_list(self) -> bool {
            self == TestOp::List
        }
    }

    const TEST_RULES: LexicalRules = LexicalRules {
        long_operators: &["::", ".."],
        operators: &["(", ")", ",", "-", "&", "|", "!", "^", ":"],
        keywords: &["and", "or", "not"],
        is_initial_letter: |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '$'),
        is_symbol_letter: |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'),
        split_hyphens: true,
    };

    fn test_table() -> OperatorTable<TestOp> {
        use TokenKind::{Keyword, Operator};
        OperatorTable::new([
            (
                Operator("("),
                Element::new(20)
                    .prefix(TestOp::Group, 1, Some(")"))
                    .infix(TestOp::Func, 1, Some(")")),
            ),
            (Operator("^"), Element::new(18).suffix(TestOp::Post)),
            (
                Operator("-"),
                Element::new(5)
                    .prefix(TestOp::Negate, 19, None)
                    .infix(TestOp::Minus, 5, None),
            ),
            (Keyword("not"), Element::new(10).prefix(TestOp::Not, 10, None)),
            (Operator("!"), Element::new(10).prefix(TestOp::Not, 10, None)),
            (Keyword("and"), Element::new(5).infix(TestOp::And, 5, None)),
            (Operator("&"), Element::new(5).infix(TestOp::And, 5, None)),
            (Keyword("or"), Element::new(4).infix(TestOp::Or, 4, None)),
            (Operator("|"), Element::new(4).infix(TestOp::Or, 4, None)),
            (Operator(","), Element::new(2).infix(TestOp::List, 2, None)),
            (Operator(")"), Element::new(0)),
            (TokenKind::Symbol, Element::new(0).primary(PrimaryRule::Symbol)),
            (TokenKind::String, Element::new(0).primary(PrimaryRule::String)),
            (TokenKind::End, Element::new(0)),
        ])
    }

    struct TestAliasRules;

    impl AliasRules for TestAliasRules {
        type Op = TestOp;
        const SECTION: &'static str = "test alias";

        fn parse(text: &str) -> Result<ExpressionNode<TestOp>, ParseError> {
            parse_program(text)
        }
    }

    fn tokenize_all(
        text: &str,
        lookup: Option<LookupFn<'_>>,
    ) -> Result<Vec<(TokenKind, Option<String>, usize)>, ParseError> {
        Tokenizer::new(text, &TEST_RULES, lookup)
            .map_ok(|token| (token.kind, token.value, token.pos))
            .try_collect()
    }

    fn parse_program(text: &str) -> Result<ExpressionNode<TestOp>, ParseError> {
        let tokens = Tokenizer::new(text, &TEST_RULES, None);
        let (tree, pos) = parse_tokens(&test_table(), tokens)?;
        if pos != text.len() {
            return Err(ParseError::with_location(ParseErrorKind::InvalidToken, pos));
        }
        Ok(simplify_infix_ops(tree, &[TestOp::Or, TestOp::List]))
    }

    fn parse_format(text: &str) -> String {
        pretty_format(&parse_program(text).unwrap())
    }

    fn sym(name: &str) -> (TokenKind, Option<String>, usize) {
        (TokenKind::Symbol, Some(name.to_owned()), 0)
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize_all("a::b ..c", None).unwrap();
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Symbol, Some("a".to_owned()), 0),
                (TokenKind::Operator("::"), None, 1),
                (TokenKind::Symbol, Some("b".to_owned()), 3),
                (TokenKind::Operator(".."), None, 5),
                (TokenKind::Symbol, Some("c".to_owned()), 7),
                (TokenKind::End, None, 8),
            ]
        );
        assert_eq!(
            tokenize_all("a..b", None).unwrap()[1],
            (TokenKind::Operator(".."), None, 1)
        );
        assert_eq!(tokenize_all("a.b", None).unwrap()[0].1.as_deref(), Some("a.b"));
        assert_eq!(
            tokenize_all("x and not y", None).unwrap()[1].0,
            TokenKind::Keyword("and")
        );
    }

    #[test]
    fn test_tokenize_string() {
        let tokens = tokenize_all(r#"'a\'b' "c\n" r'd\n'"#, None).unwrap();
        let values = tokens.iter().map(|(_, value, _)| value.as_deref()).collect_vec();
        assert_eq!(values, vec![Some("a'b"), Some("c\n"), Some(r"d\n"), None]);
        assert_eq!(tokens[0].2, 1);
        assert_eq!(tokens[2].2, 15);

        let err = tokenize_all("foo 'bar", None).unwrap_err();
        assert_eq!(err.kind(), &ParseErrorKind::UnterminatedString);
        assert_eq!(err.location(), Some(4));
        let err = tokenize_all(r#"r"bar"#, None).unwrap_err();
        assert_eq!(err.location(), Some(1));
    }

    #[test]
    fn test_tokenize_unknown_character() {
        let err = tokenize_all("a ; b", None).unwrap_err();
        assert_eq!(err.kind(), &ParseErrorKind::SyntaxError);
        assert_eq!(err.location(), Some(2));
    }

    #[test]
    fn test_tokenize_hyphenated_symbol() {
        let lookup = |name: &str| name == "my-feature-3";
        assert_eq!(
            tokenize_all("my-feature-3", Some(&lookup)).unwrap(),
            vec![
                (TokenKind::Symbol, Some("my-feature-3".to_owned()), 0),
                (TokenKind::End, None, 12),
            ]
        );

        let nothing = |_: &str| false;
        assert_eq!(
            tokenize_all("x-1", Some(&nothing)).unwrap(),
            vec![
                (TokenKind::Symbol, Some("x".to_owned()), 0),
                (TokenKind::Operator("-"), None, 1),
                (TokenKind::Symbol, Some("1".to_owned()), 2),
                (TokenKind::End, None, 3),
            ]
        );
        assert_eq!(tokenize_all("x-1", None).unwrap().len(), 4);
        assert_eq!(
            tokenize_all("a--b", None).unwrap(),
            vec![
                sym("a"),
                (TokenKind::Operator("-"), None, 1),
                (TokenKind::Operator("-"), None, 2),
                (TokenKind::Symbol, Some("b".to_owned()), 3),
                (TokenKind::End, None, 4),
            ]
        );
    }

    #[test]
    fn test_tokenize_old_style_range() {
        let lookup = |name: &str| matches!(name, "old-tag" | "other(tag");
        assert_eq!(
            tokenize_all("old-tag:other(tag", Some(&lookup)).unwrap(),
            vec![
                sym("old-tag"),
                (TokenKind::Operator(":"), None, 7),
                (TokenKind::Symbol, Some("other(tag".to_owned()), 8),
                (TokenKind::End, None, 17),
            ]
        );
        assert_eq!(
            tokenize_all("old-tag:", Some(&lookup)).unwrap(),
            vec![
                sym("old-tag"),
                (TokenKind::Operator(":"), None, 7),
                (TokenKind::End, None, 8),
            ]
        );
        // falls back to the regular tokenizer
        assert_eq!(tokenize_all("old-tag:x", Some(&lookup)).unwrap().len(), 4);
    }

    #[test]
    fn test_unescape_string() {
        assert_eq!(unescape_string(r"a\tb\\c").unwrap(), "a\tb\\c");
        assert_eq!(unescape_string(r"\x41\101\0").unwrap(), "AA\0");
        assert_eq!(unescape_string(r"\q").unwrap(), r"\q");
        assert!(unescape_string(r"\x4").is_err());
        assert!(unescape_string("a\\").is_err());
        for s in ["a'b", "c\\d", "e\nf\0"] {
            assert_eq!(unescape_string(&quote_string(s)[1..quote_string(s).len() - 1]).unwrap(), s);
        }
    }

    #[test]
    fn test_parse_precedence() {
        insta::assert_snapshot!(parse_format("a and b or not c"), @r###"
        (or
          (and
            (symbol 'a')
            (symbol 'b'))
          (not
            (symbol 'c')))
        "###);
        insta::assert_snapshot!(parse_format("-a-b"), @r###"
        (minus
          (negate
            (symbol 'a'))
          (symbol 'b'))
        "###);
        insta::assert_snapshot!(parse_format("f(a, (b))^"), @r###"
        (post
          (func
            (symbol 'f')
            (list
              (symbol 'a')
              (group
                (symbol 'b')))))
        "###);
        insta::assert_snapshot!(parse_format("f()"), @r###"
        (func
          (symbol 'f'))
        "###);
    }

    #[test]
    fn test_parse_left_associative() {
        let expected = ExpressionNode::operation(
            TestOp::Minus,
            vec![
                ExpressionNode::operation(
                    TestOp::Minus,
                    vec![ExpressionNode::symbol("a", 0), ExpressionNode::symbol("b", 0)],
                    0,
                ),
                ExpressionNode::symbol("c", 0),
            ],
            0,
        );
        assert_eq!(parse_program("a - b - c").unwrap(), expected);
        assert_eq!(
            parse_program("a & b & c").unwrap(),
            parse_program("(a & b) & c").map(strip_groups).unwrap()
        );
    }

    fn strip_groups(node: ExpressionNode<TestOp>) -> ExpressionNode<TestOp> {
        match node.kind {
            ExpressionKind::Operation(TestOp::Group, mut args) => strip_groups(args.remove(0)),
            ExpressionKind::Operation(op, args) => ExpressionNode::operation(
                op,
                args.into_iter().map(strip_groups).collect(),
                node.location,
            ),
            kind => ExpressionNode::new(kind, node.location),
        }
    }

    #[test]
    fn test_parse_flattens_or_and_list() {
        insta::assert_snapshot!(parse_format("a | b | c, d"), @r###"
        (list
          (or
            (symbol 'a')
            (symbol 'b')
            (symbol 'c'))
          (symbol 'd'))
        "###);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_program("a &").unwrap_err();
        assert_eq!(err.kind(), &ParseErrorKind::NotPrefix("end".to_owned()));
        assert_eq!(err.location(), Some(3));
        let err = parse_program("f(a").unwrap_err();
        assert_eq!(err.kind(), &ParseErrorKind::UnexpectedToken("end".to_owned()));
        let err = parse_program("a)").unwrap_err();
        assert_eq!(err.kind(), &ParseErrorKind::InvalidToken);
        assert_eq!(err.location(), Some(1));
        let err = parse_program("^a").unwrap_err();
        assert_eq!(err.kind(), &ParseErrorKind::NotPrefix("^".to_owned()));
    }

    #[test]
    fn test_parse_error_caret() {
        let err = parse_program("a &\n& b").unwrap_err();
        assert_eq!(err.location(), Some(4));
        insta::assert_snapshot!(err.with_caret("a &\n& b"), @r###"
        at 4: not a prefix: &
        a & & b
            ^ here
        "###);
    }

    #[test]
    fn test_evaluate_tree() {
        struct Counter;
        impl TreeEvaluator<TestOp> for Counter {
            type Output = usize;
            type Error = ();

            fn leaf(&mut self, _node: &ExpressionNode<TestOp>) -> Result<usize, ()> {
                Ok(1)
            }

            fn apply(&mut self, _op: TestOp, args: Vec<usize>, _: usize) -> Result<usize, ()> {
                Ok(args.iter().sum::<usize>() + 1)
            }
        }
        let tree = parse_program("f(a, b) & not c").unwrap();
        assert_eq!(evaluate_tree(&tree, &mut Counter), Ok(8));
    }

    #[test]
    fn test_build_args_map() {
        let tree = parse_program("f(a, b)").unwrap();
        let (_, args) = tree.as_function_call().unwrap();
        let map = build_args_map(&args, "f", &["x", "y", "z"]).unwrap();
        assert_eq!(map.keys().copied().collect_vec(), vec!["x", "y"]);
        assert_matches!(
            build_args_map(&args, "f", &["x"]),
            Err(err) if err.to_string() == "f takes at most 1 positional arguments"
        );
        assert_matches!(get_args(Some(&tree), 2, Some(2), "takes two"), Err(_));
    }

    fn aliases(items: &[(&str, &str)]) -> AliasesMap<TestOp> {
        AliasesMap::build::<TestAliasRules, _, _, _>(items.iter().copied())
    }

    fn expand(map: &AliasesMap<TestOp>, text: &str) -> Result<ExpressionNode<TestOp>, ParseError> {
        expand_aliases(map, &parse_program(text).unwrap())
    }

    #[test]
    fn test_build_alias_declaration() {
        let map = aliases(&[
            ("sym", "a"),
            ("func($1, $2)", "$1 & $2"),
            ("$x", "a"),
            ("f(a, a)", "a"),
            ("g(a & b)", "a"),
            ("h(", "a"),
            ("bad", "$y & a"),
            ("str($1)", "'$1'"),
        ]);
        assert_eq!(map.get("sym").unwrap().args, None);
        assert_eq!(
            map.get("func").unwrap().args,
            Some(vec!["$1".to_owned(), "$2".to_owned()])
        );
        assert_eq!(
            map.get("$x").unwrap().error(),
            Some(r#"bad declaration of test alias "$x": invalid symbol '$x'"#)
        );
        assert_eq!(
            map.get("f").unwrap().error(),
            Some(r#"bad declaration of test alias "f": argument names collide with each other"#)
        );
        assert_eq!(
            map.get("g(a & b)").unwrap().error(),
            Some(r#"bad declaration of test alias "g(a & b)": invalid argument list"#)
        );
        assert_matches!(map.get("h(").unwrap().error(), Some(s) if s.contains("at 2:"));
        assert_eq!(
            map.get("bad").unwrap().error(),
            Some(r#"bad definition of test alias "bad": at 0: invalid symbol '$y'"#)
        );
        // placeholders inside strings are not substituted
        assert_eq!(
            map.get("str").unwrap().replacement,
            Ok(ExpressionNode::string("$1", 0))
        );
    }

    #[test]
    fn test_expand_symbol_alias() {
        let map = aliases(&[("AB", "a & b"), ("C", "AB | c")]);
        assert_eq!(expand(&map, "C").unwrap(), parse_program("(a & b) | c").map(strip_groups).unwrap());
        assert_eq!(expand(&map, "f(AB)").unwrap(), parse_program("f(a & b)").unwrap());
    }

    #[test]
    fn test_expand_function_alias() {
        let map = aliases(&[("foo($1, $2)", "$1 & not $2"), ("id($x)", "$x")]);
        assert_eq!(
            expand(&map, "foo(draft(), public())").unwrap(),
            parse_program("draft() & not public()").unwrap()
        );
        assert_eq!(
            expand(&map, "id(id(a))").unwrap(),
            parse_program("a").unwrap()
        );
        let err = expand(&map, "foo(a)").unwrap_err();
        assert_eq!(err.kind(), &ParseErrorKind::InvalidArgumentCount(1));
        // function alias doesn't match a bare symbol
        assert_eq!(expand(&map, "foo").unwrap(), parse_program("foo").unwrap());
    }

    #[test]
    fn test_expand_recursive_alias() {
        let map = aliases(&[("a", "b()"), ("b()", "a"), ("c", "c")]);
        for text in ["a", "b()", "c", "f(x, a)"] {
            assert_matches!(
                expand(&map, text).unwrap_err().kind(),
                ParseErrorKind::InfiniteAliasExpansion { .. }
            );
        }
        let err = expand(&map, "a").unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"infinite expansion of test alias "a" detected"#
        );
    }

    #[test]
    fn test_expand_bad_alias_reported_once() {
        let map = aliases(&[("bad", "$y"), ("worse", "$z"), ("good", "a")]);
        let err = expand(&map, "good & bad").unwrap_err();
        assert_matches!(err.kind(), ParseErrorKind::BadAlias(_));
        assert!(map.get("bad").unwrap().is_warned());
        assert_eq!(
            map.take_unreported_errors(),
            vec![r#"bad definition of test alias "worse": at 0: invalid symbol '$z'"#.to_owned()]
        );
        assert!(map.take_unreported_errors().is_empty());
    }
}
