// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Addon manifest reading.
//!
//! Odoo manifests are Python files holding a single dictionary expression.
//! They are never executed. Instead their content is parsed as a Python
//! __literal__: dictionaries, lists, tuples, sets, strings, numbers,
//! booleans, and `None`. Anything that would need an interpreter, like
//! names, calls, or operators, is rejected as a parse error.
//!
//! Only two keys matter to dependency resolution: `depends` and
//! `auto_install`. Every other key is kept as is.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Recognized manifest file names in priority order.
pub const MANIFEST_NAMES: [&str; 3] = ["__manifest__.py", "__openerp__.py", "__terp__.py"];

/// Check if file name is a recognized manifest name.
pub fn is_manifest_name(name: impl AsRef<Path>) -> bool {
    MANIFEST_NAMES
        .iter()
        .any(|manifest| name.as_ref() == Path::new(manifest))
}

/// Locate manifest file of addon directory among a listing of files.
///
/// Only files directly inside `dir` are considered. The highest priority
/// name from [`MANIFEST_NAMES`] wins when several are present.
///
/// # Errors
///
/// - Return [`ManifestError::NotFound`] if no recognized manifest file is
///   directly inside `dir`.
pub fn locate<'a>(dir: &Path, files: impl IntoIterator<Item = &'a Path>) -> Result<&'a Path> {
    files
        .into_iter()
        .filter(|file| file.parent() == Some(dir))
        .filter_map(|file| {
            let name = file.file_name()?;
            MANIFEST_NAMES
                .iter()
                .position(|manifest| name == *manifest)
                .map(|rank| (rank, file))
        })
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, file)| file)
        .ok_or_else(|| ManifestError::NotFound {
            dir: dir.to_path_buf(),
        })
}

/// Parsed addon manifest.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Names of modules this addon depends on, in declared order.
    pub depends: Vec<String>,

    /// Install automatically once every dependency is installed.
    pub auto_install: bool,

    /// Remaining manifest keys.
    pub extra: BTreeMap<String, Literal>,
}

impl Manifest {
    /// Construct manifest with dependency listing only.
    pub fn with_depends(depends: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            depends: depends.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Flag manifest as auto-installable.
    pub fn auto_install(mut self, auto_install: bool) -> Self {
        self.auto_install = auto_install;
        self
    }
}

impl FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let Literal::Dict(items) = Parser::new(data).parse()? else {
            return Err(ManifestError::Shape("manifest is not a dictionary".into()));
        };

        let mut manifest = Manifest::default();
        for (key, value) in items {
            let Literal::Str(key) = key else {
                return Err(ManifestError::Shape("manifest key is not a string".into()));
            };

            match key.as_str() {
                "depends" => manifest.depends = string_list(&value)?,
                "auto_install" => manifest.auto_install = value.is_truthy(),
                _ => {
                    manifest.extra.insert(key, value);
                }
            }
        }

        Ok(manifest)
    }
}

fn string_list(value: &Literal) -> Result<Vec<String>> {
    let items = match value {
        Literal::List(items) | Literal::Tuple(items) => items,
        _ => {
            return Err(ManifestError::Shape(
                "depends is not a list of strings".into(),
            ))
        }
    };

    items
        .iter()
        .map(|item| {
            item.as_str().map(ToString::to_string).ok_or_else(|| {
                ManifestError::Shape("depends is not a list of strings".into())
            })
        })
        .collect()
}

/// Python literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),

    /// Integer beyond `i64`, kept as written.
    BigInt(String),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
    Set(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
}

impl Literal {
    /// Python truthiness of value.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(value) => *value,
            Self::Int(value) => *value != 0,
            Self::BigInt(_) => true,
            Self::Float(value) => *value != 0.0,
            Self::Str(value) => !value.is_empty(),
            Self::List(items) | Self::Tuple(items) | Self::Set(items) => !items.is_empty(),
            Self::Dict(items) => !items.is_empty(),
        }
    }

    /// Borrow string content, if value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Integer literal from `digits` in `radix`, falling back to the written `text`
/// when it does not fit into `i64`.
fn integer(digits: &str, radix: u32, text: &str) -> Option<Literal> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    match i64::from_str_radix(digits, radix) {
        Ok(value) => Some(Literal::Int(value)),
        Err(_) => Some(Literal::BigInt(text.to_string())),
    }
}

/// Recursive descent parser for Python literals.
struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(data: &str) -> Self {
        Self {
            chars: data.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Literal> {
        self.skip_trivia();
        let value = self.value()?;
        self.skip_trivia();
        if self.pos < self.chars.len() {
            return Err(self.error("unexpected content after literal"));
        }

        Ok(value)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let next = self.peek();
        if next.is_some() {
            self.pos += 1;
        }
        next
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_trivia();
        match self.bump() {
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(self.error(format!("expected {expected:?}, found {found:?}"))),
            None => Err(self.error(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn error(&self, message: impl Into<String>) -> ManifestError {
        let consumed = &self.chars[..self.pos.min(self.chars.len())];
        let line = consumed.iter().filter(|c| **c == '\n').count() + 1;
        let column = consumed.iter().rev().take_while(|c| **c != '\n').count() + 1;
        ManifestError::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    /// Skip whitespace, comments, and line continuations.
    fn skip_trivia(&mut self) {
        while let Some(next) = self.peek() {
            match next {
                '#' => {
                    while !matches!(self.peek(), Some('\n') | None) {
                        self.pos += 1;
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => self.pos += 2,
                c if c.is_whitespace() => self.pos += 1,
                _ => break,
            }
        }
    }

    fn value(&mut self) -> Result<Literal> {
        self.skip_trivia();
        match self.peek() {
            Some('{') => self.braced(),
            Some('[') => {
                self.pos += 1;
                Ok(Literal::List(self.sequence(']')?))
            }
            Some('(') => self.parenthesized(),
            Some('-' | '+') => self.signed(),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some('.') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number(),
            Some(_) if self.string_prefix_len().is_some() => self.strings(),
            Some(c) if c.is_alphabetic() || c == '_' => self.keyword(),
            Some(c) => Err(self.error(format!("unexpected character {c:?}"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Literal>> {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }

            items.push(self.value()?);
            self.skip_trivia();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => continue,
                _ => return Err(self.error(format!("expected ',' or {close:?}"))),
            }
        }
    }

    fn parenthesized(&mut self) -> Result<Literal> {
        self.pos += 1;
        self.skip_trivia();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(Literal::Tuple(Vec::new()));
        }

        let first = self.value()?;
        self.skip_trivia();
        match self.bump() {
            // INVARIANT: Parentheses without a comma only group.
            Some(')') => Ok(first),
            Some(',') => {
                let mut items = vec![first];
                items.extend(self.sequence(')')?);
                Ok(Literal::Tuple(items))
            }
            _ => Err(self.error("expected ',' or ')'")),
        }
    }

    fn braced(&mut self) -> Result<Literal> {
        self.pos += 1;
        self.skip_trivia();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(Literal::Dict(Vec::new()));
        }

        let first = self.value()?;
        self.skip_trivia();
        if self.peek() != Some(':') {
            let mut items = vec![first];
            match self.bump() {
                Some('}') => return Ok(Literal::Set(items)),
                Some(',') => {
                    items.extend(self.sequence('}')?);
                    return Ok(Literal::Set(items));
                }
                _ => return Err(self.error("expected ',', ':' or '}'")),
            }
        }

        self.pos += 1;
        let mut items = vec![(first, self.value()?)];
        loop {
            self.skip_trivia();
            match self.bump() {
                Some('}') => return Ok(Literal::Dict(items)),
                Some(',') => {
                    self.skip_trivia();
                    if self.peek() == Some('}') {
                        self.pos += 1;
                        return Ok(Literal::Dict(items));
                    }
                    let key = self.value()?;
                    self.expect(':')?;
                    items.push((key, self.value()?));
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn signed(&mut self) -> Result<Literal> {
        let negative = self.bump() == Some('-');
        self.skip_trivia();
        match self.value()? {
            Literal::Int(value) if negative => Ok(Literal::Int(-value)),
            Literal::BigInt(digits) if negative => Ok(Literal::BigInt(format!("-{digits}"))),
            Literal::Float(value) if negative => Ok(Literal::Float(-value)),
            value @ (Literal::Int(_) | Literal::BigInt(_) | Literal::Float(_)) => Ok(value),
            _ => Err(self.error("unary sign applies to numbers only")),
        }
    }

    fn number(&mut self) -> Result<Literal> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let exponent_sign = matches!(c, '+' | '-')
                && matches!(
                    self.chars.get(self.pos.wrapping_sub(1)).copied(),
                    Some('e' | 'E')
                )
                && !self.chars[start..self.pos]
                    .iter()
                    .any(|x| x.eq_ignore_ascii_case(&'x'));
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let lower = text.to_ascii_lowercase();
        let parsed = if let Some(hex) = lower.strip_prefix("0x") {
            integer(hex, 16, &text)
        } else if let Some(oct) = lower.strip_prefix("0o") {
            integer(oct, 8, &text)
        } else if let Some(bin) = lower.strip_prefix("0b") {
            integer(bin, 2, &text)
        } else if lower.contains(['.', 'e']) {
            lower.parse::<f64>().ok().map(Literal::Float)
        } else {
            integer(&lower, 10, &text)
        };

        parsed.ok_or_else(|| self.error(format!("invalid number {text:?}")))
    }

    fn keyword(&mut self) -> Result<Literal> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }

        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" => Ok(Literal::Bool(true)),
            "False" => Ok(Literal::Bool(false)),
            "None" => Ok(Literal::None),
            _ => {
                self.pos = start;
                Err(self.error(format!("{word:?} is not a literal")))
            }
        }
    }

    /// Length of string prefix at current position if a string starts here.
    fn string_prefix_len(&self) -> Option<usize> {
        let mut len = 0;
        while let Some(c) = self.peek_at(len) {
            match c {
                '\'' | '"' => return Some(len),
                'r' | 'R' | 'u' | 'U' | 'b' | 'B' if len < 2 => len += 1,
                _ => return None,
            }
        }
        None
    }

    /// Parse one or more adjacent strings, concatenated.
    fn strings(&mut self) -> Result<Literal> {
        let mut out = String::new();
        while let Some(prefix_len) = self.string_prefix_len() {
            let raw = self.chars[self.pos..self.pos + prefix_len]
                .iter()
                .any(|c| matches!(c, 'r' | 'R'));
            self.pos += prefix_len;
            self.string(raw, &mut out)?;
            self.skip_trivia();
        }

        Ok(Literal::Str(out))
    }

    fn string(&mut self, raw: bool, out: &mut String) -> Result<()> {
        let quote = self.bump().ok_or_else(|| self.error("expected quote"))?;
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string"));
            };

            match c {
                c if c == quote && !triple => return Ok(()),
                c if c == quote && self.peek() == Some(quote) && self.peek_at(1) == Some(quote) => {
                    self.pos += 2;
                    return Ok(());
                }
                '\n' if !triple => return Err(self.error("unterminated string")),
                '\\' if raw => {
                    out.push('\\');
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                }
                '\\' => self.escape(out)?,
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<()> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated string"));
        };

        match c {
            '\n' => {}
            '\\' | '\'' | '"' => out.push(c),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            'x' => out.push(self.code_point(2)?),
            'u' => out.push(self.code_point(4)?),
            'U' => out.push(self.code_point(8)?),
            '0'..='7' => {
                let mut value = c.to_digit(8).unwrap_or_default();
                for _ in 0..2 {
                    match self.peek().and_then(|next| next.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            self.pos += 1;
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            // INVARIANT: Unknown escapes keep their backslash.
            other => {
                out.push('\\');
                out.push(other);
            }
        }

        Ok(())
    }

    fn code_point(&mut self, digits: usize) -> Result<char> {
        let end = self.pos + digits;
        if end > self.chars.len() {
            return Err(self.error("truncated escape sequence"));
        }

        let hex: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid escape sequence {hex:?}")))
    }
}

/// Manifest error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// No recognized manifest file in addon directory.
    #[error("no manifest found in {:?}", dir.display())]
    NotFound { dir: PathBuf },

    /// Manifest content is not a valid literal.
    #[error("manifest parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Manifest literal does not have the expected shape.
    #[error("malformed manifest: {0}")]
    Shape(String),
}

/// Friendly result alias :3
type Result<T, E = ManifestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn parse_typical_manifest() -> anyhow::Result<()> {
        let result: Manifest = indoc! {r#"
            # -*- coding: utf-8 -*-
            # Copyright 2019 XOE Labs
            {
                'name': "Sale Extra",
                'summary': 'Adds ' 'extra '
                           "sale features",
                'version': '12.0.1.0.0',
                'depends': [
                    'sale',  # core
                    "stock",
                ],
                'data': ('views/sale.xml',),
                'installable': True,
                'auto_install': False,
                'sequence': -10,
                'price': 1.5e2,
                'description': """
            Multi line
            description""",
            }
        "#}
        .parse()?;

        assert_eq!(result.depends, vec!["sale".to_string(), "stock".into()]);
        assert!(!result.auto_install);
        assert_eq!(
            result.extra.get("summary"),
            Some(&Literal::Str("Adds extra sale features".into()))
        );
        assert_eq!(
            result.extra.get("data"),
            Some(&Literal::Tuple(vec![Literal::Str("views/sale.xml".into())]))
        );
        assert_eq!(result.extra.get("installable"), Some(&Literal::Bool(true)));
        assert_eq!(result.extra.get("sequence"), Some(&Literal::Int(-10)));
        assert_eq!(result.extra.get("price"), Some(&Literal::Float(150.0)));
        assert_eq!(
            result.extra.get("description"),
            Some(&Literal::Str("\nMulti line\ndescription".into()))
        );

        Ok(())
    }

    #[test]
    fn missing_keys_use_defaults() -> anyhow::Result<()> {
        let result: Manifest = "{'name': 'base'}".parse()?;
        assert_eq!(result.depends, Vec::<String>::new());
        assert!(!result.auto_install);

        Ok(())
    }

    #[test_case("True", true; "boolean true")]
    #[test_case("False", false; "boolean false")]
    #[test_case("['sale', 'stock']", true; "non empty list")]
    #[test_case("[]", false; "empty list")]
    #[test_case("None", false; "none")]
    #[test]
    fn auto_install_truthiness(value: &str, expect: bool) {
        let result: Manifest = format!("{{'auto_install': {value}}}").parse().unwrap();
        pretty_assertions::assert_eq!(result.auto_install, expect);
    }

    #[test]
    fn integers_beyond_i64_are_kept() -> anyhow::Result<()> {
        let result: Manifest = indoc! {"
            {
                'depends': ['base'],
                'huge': 123456789012345678901234567890,
                'lowest': -9223372036854775808,
                'mask': 0xFFFF_FFFF_FFFF_FFFF_FF,
            }
        "}
        .parse()?;

        assert_eq!(result.depends, vec!["base".to_string()]);
        assert_eq!(
            result.extra.get("huge"),
            Some(&Literal::BigInt("123456789012345678901234567890".into()))
        );
        assert_eq!(
            result.extra.get("lowest"),
            Some(&Literal::BigInt("-9223372036854775808".into()))
        );
        assert_eq!(
            result.extra.get("mask"),
            Some(&Literal::BigInt("0xFFFFFFFFFFFFFFFFFF".into()))
        );
        assert!(result.extra["huge"].is_truthy());
        Ok(())
    }

    #[test_case(r#"{'a': "tab\tnew\nline"}"#, "tab\tnew\nline"; "common escapes")]
    #[test_case(r#"{'a': '\x41\u00e9\101'}"#, "A\u{e9}A"; "code points")]
    #[test_case(r#"{'a': r'C:\path\n'}"#, r"C:\path\n"; "raw string")]
    #[test_case(r#"{'a': u'it\'s'}"#, "it's"; "escaped quote")]
    #[test_case(r#"{'a': '\d'}"#, r"\d"; "unknown escape")]
    #[test]
    fn string_escapes(data: &str, expect: &str) {
        let result: Manifest = data.parse().unwrap();
        pretty_assertions::assert_eq!(result.extra.get("a"), Some(&Literal::Str(expect.into())));
    }

    #[test]
    fn parse_sets_and_nesting() -> anyhow::Result<()> {
        let result: Manifest = "{'a': {1, 0x10}, 'b': {'c': ((1), (2,))}}".parse()?;
        assert_eq!(
            result.extra.get("a"),
            Some(&Literal::Set(vec![Literal::Int(1), Literal::Int(16)]))
        );
        assert_eq!(
            result.extra.get("b"),
            Some(&Literal::Dict(vec![(
                Literal::Str("c".into()),
                Literal::Tuple(vec![Literal::Int(1), Literal::Tuple(vec![Literal::Int(2)])])
            )]))
        );

        Ok(())
    }

    #[test_case("{'depends': ['base'] + extra}"; "operator")]
    #[test_case("dict(depends=['base'])"; "call")]
    #[test_case("{'name': 'x'} {'name': 'y'}"; "trailing expression")]
    #[test_case("{'name': 'unterminated}"; "unterminated string")]
    #[test_case("{'name' 'x'"; "missing colon and brace")]
    #[test]
    fn reject_non_literal(data: &str) {
        let result = data.parse::<Manifest>();
        assert!(matches!(result, Err(ManifestError::Parse { .. })));
    }

    #[test]
    fn parse_error_reports_position() {
        let result = "{\n    'depends': [base],\n}".parse::<Manifest>();
        assert_eq!(
            result,
            Err(ManifestError::Parse {
                line: 2,
                column: 17,
                message: "\"base\" is not a literal".into(),
            })
        );
    }

    #[test_case("['base']"; "not a dictionary")]
    #[test_case("{'depends': 'base'}"; "depends not a list")]
    #[test_case("{'depends': ['base', 1]}"; "depends not strings")]
    #[test_case("{1: 'base'}"; "key not a string")]
    #[test]
    fn reject_malformed_shape(data: &str) {
        let result = data.parse::<Manifest>();
        assert!(matches!(result, Err(ManifestError::Shape(_))));
    }

    #[test]
    fn locate_manifest_by_priority() {
        let files = [
            PathBuf::from("addons/sale/__openerp__.py"),
            PathBuf::from("addons/sale/__manifest__.py"),
            PathBuf::from("addons/sale/models/__manifest__.py"),
            PathBuf::from("addons/stock/__terp__.py"),
        ];

        let result = locate(Path::new("addons/sale"), files.iter().map(PathBuf::as_path));
        assert_eq!(result, Ok(Path::new("addons/sale/__manifest__.py")));

        let result = locate(Path::new("addons/stock"), files.iter().map(PathBuf::as_path));
        assert_eq!(result, Ok(Path::new("addons/stock/__terp__.py")));

        let result = locate(Path::new("addons/web"), files.iter().map(PathBuf::as_path));
        assert_eq!(
            result,
            Err(ManifestError::NotFound {
                dir: PathBuf::from("addons/web"),
            })
        );
    }
}
