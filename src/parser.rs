//! Parser for the build-file literal grammar.
//!
//! A build file is a single map literal. Maps use quoted string keys, lists
//! are ordered and may nest, strings are single- or double-quoted, integers
//! are signed 64-bit, booleans are `true`/`false`. `#` starts a line
//! comment; trailing commas are allowed. This is a data syntax, not a
//! program: nothing here evaluates anything.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::{char as literal_char, digit1, multispace1, satisfy};
use nom::combinator::{all_consuming, cut, map, map_res, not, opt, peek, recognize, value};
use nom::error::{ContextError, ErrorKind, ParseError};
use nom::multi::{many0_count, separated_list0};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated};
use nom::IResult;

use crate::error::Error;
use crate::value::{BuildMap, Value};

/// Parse one build file. The top level must be a map.
pub fn parse_build_file(file: &str, contents: &str) -> crate::error::Result<BuildMap> {
    let result = all_consuming(delimited(
        space,
        context("a map at the top level", map_literal),
        space,
    ))(contents);

    match result {
        Ok((_, Value::Map(build_map))) => Ok(build_map),
        Ok(_) => unreachable!("map_literal only produces maps"),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let (line, column) = position(contents, e.at);
            Err(Error::Parse {
                file: file.to_owned(),
                line,
                column,
                message: e.message,
            })
        }
        Err(nom::Err::Incomplete(_)) => unreachable!("complete parsers never suspend"),
    }
}

/// The error carried through the nom combinators: where parsing stopped and
/// what was expected there. Deeper positions win when combinators disagree.
#[derive(Debug)]
pub struct SyntaxError<'a> {
    pub at: &'a str,
    pub message: String,
}

pub type PResult<'a, T> = IResult<&'a str, T, SyntaxError<'a>>;

impl<'a> ParseError<&'a str> for SyntaxError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        SyntaxError {
            at: input,
            message: "unexpected input".to_owned(),
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a, E> nom::error::FromExternalError<&'a str, E> for SyntaxError<'a> {
    fn from_external_error(input: &'a str, _kind: ErrorKind, _e: E) -> Self {
        SyntaxError {
            at: input,
            message: "integer literal out of range".to_owned(),
        }
    }
}

impl<'a> ContextError<&'a str> for SyntaxError<'a> {
    fn add_context(input: &'a str, ctx: &'static str, other: Self) -> Self {
        // Only relabel errors that happened right here; a deeper error
        // already has a more precise message.
        if other.at.len() == input.len() {
            SyntaxError {
                at: input,
                message: format!("expected {}", ctx),
            }
        } else {
            other
        }
    }
}

fn context<'a, T>(
    ctx: &'static str,
    parser: impl FnMut(&'a str) -> PResult<'a, T>,
) -> impl FnMut(&'a str) -> PResult<'a, T> {
    nom::error::context(ctx, parser)
}

/// Whitespace and `#` line comments between tokens.
pub fn space(input: &str) -> PResult<()> {
    value(
        (),
        many0_count(alt((
            value((), multispace1),
            value((), pair(literal_char('#'), opt(is_not("\n")))),
        ))),
    )(input)
}

pub fn token<'a, T>(
    parser: impl FnMut(&'a str) -> PResult<'a, T>,
) -> impl FnMut(&'a str) -> PResult<'a, T> {
    preceded(space, parser)
}

/// A keyword that must not run into a following identifier character.
pub fn word<'a>(keyword: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    terminated(
        tag(keyword),
        peek(not(satisfy(|c: char| c.is_alphanumeric() || c == '_'))),
    )
}

pub fn string_literal(input: &str) -> PResult<String> {
    let (body, quote) = alt((literal_char('\''), literal_char('"')))(input)?;

    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((offset, c)) = chars.next() {
        if c == quote {
            return Ok((&body[offset + c.len_utf8()..], out));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, escaped)) => out.push(escaped),
                None => break,
            }
        } else {
            out.push(c);
        }
    }

    Err(nom::Err::Failure(SyntaxError {
        at: input,
        message: "unterminated string literal".to_owned(),
    }))
}

pub fn integer_literal(input: &str) -> PResult<i64> {
    map_res(
        recognize(pair(opt(literal_char('-')), digit1)),
        str::parse::<i64>,
    )(input)
}

fn boolean_literal(input: &str) -> PResult<bool> {
    alt((value(true, word("true")), value(false, word("false"))))(input)
}

/// `null` is part of the wire syntax but has no place in the value model,
/// so it is rejected where it appears rather than smuggled through.
fn null_literal(input: &str) -> PResult<Value> {
    let (_, _) = word("null")(input)?;
    Err(nom::Err::Failure(SyntaxError {
        at: input,
        message: "the null value is not supported".to_owned(),
    }))
}

fn list_literal(input: &str) -> PResult<Value> {
    map(
        delimited(
            literal_char('['),
            terminated(
                separated_list0(token(literal_char(',')), value_literal),
                opt(token(literal_char(','))),
            ),
            cut(token(context("']' or another list item", literal_char(']')))),
        ),
        Value::List,
    )(input)
}

fn map_entry(input: &str) -> PResult<(String, Value)> {
    separated_pair(
        string_literal,
        cut(token(context("':' after key", literal_char(':')))),
        cut(value_literal),
    )(input)
}

fn map_literal(input: &str) -> PResult<Value> {
    map(
        delimited(
            literal_char('{'),
            terminated(
                separated_list0(token(literal_char(',')), token(map_entry)),
                opt(token(literal_char(','))),
            ),
            cut(token(context("'}' or another key", literal_char('}')))),
        ),
        |entries| {
            // Duplicate keys follow literal-syntax convention: last one wins.
            Value::Map(entries.into_iter().collect::<BuildMap>())
        },
    )(input)
}

fn value_literal(input: &str) -> PResult<Value> {
    token(context(
        "a value",
        alt((
            map_literal,
            list_literal,
            map(string_literal, Value::Str),
            map(integer_literal, Value::Int),
            map(boolean_literal, Value::Bool),
            null_literal,
        )),
    ))(input)
}

/// 1-based line and column of the point where `at` begins in `contents`.
fn position(contents: &str, at: &str) -> (usize, usize) {
    let offset = contents.len() - at.len();
    let consumed = &contents[..offset];
    let line = consumed.matches('\n').count() + 1;
    let column = match consumed.rfind('\n') {
        Some(newline) => offset - newline,
        None => offset + 1,
    };
    (line, column)
}
