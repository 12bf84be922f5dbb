use super::Keyvalue;
use crate::error::{Error, Result};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, value},
    sequence::{delimited, tuple},
    IResult,
};

// Whitespace and `//` line comments
fn comment(input: &str) -> IResult<&str, ()> {
    value((), tuple((tag("//"), take_till(|c| c == '\n'), opt(char('\n')))))(input)
}

fn ws_or_comment(input: &str) -> IResult<&str, ()> {
    let (input, _) = multispace0(input)?;
    let mut remaining = input;
    while let Ok((input, _)) = comment(remaining) {
        let (input, _) = multispace0(input)?;
        remaining = input;
    }
    Ok((remaining, ()))
}

// Quoted strings are taken verbatim; Hammer writes no escape sequences
fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_till(|c| c == '"'), char('"'))(input)
}

fn bare(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && !matches!(c, '{' | '}' | '"'))(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    alt((quoted, bare))(input)
}

// Conditional flags like `[$X360]` trail some values; they are accepted and dropped
fn flag(input: &str) -> IResult<&str, ()> {
    value(
        (),
        tuple((
            alt((tag("[$"), tag("[!$"))),
            take_till(|c| c == ']' || c == '\n'),
            char(']'),
        )),
    )(input)
}

fn block_body(input: &str) -> IResult<&str, Vec<Keyvalue>> {
    let (input, _) = char('{')(input)?;
    let (input, children) = keyvalue_list(input)?;
    let (input, _) = ws_or_comment(input)?;
    let (input, _) = char('}')(input)?;
    Ok((input, children))
}

enum Body<'a> {
    Leaf(&'a str),
    Block(Vec<Keyvalue>),
}

fn keyvalue(input: &str) -> IResult<&str, Keyvalue> {
    let (input, name) = token(input)?;
    let (input, _) = ws_or_comment(input)?;
    let (input, body) = alt((map(block_body, Body::Block), map(token, Body::Leaf)))(input)?;
    let (input, _) = opt(tuple((multispace0, flag)))(input)?;

    let kv = match body {
        Body::Leaf(v) => Keyvalue::leaf(name, v),
        Body::Block(children) => Keyvalue::block(name, children),
    };
    Ok((input, kv))
}

fn keyvalue_list(input: &str) -> IResult<&str, Vec<Keyvalue>> {
    let mut items = Vec::new();
    let mut remaining = input;
    loop {
        let (input, _) = ws_or_comment(remaining)?;
        if input.is_empty() || input.starts_with('}') {
            return Ok((input, items));
        }
        let (input, kv) = keyvalue(input)?;
        items.push(kv);
        remaining = input;
    }
}

fn line_of(source: &str, rest: &str) -> usize {
    let consumed = source.len() - rest.len();
    source[..consumed].matches('\n').count() + 1
}

/// Parse key-value text into a list of top-level nodes
pub fn parse_keyvalues(source: &str) -> Result<Vec<Keyvalue>> {
    match keyvalue_list(source) {
        Ok((rest, items)) => {
            if rest.is_empty() {
                Ok(items)
            } else {
                Err(Error::Parse {
                    line: line_of(source, rest),
                    message: "Unmatched closing brace".to_string(),
                })
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let message = if e.input.is_empty() {
                "Unexpected end of file".to_string()
            } else {
                format!("Unexpected token near {:?}", e.input.chars().take(16).collect::<String>())
            };
            Err(Error::Parse {
                line: line_of(source, e.input),
                message,
            })
        }
        Err(nom::Err::Incomplete(_)) => Err(Error::Parse {
            line: line_of(source, ""),
            message: "Unexpected end of file".to_string(),
        }),
    }
}
