use miette::SourceSpan;
use winnow::{
    ascii::{digit0, digit1, space0},
    branch::alt,
    bytes::{one_of, take_till0, take_while1},
    combinator::opt,
    multi::separated0,
    sequence::{preceded, terminated},
    IResult, Parser,
};

use super::{SliceError, SliceItem, Token};
use crate::crds::Value;

const NEWAXIS: [&str; 3] = ["newaxis", "None", "np.newaxis"];

/// Keeps the full selection text around so tokens can point back into it.
#[derive(Debug)]
pub(crate) struct InputLocator<'a> {
    pub full_input: &'a str,
}

impl<'a> InputLocator<'a> {
    pub fn new(full_input: &'a str) -> Self {
        Self { full_input }
    }

    /// Span of `substr`, which must point into `full_input`.
    pub fn span_from_substr(&self, substr: &str) -> SourceSpan {
        let base_addr = self.full_input.as_ptr() as usize;
        let substr_addr = substr.as_ptr() as usize;
        let start = substr_addr.saturating_sub(base_addr).min(self.full_input.len());
        SourceSpan::from(start..start + substr.len())
    }
}

/// `[+-]?(digits(.digits?)?|.digits)([eE][+-]?digits)?`
pub(crate) fn number(i: &str) -> IResult<&str, &str> {
    (
        opt(one_of("+-")),
        alt(((digit1, opt((".", digit0))).recognize(), (".", digit1).recognize())),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    )
        .recognize()
        .parse_next(i)
}

/// A number with an optional trailing `f` marking it as a coordinate.
pub(crate) fn literal(i: &str) -> IResult<&str, (&str, bool)> {
    (preceded(space0, number), opt(one_of("fF")))
        .map(|(n, marker): (&str, Option<char>)| (n, marker.is_some()))
        .parse_next(i)
}

pub(crate) fn identifier(i: &str) -> IResult<&str, &str> {
    (
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        opt(take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')),
    )
        .recognize()
        .parse_next(i)
}

/// Parses a whole literal. Anything with a marker, a decimal point or an
/// exponent is a coordinate, the rest are indices.
pub(crate) fn parse_value(text: &str) -> Option<Value> {
    let (rest, (num, marker)) = literal.parse_next(text).ok()?;
    if !rest.trim().is_empty() {
        return None;
    }
    if marker || num.contains(['.', 'e', 'E']) {
        num.parse().ok().map(Value::Coord)
    } else {
        num.parse().ok().map(Value::Index)
    }
}

/// `start`, `:stop`, `:step` and anything past a third colon, as raw text.
type RawFields<'a> = (&'a str, Option<&'a str>, Option<&'a str>, Option<&'a str>);

/// One comma separated piece of a selection, before interpretation.
#[derive(Debug)]
struct RawToken<'a> {
    text: &'a str,
    name: Option<&'a str>,
    fields: RawFields<'a>,
}

fn field(i: &str) -> IResult<&str, &str> {
    take_till0(|c: char| c == ':' || c == ',').parse_next(i)
}

fn rhs_fields(i: &str) -> IResult<&str, RawFields<'_>> {
    (
        field,
        opt(preceded(":", field)),
        opt(preceded(":", field)),
        opt(preceded(":", take_till0(","))),
    )
        .parse_next(i)
}

/// `name =` in front of a token.
fn name_prefix(i: &str) -> IResult<&str, &str> {
    terminated(preceded(space0, identifier), (space0, "=")).parse_next(i)
}

fn raw_token(i: &str) -> IResult<&str, RawToken<'_>> {
    (opt(name_prefix), rhs_fields)
        .with_recognized()
        .map(|((name, fields), text)| RawToken {
            text: text.trim(),
            name,
            fields,
        })
        .parse_next(i)
}

fn interpret(raw: RawToken<'_>, locator: &InputLocator<'_>) -> Result<Token, SliceError> {
    let span = locator.span_from_substr(raw.text);
    let bad_token = || SliceError::BadToken {
        token: raw.text.to_string(),
        span: Some(span),
    };
    let (first, stop, step, extra) = raw.fields;
    if extra.is_some() {
        return Err(SliceError::TooManyColons {
            token: raw.text.to_string(),
            span: Some(span),
        });
    }

    let item = match stop {
        None => match first.trim() {
            rhs if NEWAXIS.contains(&rhs) => SliceItem::NewAxis,
            "..." => SliceItem::Ellipsis,
            rhs => parse_value(rhs).map(SliceItem::Value).ok_or_else(bad_token)?,
        },
        Some(stop) => {
            let bound = |s: &str| -> Result<Option<Value>, SliceError> {
                if s.trim().is_empty() {
                    Ok(None)
                } else {
                    parse_value(s).map(Some).ok_or_else(bad_token)
                }
            };
            let step = match step.map(str::trim).unwrap_or("") {
                "" => None,
                s => match parse_value(s) {
                    Some(Value::Index(step)) => Some(step),
                    _ => {
                        return Err(SliceError::BadStep {
                            token: s.to_string(),
                            span: Some(span),
                        })
                    }
                },
            };
            SliceItem::Range {
                start: bound(first)?,
                stop: bound(stop)?,
                step,
            }
        }
    };

    let name = raw.name.map(str::to_string);
    if let (Some(name), SliceItem::Ellipsis) = (&name, item) {
        return Err(SliceError::NamedEllipsis {
            name: name.clone(),
            span: Some(span),
        });
    }
    Ok(Token {
        name,
        item,
        span: Some(span),
    })
}

/// Parses the comma separated tokens of a selection. Empty pieces are
/// skipped.
pub(crate) fn parse_selection(text: &str) -> Result<Vec<Token>, SliceError> {
    let locator = InputLocator::new(text);
    let (rest, raw): (&str, Vec<RawToken<'_>>) =
        separated0(raw_token, ",")
            .parse_next(text)
            .map_err(|_| SliceError::BadToken {
                token: text.to_string(),
                span: None,
            })?;
    if !rest.is_empty() {
        return Err(SliceError::BadToken {
            token: rest.to_string(),
            span: Some(locator.span_from_substr(rest)),
        });
    }
    raw.into_iter()
        .filter(|t| !t.text.is_empty())
        .map(|t| interpret(t, &locator))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(parse_value("5"), Some(Value::Index(5)));
        assert_eq!(parse_value("-3"), Some(Value::Index(-3)));
        assert_eq!(parse_value("5f"), Some(Value::Coord(5.0)));
        assert_eq!(parse_value("0.5"), Some(Value::Coord(0.5)));
        assert_eq!(parse_value(".5"), Some(Value::Coord(0.5)));
        assert_eq!(parse_value("1e3"), Some(Value::Coord(1000.0)));
        assert_eq!(parse_value("-2.5e-1f"), Some(Value::Coord(-0.25)));
        assert_eq!(parse_value("abc"), None);
        assert_eq!(parse_value("5ff"), None);
    }

    #[test]
    fn spans_point_into_text() {
        let text = "x=1, bogus";
        let err = parse_selection(text).unwrap_err();
        assert_eq!(
            err,
            SliceError::BadToken {
                token: "bogus".into(),
                span: Some(SourceSpan::from(5..10)),
            }
        );
    }

    #[test]
    fn range_fields_and_names() {
        let tokens = parse_selection(" y = 1:2f:-1 ,, ::3,").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].name.as_deref(), Some("y"));
        assert_eq!(
            tokens[0].item,
            SliceItem::Range {
                start: Some(Value::Index(1)),
                stop: Some(Value::Coord(2.0)),
                step: Some(-1),
            }
        );
        assert_eq!(tokens[0].span, Some(SourceSpan::from(1..12)));
        assert_eq!(
            tokens[1].item,
            SliceItem::Range {
                start: None,
                stop: None,
                step: Some(3),
            }
        );
        assert!(parse_selection("").unwrap().is_empty());

        let err = parse_selection("0, z=1:2:3:4").unwrap_err();
        assert_eq!(
            err,
            SliceError::TooManyColons {
                token: "z=1:2:3:4".into(),
                span: Some(SourceSpan::from(3..12)),
            }
        );
        assert!(matches!(parse_selection("1=2"), Err(SliceError::BadToken { .. })));
    }

    #[test]
    fn identifiers() {
        assert_eq!(identifier.parse_next("new-x0").unwrap(), ("", "new-x0"));
        assert!(identifier.parse_next("0x").is_err());
    }
}
