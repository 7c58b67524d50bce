//! Time-slice expressions over the sorted children of a temporal dataset.
//!
//! An expression is a comma separated list of atoms. Each atom is a single
//! value or a `start:stop:step` range. Values are integer child indices,
//! seconds (`2.5`, `2.5f`), or letter-prefixed time stamps: `UT12:30:00.0`
//! is a duration, `UT2020-01-01T12:30:00.0` an absolute date that is
//! resolved against the dataset's base time.

use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use miette::Diagnostic;
use ndarray::Array1;
use thiserror::Error;
use winnow::{
    ascii::{digit0, space0},
    branch::alt,
    bytes::take_while1,
    sequence::preceded,
    IResult, Parser,
};

use crate::{
    common::IndexRange,
    crds::{Centering, CoordinateError, Coordinates, OutOfRange, Value},
    slice::parse::literal,
};

pub const TIME_AXIS: &str = "t";

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum TimeSliceError {
    #[error("Could not decipher time slice {text:?}: {reason}")]
    #[diagnostic(
        code(fieldtree::time::malformed),
        help("Time stamps need a letter prefix, as in UT12:00:00.0")
    )]
    Malformed { text: String, reason: String },
    #[error("Bad time stamp {token:?}: {reason}")]
    #[diagnostic(code(fieldtree::time::bad_datetime))]
    BadDatetime { token: String, reason: String },
    #[error("Cannot place {datetime} in time without a base time")]
    #[diagnostic(code(fieldtree::time::no_basetime))]
    NoBasetime { datetime: NaiveDateTime },
    #[error("There are no time steps to select from")]
    #[diagnostic(code(fieldtree::time::no_children))]
    NoChildren,
    #[error(transparent)]
    #[diagnostic(transparent)]
    Coordinate(#[from] CoordinateError),
}

fn malformed(text: &str, reason: impl Into<String>) -> TimeSliceError {
    TimeSliceError::Malformed {
        text: text.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeValue {
    Index(isize),
    Seconds(f64),
    Datetime(NaiveDateTime),
}

impl TimeValue {
    /// Seconds since `basetime`, or `None` for a plain index.
    pub fn as_seconds(&self, basetime: Option<NaiveDateTime>) -> Result<Option<f64>, TimeSliceError> {
        match *self {
            TimeValue::Index(_) => Ok(None),
            TimeValue::Seconds(s) => Ok(Some(s)),
            TimeValue::Datetime(datetime) => seconds_since(datetime, basetime).map(Some),
        }
    }

    fn to_value(self, basetime: Option<NaiveDateTime>) -> Result<Value, TimeSliceError> {
        match self {
            TimeValue::Index(i) => Ok(Value::Index(i)),
            TimeValue::Seconds(s) => Ok(Value::Coord(s)),
            TimeValue::Datetime(datetime) => seconds_since(datetime, basetime).map(Value::Coord),
        }
    }
}

fn seconds_since(datetime: NaiveDateTime, basetime: Option<NaiveDateTime>) -> Result<f64, TimeSliceError> {
    let base = basetime.ok_or(TimeSliceError::NoBasetime { datetime })?;
    let delta = datetime - base;
    Ok(delta
        .num_microseconds()
        .map_or(delta.num_seconds() as f64, |us| us as f64 / 1e6))
}

impl From<isize> for TimeValue {
    fn from(i: isize) -> Self {
        Self::Index(i)
    }
}

impl From<i32> for TimeValue {
    fn from(i: i32) -> Self {
        Self::Index(i as isize)
    }
}

impl From<f64> for TimeValue {
    fn from(s: f64) -> Self {
        Self::Seconds(s)
    }
}

impl From<NaiveDateTime> for TimeValue {
    fn from(d: NaiveDateTime) -> Self {
        Self::Datetime(d)
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeValue::Index(i) => write!(f, "{i}"),
            TimeValue::Seconds(s) => write!(f, "{s}f"),
            TimeValue::Datetime(d) => write!(f, "UT{}", d.format("%Y-%m-%dT%H:%M:%S%.3f")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeSlice {
    Single(TimeValue),
    Range {
        start: Option<TimeValue>,
        stop: Option<TimeValue>,
        step: Option<isize>,
    },
}

impl TimeSlice {
    pub fn full() -> Self {
        Self::Range {
            start: None,
            stop: None,
            step: None,
        }
    }

    pub fn range(start: impl Into<TimeValue>, stop: impl Into<TimeValue>) -> Self {
        Self::Range {
            start: Some(start.into()),
            stop: Some(stop.into()),
            step: None,
        }
    }

    /// Child indices selected out of `crds`' single time axis.
    fn resolve(&self, crds: &Coordinates, basetime: Option<NaiveDateTime>) -> Result<IndexRange, TimeSliceError> {
        match *self {
            TimeSlice::Single(v) => Ok(IndexRange::single(crds.index_for(
                TIME_AXIS,
                v.to_value(basetime)?,
                Centering::Node,
            )?)),
            TimeSlice::Range { start, stop, step } => {
                let start = start.map(|v| v.to_value(basetime)).transpose()?;
                let stop = stop.map(|v| v.to_value(basetime)).transpose()?;
                Ok(crds.range_for(TIME_AXIS, start, stop, step, Centering::Node)?)
            }
        }
    }
}

impl From<TimeValue> for TimeSlice {
    fn from(v: TimeValue) -> Self {
        Self::Single(v)
    }
}

impl fmt::Display for TimeSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSlice::Single(v) => write!(f, "{v}"),
            TimeSlice::Range { start, stop, step } => {
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                write!(f, ":")?;
                if let Some(stop) = stop {
                    write!(f, "{stop}")?;
                }
                if let Some(step) = step {
                    write!(f, ":{step}")?;
                }
                Ok(())
            }
        }
    }
}

/// A parsed time expression. Its atoms are resolved independently and
/// their indices concatenated in order.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSpec(pub Vec<TimeSlice>);

impl TimeSpec {
    pub fn full() -> Self {
        Self(vec![TimeSlice::full()])
    }

    pub fn parse(text: &str) -> Result<Self, TimeSliceError> {
        text.split(',').map(parse_slice).collect::<Result<_, _>>().map(Self)
    }

    pub fn slices(&self) -> &[TimeSlice] {
        &self.0
    }

    /// The single value this expression names, if it is one.
    pub fn single(&self) -> Option<TimeValue> {
        match self.0.as_slice() {
            [TimeSlice::Single(v)] => Some(*v),
            _ => None,
        }
    }

    /// Indices into `times`, which must be sorted.
    pub fn resolve(
        &self,
        times: &[f64],
        basetime: Option<NaiveDateTime>,
        policy: OutOfRange,
    ) -> Result<Vec<usize>, TimeSliceError> {
        if times.is_empty() {
            return Err(TimeSliceError::NoChildren);
        }
        let crds = Coordinates::new([(TIME_AXIS, Array1::from(times.to_vec()))])?.with_out_of_range(policy);
        let mut indices = Vec::new();
        for slice in &self.0 {
            indices.extend(slice.resolve(&crds, basetime)?.iter());
        }
        Ok(indices)
    }
}

impl FromStr for TimeSpec {
    type Err = TimeSliceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, slice) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{slice}")?;
        }
        Ok(())
    }
}

impl From<Vec<TimeSlice>> for TimeSpec {
    fn from(slices: Vec<TimeSlice>) -> Self {
        Self(slices)
    }
}

/// Anything that can stand in for a time expression.
pub trait ToTimeSpec {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError>;
}

impl ToTimeSpec for str {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        TimeSpec::parse(self)
    }
}

impl ToTimeSpec for String {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        TimeSpec::parse(self)
    }
}

impl ToTimeSpec for TimeSpec {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        Ok(self.clone())
    }
}

impl ToTimeSpec for TimeSlice {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        Ok(TimeSpec(vec![*self]))
    }
}

impl ToTimeSpec for TimeValue {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        Ok(TimeSpec(vec![TimeSlice::Single(*self)]))
    }
}

impl ToTimeSpec for f64 {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        TimeValue::from(*self).to_time_spec()
    }
}

impl ToTimeSpec for isize {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        TimeValue::from(*self).to_time_spec()
    }
}

impl ToTimeSpec for i32 {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        TimeValue::from(*self).to_time_spec()
    }
}

impl<T: ToTimeSpec + ?Sized> ToTimeSpec for &T {
    fn to_time_spec(&self) -> Result<TimeSpec, TimeSliceError> {
        (**self).to_time_spec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Lexeme<'a> {
    Colon,
    Stamp(&'a str),
    Number(&'a str, bool),
}

/// `[A-Z]+[-\d:T]+\.\d*`, case insensitive. The letters keep `12:30:00.0`
/// from reading as a range.
fn stamp(i: &str) -> IResult<&str, &str> {
    (
        take_while1(|c: char| c.is_ascii_alphabetic()),
        take_while1(|c: char| c.is_ascii_digit() || matches!(c, '-' | ':' | 'T' | 't')),
        ".",
        digit0,
    )
        .recognize()
        .parse_next(i)
}

fn lexeme(i: &str) -> IResult<&str, Lexeme<'_>> {
    preceded(
        space0,
        alt((
            stamp.map(Lexeme::Stamp),
            ":".map(|_| Lexeme::Colon),
            literal.map(|(n, marker)| Lexeme::Number(n, marker)),
        )),
    )
    .parse_next(i)
}

fn lex(text: &str) -> Result<Vec<Lexeme<'_>>, TimeSliceError> {
    let mut rest = text;
    let mut lexemes = Vec::new();
    loop {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            return Ok(lexemes);
        }
        match lexeme(trimmed) {
            Ok((r, lx)) => {
                lexemes.push(lx);
                rest = r;
            }
            Err(_) => return Err(malformed(text, format!("unexpected input {trimmed:?}"))),
        }
    }
}

fn stamp_value(token: &str) -> Result<TimeValue, TimeSliceError> {
    let body = token
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .trim_end_matches('.');
    let bad = |reason: String| TimeSliceError::BadDatetime {
        token: token.to_string(),
        reason,
    };
    if body.contains('-') {
        return NaiveDateTime::parse_from_str(body, DATETIME_FORMAT)
            .map(TimeValue::Datetime)
            .map_err(|e| bad(e.to_string()));
    }
    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() > 3 {
        return Err(bad("a duration has at most hours, minutes and seconds".into()));
    }
    let mut seconds = 0.0;
    for part in parts {
        let v: f64 = part.parse().map_err(|_| bad(format!("{part:?} is not a number")))?;
        seconds = seconds * 60.0 + v;
    }
    Ok(TimeValue::Seconds(seconds))
}

fn lexeme_value(lexeme: Lexeme<'_>, text: &str) -> Result<TimeValue, TimeSliceError> {
    match lexeme {
        Lexeme::Stamp(token) => stamp_value(token),
        Lexeme::Number(n, false) if !n.contains(|c| matches!(c, '.' | 'e' | 'E')) => n
            .parse()
            .map(TimeValue::Index)
            .map_err(|_| malformed(text, format!("{n:?} is not an index"))),
        Lexeme::Number(n, _) => n
            .parse()
            .map(TimeValue::Seconds)
            .map_err(|_| malformed(text, format!("{n:?} is not a time"))),
        Lexeme::Colon => Err(malformed(text, "expected a value")),
    }
}

fn parse_slice(text: &str) -> Result<TimeSlice, TimeSliceError> {
    let lexemes = lex(text)?;
    if let [single] = lexemes.as_slice() {
        if *single != Lexeme::Colon {
            return Ok(TimeSlice::Single(lexeme_value(*single, text)?));
        }
    }

    let mut fields: Vec<Vec<Lexeme<'_>>> = vec![Vec::new()];
    for lx in lexemes.iter().copied() {
        match lx {
            Lexeme::Colon => fields.push(Vec::new()),
            other => {
                if let Some(field) = fields.last_mut() {
                    field.push(other);
                }
            }
        }
    }
    if fields.len() > 3 {
        return Err(malformed(text, "a range has at most 3 fields"));
    }
    if fields.len() == 1 && !lexemes.is_empty() {
        return Err(malformed(text, "expected a single value or a range"));
    }

    let mut values = fields
        .iter()
        .map(|field| match field.as_slice() {
            [] => Ok(None),
            [lx] => lexeme_value(*lx, text).map(Some),
            _ => Err(malformed(text, "values must be separated by colons")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    values.resize(3, None);

    let step = match values[2] {
        None => None,
        Some(TimeValue::Index(step)) => Some(step),
        Some(_) => return Err(malformed(text, "the step must be an integer")),
    };
    Ok(TimeSlice::Range {
        start: values[0],
        stop: values[1],
        step,
    })
}
