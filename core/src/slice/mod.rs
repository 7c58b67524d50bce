//! Slice selections over named axes.
//!
//! A selection is a list of tokens, given either as structured
//! [`SliceItem`]s or as text like `"x=1.5f:3f, ..., None, 2"`. Planning maps
//! the tokens onto the axes of a [`Coordinates`], resolving finds the
//! concrete index ranges.

mod err;
pub(crate) mod parse;
mod plan;

use std::{fmt, str::FromStr};

use miette::SourceSpan;
use serde::{Deserialize, Serialize};

use crate::{
    common::IndexRange,
    crds::{Centering, Coordinates, Value},
};

pub use err::SliceError;
pub use plan::{plan, resolve, Planned};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SliceItem {
    Value(Value),
    Range {
        start: Option<Value>,
        stop: Option<Value>,
        step: Option<isize>,
    },
    NewAxis,
    Ellipsis,
}

impl SliceItem {
    /// `:`
    pub fn full() -> Self {
        Self::Range {
            start: None,
            stop: None,
            step: None,
        }
    }

    pub fn range(start: impl Into<Value>, stop: impl Into<Value>) -> Self {
        Self::Range {
            start: Some(start.into()),
            stop: Some(stop.into()),
            step: None,
        }
    }

    /// Whether the item selects along a source axis.
    pub fn consumes_axis(&self) -> bool {
        matches!(self, Self::Value(_) | Self::Range { .. })
    }
}

impl From<Value> for SliceItem {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<i32> for SliceItem {
    fn from(i: i32) -> Self {
        Self::Value(Value::Index(i as isize))
    }
}

impl From<isize> for SliceItem {
    fn from(i: isize) -> Self {
        Self::Value(Value::Index(i))
    }
}

impl From<f64> for SliceItem {
    fn from(v: f64) -> Self {
        Self::Value(Value::Coord(v))
    }
}

impl fmt::Display for SliceItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: &Option<Value>| v.map(|v| v.to_string()).unwrap_or_default();
        match self {
            SliceItem::Value(v) => write!(f, "{v}"),
            SliceItem::Range { start, stop, step } => {
                write!(f, "{}:{}", opt(start), opt(stop))?;
                if let Some(step) = step {
                    write!(f, ":{step}")?;
                }
                Ok(())
            }
            SliceItem::NewAxis => write!(f, "newaxis"),
            SliceItem::Ellipsis => write!(f, "..."),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub name: Option<String>,
    pub item: SliceItem,
    /// Location of the token in the selection text, if it came from text.
    pub span: Option<SourceSpan>,
}

impl Token {
    pub fn new(item: impl Into<SliceItem>) -> Self {
        Self {
            name: None,
            item: item.into(),
            span: None,
        }
    }

    pub fn named(name: impl Into<String>, item: impl Into<SliceItem>) -> Self {
        Self {
            name: Some(name.into()),
            item: item.into(),
            span: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    tokens: Vec<Token>,
}

impl Selection {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn parse(text: &str) -> Result<Self, SliceError> {
        parse::parse_selection(text).map(Self::new)
    }

    pub fn push(mut self, item: impl Into<SliceItem>) -> Self {
        self.tokens.push(Token::new(item));
        self
    }

    pub fn named(mut self, name: impl Into<String>, item: impl Into<SliceItem>) -> Self {
        self.tokens.push(Token::named(name, item));
        self
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Splits off the tokens addressed to `name`, leaving the rest.
    pub(crate) fn take_named(&self, name: &str) -> (Vec<Token>, Selection) {
        let (taken, rest): (Vec<Token>, Vec<Token>) = self
            .tokens
            .iter()
            .cloned()
            .partition(|t| t.name.as_deref() == Some(name) && t.item != SliceItem::NewAxis);
        (taken, Selection::new(rest))
    }

    /// Resolves the selection against `crds`. With `keep`, single values
    /// leave an axis of extent 1, otherwise the axis is dropped.
    pub fn resolve(
        &self,
        crds: &Coordinates,
        centering: Centering,
        keep: bool,
    ) -> Result<Vec<ResolvedAxis>, SliceError> {
        let names = crds.axis_names();
        let planned = plan(&self.tokens, &names)?;
        resolve(&planned, crds, centering, keep)
    }
}

impl FromStr for Selection {
    type Err = SliceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.tokens.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if let Some(name) = &t.name {
                write!(f, "{name}=")?;
            }
            write!(f, "{}", t.item)?;
        }
        Ok(())
    }
}

/// Anything that can be turned into a [`Selection`].
pub trait ToSelection {
    fn to_selection(&self) -> Result<Selection, SliceError>;
}

impl ToSelection for str {
    fn to_selection(&self) -> Result<Selection, SliceError> {
        Selection::parse(self)
    }
}

impl ToSelection for String {
    fn to_selection(&self) -> Result<Selection, SliceError> {
        Selection::parse(self)
    }
}

impl ToSelection for Selection {
    fn to_selection(&self) -> Result<Selection, SliceError> {
        Ok(self.clone())
    }
}

impl ToSelection for [SliceItem] {
    fn to_selection(&self) -> Result<Selection, SliceError> {
        Ok(Selection::new(self.iter().map(|&item| Token::new(item)).collect()))
    }
}

impl ToSelection for Vec<SliceItem> {
    fn to_selection(&self) -> Result<Selection, SliceError> {
        self.as_slice().to_selection()
    }
}

impl<T: ToSelection + ?Sized> ToSelection for &T {
    fn to_selection(&self) -> Result<Selection, SliceError> {
        (**self).to_selection()
    }
}

/// What happens to one output axis after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAxis {
    Keep { axis: String, range: IndexRange },
    Drop { axis: String, index: usize },
    NewAxis { name: String },
}

impl ResolvedAxis {
    pub fn name(&self) -> &str {
        match self {
            ResolvedAxis::Keep { axis, .. } | ResolvedAxis::Drop { axis, .. } => axis,
            ResolvedAxis::NewAxis { name } => name,
        }
    }
}

#[cfg(test)]
mod tests;
