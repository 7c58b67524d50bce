use miette::Diagnostic;
use thiserror::Error;

use crate::{crds::CoordinateError, field::FieldError, slice::SliceError, time::TimeSliceError};

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Coordinate(#[from] CoordinateError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Slice(#[from] SliceError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    TimeSlice(#[from] TimeSliceError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Field(#[from] FieldError),
    #[error("No {kind} named {name:?}")]
    #[diagnostic(code(fieldtree::not_found))]
    NotFound { kind: &'static str, name: String },
    #[error("Cannot look up {item:?}, no active child is set")]
    #[diagnostic(
        code(fieldtree::no_active_child),
        help("Activate a child of the dataset first")
    )]
    NoActiveChild { item: String },
    #[error("Dataset has no children to take times from")]
    #[diagnostic(code(fieldtree::no_temporal_dataset))]
    NoTemporalDataset,
    #[error("Grid {grid:?} already has a field named {name:?}")]
    #[diagnostic(code(fieldtree::duplicate_field))]
    DuplicateField { grid: String, name: String },
    #[error("Grid {grid:?} has no coordinates")]
    #[diagnostic(code(fieldtree::no_coordinates))]
    NoCoordinates { grid: String },
    #[error("Cannot evaluate {expr:?}, no expression evaluator is registered")]
    #[diagnostic(code(fieldtree::no_evaluator))]
    NoEvaluator { expr: String },
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether this is a plain missing-name lookup, the kind of error that
    /// lets a lookup fall back to somewhere else.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
