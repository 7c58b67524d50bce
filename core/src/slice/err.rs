use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::crds::CoordinateError;

#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum SliceError {
    #[error("A selection can contain at most one ellipsis")]
    #[diagnostic(code(fieldtree::slice::multiple_ellipsis))]
    MultipleEllipsis {
        #[label("Second ellipsis")]
        span: Option<SourceSpan>,
    },
    #[error("Selection consumes {tokens} axes, but only {axes} are available")]
    #[diagnostic(
        code(fieldtree::slice::too_many_tokens),
        help("Add an ellipsis or name the axes explicitly")
    )]
    TooManyTokens { tokens: usize, axes: usize },
    #[error("Could not parse {token:?}")]
    #[diagnostic(
        code(fieldtree::slice::bad_token),
        help("Expected an integer index, a coordinate like 1.5 or 2f, a range lo:hi:step, newaxis or ...")
    )]
    BadToken {
        token: String,
        #[label("Here")]
        span: Option<SourceSpan>,
    },
    #[error("Ellipsis cannot be assigned to axis {name:?}")]
    #[diagnostic(code(fieldtree::slice::named_ellipsis))]
    NamedEllipsis {
        name: String,
        #[label("Named ellipsis")]
        span: Option<SourceSpan>,
    },
    #[error("Axis {name:?} is selected or created more than once")]
    #[diagnostic(code(fieldtree::slice::duplicate_name))]
    DuplicateName {
        name: String,
        #[label("Named again here")]
        span: Option<SourceSpan>,
    },
    #[error("Range {token:?} has more than 3 colon separated fields")]
    #[diagnostic(code(fieldtree::slice::too_many_colons))]
    TooManyColons {
        token: String,
        #[label("Expected start:stop:step")]
        span: Option<SourceSpan>,
    },
    #[error("Range step {token:?} must be an integer")]
    #[diagnostic(code(fieldtree::slice::bad_step))]
    BadStep {
        token: String,
        #[label("Not an integer")]
        span: Option<SourceSpan>,
    },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Coordinate(#[from] CoordinateError),
}
