use miette::Diagnostic;
use thiserror::Error;

use super::SourceError;
use crate::{crds::CoordinateError, slice::SliceError};

#[derive(Debug, Error, Diagnostic)]
pub enum FieldError {
    #[error("Field {name:?} has shape {found:?}, but its coordinates expect {expected:?}")]
    #[diagnostic(code(fieldtree::field::shape_mismatch))]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Failed to load field {name:?}")]
    #[diagnostic(code(fieldtree::field::source))]
    Source {
        name: String,
        #[source]
        source: SourceError,
    },
    #[error("Field {name:?} is not a vector field")]
    #[diagnostic(code(fieldtree::field::not_vector))]
    NotVector { name: String },
    #[error("Component {index} is out of range for field {name:?} with {ncomp} components")]
    #[diagnostic(code(fieldtree::field::component_out_of_range))]
    ComponentOutOfRange { name: String, index: isize, ncomp: usize },
    #[error("Invalid component selection {selection:?} on field {name:?}")]
    #[diagnostic(
        code(fieldtree::field::bad_component),
        help("Components are selected with a single integer or integer range, e.g. comp=0 or comp=0:2")
    )]
    BadComponent { name: String, selection: String },
    #[error("Cannot broadcast values of shape {from:?} to {to:?}")]
    #[diagnostic(code(fieldtree::field::broadcast))]
    Broadcast { from: Vec<usize>, to: Vec<usize> },
    #[error(transparent)]
    #[diagnostic(code(fieldtree::field::array_shape))]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Slice(#[from] SliceError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Coordinate(#[from] CoordinateError),
}
