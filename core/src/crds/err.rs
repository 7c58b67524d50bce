use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum CoordinateError {
    #[error("Unknown axis {axis:?}")]
    #[diagnostic(code(fieldtree::crds::unknown_axis), help("Available axes: {available}"))]
    UnknownAxis { axis: String, available: String },
    #[error("Axis {axis:?} is defined more than once")]
    #[diagnostic(code(fieldtree::crds::duplicate_axis))]
    DuplicateAxis { axis: String },
    #[error("Coordinate {value} is outside of axis {axis:?} [{low}, {high}]")]
    #[diagnostic(
        code(fieldtree::crds::out_of_range),
        help("Use the clamping out-of-range policy to snap to the nearest edge")
    )]
    OutOfRange {
        axis: String,
        value: f64,
        low: f64,
        high: f64,
    },
    #[error("Index {index} is out of bounds for axis {axis:?} of length {len}")]
    #[diagnostic(code(fieldtree::crds::index_out_of_range))]
    IndexOutOfRange { axis: String, index: isize, len: usize },
    #[error("Axis {axis:?} has no points")]
    #[diagnostic(code(fieldtree::crds::empty_axis))]
    EmptyAxis { axis: String },
    #[error("Slice step on axis {axis:?} cannot be zero")]
    #[diagnostic(code(fieldtree::crds::zero_step))]
    ZeroStep { axis: String },
}
