// #![warn(clippy::pedantic)]

// #![warn(clippy::nursery)]
// #![warn(clippy::cargo)]
#![warn(clippy::complexity)]
#![warn(clippy::correctness)]
#![warn(clippy::perf)]
#![warn(clippy::style)]
#![warn(clippy::suspicious)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
// #![warn(clippy::todo)]
// #![warn(clippy::unimplemented)]
// #![warn(clippy::dbg_macro)]
// #![warn(clippy::unreachable)]
// #![warn(clippy::panic)]

// #![warn(clippy::unwrap_used)]
// #![warn(clippy::expect_used)]

//! Coordinate-aware slicing of gridded field data, organized as a tree of
//! datasets, time steps, grids and fields.

pub mod bucket;
pub mod cached;
pub mod common;
pub mod crds;
pub mod dataset;
mod err;
pub mod field;
pub mod grid;
pub mod slice;
pub mod time;
pub mod tree;

pub use crds::{Centering, CoordAxis, Coordinates, OutOfRange, Value};
pub use dataset::{Child, Dataset, DatasetTemporal, Item};
pub use err::Error;
pub use field::{Field, FieldKind, FieldSource, Layout};
pub use grid::{DuplicatePolicy, Grid, GridConfig, GridType};
pub use slice::{Selection, SliceItem, ToSelection};
pub use time::{TimeSlice, TimeSpec, TimeValue, ToTimeSpec};
pub use tree::Node;
