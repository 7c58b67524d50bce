pub mod range;

pub use range::{IndexRange, Range};
