//! Named coordinate axes of a rectilinear grid.
//!
//! Every axis stores its node positions; cell centers are the midpoints
//! between neighbouring nodes. All coordinate lookups assume the node
//! positions of an axis are ascending.

mod err;

use std::{collections::BTreeSet, fmt};

use derive_more::Display;
use get_size::GetSize;
use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    common::{IndexRange, Range},
    slice::ResolvedAxis,
};

pub use err::CoordinateError;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Centering {
    #[display(fmt = "node")]
    Node,
    #[display(fmt = "cell")]
    Cell,
}

/// What to do with a single coordinate value outside of an axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutOfRange {
    /// Snap to the nearest edge and log a warning.
    #[default]
    Clamp,
    Error,
}

/// A single position along an axis, either a raw array index or a physical
/// coordinate. `Coord(5.0)` and `Index(5)` are different things.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Index(isize),
    Coord(f64),
}

impl From<isize> for Value {
    fn from(i: isize) -> Self {
        Self::Index(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Index(i as isize)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Coord(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Index(i) => write!(f, "{i}"),
            Value::Coord(v) => write!(f, "{v}f"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordAxis {
    name: String,
    nc: Array1<f64>,
    cc: Array1<f64>,
}

impl CoordAxis {
    /// Cell centers are the midpoints of `nc`. An axis with a single node
    /// is a collapsed dimension: its one point serves as both node and
    /// cell, so it has one cell rather than none and cell-centered data of
    /// extent 1 fits it.
    pub fn new(name: impl Into<String>, nc: Array1<f64>) -> Self {
        let cc = if nc.len() < 2 {
            nc.clone()
        } else {
            (&nc.slice(ndarray::s![..-1]) + &nc.slice(ndarray::s![1..])) * 0.5
        };
        Self {
            name: name.into(),
            nc,
            cc,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nc(&self) -> &Array1<f64> {
        &self.nc
    }

    pub fn cc(&self) -> &Array1<f64> {
        &self.cc
    }

    pub fn points(&self, centering: Centering) -> &Array1<f64> {
        match centering {
            Centering::Node => &self.nc,
            Centering::Cell => &self.cc,
        }
    }

    pub fn len(&self, centering: Centering) -> usize {
        self.points(centering).len()
    }

    /// Cells need real edges to be treated as cells. An axis with a single
    /// node falls back to plain point semantics.
    fn has_cells(&self, centering: Centering) -> bool {
        centering == Centering::Cell && self.nc.len() >= 2
    }

    /// Index of the first element reaching `v` from above.
    fn lower_index(&self, v: f64, centering: Centering) -> usize {
        if self.has_cells(centering) {
            self.nc.as_slice().map_or(0, |nc| nc[1..].partition_point(|&r| r <= v))
        } else {
            lower_index(self.points(centering), v)
        }
    }

    /// One past the last element reaching `v` from below.
    fn upper_index(&self, v: f64, centering: Centering) -> usize {
        if self.has_cells(centering) {
            let n = self.nc.len();
            self.nc
                .as_slice()
                .map_or(0, |nc| nc[..n - 1].partition_point(|&l| l < v))
        } else {
            upper_index(self.points(centering), v)
        }
    }

    fn sub_axis(&self, range: &IndexRange, centering: Centering) -> CoordAxis {
        let nc = if range.is_empty() {
            Array1::zeros(0)
        } else if !self.has_cells(centering) {
            Array1::from_iter(range.iter().map(|i| self.nc[i]))
        } else if range.len == 1 {
            let i = range.start;
            Array1::from(vec![self.nc[i], self.nc[i + 1]])
        } else if range.step.abs() == 1 {
            let (lo, hi) = match (range.first(), range.last()) {
                (Some(a), Some(b)) => (a.min(b), a.max(b)),
                _ => (0, 0),
            };
            let span = self.nc.slice(ndarray::s![lo..hi + 2]).to_owned();
            if range.step < 0 {
                span.slice(ndarray::s![..;-1]).to_owned()
            } else {
                span
            }
        } else {
            let centers: Vec<f64> = range.iter().map(|i| self.cc[i]).collect();
            nodes_around(&centers)
        };
        CoordAxis::new(self.name.clone(), nc)
    }
}

/// Rebuilds node positions around a run of at least two cell centers.
fn nodes_around(centers: &[f64]) -> Array1<f64> {
    let k = centers.len();
    let mut nodes = Vec::with_capacity(k + 1);
    nodes.push(centers[0] - 0.5 * (centers[1] - centers[0]));
    nodes.extend(centers.windows(2).map(|w| 0.5 * (w[0] + w[1])));
    nodes.push(centers[k - 1] + 0.5 * (centers[k - 1] - centers[k - 2]));
    Array1::from(nodes)
}

/// Position of the point closest to `v`. Ties go to the lower index.
pub(crate) fn nearest_index(points: impl IntoIterator<Item = f64>, v: f64) -> Option<usize> {
    points
        .into_iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, p)| {
            let d = (p - v).abs();
            match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            }
        })
        .map(|(i, _)| i)
}

/// Number of points strictly below `v`.
pub(crate) fn lower_index(points: &Array1<f64>, v: f64) -> usize {
    points.iter().take_while(|&&p| p < v).count()
}

/// Number of points at or below `v`.
pub(crate) fn upper_index(points: &Array1<f64>, v: f64) -> usize {
    points.iter().take_while(|&&p| p <= v).count()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coordinates {
    axes: Vec<CoordAxis>,
    reflections: BTreeSet<String>,
    out_of_range: OutOfRange,
}

impl Coordinates {
    pub fn new<S: Into<String>>(
        axes: impl IntoIterator<Item = (S, Array1<f64>)>,
    ) -> Result<Self, CoordinateError> {
        let mut out: Vec<CoordAxis> = Vec::new();
        for (name, nc) in axes {
            let axis = CoordAxis::new(name, nc);
            if out.iter().any(|a| a.name == axis.name) {
                return Err(CoordinateError::DuplicateAxis { axis: axis.name });
            }
            out.push(axis);
        }
        Ok(Self {
            axes: out,
            reflections: BTreeSet::new(),
            out_of_range: OutOfRange::default(),
        })
    }

    /// Evenly spaced axes given as `(name, low, high, node count)`.
    pub fn uniform<S: Into<String>>(
        axes: impl IntoIterator<Item = (S, f64, f64, usize)>,
    ) -> Result<Self, CoordinateError> {
        Self::new(
            axes.into_iter()
                .map(|(name, lo, hi, n)| (name, Array1::linspace(lo, hi, n))),
        )
    }

    /// Coordinates for bare data of the given shape. Node data gets nodes at
    /// `0..n`, cell data gets nodes at `-0.5..n-0.5` so its centers are
    /// the integers.
    pub fn default_for(shape: &[usize], centering: Centering) -> Self {
        let axes = shape.iter().enumerate().map(|(i, &n)| {
            let nc = match centering {
                Centering::Node => Array1::from_iter((0..n).map(|j| j as f64)),
                Centering::Cell => Array1::from_iter((0..=n).map(|j| j as f64 - 0.5)),
            };
            (default_axis_name(i), nc)
        });
        Self {
            axes: axes.map(|(name, nc)| CoordAxis::new(name, nc)).collect(),
            reflections: BTreeSet::new(),
            out_of_range: OutOfRange::default(),
        }
    }

    pub fn with_out_of_range(mut self, policy: OutOfRange) -> Self {
        self.out_of_range = policy;
        self
    }

    pub fn with_reflections<S: Into<String>>(
        mut self,
        axes: impl IntoIterator<Item = S>,
    ) -> Result<Self, CoordinateError> {
        for axis in axes {
            let axis = axis.into();
            self.axis_index(&axis)?;
            self.reflections.insert(axis);
        }
        Ok(self)
    }

    pub fn out_of_range(&self) -> OutOfRange {
        self.out_of_range
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> &[CoordAxis] {
        &self.axes
    }

    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn axis_index(&self, axis: &str) -> Result<usize, CoordinateError> {
        self.axes
            .iter()
            .position(|a| a.name == axis)
            .ok_or_else(|| CoordinateError::UnknownAxis {
                axis: axis.to_string(),
                available: self.axis_names().join(", "),
            })
    }

    pub fn axis(&self, axis: &str) -> Result<&CoordAxis, CoordinateError> {
        Ok(&self.axes[self.axis_index(axis)?])
    }

    pub fn get_nc(&self, axis: &str) -> Result<&Array1<f64>, CoordinateError> {
        Ok(self.axis(axis)?.nc())
    }

    pub fn get_cc(&self, axis: &str) -> Result<&Array1<f64>, CoordinateError> {
        Ok(self.axis(axis)?.cc())
    }

    pub fn get_crd(&self, axis: &str, centering: Centering) -> Result<&Array1<f64>, CoordinateError> {
        Ok(self.axis(axis)?.points(centering))
    }

    /// Positions of `axis` for edges running along `dir`.
    pub fn get_ec(&self, axis: &str, dir: &str) -> Result<&Array1<f64>, CoordinateError> {
        self.axis_index(dir)?;
        let a = self.axis(axis)?;
        Ok(if axis == dir { a.cc() } else { a.nc() })
    }

    /// Positions of `axis` for faces normal to `dir`.
    pub fn get_fc(&self, axis: &str, dir: &str) -> Result<&Array1<f64>, CoordinateError> {
        self.axis_index(dir)?;
        let a = self.axis(axis)?;
        Ok(if axis == dir { a.nc() } else { a.cc() })
    }

    /// Resolves handles like `"x"`, `"xnc"` and `"xcc"`.
    pub fn get(&self, handle: &str) -> Result<&Array1<f64>, CoordinateError> {
        if let Ok(a) = self.axis(handle) {
            return Ok(a.nc());
        }
        if let Some(axis) = handle.strip_suffix("nc") {
            if let Ok(a) = self.axis(axis) {
                return Ok(a.nc());
            }
        }
        if let Some(axis) = handle.strip_suffix("cc") {
            if let Ok(a) = self.axis(axis) {
                return Ok(a.cc());
            }
        }
        self.axis(handle).map(CoordAxis::nc)
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.get(handle).is_ok()
    }

    /// Coordinate values of one axis broadcast to the full grid shape.
    pub fn get_shaped(&self, axis: &str, centering: Centering) -> Result<ArrayD<f64>, CoordinateError> {
        let i = self.axis_index(axis)?;
        let shape = self.shape(centering);
        let points = self.axes[i].points(centering);
        Ok(ArrayD::from_shape_fn(IxDyn(&shape), |idx| points[idx[i]]))
    }

    pub fn shape_nc(&self) -> Vec<usize> {
        self.shape(Centering::Node)
    }

    pub fn shape_cc(&self) -> Vec<usize> {
        self.shape(Centering::Cell)
    }

    pub fn shape(&self, centering: Centering) -> Vec<usize> {
        self.axes.iter().map(|a| a.len(centering)).collect()
    }

    pub fn bounds_for(&self, axis: &str, centering: Centering) -> Result<Range<f64>, CoordinateError> {
        let a = self.axis(axis)?;
        Range::from_iter_val(a.points(centering).iter().copied())
            .ok_or_else(|| CoordinateError::EmptyAxis { axis: axis.into() })
    }

    pub fn xl(&self, centering: Centering) -> Vec<f64> {
        self.corners(centering).map(|r| r.min).collect()
    }

    pub fn xh(&self, centering: Centering) -> Vec<f64> {
        self.corners(centering).map(|r| r.max).collect()
    }

    fn corners(&self, centering: Centering) -> impl Iterator<Item = Range<f64>> + '_ {
        self.axes.iter().map(move |a| {
            Range::from_iter_val(a.points(centering).iter().copied())
                .unwrap_or(Range::new(f64::NAN, f64::NAN))
        })
    }

    /// Applies the out-of-range policy to a single coordinate value.
    fn check_value(&self, axis: &str, v: f64, centering: Centering) -> Result<f64, CoordinateError> {
        let bounds = self.bounds_for(axis, centering)?;
        if bounds.contains(v) {
            return Ok(v);
        }
        match self.out_of_range {
            OutOfRange::Clamp => {
                let clamped = bounds.clamp(v);
                warn!(axis, value = v, clamped, "Coordinate out of range, clamping to edge");
                Ok(clamped)
            }
            OutOfRange::Error => Err(CoordinateError::OutOfRange {
                axis: axis.into(),
                value: v,
                low: bounds.min,
                high: bounds.max,
            }),
        }
    }

    /// Array index of a single value along `axis`. Coordinates snap to the
    /// nearest point, integers are taken as given with negative values
    /// counting from the end.
    pub fn index_for(&self, axis: &str, value: Value, centering: Centering) -> Result<usize, CoordinateError> {
        let a = self.axis(axis)?;
        let n = a.len(centering);
        match value {
            Value::Index(i) => {
                let j = if i < 0 { i + n as isize } else { i };
                if j < 0 || j >= n as isize {
                    return Err(CoordinateError::IndexOutOfRange {
                        axis: axis.into(),
                        index: i,
                        len: n,
                    });
                }
                Ok(j as usize)
            }
            Value::Coord(v) => {
                let v = self.check_value(axis, v, centering)?;
                nearest_index(a.points(centering).iter().copied(), v)
                    .ok_or_else(|| CoordinateError::EmptyAxis { axis: axis.into() })
            }
        }
    }

    /// Index range for `start:stop:step` along `axis`. Coordinate bounds are
    /// inclusive: nodes inside the closed interval, or cells overlapping it.
    /// Bounds outside the axis are clipped.
    pub fn range_for(
        &self,
        axis: &str,
        start: Option<Value>,
        stop: Option<Value>,
        step: Option<isize>,
        centering: Centering,
    ) -> Result<IndexRange, CoordinateError> {
        let a = self.axis(axis)?;
        let n = a.len(centering);
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(CoordinateError::ZeroStep { axis: axis.into() });
        }

        if let Ok(bounds) = self.bounds_for(axis, centering) {
            for v in [start, stop].into_iter().flatten() {
                if let Value::Coord(v) = v {
                    if !bounds.contains(v) {
                        debug!(axis, value = v, "Range bound outside of axis, clipping");
                    }
                }
            }
        }

        let forward = step > 0;
        let start = match start {
            None => None,
            Some(Value::Index(i)) => Some(i),
            Some(Value::Coord(v)) if forward => Some(a.lower_index(v, centering) as isize),
            Some(Value::Coord(v)) => match a.upper_index(v, centering) {
                0 => return Ok(IndexRange::empty()),
                u => Some(u as isize - 1),
            },
        };
        let stop = match stop {
            None => None,
            Some(Value::Index(i)) => Some(i),
            Some(Value::Coord(v)) if forward => Some(a.upper_index(v, centering) as isize),
            Some(Value::Coord(v)) => match a.lower_index(v, centering) {
                0 => None,
                l => Some(l as isize - 1),
            },
        };

        IndexRange::from_slice(start, stop, step, n).ok_or(CoordinateError::ZeroStep { axis: axis.into() })
    }

    /// Bracketing indices and the linear weight of the upper one for `v`.
    pub fn interp_weights(
        &self,
        axis: &str,
        v: f64,
        centering: Centering,
    ) -> Result<(usize, usize, f64), CoordinateError> {
        let v = self.check_value(axis, v, centering)?;
        let points = self.axis(axis)?.points(centering);
        let n = points.len();
        if n < 2 {
            return Ok((0, 0, 0.0));
        }
        let i = lower_index(points, v).saturating_sub(1).min(n - 2);
        let (lo, hi) = (points[i], points[i + 1]);
        let w = if hi == lo { 0.0 } else { (v - lo) / (hi - lo) };
        Ok((i, i + 1, w.clamp(0.0, 1.0)))
    }

    /// Mirrors every reflected axis. The source is left untouched.
    pub fn apply_reflections(&self) -> Coordinates {
        let axes = self
            .axes
            .iter()
            .map(|a| {
                if self.reflections.contains(&a.name) {
                    let mirrored = a.nc.slice(ndarray::s![..;-1]).mapv(|x| -x);
                    CoordAxis::new(a.name.clone(), mirrored)
                } else {
                    a.clone()
                }
            })
            .collect();
        Coordinates {
            axes,
            reflections: BTreeSet::new(),
            out_of_range: self.out_of_range,
        }
    }

    /// The sub-coordinates selected by a resolved slice plan.
    pub fn sliced(&self, plan: &[ResolvedAxis], centering: Centering) -> Result<Coordinates, CoordinateError> {
        let mut axes = Vec::with_capacity(plan.len());
        for step in plan {
            match step {
                ResolvedAxis::Keep { axis, range } => {
                    axes.push(self.axis(axis)?.sub_axis(range, centering));
                }
                ResolvedAxis::Drop { .. } => {}
                ResolvedAxis::NewAxis { name } => {
                    let nc = match centering {
                        Centering::Node => Array1::from(vec![0.0]),
                        Centering::Cell => Array1::from(vec![-0.5, 0.5]),
                    };
                    axes.push(CoordAxis::new(name.clone(), nc));
                }
            }
            if let Some(added) = axes.last() {
                if axes[..axes.len() - 1].iter().any(|a| a.name == added.name) {
                    return Err(CoordinateError::DuplicateAxis {
                        axis: added.name.clone(),
                    });
                }
            }
        }
        let reflections = self
            .reflections
            .iter()
            .filter(|r| axes.iter().any(|a| &a.name == *r))
            .cloned()
            .collect();
        Ok(Coordinates {
            axes,
            reflections,
            out_of_range: self.out_of_range,
        })
    }
}

pub(crate) fn default_axis_name(i: usize) -> String {
    match i {
        0 => "x".into(),
        1 => "y".into(),
        2 => "z".into(),
        _ => format!("x{i}"),
    }
}

impl GetSize for Coordinates {
    fn get_heap_size(&self) -> usize {
        self.axes
            .iter()
            .map(|a| (a.nc.len() + a.cc.len()) * std::mem::size_of::<f64>() + a.name.get_heap_size())
            .sum()
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .axes
            .iter()
            .map(|a| format!("{}[{}]", a.name, a.nc.len()))
            .collect();
        write!(f, "Coordinates({})", parts.join(", "))
    }
}
