//! Centered arrays over a coordinate system.
//!
//! A [`Field`] either owns its data or loads it on first access through a
//! [`FieldSource`]. Cloning a field gives another handle to the very same
//! buffer and cache. [`Field::shell_copy`] gives a handle that shares the
//! buffer but can drop its own reference independently.

mod err;

use std::{
    fmt,
    sync::{Arc, Weak},
};

use derive_more::Display;
use get_size::GetSize;
use ndarray::{ArcArray, ArrayD, Axis, IxDyn, SliceInfo, SliceInfoElem};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    cached::Cached,
    common::IndexRange,
    crds::{default_axis_name, Centering, Coordinates, Value},
    slice::{Planned, ResolvedAxis, SliceItem, ToSelection, Token},
    tree::{Node, NodeMeta},
};

pub use err::FieldError;

/// Name of the component axis of vector fields in selections, `comp=1`.
pub const COMPONENT_AXIS: &str = "comp";

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;
pub type Data = ArcArray<f64, IxDyn>;
type Buffer = Arc<RwLock<Data>>;

/// Where the components of a vector field live in its data.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// Components first, `[comp, x, y, z]`.
    #[display(fmt = "flat")]
    Flat,
    /// Components last, `[x, y, z, comp]`.
    #[display(fmt = "interlaced")]
    Interlaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Scalar,
    Vector { layout: Layout, ncomp: usize },
}

/// Produces the data of a lazily loaded field.
pub trait FieldSource: fmt::Debug + Send + Sync {
    fn load(&self) -> Result<ArrayD<f64>, SourceError>;
}

/// Adapts a closure into a [`FieldSource`].
pub struct FnSource<F>(pub F);

impl<F> fmt::Debug for FnSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSource")
    }
}

impl<F> FieldSource for FnSource<F>
where
    F: Fn() -> Result<ArrayD<f64>, SourceError> + Send + Sync,
{
    fn load(&self) -> Result<ArrayD<f64>, SourceError> {
        (self.0)()
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Resident(Buffer),
    Lazy(Lazy),
}

#[derive(Debug, Clone)]
struct Lazy {
    source: Arc<dyn FieldSource>,
    cache: Cached<Buffer>,
    /// The buffer most recently loaded by any handle of this field, so
    /// handles that load independently still end up sharing it.
    published: Arc<Mutex<Weak<RwLock<Data>>>>,
}

#[derive(Debug, Clone)]
pub struct Field {
    meta: NodeMeta,
    centering: Centering,
    kind: FieldKind,
    crds: Arc<Coordinates>,
    storage: Storage,
}

impl Field {
    /// A scalar field owning `data`.
    pub fn new(
        name: impl Into<String>,
        crds: impl Into<Arc<Coordinates>>,
        data: ArrayD<f64>,
        centering: Centering,
    ) -> Result<Self, FieldError> {
        Self::with_kind(name, crds, data, centering, FieldKind::Scalar)
    }

    /// A vector field owning `data`. The component count is read off the
    /// component axis given by `layout`.
    pub fn vector(
        name: impl Into<String>,
        crds: impl Into<Arc<Coordinates>>,
        data: ArrayD<f64>,
        centering: Centering,
        layout: Layout,
    ) -> Result<Self, FieldError> {
        let ncomp = match layout {
            Layout::Flat => data.shape().first(),
            Layout::Interlaced => data.shape().last(),
        }
        .copied()
        .unwrap_or(0);
        Self::with_kind(name, crds, data, centering, FieldKind::Vector { layout, ncomp })
    }

    pub fn with_kind(
        name: impl Into<String>,
        crds: impl Into<Arc<Coordinates>>,
        data: ArrayD<f64>,
        centering: Centering,
        kind: FieldKind,
    ) -> Result<Self, FieldError> {
        let field = Self {
            meta: NodeMeta::new(name),
            centering,
            kind,
            crds: crds.into(),
            storage: Storage::Resident(Arc::new(RwLock::new(data.into_shared()))),
        };
        field.check_shape(&field.data()?)?;
        Ok(field)
    }

    /// A field whose data is loaded from `source` when first needed.
    pub fn lazy(
        name: impl Into<String>,
        crds: impl Into<Arc<Coordinates>>,
        centering: Centering,
        kind: FieldKind,
        source: impl FieldSource + 'static,
    ) -> Self {
        Self {
            meta: NodeMeta::new(name),
            centering,
            kind,
            crds: crds.into(),
            storage: Storage::Lazy(Lazy {
                source: Arc::new(source),
                cache: Cached::empty(),
                published: Arc::new(Mutex::new(Weak::new())),
            }),
        }
    }

    /// A scalar field over default coordinates for the shape of `data`.
    pub fn from_data(name: impl Into<String>, data: ArrayD<f64>, centering: Centering) -> Result<Self, FieldError> {
        let crds = Coordinates::default_for(data.shape(), centering);
        Self::new(name, crds, data, centering)
    }

    /// A vector field over default coordinates for the spatial part of the
    /// shape of `data`.
    pub fn vector_from_data(
        name: impl Into<String>,
        data: ArrayD<f64>,
        centering: Centering,
        layout: Layout,
    ) -> Result<Self, FieldError> {
        let shape = data.shape();
        let spatial = match layout {
            Layout::Flat => shape.get(1..),
            Layout::Interlaced => shape.get(..shape.len().saturating_sub(1)),
        }
        .unwrap_or(&[]);
        let crds = Coordinates::default_for(spatial, centering);
        Self::vector(name, crds, data, centering, layout)
    }

    /// A zero-filled field shaped after `crds`.
    pub fn empty(
        name: impl Into<String>,
        crds: impl Into<Arc<Coordinates>>,
        centering: Centering,
        kind: FieldKind,
    ) -> Self {
        let crds = crds.into();
        let shape = full_shape(&crds.shape(centering), kind);
        Self {
            meta: NodeMeta::new(name),
            centering,
            kind,
            crds,
            storage: Storage::Resident(Arc::new(RwLock::new(ArcArray::zeros(IxDyn(&shape))))),
        }
    }

    pub fn centering(&self) -> Centering {
        self.centering
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_vector(&self) -> bool {
        matches!(self.kind, FieldKind::Vector { .. })
    }

    pub fn layout(&self) -> Option<Layout> {
        match self.kind {
            FieldKind::Scalar => None,
            FieldKind::Vector { layout, .. } => Some(layout),
        }
    }

    pub fn ncomp(&self) -> usize {
        match self.kind {
            FieldKind::Scalar => 1,
            FieldKind::Vector { ncomp, .. } => ncomp,
        }
    }

    pub fn crds(&self) -> &Arc<Coordinates> {
        &self.crds
    }

    /// Spatial shape, without the component axis.
    pub fn sshape(&self) -> Vec<usize> {
        self.crds.shape(self.centering)
    }

    /// Shape of the data, component axis included.
    pub fn shape(&self) -> Vec<usize> {
        full_shape(&self.sshape(), self.kind)
    }

    /// Position of the component axis in the data.
    fn comp_axis(&self) -> Option<usize> {
        match self.kind {
            FieldKind::Scalar => None,
            FieldKind::Vector {
                layout: Layout::Flat, ..
            } => Some(0),
            FieldKind::Vector {
                layout: Layout::Interlaced,
                ..
            } => Some(self.crds.ndim()),
        }
    }

    fn check_shape(&self, data: &Data) -> Result<(), FieldError> {
        let expected = self.shape();
        if data.shape() != expected.as_slice() {
            return Err(FieldError::ShapeMismatch {
                name: self.name().to_string(),
                expected,
                found: data.shape().to_vec(),
            });
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        match &self.storage {
            Storage::Resident(_) => true,
            Storage::Lazy(lazy) => lazy.cache.is_cached(),
        }
    }

    fn buffer(&self) -> Result<Buffer, FieldError> {
        match &self.storage {
            Storage::Resident(buffer) => Ok(buffer.clone()),
            Storage::Lazy(lazy) => lazy.cache.get_cached(|| {
                let mut published = lazy.published.lock();
                if let Some(buffer) = published.upgrade() {
                    return Ok(buffer);
                }
                debug!(field = self.name(), "Loading field data");
                let data = lazy.source.load().map_err(|source| FieldError::Source {
                    name: self.name().to_string(),
                    source,
                })?;
                let data = data.into_shared();
                self.check_shape(&data)?;
                let buffer = Arc::new(RwLock::new(data));
                *published = Arc::downgrade(&buffer);
                Ok(buffer)
            }),
        }
    }

    /// The field's data, loading it first if needed. The returned array is
    /// a cheap handle onto the current buffer.
    pub fn data(&self) -> Result<Data, FieldError> {
        Ok(self.buffer()?.read().clone())
    }

    /// Another handle onto the same buffer that manages its own cache
    /// reference.
    pub fn shell_copy(&self) -> Field {
        let storage = match &self.storage {
            Storage::Resident(buffer) => Storage::Resident(buffer.clone()),
            Storage::Lazy(lazy) => Storage::Lazy(Lazy {
                source: lazy.source.clone(),
                cache: lazy.cache.try_get().map(Cached::filled).unwrap_or_else(Cached::empty),
                published: lazy.published.clone(),
            }),
        };
        Field {
            meta: self.meta.fork(),
            centering: self.centering,
            kind: self.kind,
            crds: self.crds.clone(),
            storage,
        }
    }

    fn derived(&self, crds: Coordinates, kind: FieldKind, data: Data) -> Field {
        Field {
            meta: self.meta.fork(),
            centering: self.centering,
            kind,
            crds: Arc::new(crds),
            storage: Storage::Resident(Arc::new(RwLock::new(data))),
        }
    }

    /// Replaces the whole array. Every handle sharing the buffer sees the
    /// new values.
    pub fn assign(&self, data: ArrayD<f64>) -> Result<(), FieldError> {
        let data = data.into_shared();
        self.check_shape(&data)?;
        let buffer = self.buffer()?;
        *buffer.write() = data;
        Ok(())
    }

    /// Writes `values` into the region picked by `selection`, broadcasting
    /// them if needed.
    pub fn assign_slice(&self, selection: impl ToSelection, values: ArrayD<f64>) -> Result<(), FieldError> {
        let (comp, plan) = self.resolve(selection, true)?;
        let elems = self.slice_elems(&plan, comp.elem);
        let info = SliceInfo::<_, IxDyn, IxDyn>::try_from(elems)?;

        let buffer = self.buffer()?;
        let mut data = buffer.write();
        let mut view = data.slice_mut(info);
        let src = values.broadcast(view.raw_dim()).ok_or_else(|| FieldError::Broadcast {
            from: values.shape().to_vec(),
            to: view.shape().to_vec(),
        })?;
        view.assign(&src);
        Ok(())
    }

    /// `field[selection]`: single values remove their axis.
    pub fn slice(&self, selection: impl ToSelection) -> Result<Field, FieldError> {
        self.slice_impl(selection, false)
    }

    /// Like [`Field::slice`], but single values leave an axis of extent 1.
    pub fn slice_and_keep(&self, selection: impl ToSelection) -> Result<Field, FieldError> {
        self.slice_impl(selection, true)
    }

    #[instrument(skip(self, selection), fields(field = self.name()))]
    fn slice_impl(&self, selection: impl ToSelection, keep: bool) -> Result<Field, FieldError> {
        let (comp, plan) = self.resolve(selection, keep)?;
        self.apply(&plan, comp)
    }

    fn resolve(&self, selection: impl ToSelection, keep: bool) -> Result<(CompSelection, Vec<ResolvedAxis>), FieldError> {
        let selection = selection.to_selection()?;
        let (comp_tokens, rest) = selection.take_named(COMPONENT_AXIS);
        let comp = self.component_selection(&comp_tokens, keep)?;
        let plan = rest.resolve(&self.crds, self.centering, keep)?;
        Ok((comp, plan))
    }

    /// Builds the view described by `plan` without copying any data.
    fn apply(&self, plan: &[ResolvedAxis], comp: CompSelection) -> Result<Field, FieldError> {
        let crds = self.crds.sliced(plan, self.centering)?;
        let elems = self.slice_elems(plan, comp.elem);
        let info = SliceInfo::<_, IxDyn, IxDyn>::try_from(elems)?;
        let view = self.data()?.slice_move(info);
        Ok(self.derived(crds, comp.kind, view))
    }

    fn slice_elems(&self, plan: &[ResolvedAxis], comp: Option<SliceInfoElem>) -> Vec<SliceInfoElem> {
        let mut elems: Vec<SliceInfoElem> = plan
            .iter()
            .map(|p| match p {
                ResolvedAxis::Keep { range, .. } => range.to_slice().into(),
                ResolvedAxis::Drop { index, .. } => SliceInfoElem::Index(*index as isize),
                ResolvedAxis::NewAxis { .. } => SliceInfoElem::NewAxis,
            })
            .collect();
        if let Some(elem) = comp {
            match self.layout() {
                Some(Layout::Flat) => elems.insert(0, elem),
                _ => elems.push(elem),
            }
        }
        elems
    }

    fn component_selection(&self, tokens: &[Token], keep: bool) -> Result<CompSelection, FieldError> {
        let name = self.name().to_string();
        let FieldKind::Vector { layout, ncomp } = self.kind else {
            if tokens.is_empty() {
                return Ok(CompSelection {
                    elem: None,
                    kind: self.kind,
                });
            }
            return Err(FieldError::NotVector { name });
        };
        let bad = |t: &Token| FieldError::BadComponent {
            name: name.clone(),
            selection: t.item.to_string(),
        };
        let as_index = |v: Option<Value>, t: &Token| match v {
            None => Ok(None),
            Some(Value::Index(i)) => Ok(Some(i)),
            Some(Value::Coord(_)) => Err(bad(t)),
        };

        let range = match tokens {
            [] => IndexRange::full(ncomp),
            [t] => match t.item {
                SliceItem::Value(Value::Index(i)) => {
                    let j = if i < 0 { i + ncomp as isize } else { i };
                    if j < 0 || j >= ncomp as isize {
                        return Err(FieldError::ComponentOutOfRange {
                            name: name.clone(),
                            index: i,
                            ncomp,
                        });
                    }
                    if !keep {
                        return Ok(CompSelection {
                            elem: Some(SliceInfoElem::Index(j)),
                            kind: FieldKind::Scalar,
                        });
                    }
                    IndexRange::single(j as usize)
                }
                SliceItem::Range { start, stop, step } => {
                    let (start, stop) = (as_index(start, t)?, as_index(stop, t)?);
                    IndexRange::from_slice(start, stop, step.unwrap_or(1), ncomp).ok_or_else(|| bad(t))?
                }
                _ => return Err(bad(t)),
            },
            [_, t, ..] => return Err(bad(t)),
        };
        Ok(CompSelection {
            elem: Some(range.to_slice().into()),
            kind: FieldKind::Vector {
                layout,
                ncomp: range.len,
            },
        })
    }

    /// Slices like [`Field::slice`], except that a single coordinate value
    /// interpolates linearly between the two neighbouring points instead of
    /// snapping to the nearest one.
    #[instrument(skip_all, fields(field = self.name()))]
    pub fn interpolated_slice(&self, selection: impl ToSelection) -> Result<Field, FieldError> {
        let selection = selection.to_selection()?;
        let (comp_tokens, rest) = selection.take_named(COMPONENT_AXIS);
        let comp = self.component_selection(&comp_tokens, false)?;

        let names = self.crds.axis_names();
        let mut planned = crate::slice::plan(rest.tokens(), &names)?;
        let mut cuts = Vec::new();
        for p in planned.iter_mut() {
            if let Planned::Source { axis, item } = p {
                if let Some(SliceItem::Value(Value::Coord(v))) = *item {
                    cuts.push((axis.clone(), v));
                    *item = None;
                }
            }
        }
        let plan = crate::slice::resolve(&planned, &self.crds, self.centering, false)?;
        let mut field = self.apply(&plan, comp)?;
        for (axis, v) in cuts {
            field = field.interpolate_axis(&axis, v)?;
        }
        Ok(field)
    }

    fn interpolate_axis(&self, axis: &str, v: f64) -> Result<Field, FieldError> {
        let i = self.crds.axis_index(axis)?;
        let data_axis = Axis(if self.layout() == Some(Layout::Flat) { i + 1 } else { i });
        let (lo, hi, w) = self.crds.interp_weights(axis, v, self.centering)?;

        let data = self.data()?;
        let cut = if w == 0.0 {
            data.index_axis(data_axis, lo).to_owned()
        } else if w == 1.0 {
            data.index_axis(data_axis, hi).to_owned()
        } else {
            &data.index_axis(data_axis, lo) * (1.0 - w) + &data.index_axis(data_axis, hi) * w
        };

        let plan: Vec<ResolvedAxis> = self
            .crds
            .axes()
            .iter()
            .map(|a| {
                if a.name() == axis {
                    ResolvedAxis::Drop {
                        axis: axis.to_string(),
                        index: lo,
                    }
                } else {
                    ResolvedAxis::Keep {
                        axis: a.name().to_string(),
                        range: IndexRange::full(a.len(self.centering)),
                    }
                }
            })
            .collect();
        let crds = self.crds.sliced(&plan, self.centering)?;
        Ok(self.derived(crds, self.kind, cut.into_shared()))
    }

    /// One component of a vector field as a scalar field.
    pub fn component_field(&self, i: usize) -> Result<Field, FieldError> {
        let (Some(axis), FieldKind::Vector { ncomp, .. }) = (self.comp_axis(), self.kind) else {
            return Err(FieldError::NotVector {
                name: self.name().to_string(),
            });
        };
        if i >= ncomp {
            return Err(FieldError::ComponentOutOfRange {
                name: self.name().to_string(),
                index: i as isize,
                ncomp,
            });
        }
        let data = self.data()?.index_axis_move(Axis(axis), i);
        let mut field = self.derived((*self.crds).clone(), FieldKind::Scalar, data);
        field.meta.name = format!("{}{}", self.name(), default_axis_name(i));
        Ok(field)
    }

    pub fn component_fields(&self) -> Result<Vec<Field>, FieldError> {
        (0..self.ncomp()).map(|i| self.component_field(i)).collect()
    }

    /// The same vector field with its components moved to `layout`.
    pub fn with_layout(&self, layout: Layout) -> Result<Field, FieldError> {
        let FieldKind::Vector { layout: current, ncomp } = self.kind else {
            return Err(FieldError::NotVector {
                name: self.name().to_string(),
            });
        };
        if current == layout {
            return Ok(self.shell_copy());
        }
        let ndim = self.crds.ndim() + 1;
        let perm: Vec<usize> = match layout {
            Layout::Interlaced => (1..ndim).chain([0]).collect(),
            Layout::Flat => [ndim - 1].into_iter().chain(0..ndim - 1).collect(),
        };
        let data = self.data()?.permuted_axes(IxDyn(&perm));
        Ok(self.derived((*self.crds).clone(), FieldKind::Vector { layout, ncomp }, data))
    }

    /// Bytes currently held by this handle, coordinates included.
    pub fn nbytes(&self) -> usize {
        self.get_heap_size()
    }
}

struct CompSelection {
    elem: Option<SliceInfoElem>,
    kind: FieldKind,
}

fn full_shape(spatial: &[usize], kind: FieldKind) -> Vec<usize> {
    match kind {
        FieldKind::Scalar => spatial.to_vec(),
        FieldKind::Vector {
            layout: Layout::Flat,
            ncomp,
        } => [ncomp].iter().chain(spatial).copied().collect(),
        FieldKind::Vector {
            layout: Layout::Interlaced,
            ncomp,
        } => spatial.iter().chain([ncomp].iter()).copied().collect(),
    }
}

impl Node for Field {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }

    fn clear_cache(&self) {
        if let Storage::Lazy(lazy) = &self.storage {
            lazy.cache.clear();
        }
    }
}

impl GetSize for Field {
    fn get_heap_size(&self) -> usize {
        let data = match &self.storage {
            Storage::Resident(buffer) => buffer.read().len(),
            Storage::Lazy(lazy) => lazy.cache.try_get().map_or(0, |b| b.read().len()),
        };
        data * std::mem::size_of::<f64>() + self.crds.get_heap_size()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FieldKind::Scalar => "scalar".to_string(),
            FieldKind::Vector { layout, ncomp } => format!("vector[{ncomp}, {layout}]"),
        };
        write!(f, "{} <{}, {}> {:?}", self.name(), kind, self.centering, self.shape())
    }
}
