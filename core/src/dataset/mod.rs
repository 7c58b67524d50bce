//! Datasets group grids and other datasets into a tree. One child is
//! active at a time and lookups that a dataset cannot answer itself are
//! passed down to it.

mod temporal;

use std::fmt;

use ndarray::Array1;
use tracing::error;

use crate::{
    bucket::Bucket,
    field::Field,
    grid::{Grid, TimeIter},
    slice::Selection,
    time::{TimeSliceError, TimeSpec, ToTimeSpec},
    tree::{CacheGuard, Node, NodeId, NodeMeta},
    Error,
};

pub use temporal::DatasetTemporal;

const TREE_INDENT: &str = "    ";

/// Something a lookup by name can turn up.
#[derive(Debug)]
pub enum Item<'a> {
    Child(&'a Child),
    Field(Field),
    Coordinate(Array1<f64>),
}

#[derive(Debug)]
pub enum Child {
    Grid(Grid),
    Dataset(Dataset),
    Temporal(DatasetTemporal),
}

impl From<Grid> for Child {
    fn from(g: Grid) -> Self {
        Self::Grid(g)
    }
}

impl From<Dataset> for Child {
    fn from(d: Dataset) -> Self {
        Self::Dataset(d)
    }
}

impl From<DatasetTemporal> for Child {
    fn from(d: DatasetTemporal) -> Self {
        Self::Temporal(d)
    }
}

impl Child {
    fn node(&self) -> &dyn Node {
        match self {
            Child::Grid(g) => g,
            Child::Dataset(d) => d,
            Child::Temporal(t) => t,
        }
    }

    fn node_mut(&mut self) -> &mut dyn Node {
        match self {
            Child::Grid(g) => g,
            Child::Dataset(d) => d,
            Child::Temporal(t) => t,
        }
    }

    pub fn as_grid(&self) -> Option<&Grid> {
        match self {
            Child::Grid(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_grid_mut(&mut self) -> Option<&mut Grid> {
        match self {
            Child::Grid(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Child::Dataset(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_temporal(&self) -> Option<&DatasetTemporal> {
        match self {
            Child::Temporal(t) => Some(t),
            _ => None,
        }
    }

    pub fn get_field(&self, name: &str, time: Option<&TimeSpec>, slc: Option<&Selection>) -> Result<Field, Error> {
        match self {
            Child::Grid(g) => g.get_field(name, slc),
            Child::Dataset(d) => d.get_field(name, time, slc),
            Child::Temporal(t) => t.get_field(name, time, slc),
        }
    }

    pub fn get_grid(&self, time: Option<&TimeSpec>) -> Result<&Grid, Error> {
        match self {
            Child::Grid(g) => Ok(g),
            Child::Dataset(d) => d.get_grid(time),
            Child::Temporal(t) => t.get_grid(time),
        }
    }

    pub fn get(&self, item: &str) -> Result<Item<'_>, Error> {
        match self {
            Child::Grid(g) => g.get(item),
            Child::Dataset(d) => d.get(item),
            Child::Temporal(t) => t.get(item),
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        match self {
            Child::Grid(g) => g.contains(item),
            Child::Dataset(d) => d.contains(item),
            Child::Temporal(t) => t.contains(item),
        }
    }

    pub fn nr_times(&self, spec: &TimeSpec) -> Result<usize, Error> {
        match self {
            Child::Grid(g) => Ok(g.nr_times()),
            Child::Dataset(d) => d.nr_times(spec),
            Child::Temporal(t) => t.nr_times(spec),
        }
    }

    pub fn iter_times(&self, spec: &TimeSpec) -> Result<TimeIter<'_>, Error> {
        match self {
            Child::Grid(g) => Ok(g.iter_times()),
            Child::Dataset(d) => d.iter_times(spec),
            Child::Temporal(t) => t.iter_times(spec),
        }
    }

    pub fn iter_fields(
        &self,
        time: Option<&TimeSpec>,
        named: Option<&[&str]>,
    ) -> Result<Vec<CacheGuard<'_, Field>>, Error> {
        match self {
            Child::Grid(g) => g.iter_fields(named),
            Child::Dataset(d) => d.iter_fields(time, named),
            Child::Temporal(t) => t.iter_fields(time, named),
        }
    }

    pub(crate) fn activate_time(&mut self, time: &TimeSpec) -> Result<(), Error> {
        match self {
            Child::Grid(_) => Ok(()),
            Child::Dataset(d) => d.activate_time(time),
            Child::Temporal(t) => t.activate(time),
        }
    }

    pub fn remove_all_items(&mut self) {
        match self {
            Child::Grid(g) => g.remove_all_items(),
            Child::Dataset(d) => d.remove_all_items(),
            Child::Temporal(t) => t.remove_all_items(),
        }
    }

    pub(crate) fn fmt_children(&self, f: &mut fmt::Formatter<'_>, prefix: &str, depth: Option<usize>) -> fmt::Result {
        match self {
            Child::Grid(g) => g.fmt_children(f, prefix),
            Child::Dataset(d) => d.fmt_children(f, prefix, depth),
            Child::Temporal(t) => t.fmt_children(f, prefix, depth),
        }
    }
}

impl Node for Child {
    fn meta(&self) -> &NodeMeta {
        self.node().meta()
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        self.node_mut().meta_mut()
    }

    fn clear_cache(&self) {
        self.node().clear_cache()
    }
}

impl fmt::Display for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Child::Grid(g) => fmt::Display::fmt(g, f),
            Child::Dataset(d) => fmt::Display::fmt(d, f),
            Child::Temporal(t) => fmt::Display::fmt(t, f),
        }
    }
}

#[derive(Debug)]
pub struct Dataset {
    meta: NodeMeta,
    children: Bucket<Child>,
    active: Option<NodeId>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: NodeMeta::new(name),
            children: Bucket::new(),
            active: None,
        }
    }

    pub fn add(&mut self, child: impl Into<Child>, set_active: bool) {
        let mut child = child.into();
        self.prepare_child(&mut child);
        if set_active {
            self.active = Some(child.id());
        }
        self.children.insert(child.name().to_string(), child);
    }

    pub fn get_child(&self, name: &str) -> Result<&Child, Error> {
        self.children.get(name).ok_or_else(|| Error::not_found("child", name))
    }

    pub fn get_child_mut(&mut self, name: &str) -> Result<&mut Child, Error> {
        self.children.get_mut(name).ok_or_else(|| Error::not_found("child", name))
    }

    pub fn children(&self) -> impl Iterator<Item = &Child> {
        self.children.iter()
    }

    pub fn active_child(&self) -> Option<&Child> {
        let id = self.active?;
        self.children.iter_all().find(|c| c.id() == id)
    }

    fn require_active(&self, item: &str) -> Result<&Child, Error> {
        self.active_child().ok_or_else(|| {
            error!(dataset = self.name(), item, "Could not get appropriate child");
            Error::NoActiveChild { item: item.to_string() }
        })
    }

    pub fn activate(&mut self, name: &str) -> Result<(), Error> {
        self.active = Some(self.get_child(name)?.id());
        Ok(())
    }

    /// Points every temporal dataset below this one at `time`.
    pub fn activate_time(&mut self, time: impl ToTimeSpec) -> Result<(), Error> {
        let time = time.to_time_spec()?;
        for child in self.children.iter_mut() {
            child.activate_time(&time)?;
        }
        Ok(())
    }

    /// The first child decides how many time steps the dataset has.
    fn time_source(&self) -> Result<&Child, Error> {
        self.children.first().ok_or(Error::NoTemporalDataset)
    }

    pub fn nr_times(&self, spec: impl ToTimeSpec) -> Result<usize, Error> {
        self.time_source()?.nr_times(&spec.to_time_spec()?)
    }

    pub fn iter_times(&self, spec: impl ToTimeSpec) -> Result<TimeIter<'_>, Error> {
        self.time_source()?.iter_times(&spec.to_time_spec()?)
    }

    pub fn get_times(&self, spec: impl ToTimeSpec) -> Result<Vec<&Grid>, Error> {
        Ok(self.iter_times(spec)?.map(CacheGuard::release).collect())
    }

    pub fn get_time(&self, spec: impl ToTimeSpec) -> Result<&Grid, Error> {
        self.iter_times(spec)?
            .next()
            .map(CacheGuard::release)
            .ok_or(Error::TimeSlice(TimeSliceError::NoChildren))
    }

    pub fn iter_fields(
        &self,
        time: Option<&TimeSpec>,
        named: Option<&[&str]>,
    ) -> Result<Vec<CacheGuard<'_, Field>>, Error> {
        self.require_active("fields")?.iter_fields(time, named)
    }

    pub fn get_field(&self, name: &str, time: Option<&TimeSpec>, slc: Option<&Selection>) -> Result<Field, Error> {
        self.require_active(name)?.get_field(name, time, slc)
    }

    pub fn get_grid(&self, time: Option<&TimeSpec>) -> Result<&Grid, Error> {
        self.require_active("grid")?.get_grid(time)
    }

    /// A child by name, or whatever the active child finds under `item`.
    pub fn get(&self, item: &str) -> Result<Item<'_>, Error> {
        if let Some(child) = self.children.get(item) {
            return Ok(Item::Child(child));
        }
        match self.active_child() {
            Some(active) => active.get(item),
            None => Err(Error::not_found("item", item)),
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        self.children.contains(item) || self.active_child().map_or(false, |c| c.contains(item))
    }

    /// Detaches every child stored under `name`.
    pub fn remove(&mut self, name: &str) -> Result<Vec<Child>, Error> {
        let mut removed = self.children.remove(name);
        if removed.is_empty() {
            return Err(Error::not_found("child", name));
        }
        for child in removed.iter_mut() {
            if Some(child.id()) == self.active {
                self.active = None;
            }
            self.tear_down_child(child);
        }
        Ok(removed)
    }

    pub fn remove_all_items(&mut self) {
        for mut child in self.children.drain() {
            self.tear_down_child(&mut child);
            child.remove_all_items();
        }
        self.active = None;
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The tree below this dataset, `depth` levels deep or all of it.
    pub fn tree(&self, depth: Option<usize>) -> Tree<'_> {
        Tree {
            root: TreeRoot::Dataset(self),
            depth,
        }
    }

    fn fmt_children(&self, f: &mut fmt::Formatter<'_>, prefix: &str, depth: Option<usize>) -> fmt::Result {
        for child in self.children.iter() {
            let suffix = if Some(child.id()) == self.active { " <-- active" } else { "" };
            writeln!(f, "{prefix}{child}{suffix}")?;
            fmt_subtree(child, f, prefix, depth)?;
        }
        Ok(())
    }
}

fn fmt_subtree(child: &Child, f: &mut fmt::Formatter<'_>, prefix: &str, depth: Option<usize>) -> fmt::Result {
    match depth {
        Some(0) => Ok(()),
        _ => child.fmt_children(f, &format!("{prefix}{TREE_INDENT}"), depth.map(|d| d - 1)),
    }
}

impl Node for Dataset {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }

    fn clear_cache(&self) {
        for child in self.children.iter_all() {
            child.clear_cache();
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Dataset name={}>", self.name())
    }
}

enum TreeRoot<'a> {
    Dataset(&'a Dataset),
    Temporal(&'a DatasetTemporal),
}

/// Printable view of a dataset and everything below it.
pub struct Tree<'a> {
    root: TreeRoot<'a>,
    depth: Option<usize>,
}

impl fmt::Display for Tree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            TreeRoot::Dataset(d) => {
                writeln!(f, "{d}")?;
                d.fmt_children(f, TREE_INDENT, self.depth)
            }
            TreeRoot::Temporal(t) => {
                writeln!(f, "{t}")?;
                t.fmt_children(f, TREE_INDENT, self.depth)
            }
        }
    }
}

#[cfg(test)]
mod tests;
