use std::fmt;

use chrono::NaiveDateTime;
use tracing::{error, instrument};

use super::{fmt_subtree, Child, Item, Tree, TreeRoot, TREE_INDENT};
use crate::{
    crds::OutOfRange,
    field::Field,
    grid::{Grid, TimeIter},
    slice::Selection,
    time::{TimeSpec, TimeValue, ToTimeSpec},
    tree::{CacheGuard, Node, NodeId, NodeMeta},
    Error,
};

/// A dataset whose children are time steps, kept sorted by time. Children
/// with equal times stay in insertion order.
#[derive(Debug)]
pub struct DatasetTemporal {
    meta: NodeMeta,
    children: Vec<(f64, Child)>,
    active: Option<NodeId>,
    basetime: Option<NaiveDateTime>,
    out_of_range: OutOfRange,
}

impl DatasetTemporal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: NodeMeta::new(name),
            children: Vec::new(),
            active: None,
            basetime: None,
            out_of_range: OutOfRange::default(),
        }
    }

    /// Date that absolute time stamps are measured from.
    pub fn with_basetime(mut self, basetime: NaiveDateTime) -> Self {
        self.basetime = Some(basetime);
        self
    }

    pub fn with_out_of_range(mut self, policy: OutOfRange) -> Self {
        self.out_of_range = policy;
        self
    }

    pub fn basetime(&self) -> Option<NaiveDateTime> {
        self.basetime
    }

    pub fn add(&mut self, child: impl Into<Child>, set_active: bool) {
        let mut child = child.into();
        let time = child.time().unwrap_or_else(|| {
            error!(dataset = self.name(), child = child.name(), "Child has no time, using 0");
            0.0
        });
        child.set_time(time);
        self.prepare_child(&mut child);
        if set_active {
            self.active = Some(child.id());
        }
        self.children.push((time, child));
        self.children.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    pub fn times(&self) -> Vec<f64> {
        self.children.iter().map(|(t, _)| *t).collect()
    }

    pub fn children(&self) -> impl Iterator<Item = &Child> {
        self.children.iter().map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Seconds since the base time for anything that is not a plain index.
    pub fn as_floating_t(&self, t: TimeValue) -> Result<Option<f64>, Error> {
        Ok(t.as_seconds(self.basetime)?)
    }

    /// Child indices selected by `spec`, in the order the expression lists them.
    #[instrument(skip(self, spec), fields(dataset = self.name()))]
    pub fn slice_time(&self, spec: impl ToTimeSpec) -> Result<Vec<usize>, Error> {
        let spec = spec.to_time_spec()?;
        Ok(spec.resolve(&self.times(), self.basetime, self.out_of_range)?)
    }

    /// The first child `time` selects.
    pub fn get_child(&self, time: impl ToTimeSpec) -> Result<&Child, Error> {
        let spec = time.to_time_spec()?;
        let first = self.slice_time(&spec)?.into_iter().next();
        first
            .and_then(|i| self.children.get(i))
            .map(|(_, c)| c)
            .ok_or_else(|| Error::not_found("time", spec.to_string()))
    }

    pub fn active_child(&self) -> Option<&Child> {
        let id = self.active?;
        self.children().find(|c| c.id() == id)
    }

    fn select(&self, time: Option<&TimeSpec>, item: &str) -> Result<&Child, Error> {
        match time {
            Some(time) => self.get_child(time),
            None => self.active_child().ok_or_else(|| {
                error!(dataset = self.name(), item, "Could not get appropriate child");
                Error::NoActiveChild { item: item.to_string() }
            }),
        }
    }

    pub fn activate(&mut self, time: impl ToTimeSpec) -> Result<(), Error> {
        self.active = Some(self.get_child(time)?.id());
        Ok(())
    }

    pub fn nr_times(&self, spec: impl ToTimeSpec) -> Result<usize, Error> {
        Ok(self.slice_time(spec)?.len())
    }

    /// Grids of the selected time steps, one scoped grid at a time.
    pub fn iter_times(&self, spec: impl ToTimeSpec) -> Result<TimeIter<'_>, Error> {
        let grids = self
            .slice_time(spec)?
            .into_iter()
            .map(|i| self.children[i].1.get_grid(None))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TimeIter::new(grids))
    }

    pub fn get_times(&self, spec: impl ToTimeSpec) -> Result<Vec<&Grid>, Error> {
        Ok(self.iter_times(spec)?.map(CacheGuard::release).collect())
    }

    pub fn get_time(&self, spec: impl ToTimeSpec) -> Result<&Grid, Error> {
        let spec = spec.to_time_spec()?;
        self.iter_times(&spec)?
            .next()
            .map(CacheGuard::release)
            .ok_or_else(|| Error::not_found("time", spec.to_string()))
    }

    pub fn iter_fields(
        &self,
        time: Option<&TimeSpec>,
        named: Option<&[&str]>,
    ) -> Result<Vec<CacheGuard<'_, Field>>, Error> {
        self.select(time, "fields")?.iter_fields(time, named)
    }

    pub fn get_field(&self, name: &str, time: Option<&TimeSpec>, slc: Option<&Selection>) -> Result<Field, Error> {
        self.select(time, name)?.get_field(name, time, slc)
    }

    pub fn get_grid(&self, time: Option<&TimeSpec>) -> Result<&Grid, Error> {
        self.select(time, "grid")?.get_grid(time)
    }

    pub fn get(&self, item: &str) -> Result<Item<'_>, Error> {
        self.select(None, item)?.get(item)
    }

    /// True for an index or a time inside the series. Anything else is
    /// asked of the active child.
    pub fn contains(&self, item: &str) -> bool {
        let single = TimeSpec::parse(item).ok().and_then(|spec| spec.single());
        let (Some(first), Some(last)) = (self.children.first(), self.children.last()) else {
            return false;
        };
        match single {
            Some(TimeValue::Index(i)) if i >= 0 && (i as usize) < self.children.len() => true,
            Some(TimeValue::Index(_)) | None => self.active_child().map_or(false, |c| c.contains(item)),
            Some(t) => match t.as_seconds(self.basetime) {
                Ok(Some(s)) => first.0 <= s && s <= last.0,
                _ => false,
            },
        }
    }

    pub fn remove_all_items(&mut self) {
        for (_, mut child) in std::mem::take(&mut self.children) {
            self.tear_down_child(&mut child);
            child.remove_all_items();
        }
        self.active = None;
    }

    pub fn tree(&self, depth: Option<usize>) -> Tree<'_> {
        Tree {
            root: TreeRoot::Temporal(self),
            depth,
        }
    }

    pub(super) fn fmt_children(&self, f: &mut fmt::Formatter<'_>, prefix: &str, depth: Option<usize>) -> fmt::Result {
        for (t, child) in &self.children {
            let suffix = if Some(child.id()) == self.active { " <-- active" } else { "" };
            writeln!(f, "{prefix}{child} (t={t}){suffix}")?;
            fmt_subtree(child, f, prefix, depth)?;
        }
        Ok(())
    }
}

impl Node for DatasetTemporal {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }

    fn clear_cache(&self) {
        for (_, child) in &self.children {
            child.clear_cache();
        }
    }
}

impl fmt::Display for DatasetTemporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DatasetTemporal name={} nr_times={}>", self.name(), self.children.len())
    }
}
