//! Grids hold the fields of one time step on one set of coordinates.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{Duration, NaiveDateTime};
use get_size::GetSize;
use ndarray::{Array1, ArrayD};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    bucket::Bucket,
    crds::{Centering, Coordinates, OutOfRange},
    dataset::Item,
    field::{Field, Layout},
    slice::Selection,
    tree::{CacheGuard, Node, NodeMeta},
    Error,
};

/// What happens when a field is added under a name that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// The new field shadows the old one until it is removed again.
    #[default]
    Shadow,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Layout every vector field is converted to on lookup.
    pub force_vector_layout: Option<Layout>,
    /// Hand out the stored field itself instead of a shell copy.
    pub longterm_field_caches: bool,
    pub duplicate_fields: DuplicatePolicy,
    pub out_of_range: OutOfRange,
}

/// Computes a field the grid does not store.
pub trait DerivedField: Send + Sync {
    fn derive(&self, grid: &Grid) -> Result<Field, Error>;
}

impl<F> DerivedField for F
where
    F: Fn(&Grid) -> Result<Field, Error> + Send + Sync,
{
    fn derive(&self, grid: &Grid) -> Result<Field, Error> {
        self(grid)
    }
}

/// Post-processes a field on its way out of the grid.
pub trait FieldProcessor: Send + Sync {
    fn process(&self, grid: &Grid, field: Field) -> Result<Field, Error>;
}

impl<F> FieldProcessor for F
where
    F: Fn(&Grid, Field) -> Result<Field, Error> + Send + Sync,
{
    fn process(&self, grid: &Grid, field: Field) -> Result<Field, Error> {
        self(grid, field)
    }
}

/// Evaluates lookups of the form `"name = expression"`. The evaluator is
/// responsible for applying the selection itself.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, grid: &Grid, name: &str, expr: &str, slc: Option<&Selection>) -> Result<Field, Error>;
}

impl<F> Evaluator for F
where
    F: Fn(&Grid, &str, &str, Option<&Selection>) -> Result<Field, Error> + Send + Sync,
{
    fn evaluate(&self, grid: &Grid, name: &str, expr: &str, slc: Option<&Selection>) -> Result<Field, Error> {
        self(grid, name, expr, slc)
    }
}

/// Behaviour shared by all grids of one kind, fixed when the kind is built.
#[derive(Clone, Default)]
pub struct GridType {
    pub name: String,
    pub config: GridConfig,
    derived: HashMap<String, Arc<dyn DerivedField>>,
    processors: HashMap<String, Arc<dyn FieldProcessor>>,
    process_all: Option<Arc<dyn FieldProcessor>>,
    evaluator: Option<Arc<dyn Evaluator>>,
}

impl GridType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, config: GridConfig) -> Self {
        self.config = config;
        self
    }

    pub fn derive(mut self, name: impl Into<String>, provider: impl DerivedField + 'static) -> Self {
        self.derived.insert(name.into(), Arc::new(provider));
        self
    }

    pub fn process(mut self, name: impl Into<String>, processor: impl FieldProcessor + 'static) -> Self {
        self.processors.insert(name.into(), Arc::new(processor));
        self
    }

    pub fn process_all(mut self, processor: impl FieldProcessor + 'static) -> Self {
        self.process_all = Some(Arc::new(processor));
        self
    }

    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn derived_names(&self) -> impl Iterator<Item = &str> {
        self.derived.keys().map(String::as_str)
    }
}

impl fmt::Debug for GridType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridType")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("derived", &self.derived.keys().collect::<Vec<_>>())
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .field("process_all", &self.process_all.is_some())
            .field("evaluator", &self.evaluator.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct Grid {
    meta: NodeMeta,
    grid_type: Arc<GridType>,
    src_crds: Option<Arc<Coordinates>>,
    /// `src_crds` with reflections applied, computed on first use.
    crds: OnceCell<Arc<Coordinates>>,
    fields: Bucket<Field>,
}

impl Grid {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_type(name, Arc::new(GridType::new("grid")))
    }

    pub fn with_type(name: impl Into<String>, grid_type: Arc<GridType>) -> Self {
        Self {
            meta: NodeMeta::new(name),
            grid_type,
            src_crds: None,
            crds: OnceCell::new(),
            fields: Bucket::new(),
        }
    }

    pub fn grid_type(&self) -> &Arc<GridType> {
        &self.grid_type
    }

    pub fn set_crds(&mut self, crds: Coordinates) {
        let crds = crds.with_out_of_range(self.grid_type.config.out_of_range);
        self.src_crds = Some(Arc::new(crds));
        self.crds = OnceCell::new();
    }

    pub fn with_crds(mut self, crds: Coordinates) -> Self {
        self.set_crds(crds);
        self
    }

    /// Coordinates as stored, before any reflection is applied.
    pub fn src_crds(&self) -> Result<&Arc<Coordinates>, Error> {
        self.src_crds.as_ref().ok_or_else(|| Error::NoCoordinates {
            grid: self.name().to_string(),
        })
    }

    pub fn crds(&self) -> Result<&Arc<Coordinates>, Error> {
        let src = self.src_crds()?;
        Ok(self.crds.get_or_init(|| Arc::new(src.apply_reflections())))
    }

    pub fn get_crd_nc(&self, axis: &str) -> Result<Array1<f64>, Error> {
        Ok(self.src_crds()?.get_nc(axis)?.clone())
    }

    pub fn get_crd_cc(&self, axis: &str) -> Result<Array1<f64>, Error> {
        Ok(self.src_crds()?.get_cc(axis)?.clone())
    }

    pub fn get_crd_ec(&self, axis: &str, dir: &str) -> Result<Array1<f64>, Error> {
        Ok(self.src_crds()?.get_ec(axis, dir)?.clone())
    }

    pub fn get_crd_fc(&self, axis: &str, dir: &str) -> Result<Array1<f64>, Error> {
        Ok(self.src_crds()?.get_fc(axis, dir)?.clone())
    }

    /// Every axis broadcast to the full grid shape.
    pub fn get_crds_shaped(&self, centering: Centering) -> Result<Vec<ArrayD<f64>>, Error> {
        let crds = self.src_crds()?;
        crds.axis_names()
            .into_iter()
            .map(|axis| Ok(crds.get_shaped(axis, centering)?))
            .collect()
    }

    pub fn xl(&self, centering: Centering) -> Result<Vec<f64>, Error> {
        Ok(self.src_crds()?.xl(centering))
    }

    pub fn xh(&self, centering: Centering) -> Result<Vec<f64>, Error> {
        Ok(self.src_crds()?.xh(centering))
    }

    pub fn add_field(&mut self, fields: impl IntoIterator<Item = Field>) -> Result<(), Error> {
        for mut field in fields {
            let name = field.name().to_string();
            if self.fields.contains(&name) {
                match self.grid_type.config.duplicate_fields {
                    DuplicatePolicy::Error => {
                        return Err(Error::DuplicateField {
                            grid: self.name().to_string(),
                            name,
                        })
                    }
                    DuplicatePolicy::Shadow => debug!(grid = self.name(), field = name, "Shadowing field"),
                }
            }
            self.prepare_child(&mut field);
            self.fields.insert(name, field);
        }
        Ok(())
    }

    /// Removes every field stored under `name`.
    pub fn remove_field(&mut self, name: &str) -> Result<Vec<Field>, Error> {
        let mut removed = self.fields.remove(name);
        if removed.is_empty() {
            return Err(Error::not_found("field", name));
        }
        for field in removed.iter_mut() {
            self.tear_down_child(field);
        }
        Ok(removed)
    }

    pub fn remove_all_items(&mut self) {
        let mut fields = self.fields.drain();
        for field in fields.iter_mut() {
            self.tear_down_child(field);
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.names().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get_field(&self, name: &str, slc: Option<&Selection>) -> Result<Field, Error> {
        self.get_field_with(name, slc, false)
    }

    /// Looks a field up by name. Stored fields come first, then derived
    /// providers, then `"name = expr"` expressions. The named processor and
    /// the catch-all processor run on whatever was found, and the selection
    /// is applied last, keeping single-value axes.
    #[instrument(skip(self, slc), fields(grid = self.name()))]
    pub fn get_field_with(&self, name: &str, slc: Option<&Selection>, force_longterm: bool) -> Result<Field, Error> {
        let ty = &self.grid_type;
        let mut final_slice = true;

        let mut field = if let Some(stored) = self.fields.get(name) {
            if force_longterm || ty.config.longterm_field_caches {
                stored.clone()
            } else {
                stored.shell_copy()
            }
        } else if let Some(provider) = ty.derived.get(name) {
            provider.derive(self)?
        } else if let Some((result, expr)) = split_expression(name) {
            let evaluator = ty.evaluator.as_ref().ok_or_else(|| Error::NoEvaluator { expr: expr.into() })?;
            final_slice = false;
            evaluator.evaluate(self, result, expr, slc)?
        } else {
            return Err(Error::not_found("field", name));
        };

        if let Some(processor) = ty.processors.get(name) {
            field = processor.process(self, field)?;
        }
        if let Some(processor) = &ty.process_all {
            field = processor.process(self, field)?;
        }
        if let Some(layout) = ty.config.force_vector_layout {
            if field.is_vector() && field.layout() != Some(layout) {
                field = field.with_layout(layout)?;
            }
        }
        match slc {
            Some(slc) if final_slice => Ok(field.slice_and_keep(slc)?),
            _ => Ok(field),
        }
    }

    /// A field by name, falling back to coordinate handles like `"xcc"`.
    pub fn get(&self, item: &str) -> Result<Item<'_>, Error> {
        match self.get_field(item, None) {
            Err(e) if e.is_not_found() => match self.src_crds.as_ref() {
                Some(crds) if crds.contains(item) => Ok(Item::Coordinate(crds.get(item)?.clone())),
                _ => Err(e),
            },
            other => other.map(Item::Field),
        }
    }

    pub fn nr_times(&self) -> usize {
        1
    }

    /// A grid is its own single time step.
    pub fn iter_times(&self) -> TimeIter<'_> {
        TimeIter::new(vec![self])
    }

    /// Scoped access to the stored fields, all of them or the ones named.
    pub fn iter_fields(&self, named: Option<&[&str]>) -> Result<Vec<CacheGuard<'_, Field>>, Error> {
        match named {
            None => Ok(self.fields.iter().map(CacheGuard::new).collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.fields
                        .get(name)
                        .map(CacheGuard::new)
                        .ok_or_else(|| Error::not_found("field", *name))
                })
                .collect(),
        }
    }

    /// The grid's time, as a date when a base time is known.
    pub fn format_time(&self, basetime: Option<NaiveDateTime>) -> String {
        let Some(t) = self.time() else {
            return "-".to_string();
        };
        let micros = (t * 1e6).round();
        // times past what a date can hold fall back to seconds
        let date = basetime.and_then(|base| {
            (micros.is_finite() && micros.abs() < i64::MAX as f64)
                .then(|| Duration::microseconds(micros as i64))
                .and_then(|offset| base.checked_add_signed(offset))
        });
        match date {
            Some(date) => date.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            None => format!("{t:.3}"),
        }
    }

    pub(crate) fn fmt_children(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        for field in self.fields.iter() {
            writeln!(f, "{prefix}{field}")?;
        }
        Ok(())
    }
}

/// Grids of consecutive time steps. Each one is handed out in a guard, so
/// its field caches are released once the consumer moves on. Clone the
/// iterator to walk the same steps again.
#[derive(Debug, Clone)]
pub struct TimeIter<'a> {
    grids: std::vec::IntoIter<&'a Grid>,
}

impl<'a> TimeIter<'a> {
    pub(crate) fn new(grids: Vec<&'a Grid>) -> Self {
        Self {
            grids: grids.into_iter(),
        }
    }
}

impl<'a> Iterator for TimeIter<'a> {
    type Item = CacheGuard<'a, Grid>;

    fn next(&mut self) -> Option<Self::Item> {
        self.grids.next().map(CacheGuard::new)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.grids.size_hint()
    }
}

impl ExactSizeIterator for TimeIter<'_> {}

fn split_expression(name: &str) -> Option<(&str, &str)> {
    let (result, expr) = name.split_once('=')?;
    if expr.contains('=') {
        return None;
    }
    Some((result.trim(), expr.trim()))
}

impl Node for Grid {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }

    fn clear_cache(&self) {
        for field in self.fields.iter_all() {
            field.clear_cache();
        }
    }
}

impl GetSize for Grid {
    fn get_heap_size(&self) -> usize {
        self.fields.iter_all().map(Field::nbytes).sum()
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Grid name={}", self.name())?;
        if let Some(t) = self.time() {
            write!(f, " time={t}")?;
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array, IxDyn};

    use super::*;
    use crate::field::{FieldKind, FieldSource, SourceError};

    fn crds() -> Coordinates {
        Coordinates::uniform([("x", 0.0, 3.0, 4), ("y", 0.0, 1.0, 2)]).unwrap()
    }

    fn field(name: &str, fill: f64) -> Field {
        Field::new(name, crds(), Array::from_elem(IxDyn(&[4, 2]), fill), Centering::Node).unwrap()
    }

    fn grid_with(ty: GridType) -> Grid {
        let mut grid = Grid::with_type("g", Arc::new(ty)).with_crds(crds());
        grid.add_field([field("b", 1.0), field("rho", 2.0)]).unwrap();
        grid
    }

    #[test]
    fn lookup_and_removal() {
        let mut grid = grid_with(GridType::default());
        assert_eq!(grid.field_names(), vec!["b", "rho"]);
        assert_eq!(grid.get_field("rho", None).unwrap().data().unwrap().sum(), 16.0);
        assert_eq!(grid.fields.get("b").unwrap().parent(), Some(grid.id()));

        let removed = grid.remove_field("b").unwrap();
        assert_eq!(removed[0].parent(), None);
        assert!(grid.get_field("b", None).unwrap_err().is_not_found());
        assert!(grid.remove_field("b").is_err());

        grid.remove_all_items();
        assert!(grid.is_empty());
    }

    #[test]
    fn shell_copies_unless_longterm() {
        let grid = grid_with(GridType::default());
        let shell = grid.get_field("b", None).unwrap();
        assert_ne!(shell.id(), grid.fields.get("b").unwrap().id());
        shell.assign(Array::zeros(IxDyn(&[4, 2]))).unwrap();
        assert_eq!(grid.fields.get("b").unwrap().data().unwrap().sum(), 0.0);

        let canonical = grid.get_field_with("b", None, true).unwrap();
        assert_eq!(canonical.id(), grid.fields.get("b").unwrap().id());

        let config = GridConfig {
            longterm_field_caches: true,
            ..Default::default()
        };
        let grid = grid_with(GridType::new("longterm").with_config(config));
        assert_eq!(grid.get_field("b", None).unwrap().id(), grid.fields.get("b").unwrap().id());
    }

    #[test]
    fn duplicate_policy() {
        let mut grid = grid_with(GridType::default());
        grid.add_field([field("b", 5.0)]).unwrap();
        assert_eq!(grid.get_field("b", None).unwrap().data().unwrap().sum(), 40.0);
        grid.remove_field("b").unwrap();
        assert!(!grid.contains("b"));

        let config = GridConfig {
            duplicate_fields: DuplicatePolicy::Error,
            ..Default::default()
        };
        let mut grid = grid_with(GridType::new("strict").with_config(config));
        assert!(matches!(
            grid.add_field([field("b", 5.0)]),
            Err(Error::DuplicateField { .. })
        ));
    }

    #[test]
    fn derived_processed_and_evaluated() {
        let ty = GridType::new("mhd")
            .derive("double_rho", |g: &Grid| -> Result<Field, Error> {
                let rho = g.get_field("rho", None)?;
                let data = rho.data()?.mapv(|v| v * 2.0);
                Ok(Field::new("double_rho", rho.crds().clone(), data.into_owned(), Centering::Node)?)
            })
            .process("rho", |_: &Grid, f: Field| -> Result<Field, Error> {
                let data = f.data()?.mapv(|v| v + 1.0);
                Ok(Field::new(f.name(), f.crds().clone(), data.into_owned(), f.centering())?)
            })
            .evaluator(|g: &Grid, name: &str, expr: &str, _: Option<&Selection>| -> Result<Field, Error> {
                let src = g.get_field(expr, None)?;
                let mut out = src.shell_copy();
                out.meta_mut().name = name.to_string();
                Ok(out)
            });
        let grid = grid_with(ty);

        assert_eq!(grid.get_field("rho", None).unwrap().data().unwrap().sum(), 24.0);
        assert_eq!(grid.get_field("double_rho", None).unwrap().data().unwrap().sum(), 48.0);
        let evaluated = grid.get_field("r2 = b", None).unwrap();
        assert_eq!(evaluated.name(), "r2");
        assert!(matches!(
            grid_with(GridType::default()).get_field("a = b", None),
            Err(Error::NoEvaluator { .. })
        ));
    }

    #[test]
    fn final_slice_keeps_axes() {
        let grid = grid_with(GridType::default());
        let slc = Selection::parse("x=1").unwrap();
        assert_eq!(grid.get_field("b", Some(&slc)).unwrap().shape(), vec![1, 2]);
    }

    #[test]
    fn forced_vector_layout() {
        let config = GridConfig {
            force_vector_layout: Some(Layout::Interlaced),
            ..Default::default()
        };
        let mut grid = Grid::with_type("g", Arc::new(GridType::new("v").with_config(config)));
        let v = Field::vector("v", crds(), Array::zeros(IxDyn(&[3, 4, 2])), Centering::Node, Layout::Flat).unwrap();
        grid.add_field([v]).unwrap();
        assert_eq!(grid.get_field("v", None).unwrap().shape(), vec![4, 2, 3]);
    }

    #[test]
    fn coordinate_fallback() {
        let grid = grid_with(GridType::default());
        match grid.get("xcc").unwrap() {
            Item::Coordinate(c) => assert_eq!(c, array![0.5, 1.5, 2.5]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(grid.get("b").unwrap(), Item::Field(_)));
        assert!(grid.get("nope").unwrap_err().is_not_found());
        assert_eq!(grid.get_crds_shaped(Centering::Node).unwrap()[1].shape(), &[4, 2]);
        assert_eq!(grid.xh(Centering::Node).unwrap(), vec![3.0, 1.0]);
    }

    #[test]
    fn reflected_crds_are_lazy() {
        let mut grid = Grid::new("g");
        assert!(matches!(grid.crds(), Err(Error::NoCoordinates { .. })));
        grid.set_crds(crds().with_reflections(["x"]).unwrap());
        assert_eq!(grid.crds().unwrap().get_nc("x").unwrap(), &array![-3.0, -2.0, -1.0, 0.0]);
        assert_eq!(grid.get_crd_nc("x").unwrap(), array![0.0, 1.0, 2.0, 3.0]);
    }

    #[derive(Debug)]
    struct Ones;

    impl FieldSource for Ones {
        fn load(&self) -> Result<ndarray::ArrayD<f64>, SourceError> {
            Ok(Array::ones(IxDyn(&[4, 2])))
        }
    }

    #[test]
    fn scoped_iteration_releases_caches() {
        let mut grid = Grid::new("g").with_crds(crds());
        grid.add_field([Field::lazy("lazy", crds(), Centering::Node, FieldKind::Scalar, Ones)])
            .unwrap();
        for g in grid.iter_times() {
            let f = g.get_field_with("lazy", None, true).unwrap();
            f.data().unwrap();
            assert!(g.fields.get("lazy").unwrap().is_loaded());
            assert!(g.get_heap_size() > 0);
        }
        assert!(!grid.fields.get("lazy").unwrap().is_loaded());

        {
            let fields = grid.iter_fields(Some(&["lazy"])).unwrap();
            fields[0].data().unwrap();
        }
        assert!(!grid.fields.get("lazy").unwrap().is_loaded());
        assert!(grid.iter_fields(Some(&["nope"])).is_err());
    }

    #[test]
    fn time_formatting() {
        let mut grid = Grid::new("g");
        assert_eq!(grid.format_time(None), "-");
        grid.set_time(90.5);
        assert_eq!(grid.format_time(None), "90.500");
        let base = NaiveDateTime::parse_from_str("2020-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        assert_eq!(grid.format_time(Some(base)), "2020-01-01T00:01:30.500");
        assert_eq!(grid.to_string(), "<Grid name=g time=90.5>");
    }

    #[test]
    fn times_beyond_the_calendar_print_as_seconds() {
        let base = NaiveDateTime::parse_from_str("2020-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        let mut grid = Grid::new("g");
        grid.set_time(1e13);
        assert_eq!(grid.format_time(Some(base)), "10000000000000.000");
        grid.set_time(9e12);
        assert_eq!(grid.format_time(Some(base)), "9000000000000.000");
        grid.set_time(-1e13);
        assert_eq!(grid.format_time(Some(base)), "-10000000000000.000");
    }
}
