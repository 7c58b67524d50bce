use chrono::NaiveDateTime;
use ndarray::{Array, ArrayD, IxDyn};

use super::*;
use crate::{
    crds::{Centering, Coordinates},
    field::{FieldKind, FnSource, SourceError},
    time::{TimeSpec, TimeValue},
};

fn crds() -> Coordinates {
    Coordinates::uniform([("x", 0.0, 1.0, 2), ("y", 0.0, 1.0, 2)]).unwrap()
}

fn grid_at(name: &str, t: Option<f64>) -> Grid {
    let mut grid = Grid::new(name).with_crds(crds());
    let fill = t.unwrap_or(-1.0);
    grid.add_field([Field::new("b", crds(), Array::from_elem(IxDyn(&[2, 2]), fill), Centering::Node).unwrap()])
        .unwrap();
    if let Some(t) = t {
        grid.set_time(t);
    }
    grid
}

fn lazy_grid_at(name: &str, t: f64) -> Grid {
    let mut grid = grid_at(name, Some(t));
    grid.add_field([Field::lazy(
        "lazy",
        crds(),
        Centering::Node,
        FieldKind::Scalar,
        FnSource(|| Ok::<_, SourceError>(ArrayD::zeros(IxDyn(&[2, 2])))),
    )])
    .unwrap();
    grid
}

fn series() -> DatasetTemporal {
    let mut series = DatasetTemporal::new("series");
    for t in [3.0, 0.0, 1.0, 5.0, 2.0, 4.0] {
        series.add(grid_at(&format!("g{t}"), Some(t)), false);
    }
    series
}

fn grid_times(iter: TimeIter<'_>) -> Vec<f64> {
    iter.map(|g| g.time().unwrap()).collect()
}

fn spec(text: &str) -> TimeSpec {
    TimeSpec::parse(text).unwrap()
}

#[test]
fn field_lookup_through_active_child() {
    let mut ds = Dataset::new("ds");
    ds.add(grid_at("grid", Some(0.0)), true);

    let field = ds.get_field("b", None, None).unwrap();
    let Item::Field(item) = ds.get("b").unwrap() else {
        panic!("expected a field");
    };
    assert_eq!(field.data().unwrap(), item.data().unwrap());
    assert!(matches!(ds.get("grid").unwrap(), Item::Child(Child::Grid(_))));
    assert!(ds.contains("b"));
    assert!(ds.contains("grid"));

    let grid = ds.get_child_mut("grid").unwrap().as_grid_mut().unwrap();
    grid.remove_field("b").unwrap();
    assert!(matches!(
        ds.get_field("b", None, None),
        Err(Error::NotFound { kind: "field", .. })
    ));
    assert!(!ds.contains("b"));
}

#[test]
fn no_active_child() {
    let mut ds = Dataset::new("ds");
    assert!(matches!(ds.get_field("b", None, None), Err(Error::NoActiveChild { .. })));
    assert!(matches!(ds.nr_times(":"), Err(Error::NoTemporalDataset)));

    ds.add(grid_at("grid", None), false);
    assert!(matches!(ds.get_grid(None), Err(Error::NoActiveChild { .. })));
    assert!(ds.get("b").unwrap_err().is_not_found());

    ds.activate("grid").unwrap();
    assert_eq!(ds.get_grid(None).unwrap().name(), "grid");
    assert!(ds.activate("nope").is_err());
}

#[test]
fn children_are_attached_and_detached() {
    let mut ds = Dataset::new("ds");
    ds.set_info("run", "r1");
    ds.add(grid_at("grid", None), true);
    let child = ds.get_child("grid").unwrap();
    assert_eq!(child.parent(), Some(ds.id()));
    assert_eq!(child.info("run"), Some("r1"));

    let removed = ds.remove("grid").unwrap();
    assert_eq!(removed[0].parent(), None);
    assert!(ds.active_child().is_none());
    assert!(ds.remove("grid").is_err());

    ds.add(grid_at("a", None), true);
    ds.add(grid_at("b", None), false);
    ds.remove_all_items();
    assert!(ds.is_empty());
}

#[test]
fn children_sorted_by_time() {
    let series = series();
    assert_eq!(series.times(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(series.nr_times(":").unwrap(), 6);
    assert_eq!(grid_times(series.iter_times("1::2").unwrap()), vec![1.0, 3.0, 5.0]);
    assert_eq!(grid_times(series.iter_times("4:,0").unwrap()), vec![4.0, 5.0, 0.0]);
    assert_eq!(series.get_child("2.5f").unwrap().time(), Some(2.0));
    assert_eq!(series.get_child(-1).unwrap().time(), Some(5.0));
}

#[test]
fn equal_times_keep_insertion_order() {
    let mut series = DatasetTemporal::new("series");
    series.add(grid_at("late", Some(2.0)), false);
    series.add(grid_at("first", Some(1.0)), false);
    series.add(grid_at("second", Some(1.0)), false);
    series.add(grid_at("untimed", None), false);
    let names: Vec<_> = series.children().map(|c| c.name().to_string()).collect();
    assert_eq!(names, ["untimed", "first", "second", "late"]);
    assert_eq!(series.times()[0], 0.0);
}

#[test]
fn active_and_explicit_times() {
    let mut series = series();
    assert!(matches!(series.get_field("b", None, None), Err(Error::NoActiveChild { .. })));

    series.activate(4).unwrap();
    assert_eq!(series.get_field("b", None, None).unwrap().data().unwrap().sum(), 16.0);

    let b = series.get_field("b", Some(&spec("1.0f")), None).unwrap();
    assert_eq!(b.data().unwrap().sum(), 4.0);
    assert_eq!(series.get_grid(Some(&spec("3"))).unwrap().name(), "g3");

    let slc = Selection::parse("x=0").unwrap();
    let cut = series.get_field("b", Some(&spec("2")), Some(&slc)).unwrap();
    assert_eq!(cut.shape(), vec![1, 2]);
}

#[test]
fn iteration_releases_caches() {
    let mut series = DatasetTemporal::new("series");
    for t in [0.0, 1.0, 2.0] {
        series.add(lazy_grid_at(&format!("g{t}"), t), false);
    }
    let loaded = |series: &DatasetTemporal| {
        series
            .children()
            .filter(|c| {
                let field = c.as_grid().unwrap().get_field_with("lazy", None, true).unwrap();
                field.is_loaded()
            })
            .count()
    };

    let steps = series.iter_times(":").unwrap();
    assert_eq!(steps.len(), 3);
    for grid in steps.clone() {
        grid.get_field_with("lazy", None, true).unwrap().data().unwrap();
        assert_eq!(loaded(&series), 1);
    }
    assert_eq!(loaded(&series), 0);

    // the same steps can be walked again
    assert_eq!(grid_times(steps), vec![0.0, 1.0, 2.0]);
}

#[test]
fn datetimes_need_a_basetime() {
    let base = NaiveDateTime::parse_from_str("2020-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
    let mut series = series().with_basetime(base);
    assert_eq!(series.get_child("UT2020-01-01T00:00:03.0").unwrap().time(), Some(3.0));
    assert_eq!(
        grid_times(series.iter_times("UT2020-01-01T00:00:01.0:UT2020-01-01T00:00:02.0").unwrap()),
        vec![1.0, 2.0]
    );
    assert_eq!(
        series.as_floating_t(TimeValue::Datetime(base)).unwrap(),
        Some(0.0)
    );
    series.activate("UT00:00:04.0").unwrap();
    assert_eq!(series.active_child().unwrap().time(), Some(4.0));

    let plain = self::series();
    assert!(matches!(
        plain.get_child("UT2020-01-01T00:00:03.0"),
        Err(Error::TimeSlice(TimeSliceError::NoBasetime { .. }))
    ));
}

#[test]
fn membership() {
    let mut series = series();
    assert!(series.contains("0"));
    assert!(series.contains("2.5f"));
    assert!(!series.contains("7.5f"));
    assert!(!series.contains("b"));
    series.activate(0).unwrap();
    assert!(series.contains("b"));
    assert!(!series.contains("q"));
}

#[test]
fn nested_datasets() {
    let mut root = Dataset::new("root");
    root.add(series(), true);
    assert_eq!(root.nr_times("::2").unwrap(), 3);
    assert_eq!(root.get_times(":").unwrap().len(), 6);
    assert_eq!(root.get_time("2").unwrap().name(), "g2");

    root.activate_time(5).unwrap();
    assert_eq!(root.get_grid(None).unwrap().name(), "g5");
    assert_eq!(root.get_field("b", None, None).unwrap().data().unwrap().sum(), 20.0);
    assert_eq!(root.iter_fields(None, None).unwrap().len(), 1);
    assert!(matches!(root.get("b").unwrap(), Item::Field(_)));
}

#[test]
fn tree_display() {
    let mut series = DatasetTemporal::new("series");
    series.add(grid_at("g0", Some(0.0)), false);
    series.add(grid_at("g1", Some(1.0)), true);
    let mut root = Dataset::new("root");
    root.add(series, true);

    let expected = "\
<Dataset name=root>
    <DatasetTemporal name=series nr_times=2> <-- active
        <Grid name=g0 time=0> (t=0)
            b <scalar, node> [2, 2]
        <Grid name=g1 time=1> (t=1) <-- active
            b <scalar, node> [2, 2]
";
    assert_eq!(root.tree(None).to_string(), expected);

    let shallow = "\
<Dataset name=root>
    <DatasetTemporal name=series nr_times=2> <-- active
        <Grid name=g0 time=0> (t=0)
        <Grid name=g1 time=1> (t=1) <-- active
";
    assert_eq!(root.tree(Some(1)).to_string(), shallow);
}
