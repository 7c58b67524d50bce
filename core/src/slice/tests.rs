use super::*;
use crate::crds::{CoordinateError, Coordinates};

fn node_crds() -> Coordinates {
    Coordinates::default_for(&[31, 41, 51], Centering::Node)
}

fn cell_crds() -> Coordinates {
    Coordinates::default_for(&[30, 40, 50], Centering::Cell)
}

/// Axis names and shape of the coordinates a selection produces.
fn apply(sel: &str, crds: &Coordinates, centering: Centering, keep: bool) -> (Vec<String>, Vec<usize>) {
    let plan = Selection::parse(sel).unwrap().resolve(crds, centering, keep).unwrap();
    let sub = crds.sliced(&plan, centering).unwrap();
    let names = sub.axis_names().into_iter().map(String::from).collect();
    (names, sub.shape(centering))
}

fn names(sel: &str, keep: bool) -> Vec<String> {
    apply(sel, &node_crds(), Centering::Node, keep).0
}

#[test]
fn parse_tokens() {
    let sel = Selection::parse("None, x=1:5:2, ..., z=0.5f, -1").unwrap();
    let items: Vec<_> = sel.tokens().iter().map(|t| (t.name.as_deref(), t.item)).collect();
    assert_eq!(
        items,
        vec![
            (None, SliceItem::NewAxis),
            (
                Some("x"),
                SliceItem::Range {
                    start: Some(Value::Index(1)),
                    stop: Some(Value::Index(5)),
                    step: Some(2),
                }
            ),
            (None, SliceItem::Ellipsis),
            (Some("z"), SliceItem::Value(Value::Coord(0.5))),
            (None, SliceItem::Value(Value::Index(-1))),
        ]
    );
    assert_eq!(sel.to_string(), "newaxis, x=1:5:2, ..., z=0.5f, -1");
}

#[test]
fn structured_and_textual_agree() {
    let text = Selection::parse("None, 1, ..., 2.0f").unwrap();
    let structured = vec![SliceItem::NewAxis, 1.into(), SliceItem::Ellipsis, 2.0.into()]
        .to_selection()
        .unwrap();
    let crds = node_crds();
    assert_eq!(
        text.resolve(&crds, Centering::Node, false).unwrap(),
        structured.resolve(&crds, Centering::Node, false).unwrap()
    );
}

#[test]
fn reduce_node_shapes() {
    let crds = node_crds();
    let c = Centering::Node;
    assert_eq!(apply("None, 1, ..., 2", &crds, c, false).1, vec![1, 41]);
    assert_eq!(apply("1, ..., None, 2", &crds, c, false).1, vec![41, 1]);
    assert_eq!(apply("None, ..., None, 1", &crds, c, false).1, vec![1, 31, 41, 1]);
    assert_eq!(apply("x=0, ..., None, 2", &crds, c, false).1, vec![41, 1]);
    assert_eq!(apply("x=5f, ..., t=None, 2", &crds, c, false).1, vec![41, 1]);

    let plan = Selection::parse("None, 1, ..., 2")
        .unwrap()
        .resolve(&crds, c, false)
        .unwrap();
    let sub = crds.sliced(&plan, c).unwrap();
    assert_eq!(sub.shape_nc(), vec![1, 41]);
    assert_eq!(sub.shape_cc(), vec![1, 40]);
}

#[test]
fn reduce_cell_shapes() {
    let crds = cell_crds();
    let c = Centering::Cell;
    let check = |sel: &str, cc: Vec<usize>, nc: Vec<usize>| {
        let plan = Selection::parse(sel).unwrap().resolve(&crds, c, false).unwrap();
        let sub = crds.sliced(&plan, c).unwrap();
        assert_eq!(sub.shape_cc(), cc, "{sel}");
        assert_eq!(sub.shape_nc(), nc, "{sel}");
    };
    check("None, 1, ..., 2", vec![1, 40], vec![2, 41]);
    check("1, ..., None, 2", vec![40, 1], vec![41, 2]);
    check("None, ..., None, 1", vec![1, 30, 40, 1], vec![2, 31, 41, 2]);
}

#[test]
fn single_cell_keeps_its_edges() {
    let crds = cell_crds();
    let plan = Selection::parse("x=3.2f").unwrap().resolve(&crds, Centering::Cell, true).unwrap();
    let sub = crds.sliced(&plan, Centering::Cell).unwrap();
    assert_eq!(sub.get_nc("x").unwrap().to_vec(), vec![2.5, 3.5]);
    assert_eq!(sub.get_cc("x").unwrap().to_vec(), vec![3.0]);
}

#[test]
fn strided_cells_rebuild_nodes() {
    let crds = cell_crds();
    let plan = Selection::parse("x=0:6:2").unwrap().resolve(&crds, Centering::Cell, true).unwrap();
    let sub = crds.sliced(&plan, Centering::Cell).unwrap();
    assert_eq!(sub.get_cc("x").unwrap().to_vec(), vec![0.0, 2.0, 4.0]);
    assert_eq!(sub.get_nc("x").unwrap().to_vec(), vec![-1.0, 1.0, 3.0, 5.0]);
}

#[test]
fn new_axes_with_keep() {
    let k = true;
    assert_eq!(names("None, :, 0f, ..., None", k), ["new-x0", "x", "y", "z", "new-x1"]);
    assert_eq!(names("None, ..., 0f, None", k), ["new-x0", "x", "y", "z", "new-x1"]);
    assert_eq!(names("None, :, 0f, None", k), ["new-x0", "x", "y", "new-x1", "z"]);
    assert_eq!(names("None, :, ..., None", k), ["new-x0", "x", "y", "z", "new-x1"]);
    assert_eq!(names("None, :, None, ...", k), ["new-x0", "x", "new-x1", "y", "z"]);
    assert_eq!(names("None, :, 0f, None, ...", k), ["new-x0", "x", "y", "new-x1", "z"]);

    let crds = node_crds();
    let c = Centering::Node;
    assert_eq!(apply("None, :, 0f, ..., None", &crds, c, k).1, vec![1, 31, 1, 51, 1]);
    assert_eq!(apply("None, ..., 0f, None", &crds, c, k).1, vec![1, 31, 41, 1, 1]);
    assert_eq!(apply("None, :, 0f, None", &crds, c, k).1, vec![1, 31, 1, 1, 51]);
    assert_eq!(apply("None, :, None, ...", &crds, c, k).1, vec![1, 31, 1, 41, 51]);
}

#[test]
fn named_new_axes() {
    let crds = node_crds();
    let c = Centering::Node;
    let cases: [(&str, &[&str], &[usize]); 7] = [
        (":", &["x", "y", "z"], &[31, 41, 51]),
        (":, w=newaxis, z=0.0f:0.3f", &["x", "w", "y", "z"], &[31, 1, 41, 1]),
        (":, w=newaxis, 0.0f, v=newaxis, z=0.0f:0.3f", &["x", "w", "v", "z"], &[31, 1, 1, 1]),
        (":, w=newaxis, ..., 0.0f:0.3f", &["x", "w", "y", "z"], &[31, 1, 41, 1]),
        ("..., :, w=newaxis, 0.0f:0.3f", &["x", "y", "w", "z"], &[31, 41, 1, 1]),
        ("u=newaxis, ..., w=newaxis", &["u", "x", "y", "z", "w"], &[1, 31, 41, 51, 1]),
        ("newaxis, ..., w=newaxis", &["new-x0", "x", "y", "z", "w"], &[1, 31, 41, 51, 1]),
    ];
    for (sel, axes, shape) in cases {
        let (n, s) = apply(sel, &crds, c, false);
        assert_eq!(n, axes, "{sel}");
        assert_eq!(s, shape, "{sel}");
    }
    assert_eq!(names("u=newaxis, ..., newaxis", false), ["u", "x", "y", "z", "new-x0"]);
    assert_eq!(names("u=newaxis, y=0f, ..., w=newaxis", true), ["u", "x", "y", "z", "w"]);
    assert_eq!(names("u=newaxis, y=0f, w=newaxis", true), ["u", "x", "y", "w", "z"]);
    assert_eq!(names("u=newaxis, y=0f, w=newaxis, ...", true), ["u", "x", "y", "w", "z"]);
    assert_eq!(
        apply("u=newaxis, y=0f, w=newaxis", &crds, c, true).1,
        vec![1, 31, 1, 1, 51]
    );
}

#[test]
fn ellipsis_absorbs_remaining_axes() {
    let axes = ["x", "y", "z"];
    for sel in ["...", "1, ...", "..., 1", "1, ..., 2", "1, 2, 3, ..."] {
        let tokens = Selection::parse(sel).unwrap();
        let planned = plan(tokens.tokens(), &axes).unwrap();
        assert_eq!(planned.len(), 3, "{sel}");
    }
}

#[test]
fn grammar_errors() {
    let axes = ["x", "y", "z"];
    let err = |sel: &str| plan(Selection::parse(sel).unwrap().tokens(), &axes).unwrap_err();

    assert!(matches!(err("..., 1, ..."), SliceError::MultipleEllipsis { span: Some(_) }));
    assert_eq!(err("1, 2, 3, 4"), SliceError::TooManyTokens { tokens: 4, axes: 3 });
    assert!(matches!(err("x=1, 2, 3, 4"), SliceError::TooManyTokens { .. }));
    assert!(matches!(err("x=1, x=2"), SliceError::DuplicateName { .. }));
    assert!(matches!(
        err("q=1"),
        SliceError::Coordinate(CoordinateError::UnknownAxis { .. })
    ));

    assert!(matches!(
        Selection::parse("x=1:2:3:4"),
        Err(SliceError::TooManyColons { .. })
    ));
    assert!(matches!(Selection::parse("1:2:0.5"), Err(SliceError::BadStep { .. })));
    assert!(matches!(Selection::parse("x=..."), Err(SliceError::NamedEllipsis { .. })));
    assert!(matches!(Selection::parse("1 2"), Err(SliceError::BadToken { .. })));
}

#[test]
fn zero_step_is_a_coordinate_error() {
    let err = Selection::parse("::0")
        .unwrap()
        .resolve(&node_crds(), Centering::Node, true)
        .unwrap_err();
    assert_eq!(err, SliceError::Coordinate(CoordinateError::ZeroStep { axis: "x".into() }));
}

#[test]
fn integer_index_out_of_bounds() {
    let err = Selection::parse("40").unwrap().resolve(&node_crds(), Centering::Node, false);
    assert!(matches!(
        err,
        Err(SliceError::Coordinate(CoordinateError::IndexOutOfRange { index: 40, len: 31, .. }))
    ));
}

#[test]
fn synthesized_new_axis_names_skip_taken_ones() {
    let tokens = [Token::new(SliceItem::NewAxis), Token::named("new-x0", SliceItem::NewAxis)];
    let planned = plan(&tokens, &["new-x1", "y"]).unwrap();
    let created: Vec<&str> = planned
        .iter()
        .filter_map(|p| match p {
            Planned::New { name } => Some(name.as_str()),
            Planned::Source { .. } => None,
        })
        .collect();
    assert_eq!(created, ["new-x2", "new-x0"]);

    let err = plan(&[Token::named("y", SliceItem::NewAxis)], &["x", "y"]).unwrap_err();
    assert!(matches!(err, SliceError::DuplicateName { .. }));
}
