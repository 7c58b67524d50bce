use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use color_eyre::eyre;
use miette::Diagnostic;
use ndarray::{Array, ArrayD, IxDyn};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fieldtree_core::{
    field::{FnSource, SourceError},
    Centering, Coordinates, DatasetTemporal, Field, FieldKind, Grid, Node, OutOfRange, Selection, TimeSpec,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Slice a field of running numbers and print the result
    Slice {
        /// Selection, e.g. "x=2f:10f, ..., None, 1"
        selection: String,
        /// Node counts of the grid
        #[arg(short, long, value_delimiter = ',', default_value = "31,41,51")]
        shape: Vec<usize>,
        /// Put the data on cell centers instead of nodes
        #[arg(long)]
        cell: bool,
        /// Keep axes that a single value selects
        #[arg(short, long)]
        keep: bool,
        /// Interpolate single coordinates instead of snapping to the nearest point
        #[arg(short, long, conflicts_with = "keep")]
        interpolate: bool,
    },
    /// Resolve a time expression against a list of times
    Times {
        /// Time expression, e.g. "1::2" or "UT2020-01-01T00:00:01.0:"
        expr: String,
        #[arg(short, long, value_delimiter = ',', default_value = "0,1,2,3,4,5")]
        times: Vec<f64>,
        /// Date absolute time stamps are measured from
        #[arg(short, long, value_parser = parse_datetime)]
        basetime: Option<NaiveDateTime>,
        /// Fail on times outside of the series instead of clamping
        #[arg(long)]
        strict: bool,
    },
    /// Walk the time steps of a synthetic run of a moving pulse
    Scan {
        #[arg(short = 'n', long, default_value_t = 10)]
        steps: usize,
        /// Seconds between steps
        #[arg(long, default_value_t = 0.5)]
        dt: f64,
        /// Time steps to visit
        #[arg(short, long, default_value = ":")]
        time: String,
        /// Selection applied to every step
        #[arg(short, long)]
        selection: Option<String>,
        /// Print the dataset tree first
        #[arg(long)]
        tree: bool,
    },
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
}

/// Renders a diagnostic against the text it points into.
fn report<E: Diagnostic + Send + Sync + 'static>(err: E, text: &str) -> eyre::Report {
    let report = miette::Report::new(err).with_source_code(text.to_string());
    eyre::eyre!("{report:?}")
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Slice {
            selection,
            shape,
            cell,
            keep,
            interpolate,
        } => slice(&selection, &shape, cell, keep, interpolate),
        Command::Times {
            expr,
            times,
            basetime,
            strict,
        } => times_cmd(&expr, times, basetime, strict),
        Command::Scan {
            steps,
            dt,
            time,
            selection,
            tree,
        } => scan(steps, dt, &time, selection.as_deref(), tree),
    }
}

fn slice(text: &str, shape: &[usize], cell: bool, keep: bool, interpolate: bool) -> color_eyre::Result<()> {
    let centering = if cell { Centering::Cell } else { Centering::Node };
    let crds = Coordinates::default_for(shape, Centering::Node);
    let data_shape = crds.shape(centering);
    let n = data_shape.iter().product::<usize>();
    let data = Array::from_iter((0..n).map(|i| i as f64)).into_shape(IxDyn(&data_shape))?;
    let field = Field::new("f", crds, data, centering)?;

    let selection = Selection::parse(text).map_err(|e| report(e, text))?;
    let out = if interpolate {
        field.interpolated_slice(&selection)
    } else if keep {
        field.slice_and_keep(&selection)
    } else {
        field.slice(&selection)
    }
    .map_err(|e| report(e, text))?;

    println!("{field}");
    println!("  -> {out}");
    println!("{}", out.crds());
    let data = out.data()?;
    if data.len() <= 64 {
        println!("{data}");
    }
    Ok(())
}

fn times_cmd(expr: &str, mut times: Vec<f64>, basetime: Option<NaiveDateTime>, strict: bool) -> color_eyre::Result<()> {
    times.sort_by(f64::total_cmp);
    let policy = if strict { OutOfRange::Error } else { OutOfRange::Clamp };
    let spec = TimeSpec::parse(expr).map_err(|e| report(e, expr))?;
    for i in spec.resolve(&times, basetime, policy)? {
        println!("{i}\t{}", times[i]);
    }
    Ok(())
}

/// A gaussian pulse swinging along x over time.
fn pulse(crds: &Coordinates, t: f64) -> Result<ArrayD<f64>, SourceError> {
    let xs = crds.get_nc("x")?;
    let ys = crds.get_nc("y")?;
    let cx = 0.5 * t.sin();
    Ok(ArrayD::from_shape_fn(IxDyn(&crds.shape_nc()), |idx| {
        let (x, y) = (xs[idx[0]], ys[idx[1]]);
        (-((x - cx).powi(2) + y * y) / 0.1).exp()
    }))
}

fn scan(steps: usize, dt: f64, time: &str, selection: Option<&str>, tree: bool) -> color_eyre::Result<()> {
    let mut series = DatasetTemporal::new("pulse");
    for step in 0..steps {
        let t = step as f64 * dt;
        let crds = Coordinates::uniform([("x", -1.0, 1.0, 41), ("y", -1.0, 1.0, 41)])?;
        let nodes = crds.clone();
        let mut grid = Grid::new(format!("step{step:04}")).with_crds(crds.clone());
        grid.add_field([Field::lazy(
            "rho",
            crds,
            Centering::Node,
            FieldKind::Scalar,
            FnSource(move || pulse(&nodes, t)),
        )])?;
        grid.set_time(t);
        series.add(grid, step == 0);
    }
    if tree {
        print!("{}", series.tree(Some(1)));
    }

    let selection = selection
        .map(|text| Selection::parse(text).map_err(|e| report(e, text)))
        .transpose()?;
    let spec = TimeSpec::parse(time).map_err(|e| report(e, time))?;
    info!(steps = series.nr_times(&spec)?, "Scanning");

    for grid in series.iter_times(&spec)? {
        let rho = grid.get_field("rho", selection.as_ref())?;
        let data = rho.data()?;
        let max = data.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let mean = data.mean().unwrap_or(f64::NAN);
        println!("{}\t{}\t{mean:.4}\t{max:.4}", grid.name(), grid.format_time(None));
    }
    Ok(())
}
