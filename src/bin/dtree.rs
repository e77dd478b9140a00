//! Distributed driver: an SPMD group of rank threads over the in-process
//! communicator (the job-launcher stand-in; rank count from `DTREE_RANKS`).
//! Rank 0 alone emits log lines and writes the graph output.

use std::env;
use std::process::exit;
use std::thread;
use std::time::Instant;

use log::info;

use canopy::dist::{local_group, Communicator, DistBuildParams, DistCoverTree, LocalComm};
use canopy::{Euclidean, PointSet};

struct Args {
    fname: String,
    radius: f64,
    split_ratio: f64,
    switch_percent: f64,
    min_hub_size: usize,
    verbose: bool,
}

fn usage(prog: &str, code: i32) -> ! {
    eprintln!("Usage: {prog} [options] <filename>");
    eprintln!("Options: -r FLOAT  graph radius [optional]");
    eprintln!("         -S FLOAT  hub split ratio [0.50]");
    eprintln!("         -s FLOAT  switch percent [100.00]");
    eprintln!("         -l INT    minimum hub size [10]");
    eprintln!("         -v        verbose");
    eprintln!("         -h        help message");
    exit(code);
}

fn take<T: std::str::FromStr>(argv: &[String], i: &mut usize, prog: &str, flag: &str) -> T {
    *i += 1;
    let Some(raw) = argv.get(*i) else {
        eprintln!("[err] option '{flag}' needs a value");
        usage(prog, 1);
    };
    match raw.parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("[err] bad value '{raw}' for option '{flag}'");
            usage(prog, 1);
        }
    }
}

fn parse_args() -> Args {
    let argv: Vec<String> = env::args().collect();
    let prog = argv[0].clone();

    let mut args = Args {
        fname: String::new(),
        radius: 0.0,
        split_ratio: 0.5,
        switch_percent: 100.0,
        min_hub_size: 10,
        verbose: false,
    };

    let mut fname = None;
    let mut i = 1;
    while i < argv.len() {
        let arg = argv[i].as_str();
        match arg {
            "-r" => args.radius = take(&argv, &mut i, &prog, "-r"),
            "-S" => args.split_ratio = take(&argv, &mut i, &prog, "-S"),
            "-s" => args.switch_percent = take(&argv, &mut i, &prog, "-s"),
            "-l" => args.min_hub_size = take(&argv, &mut i, &prog, "-l"),
            "-v" => args.verbose = true,
            "-h" => usage(&prog, 0),
            _ if arg.starts_with('-') => {
                eprintln!("[err] unknown option '{arg}'");
                usage(&prog, 1);
            }
            _ => fname = Some(arg.to_string()),
        }
        i += 1;
    }

    match fname {
        Some(f) => args.fname = f,
        None => {
            eprintln!("[err] missing argument(s)");
            usage(&prog, 1);
        }
    }
    args
}

/// Contiguous balanced slice sizes, larger slices first.
fn balanced_counts(total: usize, nranks: usize) -> Vec<usize> {
    let base = total / nranks;
    let rem = total % nranks;
    (0..nranks).map(|r| base + usize::from(r < rem)).collect()
}

fn rank_main(
    comm: &LocalComm,
    mypoints: &PointSet,
    params: &DistBuildParams,
    radius: f64,
) -> canopy::Result<()> {
    let is_root = comm.rank() == 0;

    let t = Instant::now();
    let dtree = DistCoverTree::build(mypoints, comm, &Euclidean, params)?;
    if is_root {
        info!(
            "constructed distributed cover tree [vertices={},levels={},avg_nesting={:.3},time={:.3}s]",
            dtree.num_vertices(),
            dtree.num_levels(),
            dtree.num_vertices() as f64 / dtree.totsize() as f64,
            t.elapsed().as_secs_f64()
        );
    }

    if radius > 0.0 {
        let t = Instant::now();
        let (mygraph, edges) = dtree.build_epsilon_graph(comm, &Euclidean, radius);
        if is_root {
            info!(
                "constructed epsilon graph [vertices={},edges={},avg_deg={:.3},time={:.3}s]",
                dtree.totsize(),
                edges,
                edges as f64 / dtree.totsize() as f64,
                t.elapsed().as_secs_f64()
            );
        }

        if let Some(buf) = dtree.gather_graph_lines(comm, &mygraph, 0) {
            std::fs::write("dtree.graph.txt", buf).map_err(|e| canopy::CoverError::Io {
                op: "write",
                source: e,
            })?;
            info!("wrote {edges} graph edges to 'dtree.graph.txt'");
        }
    }

    Ok(())
}

fn main() {
    let args = parse_args();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if args.radius < 0.0 {
        eprintln!("[err] graph radius must be non-negative");
        exit(1);
    }
    let params = DistBuildParams {
        split_ratio: args.split_ratio,
        switch_percent: args.switch_percent,
        min_hub_size: args.min_hub_size,
    };
    if let Err(e) = params.validate() {
        eprintln!("[err] {e}");
        exit(1);
    }

    let nranks = env::var("DTREE_RANKS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()));

    info!(
        "dtree parameters: [split_ratio={:.2},switch_percent={:.2},min_hub_size={},ranks={}]",
        params.split_ratio, params.switch_percent, params.min_hub_size, nranks
    );
    if args.radius > 0.0 {
        info!("graph parameters: [radius={:.3}]", args.radius);
    }

    // Rank 0 of a launcher would read and scatter; in-process, read once and
    // slice contiguously.
    let t = Instant::now();
    let points = match PointSet::read_from_file(&args.fname) {
        Ok(points) => points,
        Err(e) => {
            eprintln!("[err] {e}");
            exit(1);
        }
    };
    info!(
        "read {} points of dimension {} from '{}' [{:.3}s]",
        points.len(),
        points.dim(),
        args.fname,
        t.elapsed().as_secs_f64()
    );

    let counts = balanced_counts(points.len(), nranks);
    let mut slices = Vec::with_capacity(nranks);
    let mut offset = 0usize;
    for &count in &counts {
        let mut slice = match PointSet::new(points.dim()) {
            Ok(slice) => slice,
            Err(e) => {
                eprintln!("[err] {e}");
                exit(1);
            }
        };
        for id in offset..offset + count {
            if let Err(e) = slice.push(points.point(id)) {
                eprintln!("[err] {e}");
                exit(1);
            }
        }
        offset += count;
        slices.push(slice);
    }

    let comms = local_group(nranks);
    let failed = thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .zip(&slices)
            .map(|(comm, mypoints)| {
                let params = &params;
                let radius = args.radius;
                scope.spawn(move || {
                    if let Err(e) = rank_main(&comm, mypoints, params, radius) {
                        eprintln!("[err] rank {}: {e}", comm.rank());
                        return true;
                    }
                    false
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(true))
            .any(|failed| failed)
    });

    if failed {
        exit(1);
    }
}
