//! Shared-memory driver: build a cover tree over a point file and
//! optionally the epsilon graph.

use std::env;
use std::process::exit;
use std::time::Instant;

use log::info;

use canopy::graph;
use canopy::{BuildParams, CoverTree, Euclidean, PointSet};

struct Args {
    fname: String,
    radius: f64,
    params: BuildParams,
    nthreads: usize,
    out_fname: Option<String>,
    verify_tree: bool,
    verify_graph: bool,
    verbose: bool,
}

fn usage(prog: &str, code: i32) -> ! {
    eprintln!("Usage: {prog} [options] <filename>");
    eprintln!("Options: -r FLOAT  graph radius [optional]");
    eprintln!("         -S FLOAT  hub split ratio [0.50]");
    eprintln!("         -s FLOAT  switch size [0.00]");
    eprintln!("         -l INT    minimum hub size [10]");
    eprintln!("         -t INT    number of threads [1]");
    eprintln!("         -o FILE   output graph edges");
    eprintln!("         -A        asynchronous tree construction");
    eprintln!("         -T        verify tree correctness");
    eprintln!("         -G        verify graph correctness [assumes -r]");
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
        params: BuildParams::default(),
        nthreads: 1,
        out_fname: None,
        verify_tree: false,
        verify_graph: false,
        verbose: false,
    };

    let mut fname = None;
    let mut i = 1;
    while i < argv.len() {
        let arg = argv[i].as_str();
        match arg {
            "-r" => args.radius = take(&argv, &mut i, &prog, "-r"),
            "-S" => args.params.split_ratio = take(&argv, &mut i, &prog, "-S"),
            "-s" => args.params.switch_size = take(&argv, &mut i, &prog, "-s"),
            "-l" => args.params.min_hub_size = take(&argv, &mut i, &prog, "-l"),
            "-t" => args.nthreads = take(&argv, &mut i, &prog, "-t"),
            "-o" => {
                let out: String = take(&argv, &mut i, &prog, "-o");
                args.out_fname = Some(out);
            }
            "-A" => args.params.level_synch = false,
            "-T" => args.verify_tree = true,
            "-G" => args.verify_graph = true,
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
    let build_graph = args.radius > 0.0;
    if args.verify_graph && !build_graph {
        eprintln!("[err] -G requires a positive graph radius (-r)");
        exit(1);
    }
    if let Err(e) = args.params.validate() {
        eprintln!("[err] {e}");
        exit(1);
    }
    if args.nthreads < 1 {
        eprintln!("[err] thread count must be at least 1");
        exit(1);
    }

    info!(
        "ctree parameters: [split_ratio={:.2},switch_size={:.2},min_hub_size={},level_synch={},threads={}]",
        args.params.split_ratio,
        args.params.switch_size,
        args.params.min_hub_size,
        args.params.level_synch,
        args.nthreads
    );
    if build_graph {
        info!(
            "graph parameters: [radius={:.3},verify_graph={}]",
            args.radius, args.verify_graph
        );
    }

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

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(args.nthreads)
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("[err] thread pool creation failed: {e}");
            exit(1);
        }
    };

    let t = Instant::now();
    let tree = match pool.install(|| CoverTree::build(&points, &Euclidean, &args.params)) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("[err] {e}");
            exit(1);
        }
    };
    info!(
        "constructed cover tree [vertices={},levels={},avg_nesting={:.3},time={:.3}s]",
        tree.num_vertices(),
        tree.num_levels(),
        tree.num_vertices() as f64 / points.len() as f64,
        t.elapsed().as_secs_f64()
    );

    if args.verify_tree {
        let t = Instant::now();
        let passed = tree.is_correct(&points, &Euclidean);
        info!(
            "cover tree verification {} [{:.3}s]",
            if passed { "PASSED" } else { "FAILED" },
            t.elapsed().as_secs_f64()
        );
    }

    if build_graph {
        let t = Instant::now();
        let egraph =
            pool.install(|| graph::build_epsilon_graph(&tree, &points, &Euclidean, args.radius));
        let edges = graph::num_edges(&egraph);
        info!(
            "constructed epsilon graph [vertices={},edges={},avg_deg={:.3},time={:.3}s]",
            points.len(),
            edges,
            edges as f64 / points.len() as f64,
            t.elapsed().as_secs_f64()
        );

        if args.verify_graph {
            let t = Instant::now();
            let correct =
                pool.install(|| graph::graph_is_correct(&points, &Euclidean, args.radius, &egraph));
            info!(
                "epsilon graph verification {} [{:.3}s]",
                if correct { "PASSED" } else { "FAILED" },
                t.elapsed().as_secs_f64()
            );
        }

        if let Some(out) = &args.out_fname {
            if let Err(e) = graph::write_graph(out, &egraph, 0) {
                eprintln!("[err] {e}");
                exit(1);
            }
            info!("wrote {edges} graph edges to '{out}'");
        }
    }
}
