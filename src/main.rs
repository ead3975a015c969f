use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::Parser;
use needle_search::{
    bench_scheme, bench_scheme_par,
    binary_search::{binary_search, lower_bound_std},
    cached::{cached_search, cached_search_unfiltered},
    get_cpu_freq, init_trace,
    simd::{simd_search, simd_search_contiguous, simd_search_sorted},
    testcase::{verify, DataKind, TestCase},
    time, Arena, HugeVec, SearchScheme, DEFAULT_STEP_COUNT, NOT_SEARCHED,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

/// Scratch size used by the runner; fits caches of up to 22 levels.
const BENCH_ARENA_BYTES: usize = (1 << 24) + 1;

/// Total number of haystack elements the repeats of one case should cover.
const SEARCHES: usize = 400 * (1 << 26);

#[derive(Parser)]
struct Args {
    /// Directory with `0.bsearch`, `1.bsearch`, ... as written by `gen-cases`.
    #[clap(short, long, default_value = ".")]
    dir: PathBuf,
    /// Generate a smaller suite in memory instead of loading files.
    #[clap(long)]
    generate: bool,
    /// Number of timed repeats per case. Defaults to min(1000, 400*2^26/N).
    #[clap(short, long)]
    repeats: Option<usize>,
    /// Also measure throughput with this many threads.
    #[clap(short, long)]
    threads: Option<usize>,
    /// Copy haystacks to transparent huge pages before timing.
    #[clap(long)]
    hugepages: bool,
    /// Skip the speed pass.
    #[clap(long)]
    check_only: bool,
    /// Where to write `results.json`.
    #[clap(long, default_value = "results")]
    output: PathBuf,
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

static ARGS: LazyLock<Args> = LazyLock::new(|| Args::parse());

/// Wrapper type for the cast to &dyn.
type T<const N: usize> = [&'static dyn SearchScheme; N];

/// The baseline every other scheme is compared against.
const BASELINE: &dyn SearchScheme = &binary_search;

const SCHEMES: T<9> = [
    &lower_bound_std,
    &cached_search::<DEFAULT_STEP_COUNT>,
    &cached_search_unfiltered::<DEFAULT_STEP_COUNT>,
    &cached_search::<16>,
    &simd_search::<DEFAULT_STEP_COUNT>,
    &simd_search::<16>,
    &simd_search_sorted::<DEFAULT_STEP_COUNT, 64>,
    &simd_search_sorted::<16, 128>,
    &simd_search_contiguous::<DEFAULT_STEP_COUNT>,
];

const GENERATED_CASES: [(usize, usize, DataKind); 7] = [
    (1 << 22, 1 << 16, DataKind::Uniform),
    (1 << 22, 1 << 16, DataKind::Normal),
    (1 << 20, 1 << 16, DataKind::AllFound),
    (1 << 20, 1 << 16, DataKind::MinMax),
    (1 << 20, 1 << 16, DataKind::MostOut),
    (1 << 16, 1 << 16, DataKind::AllSame),
    (1 << 16, 1 << 16, DataKind::AllDifferent),
];

fn main() -> anyhow::Result<()> {
    init_trace(ARGS.verbose);

    let cases = if ARGS.generate {
        time("Generating cases", || {
            GENERATED_CASES
                .iter()
                .map(|&(h_count, q_count, kind)| {
                    let rng = &mut ChaCha8Rng::seed_from_u64(42);
                    let name = format!("{kind:?} {h_count}/{q_count}");
                    (name, TestCase::generate(h_count, q_count, kind, rng))
                })
                .collect::<Vec<_>>()
        })
    } else {
        let suite = time("Loading cases", || TestCase::load_suite(&ARGS.dir))
            .with_context(|| format!("Failed to load test cases from {}", ARGS.dir.display()))?;
        suite
            .into_iter()
            .map(|(path, case)| (path.display().to_string(), case))
            .collect()
    };
    if cases.is_empty() {
        bail!(
            "No test cases in {}; run gen-cases first or pass --generate",
            ARGS.dir.display()
        );
    }

    println!("+ Correctness tests ...");
    let arena = &mut Arena::new(BENCH_ARENA_BYTES);
    for (name, case) in &cases {
        print!("Checking {name}... ");
        for &scheme in std::iter::once(&BASELINE).chain(&SCHEMES) {
            check(scheme, case, arena).with_context(|| format!("Checking {name}"))?;
        }
        println!("OK");
    }

    if ARGS.check_only {
        return Ok(());
    }

    if let Some(threads) = ARGS.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to start thread pool")?;
    }

    println!("+ Speed tests ...");
    let mut results = vec![];
    for (name, case) in &cases {
        results.extend(speed_test(name, case, arena));
        save_results(&results, &ARGS.output).context("Failed to save results")?;
    }
    info!("Saved {} results to {}", results.len(), ARGS.output.display());
    Ok(())
}

/// Run `scheme` once on freshly reset buffers and compare with the oracle.
fn check(scheme: &dyn SearchScheme, case: &TestCase, arena: &mut Arena) -> anyhow::Result<()> {
    let mut indices = vec![NOT_SEARCHED; case.needles.len()];
    arena.zero_all();
    scheme.search(&case.haystack, &case.needles, &mut indices, arena);
    if let Some(pos) = verify(&case.haystack, &case.needles, &indices) {
        bail!(
            "{} returned {} for needle {} at position {pos}",
            scheme.name(),
            indices[pos],
            case.needles[pos]
        );
    }
    Ok(())
}

fn speed_test(name: &str, case: &TestCase, arena: &mut Arena) -> Vec<SpeedResult> {
    let n = case.haystack.len();
    let repeats = ARGS.repeats.unwrap_or((SEARCHES / n).min(1000)).max(1);
    println!("Running speed test for {name}, {repeats} repeats");

    let huge;
    let haystack: &[i32] = if ARGS.hugepages {
        huge = HugeVec::from_slice(&case.haystack);
        if huge.is_none() {
            warn!("Falling back to regular pages");
        }
        huge.as_deref().unwrap_or(&case.haystack)
    } else {
        &case.haystack
    };
    let needles = &case.needles;

    let freq = get_cpu_freq();
    let baseline = bench_scheme(BASELINE, haystack, needles, arena, repeats);
    let mut results = vec![];
    for &scheme in std::iter::once(&BASELINE).chain(&SCHEMES) {
        let timing = bench_scheme(scheme, haystack, needles, arena, repeats);
        let best_speedup = baseline.best.as_secs_f64() / timing.best.as_secs_f64();
        let avg_speedup = baseline.average().as_secs_f64() / timing.average().as_secs_f64();
        let latency = timing.average().as_nanos() as f64 / needles.len().max(1) as f64;
        let cycles = freq.map(|freq| latency / 1e9 * freq);
        let parallel = ARGS.threads.map(|threads| {
            let round =
                bench_scheme_par(scheme, haystack, needles, threads, BENCH_ARENA_BYTES, repeats);
            round.as_nanos() as f64 / needles.len().max(1) as f64
        });

        println!(
            "{:>60}: speedup best [{best_speedup:>6.2}] average [{avg_speedup:>6.2}] {latency:>8.2}ns/needle cycles/needle: {:>8.2}",
            scheme.name(),
            cycles.unwrap_or(f64::NAN)
        );
        if let Some(parallel) = parallel {
            println!("{:>60}  {parallel:>8.2}ns/needle on {} threads", "", ARGS.threads.unwrap_or(1));
        }

        results.push(SpeedResult {
            case: name.to_string(),
            scheme: scheme.name().to_string(),
            size: size::Size::from_bytes(std::mem::size_of_val(haystack)).to_string(),
            haystack: n,
            needles: needles.len(),
            repeats,
            best: timing.best,
            average: timing.average(),
            best_speedup,
            avg_speedup,
            latency,
            cycles,
            parallel_latency: parallel,
            threads: ARGS.threads,
        });
    }
    results
}

#[derive(serde::Serialize)]
struct SpeedResult {
    /// File or generated case name.
    case: String,
    /// SearchScheme name
    scheme: String,
    /// Human readable haystack size in bytes.
    size: String,
    haystack: usize,
    needles: usize,
    repeats: usize,
    /// Fastest single run.
    best: Duration,
    average: Duration,
    /// Speedup over the baseline, fastest run vs fastest run.
    best_speedup: f64,
    /// Speedup over the baseline, on average.
    avg_speedup: f64,
    /// Average time per needle in nanoseconds.
    latency: f64,
    /// Clock cycles per needle, when the CPU frequency is known.
    cycles: Option<f64>,
    /// Average time per needle with `threads` threads.
    parallel_latency: Option<f64>,
    threads: Option<usize>,
}

fn save_results(results: &[SpeedResult], dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let f = std::fs::File::create(dir.join("results.json"))?;
    serde_json::to_writer(f, results)?;
    Ok(())
}
