use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use needle_search::{
    init_trace,
    testcase::{TestCase, STANDARD_CASES},
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

#[derive(Parser)]
struct Args {
    /// Output directory.
    #[clap(short, long, default_value = ".")]
    dir: PathBuf,
    /// Overwrite existing files.
    #[clap(short, long)]
    force: bool,
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_trace(args.verbose);
    std::fs::create_dir_all(&args.dir)
        .with_context(|| format!("Failed to create {}", args.dir.display()))?;

    for (index, &(h_count, q_count, kind)) in STANDARD_CASES.iter().enumerate() {
        let path = args.dir.join(TestCase::file_name(index));
        let rng = &mut ChaCha8Rng::seed_from_u64(42);
        let case = TestCase::generate(h_count, q_count, kind, rng);

        if args.force || !path.exists() {
            info!("Saving {kind:?} case to {}", path.display());
            case.store(&path)
                .with_context(|| format!("Failed to store {}", path.display()))?;
        }

        let stored =
            TestCase::load(&path).with_context(|| format!("Failed to load {}", path.display()))?;
        println!(
            "{}: verify haystack {}, verify needles {}",
            path.display(),
            stored.haystack == case.haystack,
            stored.needles == case.needles
        );
    }
    Ok(())
}
