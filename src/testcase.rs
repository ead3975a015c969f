//! Synthetic haystack/needle pairs and the `.bsearch` file format.
//!
//! A file starts with the 8 magic bytes `.BSEARCH`, followed by the haystack
//! and needle counts as little-endian `i64`, followed by the haystack and the
//! needles as little-endian `i32`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::iter::zip;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use rand::Rng;
use rand_distr::StandardNormal;
use rdst::RadixSort;
use thiserror::Error;
use tracing::{debug, info};

use crate::binary_search::lower_bound_one;

pub const MAGIC: &[u8; 8] = b".BSEARCH";

#[derive(Debug, Error)]
pub enum TestCaseError {
    #[error("failed to access test case file")]
    Io(#[from] io::Error),
    #[error("bad magic constant {found:?}")]
    BadMagic { found: [u8; 8] },
    #[error("negative {what} count {count}")]
    NegativeSize { what: &'static str, count: i64 },
    #[error("file ends inside the {what}")]
    Truncated { what: &'static str },
}

/// How haystack and needles are drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataKind {
    /// Haystack in `[0, 2N]`, needles in `[0, 4N]`.
    Uniform,
    /// Haystack in `[0, 2N]`, needles drawn from the haystack.
    AllFound,
    /// Every haystack value and every needle is the same.
    AllSame,
    /// Haystack constant, needles a different constant.
    AllDifferent,
    /// Haystack ~ N(0, 1024), needles ~ N(3072, 1024).
    Normal,
    /// Needles alternate between the haystack minimum and maximum.
    MinMax,
    /// Haystack over all of `i32`, needles in `[0, 2^16]`.
    MostOut,
}

/// The suite written by `gen-cases`, as `(haystack, needles, kind)`.
pub const STANDARD_CASES: [(usize, usize, DataKind); 9] = [
    (1 << 26, 1 << 16, DataKind::Uniform),
    (1 << 26, 1 << 16, DataKind::Normal),
    (1 << 20, 1 << 18, DataKind::MinMax),
    (1 << 20, 1 << 18, DataKind::MostOut),
    (1 << 26, 100, DataKind::Uniform),
    (1 << 16, 1 << 16, DataKind::AllSame),
    (1 << 16, 1 << 16, DataKind::AllDifferent),
    (1 << 18, 1 << 16, DataKind::AllSame),
    (1 << 18, 1 << 10, DataKind::AllSame),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    pub haystack: Vec<i32>,
    pub needles: Vec<i32>,
}

fn uniform(rng: &mut impl Rng, count: usize, low: i32, high: i32) -> Vec<i32> {
    (0..count).map(|_| rng.gen_range(low..=high)).collect()
}

fn normal(rng: &mut impl Rng, count: usize, mean: f64, std_dev: f64) -> Vec<i32> {
    (0..count)
        .map(|_| {
            let x: f64 = rng.sample(StandardNormal);
            (mean + std_dev * x) as i32
        })
        .collect()
}

impl TestCase {
    /// Generate `h_count` sorted haystack values and `q_count` needles.
    pub fn generate(h_count: usize, q_count: usize, kind: DataKind, rng: &mut impl Rng) -> Self {
        assert!(h_count > 0, "a test case needs a non-empty haystack");
        // Multiples of the haystack size, saturated to the i32 range.
        let span = |k: usize| h_count.saturating_mul(k).min(i32::MAX as usize) as i32;

        let (mut haystack, needles) = match kind {
            DataKind::Uniform => (
                uniform(rng, h_count, 0, span(2)),
                uniform(rng, q_count, 0, span(4)),
            ),
            DataKind::AllFound => {
                let haystack = uniform(rng, h_count, 0, span(2));
                let needles = (0..q_count)
                    .map(|_| haystack[rng.gen_range(0..h_count)])
                    .collect();
                (haystack, needles)
            }
            DataKind::AllSame => (vec![0x18181818; h_count], vec![0x18181818; q_count]),
            DataKind::AllDifferent => (vec![0x21212121; h_count], vec![0x37373737; q_count]),
            DataKind::Normal => (
                normal(rng, h_count, 0., 1024.),
                normal(rng, q_count, 3. * 1024., 1024.),
            ),
            // Needles are filled in once the haystack is sorted.
            DataKind::MinMax => (uniform(rng, h_count, 0, span(2)), vec![]),
            DataKind::MostOut => (
                uniform(rng, h_count, i32::MIN, i32::MAX),
                uniform(rng, q_count, 0, 1 << 16),
            ),
        };
        haystack.radix_sort_unstable();

        let needles = if kind == DataKind::MinMax {
            let (min, max) = (haystack[0], haystack[h_count - 1]);
            (0..q_count).map(|c| if c % 2 == 0 { min } else { max }).collect()
        } else {
            needles
        };

        debug!("Generated {kind:?} case with {h_count} values and {q_count} needles");
        TestCase { haystack, needles }
    }

    /// The file name of the `index`th case in a suite.
    pub fn file_name(index: usize) -> String {
        format!("{index}.bsearch")
    }

    pub fn store(&self, path: &Path) -> Result<(), TestCaseError> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(MAGIC)?;
        w.write_all(&(self.haystack.len() as i64).to_le_bytes())?;
        w.write_all(&(self.needles.len() as i64).to_le_bytes())?;
        for v in self.haystack.iter().chain(&self.needles) {
            w.write_all(&v.to_le_bytes())?;
        }
        w.flush()?;
        info!("Stored {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TestCaseError> {
        let mut r = BufReader::new(File::open(path)?);

        let mut found = [0; 8];
        read_exact(&mut r, &mut found, "magic")?;
        if &found != MAGIC {
            return Err(TestCaseError::BadMagic { found });
        }
        let h_count = read_count(&mut r, "haystack")?;
        let q_count = read_count(&mut r, "needles")?;
        let haystack = read_values(&mut r, h_count, "haystack")?;
        let needles = read_values(&mut r, q_count, "needles")?;

        debug!("Loaded {} with {h_count} values and {q_count} needles", path.display());
        Ok(TestCase { haystack, needles })
    }

    /// Load `0.bsearch`, `1.bsearch`, ... from `dir` until the first one that
    /// does not exist.
    pub fn load_suite(dir: &Path) -> Result<Vec<(PathBuf, Self)>, TestCaseError> {
        let mut cases = vec![];
        for index in 0.. {
            let path = dir.join(Self::file_name(index));
            if !path.exists() {
                break;
            }
            let case = Self::load(&path)?;
            cases.push((path, case));
        }
        Ok(cases)
    }
}

fn read_exact(r: &mut impl Read, buf: &mut [u8], what: &'static str) -> Result<(), TestCaseError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TestCaseError::Truncated { what },
        _ => TestCaseError::Io(e),
    })
}

fn read_count(r: &mut impl Read, what: &'static str) -> Result<usize, TestCaseError> {
    let mut buf = [0; 8];
    read_exact(r, &mut buf, "header")?;
    let count = i64::from_le_bytes(buf);
    usize::try_from(count).map_err(|_| TestCaseError::NegativeSize { what, count })
}

fn read_values(r: &mut impl Read, count: usize, what: &'static str) -> Result<Vec<i32>, TestCaseError> {
    let bytes = count
        .checked_mul(4)
        .ok_or(TestCaseError::Truncated { what })?;
    // Grow with the data instead of trusting the header with the allocation.
    let mut buf = vec![];
    r.take(bytes as u64).read_to_end(&mut buf)?;
    if buf.len() < bytes {
        return Err(TestCaseError::Truncated { what });
    }
    Ok(buf
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect_vec())
}

/// The first position whose result disagrees with the library lower bound,
/// or `None` when all results are correct.
pub fn verify(haystack: &[i32], needles: &[i32], indices: &[i32]) -> Option<usize> {
    assert_eq!(needles.len(), indices.len());
    zip(needles, indices).position(|(&needle, &index)| lower_bound_one(haystack, needle) != index)
}
