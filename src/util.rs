use std::{
    hint::black_box,
    ops::Deref,
    path::Path,
    time::{Duration, Instant},
};

use bytemuck::Pod;
use itertools::Itertools;
use tracing::{info, warn};

use crate::{Arena, SearchScheme, NOT_SEARCHED};

/// Prefetch the given cacheline into L1 cache.
/// `index` may be one past the end of `s`.
#[inline(always)]
pub fn prefetch_index<T>(s: &[T], index: usize) {
    debug_assert!(index <= s.len());
    let ptr = unsafe { s.as_ptr().add(index) as *const u64 };
    prefetch_ptr(ptr);
}

/// Prefetch the given cacheline into L1 cache.
#[inline(always)]
pub fn prefetch_ptr<T>(ptr: *const T) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_mm_prefetch(ptr as *const i8, std::arch::x86_64::_MM_HINT_T0);
    }
    #[cfg(target_arch = "x86")]
    unsafe {
        std::arch::x86::_mm_prefetch(ptr as *const i8, std::arch::x86::_MM_HINT_T0);
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
    {
        // Do nothing.
        let _ = ptr;
    }
}

pub fn time<T>(t: &str, f: impl FnOnce() -> T) -> T {
    info!("{t}: Starting");
    let start = std::time::Instant::now();
    let r = f();
    info!("{t}: Elapsed: {:?}", start.elapsed());
    r
}

/// Fastest and total wall time of repeated searches.
#[derive(Clone, Copy, Debug)]
pub struct Timing {
    pub best: Duration,
    pub total: Duration,
    pub repeats: usize,
}

impl Timing {
    pub fn average(&self) -> Duration {
        self.total / self.repeats.max(1) as u32
    }
}

/// Search all `needles` `repeats` times on the current thread.
pub fn bench_scheme(
    scheme: &dyn SearchScheme,
    haystack: &[i32],
    needles: &[i32],
    arena: &mut Arena,
    repeats: usize,
) -> Timing {
    info!("Benching {}", scheme.name());
    let mut indices = vec![NOT_SEARCHED; needles.len()];
    arena.zero_all();
    let mut best = Duration::MAX;
    let start = Instant::now();
    for _ in 0..repeats {
        let run = Instant::now();
        scheme.search(haystack, needles, &mut indices, arena);
        best = best.min(run.elapsed());
    }
    let total = start.elapsed();
    black_box(&indices);
    Timing {
        best,
        total,
        repeats,
    }
}

/// Split `needles` over `threads` rayon tasks, each with its own arena, and
/// return the average time per round.
pub fn bench_scheme_par(
    scheme: &dyn SearchScheme,
    haystack: &[i32],
    needles: &[i32],
    threads: usize,
    arena_bytes: usize,
    repeats: usize,
) -> Duration {
    info!("Benching {} on {threads} threads", scheme.name());
    let chunk_size = needles.len().div_ceil(threads.max(1)).max(1);
    let mut indices = vec![NOT_SEARCHED; needles.len()];
    let mut arenas = (0..threads.max(1)).map(|_| Arena::new(arena_bytes)).collect_vec();

    let start = Instant::now();
    for _ in 0..repeats {
        rayon::scope(|scope| {
            let chunks = needles.chunks(chunk_size).zip(indices.chunks_mut(chunk_size));
            for ((needles, indices), arena) in chunks.zip(&mut arenas) {
                scope.spawn(move |_| scheme.search(haystack, needles, indices, arena));
            }
        });
    }
    let elapsed = start.elapsed();
    black_box(&indices);
    elapsed / repeats.max(1) as u32
}

/// Log to stderr. `verbose` raises the level above the default `info`.
pub fn init_trace(verbose: u8) {
    if let Err(e) = stderrlog::new()
        .color(stderrlog::ColorChoice::Auto)
        .verbosity(2 + verbose as usize)
        .show_level(true)
        .init()
    {
        eprintln!("Logger already initialised: {e}");
    }
}

/// A read-only copy of a slice on transparent huge pages.
pub struct HugeVec<T> {
    mem: alloc_madvise::Memory,
    len: usize,
    _t: std::marker::PhantomData<T>,
}

impl<T: Pod> HugeVec<T> {
    /// Returns `None` when the allocation fails.
    pub fn from_slice(vals: &[T]) -> Option<Self> {
        let size = std::mem::size_of_val(vals);
        // Round up to a multiple of 32MB to avoid reusing existing heap memory.
        let alloc_size = size.max(1).next_multiple_of(32 * 1024 * 1024);
        info!("Allocating {}MB on hugepages", alloc_size / 1024 / 1024);
        let mut mem = match alloc_madvise::Memory::allocate(alloc_size, false, false) {
            Ok(mem) => mem,
            Err(e) => {
                warn!("Hugepage allocation failed: {e:?}");
                return None;
            }
        };
        let words: &mut [usize] = mem.as_mut();
        let dst: &mut [T] = bytemuck::cast_slice_mut(words);
        dst[..vals.len()].copy_from_slice(vals);
        Some(HugeVec {
            mem,
            len: vals.len(),
            _t: std::marker::PhantomData,
        })
    }
}

impl<T: Pod> Deref for HugeVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        let words: &[usize] = self.mem.as_ref();
        &bytemuck::cast_slice(words)[..self.len]
    }
}

/// Return the current CPU frequency in Hz.
pub fn get_cpu_freq() -> Option<f64> {
    let cur_cpu = get_cpu()?;
    let path = format!("/sys/devices/system/cpu/cpu{cur_cpu}/cpufreq/scaling_cur_freq");
    let path = Path::new(&path);
    if !path.exists() {
        return None;
    }

    let val = std::fs::read_to_string(path).ok()?;
    Some(val.trim().parse::<f64>().ok()? * 1000.)
}

pub fn get_cpu() -> Option<i32> {
    #[cfg(target_os = "linux")]
    {
        Some(unsafe { libc::sched_getcpu() })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary_search::binary_search;
    use crate::simd::simd_search;
    use crate::DEFAULT_ARENA_BYTES;

    #[test]
    fn bench_counts_repeats() {
        let haystack = (0..1000).collect_vec();
        let needles = (0..100).map(|x| x * 7).collect_vec();
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let timing = bench_scheme(&binary_search, &haystack, &needles, arena, 3);
        assert_eq!(timing.repeats, 3);
        assert!(timing.best <= timing.average());
    }

    #[test]
    fn bench_par_uneven_chunks() {
        let haystack = (0..1000).collect_vec();
        let needles = (0..101).collect_vec();
        bench_scheme_par(&simd_search::<12>, &haystack, &needles, 4, DEFAULT_ARENA_BYTES, 2);
        bench_scheme_par(&binary_search, &haystack, &[], 4, 0, 1);
    }

    #[test]
    fn hugevec_copies() {
        let vals = (0..1000).collect::<Vec<i32>>();
        if let Some(huge) = HugeVec::from_slice(&vals) {
            assert_eq!(&*huge, &vals[..]);
        }
    }
}
