//! Vectorized batched search.
//!
//! `LANES` needles descend the implicit binary-search tree in lock-step.
//! Every step gathers one probe per lane (from the decision-tree cache for the
//! first levels, from the haystack afterwards), compares it against the
//! needles, and blends the `left`/`count`/`node` state of each lane between
//! its two possible successors. Lanes that finish early keep running with
//! their state frozen by the blend until the slowest lane is done.
//!
//! Small inputs don't amortize the cache construction; below
//! `SIMD_MIN_HAYSTACK` values or `SIMD_MIN_NEEDLES` needles, everything goes
//! through the scalar range-checked descent instead.

use std::iter::zip;
use std::simd::prelude::*;

use tracing::{debug, trace};

use crate::binary_search::get;
use crate::cache::DecisionTreeCache;
use crate::cached::{descend, descend_checked};
use crate::{check_search_args, Arena, NOT_FOUND};

/// Number of needles advanced per vector step.
pub const LANES: usize = 8;
/// The vector path is used for haystacks strictly larger than this.
pub const SIMD_MIN_HAYSTACK: usize = 1024 * 100;
/// The vector path is used for strictly more needles than this.
pub const SIMD_MIN_NEEDLES: usize = 1024;

type V = Simd<i32, LANES>;

/// An admitted needle and the position its result goes to.
#[derive(Clone, Copy, Default)]
struct Item {
    needle: i32,
    index: usize,
}

/// Run `LANES` needles to the bottom of the tree and return their results.
///
/// Needles may lie outside the haystack's value range: gathers only touch
/// lanes that are still active, and for those `left + half < len` holds.
#[inline(always)]
fn descend_lanes(haystack: &[i32], cache: &DecisionTreeCache, needle: V) -> V {
    let zero = V::splat(0);
    let one = V::splat(1);

    let mut left = zero;
    let mut count = V::splat(haystack.len() as i32);
    let mut node = one;
    let mut active = count.simd_gt(zero);

    let nodes = cache.nodes();
    for _ in 0..cache.step_count() {
        if !active.any() {
            break;
        }
        let half = count >> one;
        // SAFETY: active lanes sit at depth < step_count, so their 1-based
        // node is below 2^step_count and `node - 1` indexes `nodes`.
        let probe = unsafe {
            V::gather_select_unchecked(nodes, active.cast(), (node - one).cast::<usize>(), zero)
        };
        let less = active & probe.simd_lt(needle);
        let stay = active & !less;
        left = less.select(left + half + one, left);
        count = less.select(count - half - one, stay.select(half, count));
        node = less.select(node + node + one, stay.select(node + node, node));
        active = count.simd_gt(zero);
    }

    while active.any() {
        let half = count >> one;
        let left_half = left + half;
        // SAFETY: for active lanes `left + half < left + count <= len`.
        let probe = unsafe {
            V::gather_select_unchecked(haystack, active.cast(), left_half.cast::<usize>(), zero)
        };
        let less = active & probe.simd_lt(needle);
        let stay = active & !less;
        left = less.select(left_half + one, left);
        count = less.select(count - half - one, stay.select(half, count));
        active = count.simd_gt(zero);
    }

    // `left == len` for needles above the maximum.
    let in_bounds = left.simd_lt(V::splat(haystack.len() as i32));
    let value = V::gather_select(haystack, in_bounds.cast(), left.cast::<usize>(), zero);
    let found = in_bounds & value.simd_eq(needle);
    found.select(left, V::splat(NOT_FOUND))
}

/// All haystack values equal `value`: compare each needle directly.
fn search_uniform(value: i32, needles: &[i32], indices: &mut [i32]) {
    for (&needle, index) in zip(needles, indices) {
        *index = if needle == value { 0 } else { NOT_FOUND };
    }
}

fn use_simd(haystack: &[i32], needles: &[i32]) -> bool {
    let enabled = haystack.len() > SIMD_MIN_HAYSTACK && needles.len() > SIMD_MIN_NEEDLES;
    if !enabled {
        trace!(
            "Vector path disabled for {} values and {} needles",
            haystack.len(),
            needles.len()
        );
    }
    enabled
}

/// Prefilter needles into a queue of `P` in-range needles, optionally sort
/// it, and descend it `LANES` at a time. Leftovers that don't fill a vector
/// are finished by the scalar descent.
fn search_batched<const STEPS: usize, const P: usize, const SORT: bool>(
    haystack: &[i32],
    needles: &[i32],
    indices: &mut [i32],
    arena: &mut Arena,
) {
    const { assert!(P > 0 && P % LANES == 0) };
    check_search_args(haystack, needles, indices);

    let low = get(haystack, 0);
    let high = get(haystack, haystack.len() - 1);
    if low == high {
        debug!("Haystack of {} values holds only {low}", haystack.len());
        search_uniform(low, needles, indices);
        arena.free_all();
        return;
    }

    let simd = use_simd(haystack, needles);
    let cache = DecisionTreeCache::build(haystack, if simd { STEPS } else { 0 }, arena);

    let mut c = 0;
    if simd {
        let mut queue = [Item::default(); P];
        while c < needles.len() {
            let mut q = 0;
            while q < P && c < needles.len() {
                let needle = needles[c];
                if needle < low || needle > high {
                    indices[c] = NOT_FOUND;
                } else {
                    queue[q] = Item { needle, index: c };
                    q += 1;
                }
                c += 1;
            }

            let queue = &mut queue[..q];
            if SORT {
                queue.sort_unstable_by_key(|item| item.needle);
            }

            let mut chunks = queue.chunks_exact(LANES);
            for chunk in &mut chunks {
                let needle = V::from_array(std::array::from_fn(|i| chunk[i].needle));
                let result = descend_lanes(haystack, &cache, needle);
                // Positions are not contiguous after prefiltering.
                for (item, &r) in zip(chunk, result.as_array()) {
                    indices[item.index] = r;
                }
            }
            for item in chunks.remainder() {
                indices[item.index] = descend(haystack, &cache, item.needle);
            }
        }
    }

    for (&needle, index) in zip(&needles[c..], &mut indices[c..]) {
        *index = descend_checked(haystack, &cache, needle);
    }
    arena.free_all();
}

/// Vectorized search over prefiltered batches of `LANES` needles.
pub fn simd_search<const STEPS: usize>(
    haystack: &[i32],
    needles: &[i32],
    indices: &mut [i32],
    arena: &mut Arena,
) {
    search_batched::<STEPS, LANES, false>(haystack, needles, indices, arena)
}

/// Vectorized search that sorts each queue of `P` prefiltered needles before
/// descending, so neighbouring lanes visit neighbouring nodes.
/// `P` must be a multiple of `LANES`.
pub fn simd_search_sorted<const STEPS: usize, const P: usize>(
    haystack: &[i32],
    needles: &[i32],
    indices: &mut [i32],
    arena: &mut Arena,
) {
    search_batched::<STEPS, P, true>(haystack, needles, indices, arena)
}

/// Vectorized search over consecutive needles without prefiltering.
/// Results are stored back contiguously.
pub fn simd_search_contiguous<const STEPS: usize>(
    haystack: &[i32],
    needles: &[i32],
    indices: &mut [i32],
    arena: &mut Arena,
) {
    check_search_args(haystack, needles, indices);

    let low = get(haystack, 0);
    let high = get(haystack, haystack.len() - 1);
    if low == high {
        debug!("Haystack of {} values holds only {low}", haystack.len());
        search_uniform(low, needles, indices);
        arena.free_all();
        return;
    }

    let simd = use_simd(haystack, needles);
    let cache = DecisionTreeCache::build(haystack, if simd { STEPS } else { 0 }, arena);

    let mut c = 0;
    if simd {
        let needle_chunks = needles.chunks_exact(LANES);
        let index_chunks = indices.chunks_exact_mut(LANES);
        for (needle_chunk, index_chunk) in zip(needle_chunks, index_chunks) {
            descend_lanes(haystack, &cache, V::from_slice(needle_chunk)).copy_to_slice(index_chunk);
            c += LANES;
        }
    }

    for (&needle, index) in zip(&needles[c..], &mut indices[c..]) {
        *index = descend_checked(haystack, &cache, needle);
    }
    arena.free_all();
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::binary_search::{binary_search, search_one};
    use crate::{SearchScheme, DEFAULT_ARENA_BYTES, NOT_SEARCHED};

    fn schemes() -> [&'static dyn SearchScheme; 4] {
        [
            &simd_search::<12>,
            &simd_search_sorted::<12, 64>,
            &simd_search_sorted::<12, 8>,
            &simd_search_contiguous::<12>,
        ]
    }

    fn sorted_haystack(rng: &mut ChaCha8Rng, len: usize, max: i32) -> Vec<i32> {
        let mut haystack = (0..len).map(|_| rng.gen_range(0..max)).collect_vec();
        haystack.sort();
        haystack
    }

    #[test]
    fn small_inputs() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        for scheme in schemes() {
            let result = scheme.query(&[1, 3, 3, 5, 7, 9], &[3, 4, 9, 0, 10], arena);
            assert_eq!(result, [1, -1, 5, -1, -1], "{}", scheme.name());
            assert_eq!(scheme.query(&[5], &[5, 4, 6], arena), [0, -1, -1]);
        }
    }

    #[test]
    fn lanes_match_scalar() {
        let rng = &mut ChaCha8Rng::seed_from_u64(7);
        for len in [1, 2, 3, 10, 1000, 4321] {
            let haystack = sorted_haystack(rng, len, 300);
            for step_count in [0, 1, 3, 8] {
                let arena = Arena::new(DecisionTreeCache::bytes(step_count));
                let cache = DecisionTreeCache::build(&haystack, step_count, &arena);
                for _ in 0..100 {
                    let needles: [i32; LANES] = std::array::from_fn(|_| rng.gen_range(-5..305));
                    let result = descend_lanes(&haystack, &cache, V::from_array(needles));
                    for (&needle, &r) in zip(&needles, result.as_array()) {
                        assert_eq!(r, search_one(&haystack, needle), "len {len} needle {needle}");
                    }
                }
            }
        }
    }

    #[test]
    fn uniform_haystack() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        for len in [1, 1000, SIMD_MIN_HAYSTACK + 1000] {
            let haystack = vec![24; len];
            let needles = (0..2000)
                .map(|i| if i % 3 == 1 { 24 } else { 23 + (i % 3) as i32 })
                .collect_vec();
            let expected = needles.iter().map(|&n| if n == 24 { 0 } else { -1 }).collect_vec();
            for scheme in schemes() {
                assert_eq!(scheme.query(&haystack, &needles, arena), expected);
            }
        }
    }

    #[test]
    fn batch_remainders() {
        let rng = &mut ChaCha8Rng::seed_from_u64(1234);
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let haystack = sorted_haystack(rng, SIMD_MIN_HAYSTACK + 1, 1 << 20);
        for m in [1025, 1031, 1032, 1033, 1087, 2049] {
            let needles = (0..m).map(|_| rng.gen_range(-10..(1 << 20) + 10)).collect_vec();
            let expected = binary_search.query(&haystack, &needles, arena);
            for scheme in schemes() {
                let mut indices = vec![NOT_SEARCHED; m];
                scheme.search(&haystack, &needles, &mut indices, arena);
                assert!(!indices.contains(&NOT_SEARCHED));
                assert_eq!(indices, expected, "{} m={m}", scheme.name());
            }
        }
    }

    /// Mostly out-of-range needles keep the prefilter from filling batches.
    #[test]
    fn sparse_admission() {
        let rng = &mut ChaCha8Rng::seed_from_u64(99);
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let haystack = (0..SIMD_MIN_HAYSTACK as i32 * 2).map(|x| x / 2 + 1000).collect_vec();
        let high = *haystack.last().unwrap();
        let needles = (0..5000)
            .map(|i| match i % 11 {
                0 => rng.gen_range(1000..=high),
                1 => 999,
                2 => high + 1,
                _ => rng.gen_range(i32::MIN..1000),
            })
            .collect_vec();
        let expected = binary_search.query(&haystack, &needles, arena);
        for scheme in schemes() {
            assert_eq!(scheme.query(&haystack, &needles, arena), expected, "{}", scheme.name());
        }
    }

    #[test]
    fn repeatable() {
        let rng = &mut ChaCha8Rng::seed_from_u64(5);
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let haystack = sorted_haystack(rng, 150_000, 100_000);
        let needles = (0..3000).map(|_| rng.gen_range(0..100_000)).collect_vec();
        for scheme in schemes() {
            arena.zero_all();
            let first = scheme.query(&haystack, &needles, arena);
            assert_eq!(arena.free_bytes(), arena.max_bytes());
            let second = scheme.query(&haystack, &needles, arena);
            assert_eq!(first, second);
        }
    }
}
