//! Scalar binary search whose first `STEPS` probes read the decision-tree
//! cache instead of the haystack.

use std::iter::zip;

use crate::binary_search::{get, resolve};
use crate::cache::DecisionTreeCache;
use crate::{check_search_args, prefetch_index, Arena, NOT_FOUND};

/// Same descent as `binary_search::search_one`, with the top levels served
/// from `cache`.
#[inline(always)]
pub(crate) fn descend(haystack: &[i32], cache: &DecisionTreeCache, needle: i32) -> i32 {
    let mut left = 0;
    let mut count = haystack.len();
    let mut node = 1;

    for _ in 0..cache.step_count() {
        if count == 0 {
            break;
        }
        let half = count / 2;
        if cache.get(node) < needle {
            left += half + 1;
            count -= half + 1;
            node = 2 * node + 1;
        } else {
            count = half;
            node = 2 * node;
        }
    }

    while count > 0 {
        let half = count / 2;
        // Both candidates for the next probe.
        prefetch_index(haystack, left + half / 2);
        prefetch_index(haystack, left + half + 1 + (count - half - 1) / 2);
        if get(haystack, left + half) < needle {
            left += half + 1;
            count -= half + 1;
        } else {
            count = half;
        }
    }
    resolve(haystack, left, needle)
}

/// `descend` behind the fast reject on the haystack's value range.
#[inline(always)]
pub(crate) fn descend_checked(haystack: &[i32], cache: &DecisionTreeCache, needle: i32) -> i32 {
    let low = get(haystack, 0);
    let high = get(haystack, haystack.len() - 1);
    if needle < low || needle > high {
        return NOT_FOUND;
    }
    descend(haystack, cache, needle)
}

/// Cache-augmented search with fast reject of out-of-range needles.
pub fn cached_search<const STEPS: usize>(
    haystack: &[i32],
    needles: &[i32],
    indices: &mut [i32],
    arena: &mut Arena,
) {
    check_search_args(haystack, needles, indices);
    let cache = DecisionTreeCache::build(haystack, STEPS, arena);
    for (&needle, index) in zip(needles, indices) {
        *index = descend_checked(haystack, &cache, needle);
    }
    arena.free_all();
}

/// Cache-augmented search that descends for every needle, in range or not.
pub fn cached_search_unfiltered<const STEPS: usize>(
    haystack: &[i32],
    needles: &[i32],
    indices: &mut [i32],
    arena: &mut Arena,
) {
    check_search_args(haystack, needles, indices);
    let cache = DecisionTreeCache::build(haystack, STEPS, arena);
    for (&needle, index) in zip(needles, indices) {
        *index = descend(haystack, &cache, needle);
    }
    arena.free_all();
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::binary_search::binary_search;
    use crate::{SearchScheme, DEFAULT_ARENA_BYTES};

    #[test]
    fn duplicates_and_misses() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let haystack = [1, 3, 3, 5, 7, 9];
        let needles = [3, 4, 9, 0, 10];
        let expected = [1, -1, 5, -1, -1];
        assert_eq!(cached_search::<12>.query(&haystack, &needles, arena), expected);
        assert_eq!(cached_search::<2>.query(&haystack, &needles, arena), expected);
        assert_eq!(cached_search_unfiltered::<12>.query(&haystack, &needles, arena), expected);
    }

    #[test]
    fn single_element() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let needles = [5, 4, 6];
        assert_eq!(cached_search::<12>.query(&[5], &needles, arena), [0, -1, -1]);
        assert_eq!(cached_search_unfiltered::<1>.query(&[5], &needles, arena), [0, -1, -1]);
    }

    #[test]
    fn range_boundaries() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let haystack = (0..5000).map(|x| 2 * x + 10).collect_vec();
        let low = haystack[0];
        let high = *haystack.last().unwrap();
        let needles = [low - 1, low, low + 1, high - 1, high, high + 1, i32::MIN, i32::MAX];
        let expected = [-1, 0, -1, -1, 4999, -1, -1, -1];
        assert_eq!(cached_search::<10>.query(&haystack, &needles, arena), expected);
        assert_eq!(cached_search_unfiltered::<10>.query(&haystack, &needles, arena), expected);
    }

    #[test]
    fn releases_arena() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        cached_search::<12>.query(&[1, 2, 3], &[2], arena);
        assert_eq!(arena.free_bytes(), arena.max_bytes());
    }

    #[test]
    #[should_panic(expected = "scratch arena")]
    fn arena_too_small_for_steps() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        cached_search::<13>.query(&[1, 2, 3], &[2], arena);
    }

    #[test]
    fn matches_binary_search() {
        let rng = &mut ChaCha8Rng::seed_from_u64(42);
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        for len in [1, 2, 5, 64, 1000, 1023, 1024, 1025, 50_000] {
            let mut haystack = (0..len).map(|_| rng.gen_range(0..len / 2 + 1)).collect_vec();
            haystack.sort();
            let needles = (0..2000).map(|_| rng.gen_range(-2..len / 2 + 3)).collect_vec();
            let expected = binary_search.query(&haystack, &needles, arena);
            assert_eq!(cached_search::<12>.query(&haystack, &needles, arena), expected);
            assert_eq!(cached_search::<4>.query(&haystack, &needles, arena), expected);
            assert_eq!(cached_search::<0>.query(&haystack, &needles, arena), expected);
            assert_eq!(cached_search_unfiltered::<12>.query(&haystack, &needles, arena), expected);
        }
    }
}
