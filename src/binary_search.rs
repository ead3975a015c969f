use std::iter::zip;

use crate::{check_search_args, Arena, NOT_FOUND};

#[inline(always)]
pub(crate) fn get(haystack: &[i32], index: usize) -> i32 {
    debug_assert!(index < haystack.len());
    unsafe { *haystack.get_unchecked(index) }
}

/// Resolve the lower bound `left` of `needle` to an index or `NOT_FOUND`.
#[inline(always)]
pub(crate) fn resolve(haystack: &[i32], left: usize, needle: i32) -> i32 {
    if left < haystack.len() && get(haystack, left) == needle {
        left as i32
    } else {
        NOT_FOUND
    }
}

/// Index of the first occurrence of `needle`, or `NOT_FOUND`.
/// This descent defines what every other scheme must return.
pub fn search_one(haystack: &[i32], needle: i32) -> i32 {
    let mut left = 0;
    let mut count = haystack.len();
    while count > 0 {
        let half = count / 2;
        if get(haystack, left + half) < needle {
            left += half + 1;
            count -= half + 1;
        } else {
            count = half;
        }
    }
    resolve(haystack, left, needle)
}

/// Completely basic binary search. Does not use the arena.
pub fn binary_search(haystack: &[i32], needles: &[i32], indices: &mut [i32], _arena: &mut Arena) {
    check_search_args(haystack, needles, indices);
    for (&needle, index) in zip(needles, indices) {
        *index = search_one(haystack, needle);
    }
}

/// The standard library lower bound, used as the correctness oracle.
pub fn lower_bound_std(haystack: &[i32], needles: &[i32], indices: &mut [i32], _arena: &mut Arena) {
    check_search_args(haystack, needles, indices);
    for (&needle, index) in zip(needles, indices) {
        *index = lower_bound_one(haystack, needle);
    }
}

pub fn lower_bound_one(haystack: &[i32], needle: i32) -> i32 {
    let idx = haystack.partition_point(|&v| v < needle);
    match haystack.get(idx) {
        Some(&v) if v == needle => idx as i32,
        _ => NOT_FOUND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SearchScheme, DEFAULT_ARENA_BYTES};

    #[test]
    fn duplicates_and_misses() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let haystack = [1, 3, 3, 5, 7, 9];
        let needles = [3, 4, 9, 0, 10];
        let expected = vec![1, -1, 5, -1, -1];
        assert_eq!(binary_search.query(&haystack, &needles, arena), expected);
        assert_eq!(lower_bound_std.query(&haystack, &needles, arena), expected);
    }

    #[test]
    fn single_element() {
        let arena = &mut Arena::new(DEFAULT_ARENA_BYTES);
        let haystack = [5];
        let needles = [5, 4, 6];
        assert_eq!(binary_search.query(&haystack, &needles, arena), [0, -1, -1]);
        assert_eq!(lower_bound_std.query(&haystack, &needles, arena), [0, -1, -1]);
    }

    #[test]
    fn extreme_values() {
        let haystack = [i32::MIN, i32::MIN, 0, i32::MAX];
        assert_eq!(search_one(&haystack, i32::MIN), 0);
        assert_eq!(search_one(&haystack, i32::MAX), 3);
        assert_eq!(search_one(&haystack, i32::MAX - 1), NOT_FOUND);
        assert_eq!(search_one(&haystack, 1), NOT_FOUND);
    }

    #[test]
    fn no_needles() {
        let arena = &mut Arena::new(0);
        assert!(binary_search.query(&[1, 2], &[], arena).is_empty());
    }

    #[test]
    #[should_panic(expected = "one result slot")]
    fn mismatched_lengths() {
        let arena = &mut Arena::new(0);
        binary_search(&[1, 2], &[1, 2], &mut [0], arena);
    }

    #[test]
    #[should_panic(expected = "haystack must not be empty")]
    fn empty_haystack() {
        let arena = &mut Arena::new(0);
        binary_search(&[], &[1], &mut [0], arena);
    }
}
