#![feature(portable_simd)]

pub mod arena;
pub mod binary_search;
pub mod cache;
pub mod cached;
pub mod simd;
pub mod testcase;
pub mod util;

pub use arena::Arena;
pub use util::*;

/// Result for a needle that does not occur in the haystack.
pub const NOT_FOUND: i32 = -1;
/// Marker that result buffers are filled with before a search.
/// It never survives a completed search.
pub const NOT_SEARCHED: i32 = -2;

/// Number of decision-tree levels cached by default.
pub const DEFAULT_STEP_COUNT: usize = 12;
/// Scratch size that fits a cache of `DEFAULT_STEP_COUNT` levels.
pub const DEFAULT_ARENA_BYTES: usize = (1 << 14) + 1;

#[ctor::ctor]
fn init_color_backtrace() {
    color_backtrace::install();
}

/// A way to look up a batch of needles in a sorted haystack.
///
/// `indices[i]` receives the index of the first occurrence of `needles[i]`,
/// or `NOT_FOUND`. Scratch memory comes from `arena`, which is reset again
/// before returning.
pub trait SearchScheme: Sync + Send {
    fn search(&self, haystack: &[i32], needles: &[i32], indices: &mut [i32], arena: &mut Arena);

    /// Convenience wrapper that allocates the result vector.
    fn query(&self, haystack: &[i32], needles: &[i32], arena: &mut Arena) -> Vec<i32> {
        let mut indices = vec![NOT_SEARCHED; needles.len()];
        self.search(haystack, needles, &mut indices, arena);
        indices
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F> SearchScheme for F
where
    F: Fn(&[i32], &[i32], &mut [i32], &mut Arena) + Sync + Send,
{
    fn search(&self, haystack: &[i32], needles: &[i32], indices: &mut [i32], arena: &mut Arena) {
        self(haystack, needles, indices, arena)
    }
}

/// Caller contract shared by all search entry points.
pub(crate) fn check_search_args(haystack: &[i32], needles: &[i32], indices: &[i32]) {
    assert!(!haystack.is_empty(), "haystack must not be empty");
    assert!(
        haystack.len() <= i32::MAX as usize,
        "haystack of {} values does not fit 32-bit lanes",
        haystack.len()
    );
    assert_eq!(
        needles.len(),
        indices.len(),
        "one result slot is needed per needle"
    );
    debug_assert!(haystack.is_sorted(), "haystack must be sorted ascending");
}
