//! The top levels of the implicit binary-search tree, in heap order.
//!
//! Node `i` has children `2i` and `2i+1` and holds the value that a plain
//! binary search compares against when its descent reaches that node. Only
//! `step_count` levels are kept, so the whole structure fits in a few cache
//! lines and the first probes of every search hit L1.

use tracing::debug;

use crate::Arena;

pub struct DecisionTreeCache<'a> {
    /// Node `i` lives at `nodes[i - 1]`.
    nodes: &'a [i32],
    step_count: usize,
}

impl<'a> DecisionTreeCache<'a> {
    /// Number of `i32` slots a cache of `step_count` levels occupies.
    pub const fn slots(step_count: usize) -> usize {
        (1 << step_count) - 1
    }

    /// Number of arena bytes a cache of `step_count` levels occupies.
    pub const fn bytes(step_count: usize) -> usize {
        Self::slots(step_count) * std::mem::size_of::<i32>()
    }

    /// Build the cache for `haystack` in memory taken from `arena`.
    ///
    /// Panics when the arena cannot hold `step_count` levels.
    pub fn build(haystack: &[i32], step_count: usize, arena: &'a Arena) -> Self {
        let Some(nodes) = arena.alloc::<i32>(Self::slots(step_count)) else {
            panic!(
                "scratch arena has {} of {} bytes free, a {step_count}-level cache needs {}",
                arena.free_bytes(),
                arena.max_bytes(),
                Self::bytes(step_count)
            );
        };
        if step_count > 0 {
            precompute(haystack, nodes, step_count, 0, 1);
        }
        debug!(
            "Built {step_count}-level decision-tree cache over {} values",
            haystack.len()
        );
        DecisionTreeCache { nodes, step_count }
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// The comparison value at 1-based heap node `node`.
    #[inline(always)]
    pub fn get(&self, node: usize) -> i32 {
        debug_assert!(node >= 1 && node <= self.nodes.len());
        unsafe { *self.nodes.get_unchecked(node - 1) }
    }

    /// All nodes in heap order, starting with the root.
    pub fn nodes(&self) -> &[i32] {
        self.nodes
    }
}

/// Fill `node` and its descendants with the midpoints `haystack` would be
/// probed at. Empty subranges are never probed and stay untouched.
fn precompute(haystack: &[i32], nodes: &mut [i32], step_count: usize, step: usize, node: usize) {
    if haystack.is_empty() {
        return;
    }
    let half = haystack.len() / 2;
    nodes[node - 1] = haystack[half];

    if step + 1 < step_count {
        precompute(&haystack[..half], nodes, step_count, step + 1, 2 * node);
        precompute(&haystack[half + 1..], nodes, step_count, step + 1, 2 * node + 1);
    }
}
