//! Dispatch Grid Sizing
//!
//! Converts a kernel's logical thread counts into a thread-group grid.
//!
//! A group size of `0` means "unset": it resolves to [`DEFAULT_GROUP_SIZE`]
//! when the dimension has more than one thread, otherwise to `1`. Each grid
//! dimension is `ceil(threads / group)`; the depth dimension is always 1.
//!
//! ```rust
//! use ember::dispatch::{DispatchGrid, resolve_group_size};
//!
//! let group = resolve_group_size(0, 130);
//! assert_eq!(group, 64);
//! assert_eq!(DispatchGrid::compute([130, 1], [group, 1]).x, 3);
//! ```

/// Group size used for a dimension with more than one thread when unset.
pub const DEFAULT_GROUP_SIZE: u32 = 64;

/// Binding slots available per role in a single dispatch.
pub const MAX_SLOTS_PER_ROLE: usize = 32;

/// Number of thread groups launched per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGrid {
    /// Grid covering `threads` with groups of `group_size` (both X, Y).
    #[must_use]
    pub fn compute(threads: [u32; 2], group_size: [u32; 2]) -> Self {
        Self {
            x: group_count(threads[0], group_size[0]),
            y: group_count(threads[1], group_size[1]),
            z: 1,
        }
    }

    /// Total number of groups.
    #[inline]
    #[must_use]
    pub fn groups(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }
}

/// Shape of one kernel launch, handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    /// Logical thread counts (X, Y).
    pub threads: [u32; 2],
    /// Resolved group sizes (X, Y).
    pub group_size: [u32; 2],
    pub grid: DispatchGrid,
}

impl Launch {
    #[must_use]
    pub fn new(threads: [u32; 2], group_size: [u32; 2]) -> Self {
        Self {
            threads,
            group_size,
            grid: DispatchGrid::compute(threads, group_size),
        }
    }
}

/// Default group size for a dimension with `threads` logical threads.
#[inline]
#[must_use]
pub fn default_group_size(threads: u32) -> u32 {
    if threads > 1 { DEFAULT_GROUP_SIZE } else { 1 }
}

/// Resolves an unset (`0`) group size; a set one is returned unchanged.
#[inline]
#[must_use]
pub fn resolve_group_size(group_size: u32, threads: u32) -> u32 {
    if group_size == 0 {
        default_group_size(threads)
    } else {
        group_size
    }
}

/// `ceil(threads / group_size)`: integer division plus one extra group for a
/// nonzero remainder.
#[inline]
#[must_use]
pub fn group_count(threads: u32, group_size: u32) -> u32 {
    debug_assert!(group_size > 0, "group size must be resolved before sizing the grid");
    threads / group_size + u32::from(threads % group_size > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_group_defaults_by_thread_count() {
        assert_eq!(resolve_group_size(0, 130), 64);
        assert_eq!(resolve_group_size(0, 2), 64);
        assert_eq!(resolve_group_size(0, 1), 1);
        assert_eq!(resolve_group_size(0, 0), 1);
        assert_eq!(resolve_group_size(16, 130), 16);
    }

    #[test]
    fn grid_rounds_up_partial_groups() {
        assert_eq!(group_count(130, 64), 3);
        assert_eq!(group_count(128, 64), 2);
        assert_eq!(group_count(1, 1), 1);
        assert_eq!(group_count(0, 1), 0);
    }

    #[test]
    fn grid_depth_is_always_one() {
        let grid = DispatchGrid::compute([100, 7], [32, 4]);
        assert_eq!(grid, DispatchGrid { x: 4, y: 2, z: 1 });
        assert_eq!(grid.groups(), 8);
    }
}
