pub mod cluster;
pub mod embedder;
pub mod ingest;
pub mod linker;
pub mod propagate;
pub mod summarize;

use std::ops::Range;

use rayon::prelude::*;

/// Result of one node batch: computed by the model, or substituted.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome<T> {
    Computed(T),
    Fallback { value: T, reason: String },
}

impl<T> BatchOutcome<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Computed(value) | Self::Fallback { value, .. } => value,
        }
    }
}

/// Split `0..n` into consecutive ranges of at most `size` rows.
pub fn batch_ranges(n: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (0..n)
        .step_by(size)
        .map(|start| start..(start + size).min(n))
        .collect()
}

/// Evaluate every batch, on the current rayon pool when `parallel` is set.
///
/// Outcomes come back in batch order regardless of execution order.
pub fn run_batches<T, F>(
    n: usize,
    size: usize,
    parallel: bool,
    f: F,
) -> Vec<(Range<usize>, BatchOutcome<T>)>
where
    T: Send,
    F: Fn(Range<usize>) -> BatchOutcome<T> + Sync,
{
    let ranges = batch_ranges(n, size);
    if parallel {
        ranges
            .into_par_iter()
            .map(|range| (range.clone(), f(range)))
            .collect()
    } else {
        ranges
            .into_iter()
            .map(|range| (range.clone(), f(range)))
            .collect()
    }
}
