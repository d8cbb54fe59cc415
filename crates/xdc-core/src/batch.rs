//! Splitting reconcile work into consensus-log sized batches.

/// Upsert batches stay below this many estimated bytes by default.
pub const DEFAULT_UPSERT_BATCH_BYTES: usize = 256 * 1024;

/// Deletions are committed this many keys at a time by default.
pub const DEFAULT_DELETE_BATCH: usize = 4096;

/// Greedy size-bounded chunking.
///
/// Items are appended to the current batch while its running size stays
/// within `budget`; otherwise a new batch is started. An item larger than the
/// budget on its own travels in a batch by itself. Order is preserved and the
/// concatenation of the batches equals the input.
pub fn chunk_by_size<T, F>(items: Vec<T>, budget: usize, size_of: F) -> Vec<Vec<T>>
where
    F: Fn(&T) -> usize,
{
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;

    for item in items {
        let size = size_of(&item);
        if !current.is_empty() && current_size.saturating_add(size) > budget {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size = current_size.saturating_add(size);
        current.push(item);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Fixed-count chunking. A `max` of zero is treated as one.
pub fn chunk_by_count<T>(items: Vec<T>, max: usize) -> Vec<Vec<T>> {
    let max = max.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(max));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(max).collect());
    }
    batches
}
