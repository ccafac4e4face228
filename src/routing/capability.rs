//! Capability-first-available backend selection.

use crate::registry::Backend;

/// Pick the least-loaded available backend serving `capability`.
///
/// Candidates are the backends that declare `capability` (or the universal
/// `"all"` tag) and are online with spare capacity. The result is the one
/// with the lowest `current_load`; equal loads resolve to the earlier entry
/// in `backends`, so callers pass registration order.
///
/// Returns `None` when no candidate remains.
///
/// # Panics
///
/// This function never panics.
pub fn capability_first_available(backends: &[Backend], capability: &str) -> Option<Backend> {
    let mut candidates: Vec<&Backend> = backends
        .iter()
        .filter(|b| b.serves(capability) && b.is_available())
        .collect();
    // stable: preserves registration order among equal loads
    candidates.sort_by_key(|b| b.current_load);
    candidates.first().map(|b| (*b).clone())
}
