// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Deterministic prefix split of an encoded corpus:
//   - Training set:   the first (1 - val_fraction) of the tokens
//   - Validation set: the remainder
//
// No shuffling. Neighbouring characters stay neighbours, and the
// same corpus always splits the same way, so runs are comparable.

/// Split `encoded` into (train, validation) at
/// `floor(len * (1 - val_fraction))`.
pub fn split_train_val<T: Clone>(encoded: &[T], val_fraction: f64) -> (Vec<T>, Vec<T>) {
    let total    = encoded.len();
    let train_fraction = (1.0 - val_fraction).clamp(0.0, 1.0);
    let split_at = ((total as f64) * train_fraction) as usize;
    let split_at = split_at.min(total);

    let (train, val) = encoded.split_at(split_at);

    tracing::debug!(
        "Corpus split: {} training tokens, {} validation tokens",
        train.len(),
        val.len(),
    );

    (train.to_vec(), val.to_vec())
}
