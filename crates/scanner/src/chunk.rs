//! Oversize handling for terminal results
//!
//! The bus enforces a hard payload limit. Terminal results that exceed it
//! are split into pieces sharing id, part info and status; a hint whose own
//! messages cannot fit is collapsed to a single pointer entry.

use crate::constants::TOO_MANY_ERRORS_MESSAGE;
use model::{HintMessage, HintResult, ResultMessage};
use serde::Serialize;
use tracing::debug;

fn serialized_len<T: Serialize>(value: &T) -> usize {
    // Serialization of these types cannot fail; treat a failure as "does
    // not fit" so it surfaces through the oversize path instead of a panic.
    serde_json::to_vec(value).map_or(usize::MAX, |bytes| bytes.len())
}

/// Replaces a hint's messages with the single "too many errors" entry. The
/// status is preserved.
pub fn collapse(hint: &mut HintResult) {
    hint.messages = vec![HintMessage::new(hint.name.clone(), TOO_MANY_ERRORS_MESSAGE)];
}

/// Collapses every hint whose messages alone exceed `limit`. Returns how
/// many hints were collapsed.
pub fn collapse_oversized(hints: &mut [HintResult], limit: usize) -> usize {
    let mut collapsed = 0;
    for hint in hints.iter_mut() {
        if serialized_len(&hint.messages) > limit {
            debug!(
                "Collapsing messages of hint {} ({} bytes over the {} byte limit)",
                hint.name,
                serialized_len(&hint.messages),
                limit
            );
            collapse(hint);
            collapsed += 1;
        }
    }
    collapsed
}

/// Collapses the hint carrying the largest message payload. Used when the
/// bus rejected a message the local measurement let through; the caller
/// resends once and treats that resend as final.
pub fn collapse_largest(message: &mut ResultMessage) -> bool {
    let hints = message.hints_mut();
    let largest = hints
        .iter()
        .enumerate()
        .filter(|(_, hint)| !hint.messages.is_empty())
        .max_by_key(|(_, hint)| serialized_len(&hint.messages))
        .map(|(index, _)| index);

    match largest {
        Some(index) => {
            collapse(&mut hints[index]);
            true
        }
        None => false,
    }
}

/// Splits a result message into pieces that each fit `limit`, greedy
/// first-fit by serialized hint size. Hints too big on their own are
/// collapsed first; a message that fits comes back as a single piece.
pub fn partition(message: &ResultMessage, limit: usize) -> Vec<ResultMessage> {
    let mut candidate = message.clone();
    collapse_oversized(candidate.hints_mut(), limit);
    if serialized_len(&candidate) <= limit {
        return vec![candidate];
    }

    let hints = std::mem::take(candidate.hints_mut());
    let base_len = serialized_len(&candidate);

    let mut bins: Vec<(usize, Vec<HintResult>)> = Vec::new();
    for hint in hints {
        let hint_len = serialized_len(&hint) + 1; // list separator
        match bins
            .iter_mut()
            .find(|(used, _)| used + hint_len <= limit)
        {
            Some((used, bin)) => {
                *used += hint_len;
                bin.push(hint);
            }
            None => bins.push((base_len + hint_len, vec![hint])),
        }
    }

    if bins.is_empty() {
        // No hints at all and still oversized would be a malformed message;
        // emit it as-is and let the bus complain.
        return vec![candidate];
    }

    bins.into_iter()
        .map(|(_, bin)| candidate.with_hints(bin))
        .collect()
}
