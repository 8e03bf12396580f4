//! Merge of result messages into the durable job record
//!
//! The bus is at-least-once and sub-jobs of one parent finish in any order,
//! so the merge has to be commutative and idempotent: duplicates,
//! reorderings and oversize partitions all collapse to the same record.

use model::{HintResult, Job, JobStatus, ResultMessage};

/// Applies one result message to the record. Returns true when the record
/// changed and needs to be persisted.
pub fn apply_result(db_job: &mut Job, message: &ResultMessage) -> bool {
    // A failed job absorbs everything that arrives afterwards.
    if db_job.status == JobStatus::Error {
        return false;
    }

    match message {
        ResultMessage::Started {
            started,
            engine_version,
            ..
        } => {
            if db_job.status == JobStatus::Pending {
                db_job.status = JobStatus::Started;
                db_job.started = Some(*started);
                db_job.engine_version = Some(engine_version.clone());
                true
            } else {
                // First writer wins: a duplicate or a sibling sub-job never
                // overwrites the original stamp.
                false
            }
        }

        ResultMessage::Finished {
            hints, finished, ..
        } => {
            let mut changed = merge_hints(db_job, hints);
            if db_job.all_hints_decided() && db_job.status != JobStatus::Finished {
                db_job.status = JobStatus::Finished;
                db_job.finished = Some(*finished);
                changed = true;
            }
            changed
        }

        ResultMessage::Errored {
            hints,
            finished,
            error,
            ..
        } => {
            merge_hints(db_job, hints);
            // An error terminal dominates, even over an earlier `finished`.
            db_job.status = JobStatus::Error;
            db_job.finished = Some(*finished);
            db_job.error = Some(error.clone());
            true
        }
    }
}

/// First non-pending observation wins per hint; later observations for the
/// same hint are duplicates or conflicting siblings and are dropped.
fn merge_hints(db_job: &mut Job, hints: &[HintResult]) -> bool {
    let mut changed = false;
    for hint in hints {
        match db_job.hint_mut(&hint.name) {
            Some(db_hint) => {
                if !db_hint.is_decided() && hint.is_decided() {
                    db_hint.status = hint.status;
                    db_hint.messages = hint.messages.clone();
                    changed = true;
                }
            }
            None => {
                // A hint the record has not seen yet; the expected hint set
                // is the union of what the bundles declare and what the
                // record already carries.
                db_job.hints.push(hint.clone());
                changed = true;
            }
        }
    }
    changed
}
