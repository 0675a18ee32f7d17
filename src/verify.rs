//! Verify / cleanup command mode
//!
//! A read-mostly utility over the Ledger (§6/§8 Scenario 6): `--verify`
//! reports every `processing`/`failed` record, `--cleanup` deletes their
//! target files and drops the records (re-enabling reconversion), and
//! `--cleanup --dry-run` previews what would be deleted without touching
//! anything.

use crate::ledger::{Ledger, LedgerRecord, LedgerState};

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub processing: Vec<LedgerRecord>,
    pub failed: Vec<LedgerRecord>,
}

pub async fn report(ledger: &Ledger) -> Result<VerifyReport, String> {
    Ok(VerifyReport {
        processing: ledger.query_by_state(LedgerState::Processing).await?,
        failed: ledger.query_by_state(LedgerState::Failed).await?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOutcome {
    pub records_removed: usize,
    pub files_deleted: usize,
}

/// Delete the target file (if present) and drop the ledger record for every
/// `processing`/`failed` entry. In `dry_run` mode, nothing is touched; the
/// returned counts describe what *would* be removed.
pub async fn cleanup(ledger: &Ledger, dry_run: bool) -> Result<CleanupOutcome, String> {
    let report = report(ledger).await?;
    let mut outcome = CleanupOutcome::default();

    for record in report.processing.into_iter().chain(report.failed) {
        if record.target_path.exists() {
            outcome.files_deleted += 1;
            if !dry_run {
                let _ = std::fs::remove_file(&record.target_path);
            }
        }
        outcome.records_removed += 1;
        if !dry_run {
            ledger.delete(&record.source_path).await?;
        }
    }

    Ok(outcome)
}
