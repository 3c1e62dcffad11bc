//! Repair flow.
//!
//! For each file: probe which fragments still answer, regenerate the missing
//! slots from the survivors, and store each regenerated fragment under its
//! original id. A file with fewer than `k` survivors cannot be repaired; its
//! missing fragments are reported as unrepairable and nothing is written.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::store::Placement;
use super::Coordinator;
use crate::domain::file::FileRecord;
use crate::domain::ports::FileId;
use crate::error::{Error, Result};
use crate::fragment::{join_chunks, FragmentId};
use crate::metrics::{record_operation, FRAGMENTS_REPAIRED};

/// What a repair pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub files_checked: usize,
    /// Fragments no node answered for
    pub missing: Vec<FragmentId>,
    /// Missing fragments regenerated and stored again
    pub repaired: Vec<FragmentId>,
    /// Missing fragments that could not be regenerated or placed
    pub unrepairable: Vec<FragmentId>,
    /// Files whose repair stopped on an error
    pub failed_files: Vec<FileId>,
}

impl RepairReport {
    /// Nothing was missing and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.failed_files.is_empty()
    }
}

impl Coordinator {
    /// Check and repair each file in turn.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn repair(&mut self, files: &[FileRecord]) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        for file in files {
            report.files_checked += 1;
            if let Err(e) = self.repair_file(file, &mut report).await {
                warn!(file = %file.id, error = %e, "Repair of file failed");
                report.failed_files.push(file.id.clone());
            }
        }

        FRAGMENTS_REPAIRED.inc_by(report.repaired.len() as u64);
        info!(
            checked = report.files_checked,
            missing = report.missing.len(),
            repaired = report.repaired.len(),
            unrepairable = report.unrepairable.len(),
            "Repair pass complete"
        );

        let result = if report.failed_files.is_empty() {
            Ok(())
        } else {
            Err(Error::Internal(format!("{} files failed", report.failed_files.len())))
        };
        record_operation("repair", &result);
        Ok(report)
    }

    async fn repair_file(&mut self, file: &FileRecord, report: &mut RepairReport) -> Result<()> {
        let params = file.coding_params();
        let ids = file.fragment_ids();
        let codec = self.codec(&params)?;
        if ids.len() != codec.fragment_count() {
            return Err(Error::InvalidParameter(format!(
                "file {} lists {} fragments, this cluster stores {} per file",
                file.id,
                ids.len(),
                codec.fragment_count()
            )));
        }
        let size = usize::try_from(file.size)
            .map_err(|_| Error::CorruptShard(format!("file {} is too large", file.id)))?;

        let wait = self.config.timeouts.probe();
        let found = self
            .collect_fragments(&ids, wait, codec.required_fragments(), false)
            .await?;

        let missing: Vec<usize> = (0..ids.len()).filter(|s| !found.contains_key(s)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        let missing_ids: Vec<FragmentId> = missing.iter().map(|&s| ids[s].clone()).collect();
        report.missing.extend(missing_ids.iter().cloned());
        warn!(file = %file.id, missing = ?missing_ids, "Fragments missing");

        if found.len() < codec.required_fragments() {
            warn!(
                file = %file.id,
                survivors = found.len(),
                required = codec.required_fragments(),
                "Too few survivors, file is unrepairable"
            );
            report.unrepairable.extend(missing_ids);
            return Ok(());
        }

        let holders: BTreeSet<usize> = found.values().map(|f| f.node).collect();
        let fragments: BTreeMap<usize, Vec<u8>> = found
            .into_iter()
            .map(|(slot, f)| (slot, join_chunks(&f.chunks)))
            .collect();

        let regenerated = match codec.regenerate(&fragments, size, &missing) {
            Ok(regenerated) => regenerated,
            Err(e) => {
                warn!(file = %file.id, error = %e, "Regeneration failed, file is unrepairable");
                report.unrepairable.extend(missing_ids);
                return Ok(());
            }
        };

        let connected = self.connected_nodes();
        for (rotation, (slot, fragment)) in regenerated.into_iter().enumerate() {
            let fragment_id = ids[slot].clone();
            let Some(node) = pick_target(slot, rotation, &connected, &holders) else {
                warn!(fragment = %fragment_id, "No connected node to place fragment on");
                report.unrepairable.push(fragment_id);
                continue;
            };

            let placement =
                Placement::new(node, fragment_id.clone(), &fragment, codec.chunks_per_fragment())?;
            match self.place_fragments(vec![placement], "repair").await {
                Ok(()) => {
                    info!(fragment = %fragment_id, slot, node, "Fragment repaired");
                    report.repaired.push(fragment_id);
                }
                Err(e) if e.is_node_failure() => {
                    warn!(fragment = %fragment_id, node, error = %e, "Could not place repaired fragment");
                    report.unrepairable.push(fragment_id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

/// Node for a regenerated fragment: its home node when connected, otherwise
/// a connected node holding nothing of this file, otherwise any connected one.
fn pick_target(
    slot: usize,
    rotation: usize,
    connected: &[usize],
    holders: &BTreeSet<usize>,
) -> Option<usize> {
    if connected.contains(&slot) {
        return Some(slot);
    }
    let spare: Vec<usize> = connected
        .iter()
        .copied()
        .filter(|n| !holders.contains(n))
        .collect();
    let pool: &[usize] = if spare.is_empty() { connected } else { &spare };
    if pool.is_empty() {
        return None;
    }
    Some(pool[rotation % pool.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_home_node_when_connected() {
        let holders = BTreeSet::from([0, 1, 3]);
        assert_eq!(pick_target(2, 0, &[0, 1, 2, 3], &holders), Some(2));
    }

    #[test]
    fn test_pick_spare_node_when_home_is_down() {
        let holders = BTreeSet::from([0, 1]);
        assert_eq!(pick_target(2, 0, &[0, 1, 3], &holders), Some(3));
    }

    #[test]
    fn test_pick_rotates_when_all_hold_fragments() {
        let holders = BTreeSet::from([0, 1, 3]);
        assert_eq!(pick_target(2, 0, &[0, 1, 3], &holders), Some(0));
        assert_eq!(pick_target(2, 1, &[0, 1, 3], &holders), Some(1));
        assert_eq!(pick_target(2, 0, &[], &holders), None);
    }

    #[test]
    fn test_report_is_clean() {
        let mut report = RepairReport::default();
        assert!(report.is_clean());
        report.missing.push(FragmentId::parse("gone").unwrap());
        assert!(!report.is_clean());
    }
}
