//! Top-N processes by resident memory.

use crate::types::{ProcessEntry, ProcessRank};

/// Descending by resident bytes; equal sizes keep their enumeration order.
pub fn rank(processes: &[ProcessEntry], k: usize) -> Vec<ProcessRank> {
    let mut idxs: Vec<usize> = (0..processes.len()).collect();
    // sort_by is stable, which is what preserves tie order
    idxs.sort_by(|&a, &b| processes[b].resident_bytes.cmp(&processes[a].resident_bytes));
    idxs.truncate(k);
    idxs.into_iter()
        .enumerate()
        .map(|(i, idx)| ProcessRank {
            position: i + 1,
            name: processes[idx].name.clone(),
            resident_bytes: processes[idx].resident_bytes,
        })
        .collect()
}
