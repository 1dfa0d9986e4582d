use log::debug;

use super::abm::Abm;
use super::error::DskError;

/// A maximal run of contiguous free clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRun {
    pub start: usize,
    pub length: usize,
}

/// Scan the bitmap once and collect every maximal free run, in ascending
/// cluster order.
pub fn free_runs(abm: &Abm) -> Vec<FreeRun> {
    let mut runs = Vec::new();
    let mut current: Option<FreeRun> = None;
    for cluster in 0..abm.total_units() {
        if abm.unit_used(cluster) {
            if let Some(run) = current.take() {
                runs.push(run);
            }
        } else {
            match current.as_mut() {
                Some(run) => run.length += 1,
                None => {
                    current = Some(FreeRun {
                        start: cluster,
                        length: 1,
                    })
                }
            }
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}

/// Pick `needed` clusters and mark them used.
///
/// Selection order: a run of exactly the right size, then the smallest run
/// that is larger, then single clusters in ascending order as a fragmenting
/// fallback. The returned cluster list is always ascending.
pub fn allocate(abm: &mut Abm, needed: usize) -> Result<Vec<usize>, DskError> {
    if needed == 0 {
        return Ok(Vec::new());
    }
    let runs = free_runs(abm);
    let available: usize = runs.iter().map(|r| r.length).sum();
    if available < needed {
        return Err(DskError::OutOfSpace);
    }

    let clusters: Vec<usize> = if let Some(run) = runs.iter().find(|r| r.length == needed) {
        debug!("tight fit of {} clusters at {}", needed, run.start);
        (run.start..run.start + needed).collect()
    } else if let Some(run) = runs
        .iter()
        .filter(|r| r.length > needed)
        .min_by_key(|r| (r.length, r.start))
    {
        debug!(
            "best fit of {} clusters at {} (run of {})",
            needed, run.start, run.length
        );
        (run.start..run.start + needed).collect()
    } else {
        debug!("fragmenting allocation of {} clusters", needed);
        runs.iter()
            .flat_map(|r| r.start..r.start + r.length)
            .take(needed)
            .collect()
    };

    for &cluster in &clusters {
        abm.set_unit_used(cluster, true);
    }
    Ok(clusters)
}

/// Clear the bitmap entries behind a data chain.
pub fn release(abm: &mut Abm, sectors: &[usize]) {
    for &sector in sectors {
        abm.set_used(sector, false);
    }
}
