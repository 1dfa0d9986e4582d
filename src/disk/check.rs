use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use super::error::DskError;
use super::fs::FsView;
use super::image::DskImage;
use super::{FIRST_DATA_SECTOR, VIB_SECTOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Health {
    Good,
    Warn,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// The issue taxonomy the checkers report against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    OrphanCluster,
    CrossLink,
    AbmInconsistency,
    InvalidFdiEntry,
}

#[derive(Debug, Clone)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub sector: Option<usize>,
    pub file: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CheckerResult {
    pub checker: &'static str,
    pub health: Health,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone)]
pub struct CheckReport {
    pub health: Health,
    pub results: Vec<CheckerResult>,
}

impl CheckReport {
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.results.iter().flat_map(|r| r.issues.iter())
    }

    pub fn issue_count(&self) -> usize {
        self.results.iter().map(|r| r.issues.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    /// Mark a chained sector as used in the bitmap.
    MarkSectorUsed(usize),
    /// Free an orphaned allocation unit.
    FreeUnit(usize),
    /// Re-sort the file descriptor index.
    SortIndex,
    /// Drop an index entry whose target is not a usable descriptor.
    DropIndexEntry(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStatus {
    Ready,
    NothingToDo,
    Unsafe,
    Partial,
}

#[derive(Debug, Clone)]
pub struct RepairPlan {
    pub issues: Vec<Issue>,
    pub actions: Vec<RepairAction>,
    pub status: RepairStatus,
}

#[derive(Debug, Clone)]
pub struct RepairReport {
    pub plan: RepairPlan,
    pub applied: Vec<RepairAction>,
    pub health_after: Health,
}

/// The four checkers, run as a registry so callers see a uniform shape.
const CHECKERS: [(&str, fn(&FsView) -> Vec<Issue>); 4] = [
    ("orphan-clusters", check_orphan_clusters),
    ("cross-links", check_cross_links),
    ("abm-consistency", check_abm_consistency),
    ("directory-consistency", check_directory_consistency),
];

pub(crate) fn run_checks(img: &DskImage) -> Result<CheckReport, DskError> {
    let view = FsView::load(img)?;
    let mut results = Vec::with_capacity(CHECKERS.len());
    for (name, checker) in CHECKERS {
        let issues = checker(&view);
        let health = issues
            .iter()
            .map(|i| match i.severity {
                Severity::Warning | Severity::Error => Health::Warn,
                Severity::Critical => Health::Broken,
            })
            .max()
            .unwrap_or(Health::Good);
        for issue in &issues {
            warn!("{}: {}", name, issue.message);
        }
        results.push(CheckerResult {
            checker: name,
            health,
            issues,
        });
    }
    let health = results
        .iter()
        .map(|r| r.health)
        .max()
        .unwrap_or(Health::Good);
    Ok(CheckReport { health, results })
}

/// Sectors every well-formed volume reserves: the VIB, the live index
/// sector, and every descriptor the index points at.
fn system_sectors(view: &FsView) -> HashSet<usize> {
    let mut sectors = HashSet::new();
    sectors.insert(VIB_SECTOR);
    sectors.insert(view.fdi_sector);
    sectors.insert(super::FDI_SECTOR);
    for slot in &view.slots {
        sectors.insert(slot.sector as usize);
    }
    sectors
}

fn chains(view: &FsView) -> Vec<(String, Vec<usize>)> {
    view.slots
        .iter()
        .filter_map(|slot| {
            slot.fdr
                .as_ref()
                .map(|fdr| (fdr.file_name_str(), fdr.data_chain()))
        })
        .collect()
}

fn check_orphan_clusters(view: &FsView) -> Vec<Issue> {
    let union: HashSet<usize> = chains(view).into_iter().flat_map(|(_, c)| c).collect();
    let system = system_sectors(view);
    let spc = view.abm.sectors_per_cluster();

    let mut issues = Vec::new();
    for unit in 0..view.abm.total_units() {
        if !view.abm.unit_used(unit) {
            continue;
        }
        let span = unit * spc..(unit + 1) * spc;
        let claimed = span
            .clone()
            .any(|s| union.contains(&s) || system.contains(&s));
        if !claimed {
            issues.push(Issue {
                kind: IssueKind::OrphanCluster,
                severity: Severity::Warning,
                sector: Some(unit * spc),
                file: None,
                message: format!(
                    "allocation unit {} (sector {}) is marked used but belongs to no file",
                    unit,
                    unit * spc
                ),
            });
        }
    }
    issues
}

fn check_cross_links(view: &FsView) -> Vec<Issue> {
    let mut owners: HashMap<usize, Vec<String>> = HashMap::new();
    for (name, chain) in chains(view) {
        for sector in chain {
            owners.entry(sector).or_default().push(name.clone());
        }
    }
    let system = system_sectors(view);

    let mut issues = Vec::new();
    for (&sector, names) in owners.iter() {
        if names.len() > 1 {
            issues.push(Issue {
                kind: IssueKind::CrossLink,
                severity: Severity::Critical,
                sector: Some(sector),
                file: Some(names.join(", ")),
                message: format!(
                    "sector {} is claimed by more than one file: {}",
                    sector,
                    names.join(", ")
                ),
            });
        }
        if system.contains(&sector) {
            issues.push(Issue {
                kind: IssueKind::CrossLink,
                severity: Severity::Critical,
                sector: Some(sector),
                file: Some(names.join(", ")),
                message: format!(
                    "chain of {} runs through reserved sector {}",
                    names.join(", "),
                    sector
                ),
            });
        }
    }
    issues.sort_by_key(|i| i.sector);
    issues
}

fn check_abm_consistency(view: &FsView) -> Vec<Issue> {
    let mut issues = Vec::new();
    for slot in &view.slots {
        let fdr = match &slot.fdr {
            Some(fdr) => fdr,
            None => continue,
        };
        let name = fdr.file_name_str();
        let chain = fdr.data_chain();
        if chain.len() != fdr.total_sectors_allocated as usize {
            issues.push(Issue {
                kind: IssueKind::AbmInconsistency,
                severity: Severity::Error,
                sector: Some(slot.sector as usize),
                file: Some(name.clone()),
                message: format!(
                    "{} advertises {} sectors but its chain covers {}",
                    name,
                    fdr.total_sectors_allocated,
                    chain.len()
                ),
            });
        }
        for sector in chain {
            if sector < view.abm.total_sectors() && !view.abm.is_used(sector) {
                issues.push(Issue {
                    kind: IssueKind::AbmInconsistency,
                    severity: Severity::Error,
                    sector: Some(sector),
                    file: Some(name.clone()),
                    message: format!(
                        "sector {} of {} is not marked used in the bitmap",
                        sector, name
                    ),
                });
            }
        }
    }
    issues
}

fn check_directory_consistency(view: &FsView) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut names_seen: HashMap<String, String> = HashMap::new();
    let mut previous: Option<String> = None;

    for slot in &view.slots {
        let fdr = match &slot.fdr {
            Some(fdr) => fdr,
            None => {
                issues.push(Issue {
                    kind: IssueKind::InvalidFdiEntry,
                    severity: Severity::Error,
                    sector: Some(slot.sector as usize),
                    file: None,
                    message: format!("index entry {} points outside the volume", slot.sector),
                });
                continue;
            }
        };
        if fdr.name_is_blank() || fdr.file_type().is_none() {
            issues.push(Issue {
                kind: IssueKind::InvalidFdiEntry,
                severity: Severity::Error,
                sector: Some(slot.sector as usize),
                file: None,
                message: format!(
                    "index entry {} does not point at a usable descriptor",
                    slot.sector
                ),
            });
            continue;
        }
        let name = fdr.file_name_str();
        let lower = name.to_lowercase();
        if let Some(first) = names_seen.get(&lower) {
            issues.push(Issue {
                kind: IssueKind::InvalidFdiEntry,
                severity: Severity::Error,
                sector: Some(slot.sector as usize),
                file: Some(name.clone()),
                message: format!("duplicate catalog name {} (also {})", name, first),
            });
        } else {
            names_seen.insert(lower.clone(), name.clone());
        }
        if let Some(previous) = &previous {
            if *previous > lower {
                issues.push(Issue {
                    kind: IssueKind::InvalidFdiEntry,
                    severity: Severity::Warning,
                    sector: Some(slot.sector as usize),
                    file: Some(name.clone()),
                    message: format!("index is out of order at {}", name),
                });
            }
        }
        previous = Some(lower);
    }

    // Descriptors sitting in the descriptor area without an index entry.
    // Judged per allocation unit, one issue per unit, so that on double
    // density volumes the spare sector of a descriptor's unit is not
    // flagged and an orphaned unit is not reported twice.
    let union: HashSet<usize> = chains(view).into_iter().flat_map(|(_, c)| c).collect();
    let system = system_sectors(view);
    let spc = view.abm.sectors_per_cluster();
    let limit = FIRST_DATA_SECTOR.min(view.abm.total_sectors());
    for unit in 2 / spc..limit.div_ceil(spc) {
        if !view.abm.unit_used(unit) {
            continue;
        }
        let claimed = (unit * spc..(unit + 1) * spc)
            .any(|s| union.contains(&s) || system.contains(&s));
        if claimed {
            continue;
        }
        let sector = unit * spc;
        issues.push(Issue {
            kind: IssueKind::InvalidFdiEntry,
            severity: Severity::Warning,
            sector: Some(sector),
            file: None,
            message: format!("sector {} looks like a descriptor with no index entry", sector),
        });
    }
    issues
}

pub(crate) fn plan_repair(img: &DskImage) -> Result<RepairPlan, DskError> {
    let report = run_checks(img)?;
    let mut actions = Vec::new();
    let mut unsafe_issues = 0usize;

    for issue in report.issues() {
        match issue.kind {
            IssueKind::OrphanCluster => {
                match issue.sector {
                    // an orphan inside the descriptor area may be a
                    // recoverable descriptor, leave it to the caller
                    Some(sector) if sector >= FIRST_DATA_SECTOR => {
                        let unit = sector / img.geometry().sectors_per_cluster as usize;
                        actions.push(RepairAction::FreeUnit(unit));
                    }
                    _ => unsafe_issues += 1,
                }
            }
            IssueKind::AbmInconsistency => match issue.sector {
                Some(sector) if issue.message.contains("not marked used") => {
                    let action = RepairAction::MarkSectorUsed(sector);
                    if !actions.contains(&action) {
                        actions.push(action);
                    }
                }
                _ => unsafe_issues += 1,
            },
            IssueKind::InvalidFdiEntry => {
                if issue.message.contains("out of order") {
                    if !actions.contains(&RepairAction::SortIndex) {
                        actions.push(RepairAction::SortIndex);
                    }
                } else if issue.message.contains("no index entry")
                    || issue.message.contains("duplicate")
                {
                    // recovering an unlinked descriptor or picking the
                    // survivor of a name clash needs a decision from the
                    // caller
                    unsafe_issues += 1;
                } else if let Some(sector) = issue.sector {
                    let action = RepairAction::DropIndexEntry(sector as u16);
                    if !actions.contains(&action) {
                        actions.push(action);
                    }
                }
            }
            // untangling cross-linked files needs a decision from the caller
            IssueKind::CrossLink => unsafe_issues += 1,
        }
    }

    let status = match (report.issue_count(), actions.len(), unsafe_issues) {
        (0, _, _) => RepairStatus::NothingToDo,
        (_, 0, _) => RepairStatus::Unsafe,
        (_, _, 0) => RepairStatus::Ready,
        _ => RepairStatus::Partial,
    };
    Ok(RepairPlan {
        issues: report.issues().cloned().collect(),
        actions,
        status,
    })
}

pub(crate) fn apply_repair(img: &mut DskImage) -> Result<RepairReport, DskError> {
    let plan = plan_repair(img)?;
    let mut view = FsView::load(img)?;
    let mut applied = Vec::new();

    for action in &plan.actions {
        match action {
            RepairAction::MarkSectorUsed(sector) => {
                view.abm.set_used(*sector, true);
            }
            RepairAction::FreeUnit(unit) => {
                view.abm.set_unit_used(*unit, false);
            }
            RepairAction::DropIndexEntry(sector) => {
                view.fdi.remove(*sector);
                view.slots.retain(|s| s.sector != *sector);
            }
            RepairAction::SortIndex => {}
        }
        applied.push(action.clone());
    }
    if plan.actions.contains(&RepairAction::SortIndex) {
        let mut order: Vec<(String, u16)> = view
            .slots
            .iter()
            .map(|s| (s.name_lower().unwrap_or_default(), s.sector))
            .collect();
        order.sort();
        view.fdi.reorder(order.into_iter().map(|(_, s)| s).collect());
    }

    debug!("applied {} repair actions", applied.len());
    view.write_fdi(img);
    view.write_vib(img);

    let health_after = run_checks(img)?.health;
    Ok(RepairReport {
        plan,
        applied,
        health_after,
    })
}
