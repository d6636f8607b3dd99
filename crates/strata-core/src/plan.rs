//! Step planning.
//!
//! A plan is a range selection over the sorted migration set. Versions are
//! totally ordered, so there is no dependency resolution or reordering.

use crate::error::{Result, StrataError};
use crate::migration::{Direction, MigrationSet, Version};

/// Where a migrating call wants to end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every pending migration.
    Latest,
    /// Revert everything down to version 0.
    Base,
    /// `n > 0` forward, `n < 0` backward, `0` no-op.
    Relative(i64),
    /// An explicit version (0 or a known migration).
    Version(Version),
}

/// One step of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStep {
    /// Migration whose script runs.
    pub version: Version,
    pub direction: Direction,
    /// Version recorded once this step succeeds.
    pub record_after: Version,
}

/// Ordered steps taking the database from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    pub direction: Direction,
    pub from: Version,
    pub to: Version,
    pub steps: Vec<PlannedStep>,
}

impl StepPlan {
    /// Compute the plan for `target` starting at `current`.
    ///
    /// Fails with [`StrataError::NoChange`] for an empty plan and validates
    /// that every step has a script before anything is executed.
    pub fn compute(set: &MigrationSet, current: Version, target: Target) -> Result<Self> {
        if current != 0 && !set.contains(current) {
            return Err(StrataError::Source(format!(
                "Version {} is recorded in the database but missing from the migration source",
                current
            )));
        }

        let (direction, versions) = match target {
            Target::Latest => (Direction::Up, pending(set, current, None)),
            Target::Base => (Direction::Down, applied(set, current, 0)),
            Target::Relative(0) => return Err(StrataError::NoChange),
            Target::Relative(n) => {
                let requested = n.unsigned_abs();
                let (direction, mut versions) = if n > 0 {
                    (Direction::Up, pending(set, current, None))
                } else {
                    (Direction::Down, applied(set, current, 0))
                };
                let available = versions.len() as u64;
                if available == 0 {
                    return Err(StrataError::NoChange);
                }
                if available < requested {
                    return Err(StrataError::ShortLimit {
                        requested,
                        available,
                    });
                }
                versions.truncate(requested as usize);
                (direction, versions)
            }
            Target::Version(target) => {
                if target != 0 && !set.contains(target) {
                    return Err(StrataError::Source(format!(
                        "Target version {} does not exist in the migration source",
                        target
                    )));
                }
                if target >= current {
                    (Direction::Up, pending(set, current, Some(target)))
                } else {
                    (Direction::Down, applied(set, current, target))
                }
            }
        };

        if versions.is_empty() {
            return Err(StrataError::NoChange);
        }

        let mut steps = Vec::with_capacity(versions.len());
        for version in versions {
            let supported = set
                .get(version)
                .map(|m| m.supports(direction))
                .unwrap_or(false);
            if !supported {
                return Err(StrataError::MissingScript { version, direction });
            }

            let record_after = match direction {
                Direction::Up => version,
                Direction::Down => set.previous(version),
            };
            steps.push(PlannedStep {
                version,
                direction,
                record_after,
            });
        }

        let to = steps.last().map(|s| s.record_after).unwrap_or(current);

        Ok(Self {
            direction,
            from: current,
            to,
            steps,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Versions in `(current, upper]`, ascending.
fn pending(set: &MigrationSet, current: Version, upper: Option<Version>) -> Vec<Version> {
    set.iter()
        .map(|m| m.version)
        .filter(|v| *v > current && upper.map_or(true, |u| *v <= u))
        .collect()
}

/// Versions in `(lower, current]`, descending.
fn applied(set: &MigrationSet, current: Version, lower: Version) -> Vec<Version> {
    set.iter()
        .rev()
        .map(|m| m.version)
        .filter(|v| *v <= current && *v > lower)
        .collect()
}
