// Readiness barrier over the current roster.
//
// Each roster announcement starts a new generation: every unit in it begins
// not-ready and the barrier is `Collecting`. Ready reports flip individual
// units. The first report that completes the set moves the barrier to
// `Fired` and is the only one that returns `ReadyOutcome::BarrierFired`;
// the caller sends the single "ready" notification off that value.
//
// Membership is checked against the current roster only. A report naming a
// unit that is not in it is ignored and never counts toward the barrier.
// Reports carry no generation on the wire, so a late report for a unit
// that also appears in the new roster is accepted.

use std::collections::BTreeSet;

use sphero_relay_protocol::{ClientId, RosterGeneration, UnitDescriptor};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierState {
    Collecting,
    Fired,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnitRecord {
    pub descriptor: UnitDescriptor,
    pub ready: bool,
}

/// Result of one ready report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Recorded; other units are still outstanding.
    Pending,
    /// This report completed the roster. Notify exactly once.
    BarrierFired,
    /// The barrier already fired for this generation.
    AlreadyFired,
    /// The unit is not in the current roster (or there is no roster).
    UnknownUnit,
}

#[derive(Debug)]
struct Roster {
    generation: RosterGeneration,
    records: Vec<UnitRecord>,
    state: BarrierState,
}

#[derive(Debug, Default)]
pub struct ReadinessCoordinator {
    last_generation: RosterGeneration,
    roster: Option<Roster>,
}

impl ReadinessCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster wholesale and start a new generation. Duplicate
    /// ids keep their first descriptor.
    pub fn reset(&mut self, units: Vec<UnitDescriptor>) -> RosterGeneration {
        let generation = self.last_generation.next();
        self.last_generation = generation;

        let mut seen = BTreeSet::new();
        let mut records = Vec::with_capacity(units.len());
        for descriptor in units {
            if !seen.insert(descriptor.id.clone()) {
                warn!("roster {generation} lists {} twice; keeping the first", descriptor.id);
                continue;
            }
            records.push(UnitRecord {
                descriptor,
                ready: false,
            });
        }

        self.roster = Some(Roster {
            generation,
            records,
            state: BarrierState::Collecting,
        });
        generation
    }

    pub fn mark_ready(&mut self, unit: &ClientId) -> ReadyOutcome {
        let Some(roster) = self.roster.as_mut() else {
            warn!("ready report from {unit} before any roster; ignoring");
            return ReadyOutcome::UnknownUnit;
        };
        let Some(record) = roster.records.iter_mut().find(|r| &r.descriptor.id == unit) else {
            warn!("ready report from {unit}, not in roster {}; ignoring", roster.generation);
            return ReadyOutcome::UnknownUnit;
        };
        record.ready = true;

        if roster.state == BarrierState::Fired {
            return ReadyOutcome::AlreadyFired;
        }
        if roster.records.iter().all(|r| r.ready) {
            roster.state = BarrierState::Fired;
            ReadyOutcome::BarrierFired
        } else {
            ReadyOutcome::Pending
        }
    }

    pub fn has_roster(&self) -> bool {
        self.roster.is_some()
    }

    /// Current roster in announcement order.
    pub fn units(&self) -> Vec<UnitDescriptor> {
        self.roster
            .iter()
            .flat_map(|roster| roster.records.iter().map(|r| r.descriptor.clone()))
            .collect()
    }

    pub fn records(&self) -> &[UnitRecord] {
        match &self.roster {
            Some(roster) => &roster.records,
            None => &[],
        }
    }

    pub fn generation(&self) -> Option<RosterGeneration> {
        self.roster.as_ref().map(|roster| roster.generation)
    }

    pub fn state(&self) -> Option<BarrierState> {
        self.roster.as_ref().map(|roster| roster.state)
    }

    pub fn is_ready(&self, unit: &ClientId) -> bool {
        self.records()
            .iter()
            .any(|r| &r.descriptor.id == unit && r.ready)
    }
}
