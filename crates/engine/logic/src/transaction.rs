//! Record of what a conditions run did

use crate::action::Action;
use serde::Serialize;
use vmf::EntityId;

/// One result that ran
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxChange {
    /// Instance the result ran for
    pub instance: EntityId,

    /// Source label of the condition, if it had one
    pub condition: Option<String>,

    /// Canonical result name
    pub action: &'static str,
}

/// Bookkeeping for a single conditions run
///
/// Collects every result that ran and tracks global one-shot results so
/// the engine can strip them from the remaining conditions.
#[derive(Debug, Default)]
pub struct RuleTx {
    /// Instances visited by the run
    instance_count: usize,

    /// Results in the order they ran
    changes: Vec<TxChange>,

    /// Global results that already fired
    fired_globals: Vec<Action>,

    /// Global results fired since the engine last pruned
    pending: Vec<Action>,
}

impl RuleTx {
    pub fn new(instance_count: usize) -> Self {
        RuleTx {
            instance_count,
            ..Default::default()
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count
    }

    pub fn changes(&self) -> &[TxChange] {
        &self.changes
    }

    /// Number of times a result with this name ran
    pub fn count(&self, action: &str) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    pub(crate) fn record(&mut self, instance: EntityId, condition: Option<&str>, action: &Action) {
        self.changes.push(TxChange {
            instance,
            condition: condition.map(str::to_string),
            action: action.name(),
        });
    }

    /// True if an equal global result already fired
    pub fn has_fired(&self, action: &Action) -> bool {
        self.fired_globals.contains(action)
    }

    /// Note a global result as fired
    pub(crate) fn fire_global(&mut self, action: &Action) {
        assert!(
            !self.has_fired(action),
            "global result {} fired twice",
            action.name()
        );
        self.fired_globals.push(action.clone());
        self.pending.push(action.clone());
    }

    /// Global results to remove from the remaining conditions
    pub(crate) fn take_pending(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending)
    }
}
