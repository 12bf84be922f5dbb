//! Conditions: flags to test and results to run when they pass

use crate::action::Action;
use crate::context::MapContext;
use crate::flag::Flag;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use vmf::EntityId;

/// How the flags of a condition combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// How often a result may fire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OneShot {
    /// Every time the condition passes
    #[default]
    None,
    /// Once per instance; dropped after it has fired for all of them
    Instance,
    /// Once per run; every copy in every condition is dropped after firing
    Global,
}

/// A result together with its firing record
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub action: Action,
    pub scope: OneShot,
    /// Instances an `Instance`-scoped result already fired for
    pub(crate) fired: HashSet<EntityId>,
}

impl Slot {
    pub fn new(action: Action, scope: OneShot) -> Self {
        Slot {
            action,
            scope,
            fired: HashSet::new(),
        }
    }

    /// Number of instances this slot fired for
    pub fn fired_count(&self) -> usize {
        self.fired.len()
    }
}

/// A rule from the conditions list
///
/// Conditions are run in ascending priority; ties keep their load order.
/// A condition with no results left is removed from the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    flags: Vec<Flag>,
    combinator: Combinator,
    pub(crate) results: Vec<Slot>,
    pub(crate) else_results: Vec<Slot>,
    priority: i32,
    /// Where the condition was loaded from, for log context
    source: Option<String>,
    pub(crate) ended: bool,
}

impl Condition {
    pub fn new() -> Self {
        Condition::default()
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn results(&self) -> &[Slot] {
        &self.results
    }

    pub fn else_results(&self) -> &[Slot] {
        &self.else_results
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    /// Add a flag (builder pattern)
    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.push(flag);
        self
    }

    /// Add a result run when the flags pass (builder pattern)
    pub fn then(mut self, action: Action, scope: OneShot) -> Self {
        self.results.push(Slot::new(action, scope));
        self
    }

    /// Add a result run when the flags fail (builder pattern)
    pub fn otherwise(mut self, action: Action, scope: OneShot) -> Self {
        self.else_results.push(Slot::new(action, scope));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_combinator(mut self, combinator: Combinator) -> Self {
        self.combinator = combinator;
        self
    }

    pub(crate) fn push_result(&mut self, slot: Slot) {
        self.results.push(slot);
    }

    pub(crate) fn push_else(&mut self, slot: Slot) {
        self.else_results.push(slot);
    }

    pub(crate) fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub(crate) fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    pub(crate) fn set_combinator(&mut self, combinator: Combinator) {
        self.combinator = combinator;
    }

    pub(crate) fn push_flag(&mut self, flag: Flag) {
        self.flags.push(flag);
    }

    /// Test the flags against an instance; no flags always passes
    pub fn passes(&self, ctx: &MapContext, inst: EntityId) -> bool {
        match self.combinator {
            Combinator::And => self.flags.iter().all(|f| f.test(ctx, inst)),
            Combinator::Or => self.flags.is_empty() || self.flags.iter().any(|f| f.test(ctx, inst)),
        }
    }

    /// True once nothing is left to run
    pub fn is_exhausted(&self) -> bool {
        self.ended || (self.results.is_empty() && self.else_results.is_empty())
    }

    /// Remove every slot holding an equal result, here and in nested results
    ///
    /// Returns how many slots were removed.
    pub(crate) fn forget(&mut self, fired: &Action) -> usize {
        let mut removed = 0;
        for list in [&mut self.results, &mut self.else_results] {
            let before = list.len();
            list.retain(|slot| slot.action != *fired);
            removed += before - list.len();
            removed += list.iter_mut().map(|slot| slot.action.forget(fired)).sum::<usize>();
        }
        removed
    }
}
