//! Rule engine: runs every condition against every instance

use crate::action::{Action, Flow};
use crate::condition::{Condition, OneShot, Slot};
use crate::context::MapContext;
use crate::error::Result;
use crate::registry::RuleRegistry;
use crate::transaction::RuleTx;
use tracing::{debug, debug_span, info};
use vmf::{EntityId, Keyvalue};

/// Ordered list of conditions and the loop that runs them
///
/// Instances form the outer loop. For each instance, every condition that
/// still has results is tested once, in ascending priority. There is no
/// repeat pass, so a result only sees edits made by earlier conditions or
/// by earlier instances.
#[derive(Debug, Default)]
pub struct RuleEngine {
    conditions: Vec<Condition>,
}

impl RuleEngine {
    pub fn new() -> Self {
        RuleEngine::default()
    }

    pub fn add(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    /// Parse and add the conditions of a rules file, returning how many were kept
    pub fn load(&mut self, reg: &RuleRegistry, blocks: &[Keyvalue], source: &str) -> Result<usize> {
        let parsed = reg.parse_rules(blocks, source)?;
        let count = parsed.len();
        self.conditions.extend(parsed);
        debug!(count, source, "Loaded conditions");
        Ok(count)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Run all conditions over the map
    ///
    /// Instances added by results are not visited in this run. Afterwards,
    /// instances left with a blank file are removed from the map.
    pub fn run(&mut self, ctx: &mut MapContext) -> Result<RuleTx> {
        ctx.scan_files();
        let instances = ctx.instances();
        let mut tx = RuleTx::new(instances.len());

        self.conditions.sort_by_key(Condition::priority);
        self.conditions.retain(|c| !c.is_exhausted());
        info!(
            conditions = self.conditions.len(),
            instances = instances.len(),
            "Running conditions"
        );

        for &inst in &instances {
            if self.conditions.is_empty() {
                break;
            }
            if ctx.vmf.entity(inst).inert {
                continue;
            }
            for idx in 0..self.conditions.len() {
                let cond = &mut self.conditions[idx];
                if !cond.is_exhausted() {
                    let span = debug_span!("condition", source = cond.source().unwrap_or("?"));
                    let _enter = span.enter();
                    if run_condition(cond, ctx, inst, &mut tx)? == Flow::EndCondition {
                        cond.ended = true;
                    }
                }
                let fired = tx.take_pending();
                for action in &fired {
                    let removed: usize = self.conditions.iter_mut().map(|c| c.forget(action)).sum();
                    debug!(result = action.name(), removed, "Global result fired");
                }
            }
            self.conditions.retain(|c| !c.is_exhausted());
        }

        remove_blank_instances(ctx);
        info!(results = tx.changes().len(), "Conditions finished");
        Ok(tx)
    }
}

/// Test a condition and run the matching result list
fn run_condition(cond: &mut Condition, ctx: &mut MapContext, inst: EntityId, tx: &mut RuleTx) -> Result<Flow> {
    let source = cond.source().map(str::to_string);
    let slots = if cond.passes(ctx, inst) {
        &mut cond.results
    } else {
        &mut cond.else_results
    };
    run_slots(slots, ctx, inst, tx, source.as_deref())
}

fn run_slots(
    slots: &mut Vec<Slot>,
    ctx: &mut MapContext,
    inst: EntityId,
    tx: &mut RuleTx,
    source: Option<&str>,
) -> Result<Flow> {
    let mut idx = 0;
    while idx < slots.len() {
        let slot = &mut slots[idx];
        match slot.scope {
            OneShot::Instance if slot.fired.contains(&inst) => {
                idx += 1;
                continue;
            }
            OneShot::Global if tx.has_fired(&slot.action) => {
                slots.remove(idx);
                continue;
            }
            _ => {}
        }

        let flow = run_action(&mut slot.action, ctx, inst, tx, source)?;
        if flow == Flow::Skipped {
            idx += 1;
            continue;
        }
        tx.record(inst, source, &slot.action);
        let spent = match slot.scope {
            OneShot::None => false,
            OneShot::Instance => {
                slot.fired.insert(inst);
                slot.fired.len() >= tx.instance_count()
            }
            OneShot::Global => {
                tx.fire_global(&slot.action);
                true
            }
        };
        if spent {
            slots.remove(idx);
        } else {
            idx += 1;
        }
        if flow != Flow::Continue {
            return Ok(flow);
        }
    }
    Ok(Flow::Continue)
}

fn run_action(
    action: &mut Action,
    ctx: &mut MapContext,
    inst: EntityId,
    tx: &mut RuleTx,
    source: Option<&str>,
) -> Result<Flow> {
    match action {
        Action::SkipInstance => Ok(Flow::SkipInstance),
        Action::EndCondition => Ok(Flow::EndCondition),
        Action::Condition(sub) => run_condition(sub, ctx, inst, tx),
        Action::Random(choice) => match choice.pick(ctx, inst) {
            Some(group) => match choice.choices.get_mut(group) {
                Some(slots) => run_slots(slots, ctx, inst, tx, source),
                None => Ok(Flow::Continue),
            },
            None => Ok(Flow::Continue),
        },
        other => {
            let applied = other.apply(ctx, inst)?;
            Ok(if applied { Flow::Continue } else { Flow::Skipped })
        }
    }
}

/// Drop instances whose file was blanked by a result
fn remove_blank_instances(ctx: &mut MapContext) {
    let blank: Vec<EntityId> = ctx
        .instances()
        .into_iter()
        .filter(|id| matches!(ctx.vmf.entity(*id).file().trim(), "" | ".vmf"))
        .collect();
    for id in blank {
        debug!(name = ctx.vmf.entity(id).targetname(), "Removing blank instance");
        match ctx.connections.item_for_entity(id) {
            Some(item) => ctx.connections.remove_item(item, &mut ctx.vmf),
            None => ctx.vmf.mark_inert(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::Flag;
    use vmf::{Entity, Vmf};
    use world::InstanceLocs;

    fn map(files: &[&str]) -> MapContext {
        let mut vmf = Vmf::new();
        for (i, file) in files.iter().enumerate() {
            let mut ent = Entity::new("func_instance");
            ent.set("targetname", format!("inst_{i}"));
            ent.set("file", *file);
            vmf.add_entity(ent);
        }
        MapContext::new(vmf)
    }

    fn file(ctx: &MapContext, idx: usize) -> &str {
        ctx.vmf.entity(ctx.instances()[idx]).file()
    }

    #[test]
    fn test_empty_flags_run_for_every_instance() {
        let mut ctx = map(&["a.vmf", "b.vmf"]);
        let mut engine = RuleEngine::new();
        engine.add(Condition::new().then(Action::Suffix("x".into()), OneShot::None));
        let tx = engine.run(&mut ctx).unwrap();
        assert_eq!(tx.count("Suffix"), 2);
        assert_eq!(file(&ctx, 0), "a_x.vmf");
        assert_eq!(file(&ctx, 1), "b_x.vmf");
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_priority_order() {
        let mut ctx = map(&["a.vmf"]);
        let mut engine = RuleEngine::new();
        engine.add(
            Condition::new()
                .with_priority(10)
                .then(Action::Suffix("late".into()), OneShot::None),
        );
        engine.add(
            Condition::new()
                .with_priority(-10)
                .then(Action::Suffix("early".into()), OneShot::None),
        );
        engine.run(&mut ctx).unwrap();
        assert_eq!(file(&ctx, 0), "a_early_late.vmf");
    }

    #[test]
    fn test_else_results() {
        let mut ctx = map(&["a.vmf", "b.vmf"]);
        let mut engine = RuleEngine::new();
        engine.add(
            Condition::new()
                .with_flag(Flag::Instance("a.vmf".into()))
                .then(Action::Suffix("yes".into()), OneShot::None)
                .otherwise(Action::Suffix("no".into()), OneShot::None),
        );
        engine.run(&mut ctx).unwrap();
        assert_eq!(file(&ctx, 0), "a_yes.vmf");
        assert_eq!(file(&ctx, 1), "b_no.vmf");
    }

    #[test]
    fn test_global_result_fires_once_across_conditions() {
        let mut ctx = map(&["a.vmf", "b.vmf", "c.vmf"]);
        let global = Action::SetHas(vec!["seen".into()]);
        let mut engine = RuleEngine::new();
        engine.add(
            Condition::new()
                .then(global.clone(), OneShot::Global)
                .then(Action::Nop, OneShot::None),
        );
        engine.add(Condition::new().then(global.clone(), OneShot::Global));
        let tx = engine.run(&mut ctx).unwrap();
        assert_eq!(tx.count("SetHas"), 1);
        assert!(ctx.settings.has_attr("seen"));
        // The second condition had nothing else and was pruned
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.conditions()[0].results().len(), 1);
    }

    #[test]
    fn test_instance_one_shot_prunes_after_every_instance() {
        let mut ctx = map(&["a.vmf", "b.vmf"]);
        let mut engine = RuleEngine::new();
        engine.add(Condition::new().then(Action::Suffix("once".into()), OneShot::Instance));
        let tx = engine.run(&mut ctx).unwrap();
        assert_eq!(tx.count("Suffix"), 2);
        assert_eq!(file(&ctx, 1), "b_once.vmf");
        assert!(engine.is_empty());
    }

    #[test]
    fn test_skip_and_end() {
        let mut ctx = map(&["a.vmf", "b.vmf"]);
        let mut engine = RuleEngine::new();
        engine.add(
            Condition::new()
                .then(Action::SkipInstance, OneShot::None)
                .then(Action::Suffix("never".into()), OneShot::None),
        );
        engine.add(
            Condition::new()
                .then(Action::Suffix("first".into()), OneShot::None)
                .then(Action::EndCondition, OneShot::None),
        );
        engine.run(&mut ctx).unwrap();
        assert_eq!(file(&ctx, 0), "a_first.vmf");
        assert_eq!(file(&ctx, 1), "b.vmf");
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let mut ctx = map(&["a.vmf"]);
        let locs = InstanceLocs::new();
        ctx.locs = locs;
        let mut engine = RuleEngine::new();
        engine.add(Condition::new().then(Action::ChangeInstance("<ITEM_MISSING>".into()), OneShot::None));
        let tx = engine.run(&mut ctx).unwrap();
        assert_eq!(file(&ctx, 0), "a.vmf");
        assert_eq!(tx.count("ChangeInstance"), 0);
    }

    #[test]
    fn test_skipped_global_is_not_spent() {
        let mut ctx = map(&["a.vmf", "b.vmf"]);
        let missing = Action::AddGlobal(crate::action::GlobalInstance {
            file: "<ITEM_MISSING>".into(),
            name: "@missing".into(),
            position: None,
            angles: "0 0 0".into(),
            allow_multiple: false,
        });
        let mut engine = RuleEngine::new();
        engine.add(
            Condition::new()
                .then(missing.clone(), OneShot::Global)
                .then(Action::Suffix("seen".into()), OneShot::None),
        );
        engine.add(Condition::new().then(missing.clone(), OneShot::Global));
        let tx = engine.run(&mut ctx).unwrap();

        assert_eq!(tx.count("AddGlobal"), 0);
        assert_eq!(tx.count("Suffix"), 2);
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.conditions()[0].results()[0].action, missing);
        assert_eq!(ctx.instances().len(), 2);
    }

    #[test]
    fn test_skipped_instance_result_is_not_marked_fired() {
        let mut ctx = map(&["a.vmf"]);
        let mut engine = RuleEngine::new();
        engine.add(Condition::new().then(Action::ChangeInstance("<ITEM_MISSING>".into()), OneShot::Instance));
        engine.run(&mut ctx).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.conditions()[0].results()[0].fired_count(), 0);
    }

    #[test]
    fn test_blank_instances_are_removed() {
        let mut ctx = map(&["a.vmf", "b.vmf"]);
        let mut engine = RuleEngine::new();
        engine.add(
            Condition::new()
                .with_flag(Flag::Instance("b.vmf".into()))
                .then(Action::ChangeInstance("".into()), OneShot::None),
        );
        engine.run(&mut ctx).unwrap();
        assert_eq!(ctx.instances().len(), 1);
        assert_eq!(file(&ctx, 0), "a.vmf");
    }

    #[test]
    fn test_unknown_template_is_fatal() {
        let mut ctx = map(&["a.vmf"]);
        let mut engine = RuleEngine::new();
        engine.add(Condition::new().then(
            Action::TemplateBrush(crate::action::TemplatePlacement {
                id: "MISSING".into(),
                offset: glam::DVec3::ZERO,
                mode: world::TemplateMode::Default,
            }),
            OneShot::None,
        ));
        let err = engine.run(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("MISSING"));
    }
}
