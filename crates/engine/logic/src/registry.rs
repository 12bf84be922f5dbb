//! Name tables for flags and results, and the condition block parser
//!
//! Names are matched case-insensitively. Every flag and result is parsed
//! into its typed form up front, so an unknown name fails the whole load
//! before any instance is touched.

use crate::action::{self, Action};
use crate::condition::{Combinator, Condition, OneShot, Slot};
use crate::error::{Error, Result};
use crate::flag::{self, Flag};
use std::collections::HashMap;
use tracing::{debug, warn};
use vmf::Keyvalue;

/// Parses one flag block or leaf
pub type FlagParser = fn(&RuleRegistry, &Keyvalue) -> Result<Flag>;

/// Parses one result block or leaf
pub type ActionParser = fn(&RuleRegistry, &Keyvalue) -> Result<Action>;

/// Registered flags and results
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    flags: HashMap<String, FlagParser>,
    actions: HashMap<String, ActionParser>,
    /// Alias to canonical result name, both lowercase
    canonical: HashMap<String, String>,
    /// One-shot scopes overriding the defaults, by canonical name
    scopes: HashMap<String, OneShot>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistry {
    /// A registry holding every built-in flag and result
    pub fn new() -> Self {
        let mut reg = RuleRegistry {
            flags: HashMap::new(),
            actions: HashMap::new(),
            canonical: HashMap::new(),
            scopes: HashMap::new(),
        };

        reg.register_flag(&["AND"], flag::parse_and);
        reg.register_flag(&["OR"], flag::parse_or);
        reg.register_flag(&["NOT"], flag::parse_not);
        reg.register_flag(&["XOR"], flag::parse_xor);
        reg.register_flag(&["NOR"], flag::parse_nor);
        reg.register_flag(&["NAND"], flag::parse_nand);
        reg.register_flag(&["Instance"], flag::parse_instance);
        reg.register_flag(&["InstFlag", "InstPart"], flag::parse_inst_flag);
        reg.register_flag(&["HasInst", "HasInstance"], flag::parse_has_inst);
        reg.register_flag(&["InstVar"], flag::parse_instvar);
        reg.register_flag(&["StyleVar"], flag::parse_style_var);
        reg.register_flag(&["Has"], flag::parse_has);
        reg.register_flag(&["GameMode"], flag::parse_game_mode);
        reg.register_flag(&["IsPreview"], flag::parse_is_preview);
        reg.register_flag(&["OffsetDist"], flag::parse_offset_dist);
        reg.register_flag(&["Random"], flag::parse_random);
        reg.register_flag(&["HasTile"], flag::parse_has_tile);
        reg.register_flag(&["Collides"], flag::parse_collides);
        reg.register_flag(&["Debug"], flag::parse_debug);
        reg.register_flag(&["Always"], flag::parse_always);
        reg.register_flag(&["Never"], flag::parse_never);

        reg.register_action(&["ChangeInstance", "Rename"], action::parse_change_instance);
        reg.register_action(&["Suffix"], action::parse_suffix);
        reg.register_action(&["SetKey"], action::parse_set_key);
        reg.register_action(&["SetInstVar"], action::parse_set_inst_var);
        reg.register_action(&["AddInstVar"], action::parse_add_inst_var);
        reg.register_action(&["MapInstVar"], action::parse_map_inst_var);
        reg.register_action(&["ClearOutputs"], action::parse_clear_outputs);
        reg.register_action(&["AddOverlay", "OverlayInst"], action::parse_add_overlay);
        reg.register_action(&["AddGlobal"], action::parse_add_global);
        reg.register_action(&["Variant"], action::parse_variant);
        reg.register_action(&["RandomNum"], action::parse_random_num);
        reg.register_action(&["Random"], action::parse_random);
        reg.register_action(&["AddOutput", "CustOutput"], action::parse_add_output);
        reg.register_action(&["ChangeIoType"], action::parse_change_io);
        reg.register_action(&["SetTile", "SetTiles"], action::parse_set_tile);
        reg.register_action(&["TemplateBrush"], action::parse_template_brush);
        reg.register_action(&["Collide"], action::parse_collide);
        reg.register_action(&["SetStyleVar"], action::parse_set_style_var);
        reg.register_action(&["SetHas"], action::parse_set_has);
        reg.register_action(&["SetOption"], action::parse_set_option);
        reg.register_action(&["Debug"], action::parse_debug);
        reg.register_action(&["Nop"], action::parse_nop);
        reg.register_action(&["SkipInstance"], action::parse_skip_instance);
        reg.register_action(&["EndCondition"], action::parse_end_condition);
        reg.register_action(&["Condition"], action::parse_sub_condition);
        reg
    }

    /// Register a flag under one or more names, replacing earlier entries
    pub fn register_flag(&mut self, names: &[&str], parser: FlagParser) {
        for name in names {
            self.flags.insert(name.to_ascii_lowercase(), parser);
        }
    }

    /// Register a result; the first name is the one scopes are set by
    pub fn register_action(&mut self, names: &[&str], parser: ActionParser) {
        let Some(first) = names.first() else {
            return;
        };
        let canonical = first.to_ascii_lowercase();
        for name in names {
            let key = name.to_ascii_lowercase();
            self.actions.insert(key.clone(), parser);
            self.canonical.insert(key, canonical.clone());
        }
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.contains_key(&name.trim().to_ascii_lowercase())
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(&name.trim().to_ascii_lowercase())
    }

    /// Override the one-shot scope of a result and all its aliases
    pub fn set_scope(&mut self, name: &str, scope: OneShot) -> Result<()> {
        let canonical = self
            .canonical
            .get(&name.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnknownAction(name.to_string()))?;
        debug!(result = %canonical, ?scope, "Overriding one-shot scope");
        self.scopes.insert(canonical, scope);
        Ok(())
    }

    /// Builder form of [`RuleRegistry::set_scope`]
    pub fn with_scope(mut self, name: &str, scope: OneShot) -> Result<Self> {
        self.set_scope(name, scope)?;
        Ok(self)
    }

    /// Scope used for a result parsed from `name`
    fn scope_for(&self, name: &str, action: &Action) -> OneShot {
        self.canonical
            .get(name)
            .and_then(|c| self.scopes.get(c))
            .copied()
            .unwrap_or_else(|| default_scope(action))
    }

    /// Parse a flag, handling the `!Name` and `"flag" "Name value"` forms
    pub fn parse_flag(&self, kv: &Keyvalue) -> Result<Flag> {
        let name = kv.name().trim();
        if let Some(rest) = name.strip_prefix('!') {
            let mut inner = kv.clone();
            inner.set_name(rest);
            return Ok(Flag::Not(vec![self.parse_flag(&inner)?]));
        }
        if name.eq_ignore_ascii_case("flag") && !kv.has_children() {
            let text = kv.value().trim();
            let (flag_name, value) = text.split_once(' ').unwrap_or((text, ""));
            return self.parse_flag(&Keyvalue::leaf(flag_name, value.trim()));
        }
        let parser = self
            .flags
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownFlag(name.to_string()))?;
        parser(self, kv)
    }

    pub fn parse_action(&self, kv: &Keyvalue) -> Result<Action> {
        let name = kv.name().trim();
        let parser = self
            .actions
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownAction(name.to_string()))?;
        parser(self, kv)
    }

    /// Parse a result along with its one-shot scope
    pub fn parse_slot(&self, kv: &Keyvalue) -> Result<Slot> {
        let action = self.parse_action(kv)?;
        let scope = self.scope_for(&kv.name().trim().to_ascii_lowercase(), &action);
        Ok(Slot::new(action, scope))
    }

    fn nested(&self, kv: &Keyvalue) -> Result<Slot> {
        let cond = self.parse_condition(kv)?;
        Ok(Slot::new(Action::Condition(Box::new(cond)), OneShot::None))
    }

    /// Parse one `Condition` block
    pub fn parse_condition(&self, kv: &Keyvalue) -> Result<Condition> {
        let mut cond = Condition::new();
        for child in kv.children() {
            let key = child.name().trim().to_ascii_lowercase();
            match key.as_str() {
                "result" | "results" => {
                    for res in child.children() {
                        cond.push_result(self.parse_slot(res)?);
                    }
                }
                "else" | "elseresult" | "elseresults" => {
                    for res in child.children() {
                        cond.push_else(self.parse_slot(res)?);
                    }
                }
                "condition" => cond.push_result(self.nested(child)?),
                "elsecondition" => cond.push_else(self.nested(child)?),
                "__src__" => cond.set_source(child.value()),
                "priority" => {
                    let priority = child.value().trim().parse().map_err(|_| {
                        Error::InvalidCondition(format!("bad priority \"{}\"", child.value()))
                    })?;
                    cond.set_priority(priority);
                }
                "type" => {
                    let combinator = match child.value().trim().to_ascii_lowercase().as_str() {
                        "and" => Combinator::And,
                        "or" => Combinator::Or,
                        other => {
                            return Err(Error::InvalidCondition(format!("unknown type \"{other}\"")))
                        }
                    };
                    cond.set_combinator(combinator);
                }
                _ => cond.push_flag(self.parse_flag(child)?),
            }
        }
        Ok(cond)
    }

    /// Parse every condition in a rules file
    ///
    /// Conditions may sit at the top level or inside a `Conditions` block.
    /// Conditions without any results are dropped.
    pub fn parse_rules(&self, blocks: &[Keyvalue], source: &str) -> Result<Vec<Condition>> {
        let mut found = Vec::new();
        for block in blocks {
            if block.is("conditions") {
                found.extend(block.children().iter().filter(|c| c.is("condition")));
            } else if block.is("condition") {
                found.push(block);
            } else {
                warn!("Unknown block \"{}\" in {source}", block.name());
            }
        }

        let mut conditions = Vec::with_capacity(found.len());
        for kv in found {
            let mut cond = self.parse_condition(kv)?;
            if cond.source().is_none() {
                cond.set_source(source);
            }
            if cond.is_exhausted() {
                debug!("Dropping condition without results from {source}");
                continue;
            }
            conditions.push(cond);
        }
        Ok(conditions)
    }
}

/// One-shot scope of a result when nothing overrides it
pub fn default_scope(action: &Action) -> OneShot {
    match action {
        Action::ChangeInstance(_) => OneShot::Instance,
        Action::AddGlobal(_)
        | Action::SetStyleVar { .. }
        | Action::SetHas(_)
        | Action::SetOption(_) => OneShot::Global,
        _ => OneShot::None,
    }
}
