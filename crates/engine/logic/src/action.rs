//! Condition results: typed edits applied to the current instance
//!
//! Parsing turns each result block into an [`Action`] once, so running a
//! rule never looks a name up again. `Random` and `Condition` hold further
//! result slots and are driven by the engine; everything else is applied
//! here.

use crate::condition::{Condition, Slot};
use crate::context::MapContext;
use crate::error::{Error, Result};
use crate::flag::{parse_chance, resolve_value, vec_key};
use crate::registry::RuleRegistry;
use glam::DVec3;
use rand::Rng;
use tracing::{debug, warn};
use vmf::{format_num, Entity, EntityId, Keyvalue, Output};
use world::{choose, parse_weights, BBox, CollideType, Connection, TemplateMode, TileState, TileType};

/// `AddInstVar`: suffix the file with a fixup value, or a value looked up from it
#[derive(Debug, Clone, PartialEq)]
pub enum InstVarSuffix {
    Value(String),
    Lookup {
        variable: String,
        table: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub file: String,
    /// Local offset from the base instance
    pub offset: DVec3,
    pub angles: Option<String>,
    pub copy_fixup: bool,
    /// Fixups set on the overlay; `$var` values copy from the base
    pub fixups: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalInstance {
    pub file: String,
    pub name: String,
    pub position: Option<DVec3>,
    pub angles: String,
    pub allow_multiple: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub output: String,
    /// Local name; blank fires at the instance itself
    pub target: String,
    pub input: String,
    pub params: String,
    pub delay: f64,
    pub times: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IoChange {
    pub inputs: Vec<(String, String)>,
    pub outputs: Vec<(String, String)>,
    /// Local name of an item that takes over this instance's inputs
    pub retarget: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileEdit {
    /// Local position of the top-left sub-tile, relative to the voxel floor
    pub offset: DVec3,
    pub rows: Vec<String>,
    pub force: bool,
    pub chance: f64,
    pub seed: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePlacement {
    pub id: String,
    pub offset: DVec3,
    pub mode: TemplateMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollideBox {
    pub min: DVec3,
    pub max: DVec3,
    pub contents: CollideType,
    pub tags: Vec<String>,
}

/// `Random`: run one weighted group of results
#[derive(Debug, Clone, PartialEq)]
pub struct RandomChoice {
    pub chance: i64,
    /// Index table from [`parse_weights`]
    pub weights: Vec<usize>,
    pub seed: String,
    pub choices: Vec<Vec<Slot>>,
}

impl RandomChoice {
    /// Pick the group to run for an instance, if the chance roll passes
    pub fn pick(&self, ctx: &MapContext, inst: EntityId) -> Option<usize> {
        let ent = ctx.vmf.entity(inst);
        let seed = resolve_value(&ent.fixups, &self.seed);
        let mut rng = ctx.rand.seed(b"rand_res").entity(ent).str(&seed).rng();
        if rng.random_range(0..100) >= self.chance {
            return None;
        }
        choose(&mut rng, &self.weights).copied()
    }
}

/// What running a result asks of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop running this condition for the current instance
    SkipInstance,
    /// Stop running this condition for good
    EndCondition,
    /// The result could not apply here; it is neither recorded nor spent
    Skipped,
}

/// A result with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ChangeInstance(String),
    Suffix(String),
    /// Raw `key value`, split after fixup substitution
    SetKey(String),
    SetInstVar { var: String, value: String },
    AddInstVar(InstVarSuffix),
    MapInstVar {
        input: String,
        output: String,
        table: Vec<(String, String)>,
    },
    ClearOutputs,
    AddOverlay(Overlay),
    AddGlobal(GlobalInstance),
    Variant { weights: Vec<usize>, seed: String },
    RandomNum {
        var: String,
        min: f64,
        max: f64,
        decimal: bool,
        seed: String,
    },
    Random(RandomChoice),
    AddOutput(OutputSpec),
    ChangeIoType(IoChange),
    SetTile(TileEdit),
    TemplateBrush(TemplatePlacement),
    Collide(Vec<CollideBox>),
    SetStyleVar {
        set_true: Vec<String>,
        set_false: Vec<String>,
    },
    SetHas(Vec<String>),
    SetOption(Vec<(String, String)>),
    Debug(String),
    Nop,
    SkipInstance,
    EndCondition,
    Condition(Box<Condition>),
}

impl Action {
    /// Canonical name, used for one-shot scopes and logging
    pub fn name(&self) -> &'static str {
        match self {
            Action::ChangeInstance(_) => "ChangeInstance",
            Action::Suffix(_) => "Suffix",
            Action::SetKey(_) => "SetKey",
            Action::SetInstVar { .. } => "SetInstVar",
            Action::AddInstVar(_) => "AddInstVar",
            Action::MapInstVar { .. } => "MapInstVar",
            Action::ClearOutputs => "ClearOutputs",
            Action::AddOverlay(_) => "AddOverlay",
            Action::AddGlobal(_) => "AddGlobal",
            Action::Variant { .. } => "Variant",
            Action::RandomNum { .. } => "RandomNum",
            Action::Random(_) => "Random",
            Action::AddOutput(_) => "AddOutput",
            Action::ChangeIoType(_) => "ChangeIoType",
            Action::SetTile(_) => "SetTile",
            Action::TemplateBrush(_) => "TemplateBrush",
            Action::Collide(_) => "Collide",
            Action::SetStyleVar { .. } => "SetStyleVar",
            Action::SetHas(_) => "SetHas",
            Action::SetOption(_) => "SetOption",
            Action::Debug(_) => "Debug",
            Action::Nop => "Nop",
            Action::SkipInstance => "SkipInstance",
            Action::EndCondition => "EndCondition",
            Action::Condition(_) => "Condition",
        }
    }

    /// Drop every nested slot holding `fired`
    pub(crate) fn forget(&mut self, fired: &Action) -> usize {
        match self {
            Action::Condition(cond) => cond.forget(fired),
            Action::Random(random) => random
                .choices
                .iter_mut()
                .map(|group| {
                    let before = group.len();
                    group.retain(|slot| slot.action != *fired);
                    let nested: usize = group.iter_mut().map(|s| s.action.forget(fired)).sum();
                    before - group.len() + nested
                })
                .sum(),
            _ => 0,
        }
    }

    /// Apply a result that only touches the map
    ///
    /// Returns false when the result was skipped because an instance file
    /// it names could not be found. Results that steer the engine
    /// (`Random`, `Condition`, `SkipInstance`, `EndCondition`) do nothing
    /// here.
    pub fn apply(&self, ctx: &mut MapContext, inst: EntityId) -> Result<bool> {
        match self {
            Action::ChangeInstance(selector) => {
                let Some(file) = ctx.locs.resolve_one(selector) else {
                    warn!("No instance file for \"{selector}\", not changing {}", ctx.vmf.entity(inst).targetname());
                    return Ok(false);
                };
                ctx.note_file(&file);
                ctx.vmf.entity_mut(inst).set("file", file);
            }
            Action::Suffix(suffix) => {
                let suffix = ctx.vmf.entity(inst).fixups.substitute(suffix);
                if !suffix.is_empty() {
                    ctx.add_suffix(inst, &format!("_{suffix}"));
                }
            }
            Action::SetKey(raw) => {
                let text = ctx.vmf.entity(inst).fixups.substitute(raw);
                match text.split_once(' ') {
                    Some((key, value)) => ctx.vmf.entity_mut(inst).set(key, value),
                    None => ctx.vmf.entity_mut(inst).set(&text, ""),
                }
            }
            Action::SetInstVar { var, value } => {
                let ent = ctx.vmf.entity_mut(inst);
                let value = ent.fixups.substitute(value);
                ent.fixups.set(var, value);
            }
            Action::AddInstVar(suffix) => {
                let fixups = &ctx.vmf.entity(inst).fixups;
                let chosen = match suffix {
                    InstVarSuffix::Value(text) => Some(fixups.substitute(text)),
                    InstVarSuffix::Lookup { variable, table } => {
                        let current = fixups.get_or(variable, "");
                        table
                            .iter()
                            .find(|(key, _)| fixups.substitute(key) == current)
                            .map(|(_, value)| fixups.substitute(value))
                    }
                };
                if let Some(text) = chosen.filter(|s| !s.is_empty()) {
                    ctx.add_suffix(inst, &format!("_{text}"));
                }
            }
            Action::MapInstVar {
                input,
                output,
                table,
            } => {
                let ent = ctx.vmf.entity_mut(inst);
                let current = ent.fixups.get_or(input, "").to_string();
                if let Some((_, value)) = table.iter().find(|(k, _)| *k == current) {
                    ent.fixups.set(output, value.clone());
                }
            }
            Action::ClearOutputs => {
                ctx.vmf.entity_mut(inst).outputs.clear();
                if let Some(item) = ctx.connections.item_for_entity(inst) {
                    let links: Vec<_> = ctx.connections.outputs(item).map(|(l, _)| l).collect();
                    for link in links {
                        ctx.connections.remove_link(link);
                    }
                }
            }
            Action::AddOverlay(overlay) => return Ok(add_overlay(ctx, inst, overlay)),
            Action::AddGlobal(global) => return Ok(add_global(ctx, global)),
            Action::Variant { weights, seed } => {
                let ent = ctx.vmf.entity(inst);
                let mut rng = ctx.rand.seed(b"variant").entity(ent).str(seed).rng();
                let choice = choose(&mut rng, weights).copied().unwrap_or(0);
                ctx.add_suffix(inst, &format!("_var{}", choice + 1));
            }
            Action::RandomNum {
                var,
                min,
                max,
                decimal,
                seed,
            } => {
                let ent = ctx.vmf.entity(inst);
                let seed = resolve_value(&ent.fixups, seed);
                let mut rng = ctx.rand.seed(b"rand_num").entity(ent).str(&seed).rng();
                let (lo, hi) = (min.min(*max), min.max(*max));
                let value = if *decimal {
                    if lo == hi {
                        format_num(lo)
                    } else {
                        format_num(rng.random_range(lo..hi))
                    }
                } else {
                    let (lo, hi) = (lo.round() as i64, hi.round() as i64);
                    rng.random_range(lo..=hi).to_string()
                };
                ctx.vmf.entity_mut(inst).fixups.set(var, value);
            }
            Action::AddOutput(spec) => add_output(ctx, inst, spec),
            Action::ChangeIoType(change) => change_io(ctx, inst, change),
            Action::SetTile(edit) => set_tiles(ctx, inst, edit),
            Action::TemplateBrush(placement) => {
                let ent = ctx.vmf.entity(inst);
                let orient = ent.orientation();
                let origin = orient.rotate(placement.offset) + ent.origin();
                let owner = ent.targetname().to_string();
                let placed = ctx.templates.instance(
                    &mut ctx.vmf,
                    &placement.id,
                    origin,
                    &orient,
                    &owner,
                    placement.mode,
                )?;
                debug!(
                    template = %placement.id,
                    entities = placed.entities.len(),
                    brushes = placed.world_brushes.len(),
                    "Placed template"
                );
            }
            Action::Collide(boxes) => {
                let ent = ctx.vmf.entity(inst);
                let orient = ent.orientation();
                let origin = ent.origin();
                let owner = ent.targetname().to_string();
                let placed: Vec<BBox> = boxes
                    .iter()
                    .map(|b| {
                        BBox::oriented(b.min, b.max, origin, &orient, b.contents)
                            .with_tags(b.tags.iter().cloned())
                    })
                    .collect();
                ctx.collisions.add(&owner, placed);
            }
            Action::SetStyleVar {
                set_true,
                set_false,
            } => {
                for name in set_true {
                    ctx.settings.set_style_var(name, true);
                }
                for name in set_false {
                    ctx.settings.set_style_var(name, false);
                }
            }
            Action::SetHas(names) => {
                for name in names {
                    ctx.settings.set_has_attr(name);
                }
            }
            Action::SetOption(values) => {
                for (name, value) in values {
                    ctx.settings.set_option(name, value.clone());
                }
            }
            Action::Debug(text) => {
                let ent = ctx.vmf.entity(inst);
                warn!("Debug: {} ({} \"{}\")", text, ent.targetname(), ent.file());
            }
            Action::Nop
            | Action::SkipInstance
            | Action::EndCondition
            | Action::Random(_)
            | Action::Condition(_) => {}
        }
        Ok(true)
    }
}

fn add_overlay(ctx: &mut MapContext, inst: EntityId, overlay: &Overlay) -> bool {
    let base = ctx.vmf.entity(inst);
    let selector = resolve_value(&base.fixups, &overlay.file);
    let Some(file) = ctx.locs.resolve_one(&selector).filter(|f| !f.is_empty()) else {
        warn!("Bad filename for \"{selector}\" when adding overlay");
        return false;
    };
    let orient = base.orientation();
    let mut ent = Entity::new("func_instance");
    ent.set("targetname", base.targetname());
    ent.set("file", file.as_str());
    ent.set(
        "angles",
        overlay.angles.clone().unwrap_or_else(|| base.get_or("angles", "0 0 0").to_string()),
    );
    ent.set_origin(orient.rotate(overlay.offset) + base.origin());
    ent.set("fixup_style", base.get_or("fixup_style", "0"));
    if overlay.copy_fixup && overlay.fixups.is_empty() {
        ent.fixups = base.fixups.clone();
    }
    for (name, value) in &overlay.fixups {
        let value = if value.starts_with('$') {
            base.fixups.get_or(value, "").to_string()
        } else {
            value.clone()
        };
        ent.fixups.set(name, value);
    }
    ctx.note_file(&file);
    ctx.vmf.add_entity(ent);
    true
}

fn add_global(ctx: &mut MapContext, global: &GlobalInstance) -> bool {
    let Some(file) = ctx.locs.resolve_one(&global.file).filter(|f| !f.is_empty()) else {
        warn!("Bad filename for \"{}\" when adding a global instance", global.file);
        return false;
    };
    if !ctx.claim_global(&file) && !global.allow_multiple {
        debug!(%file, "Global instance already placed");
        return true;
    }
    let mut ent = Entity::new("func_instance");
    ent.set("targetname", global.name.as_str());
    ent.set("file", file.as_str());
    ent.set("angles", global.angles.as_str());
    ent.set_origin(global.position.unwrap_or(ctx.settings.global_ents_loc));
    ent.set("fixup_style", "0");
    ctx.note_file(&file);
    let id = ctx.vmf.add_entity(ent);
    if global.name.is_empty() {
        let ent = ctx.vmf.entity_mut(id);
        let unique = format!("inst_{}", ent.id);
        ent.set("targetname", unique);
    }
    true
}

fn add_output(ctx: &mut MapContext, inst: EntityId, spec: &OutputSpec) {
    let ent = ctx.vmf.entity(inst);
    let output = ent.fixups.substitute(&spec.output);
    let input = ent.fixups.substitute(&spec.input);
    let params = ent.fixups.substitute(&spec.params);
    let target = if spec.target.is_empty() {
        ent.targetname().to_string()
    } else {
        let raw = ent.fixups.substitute(&spec.target);
        ctx.local_name(inst, &raw)
    };

    let from = ctx.connections.item_for_entity(inst);
    let to = ctx.connections.item_by_name(&target);
    match (from, to) {
        (Some(from), Some(to)) => {
            let mut conn = Connection::new(from, to, output, input).with_delay(spec.delay);
            conn.params = params;
            conn.times = spec.times;
            ctx.connections.add_link(conn);
        }
        _ => {
            let mut out = Output::new(output, target, input)
                .with_params(params)
                .with_delay(spec.delay);
            out.times = spec.times;
            ctx.vmf.entity_mut(inst).outputs.push(out);
        }
    }
}

fn change_io(ctx: &mut MapContext, inst: EntityId, change: &IoChange) {
    let Some(item) = ctx.connections.item_for_entity(inst) else {
        warn!("{} has no connections to change", ctx.vmf.entity(inst).targetname());
        return;
    };
    for (from, to) in &change.inputs {
        ctx.connections.rename_inputs(item, from, to);
    }
    for (from, to) in &change.outputs {
        ctx.connections.rename_outputs(item, from, to);
    }
    if let Some(target) = &change.retarget {
        let raw = resolve_value(&ctx.vmf.entity(inst).fixups, target);
        let name = ctx.local_name(inst, &raw);
        match ctx.connections.item_by_name(&name) {
            Some(new_item) => ctx.connections.retarget(item, new_item),
            None => warn!("Cannot retarget inputs to unknown item \"{name}\""),
        }
    }
}

fn tile_for_char(c: char) -> Option<TileType> {
    let ty = match c {
        'W' => TileType::White,
        'w' => TileType::White4x4,
        'B' => TileType::Black,
        'b' => TileType::Black4x4,
        'g' => TileType::GooSide,
        'n' => TileType::Nodraw,
        '.' => TileType::Void,
        'x' => TileType::CutoutBroken,
        'o' => TileType::CutoutPartial,
        _ => return None,
    };
    Some(ty)
}

fn set_tiles(ctx: &mut MapContext, inst: EntityId, edit: &TileEdit) {
    let ent = ctx.vmf.entity(inst);
    let orient = ent.orientation();
    let origin = ent.origin();
    let normal = orient.rotate(DVec3::Z);
    let mut rng = (edit.chance < 100.0).then(|| ctx.rand.seed(b"tile").entity(ent).str(&edit.seed).rng());

    for (y, row) in edit.rows.iter().enumerate() {
        for (x, c) in row.chars().enumerate() {
            if c == '_' || c == ' ' {
                continue;
            }
            if let Some(rng) = rng.as_mut() {
                if rng.random_range(0.0..100.0) > edit.chance {
                    continue;
                }
            }
            let local = edit.offset + DVec3::new(32.0 * x as f64, -32.0 * y as f64, -64.0);
            let pos = orient.rotate(local) + origin;
            if c == 'i' {
                let found = ctx
                    .tiles
                    .find_tile(pos, normal)
                    .and_then(|addr| ctx.tiles.get(addr).map(|s| (addr, s)));
                match found {
                    Some((addr, state)) => {
                        ctx.tiles
                            .set(addr, TileState::with_variant(state.ty.inverted(), state.variant));
                    }
                    None => warn!("Expected tile, but none found: {pos}, {normal}"),
                }
                continue;
            }
            match tile_for_char(c) {
                Some(ty) => {
                    ctx.tiles.edit_quarter_tile(pos, normal, ty, edit.force);
                }
                None => warn!("Unknown tile type \"{c}\""),
            }
        }
    }
}

// Parsers, registered by name in the registry

fn pairs(kv: &Keyvalue) -> Vec<(String, String)> {
    kv.children()
        .iter()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect()
}

fn leaf_or<'a>(kv: &'a Keyvalue, key: &str) -> &'a str {
    if kv.has_children() {
        kv.get_or(key, "")
    } else {
        kv.value()
    }
}

pub(crate) fn parse_change_instance(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    Ok(Action::ChangeInstance(kv.value().to_string()))
}

pub(crate) fn parse_suffix(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    Ok(Action::Suffix(kv.value().to_string()))
}

pub(crate) fn parse_set_key(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    if kv.value().trim().is_empty() {
        return Err(Error::invalid_action("SetKey", "expected \"key value\""));
    }
    Ok(Action::SetKey(kv.value().to_string()))
}

pub(crate) fn parse_set_inst_var(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let text = kv.value().trim();
    let (var, value) = text.split_once(' ').unwrap_or((text, ""));
    if var.is_empty() {
        return Err(Error::invalid_action("SetInstVar", "expected \"$var value\""));
    }
    Ok(Action::SetInstVar {
        var: var.to_string(),
        value: value.to_string(),
    })
}

pub(crate) fn parse_add_inst_var(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    if !kv.has_children() {
        return Ok(Action::AddInstVar(InstVarSuffix::Value(kv.value().to_string())));
    }
    Ok(Action::AddInstVar(InstVarSuffix::Lookup {
        variable: kv.get_or("variable", "").to_string(),
        table: kv
            .children()
            .iter()
            .filter(|c| !c.is("variable"))
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect(),
    }))
}

pub(crate) fn parse_map_inst_var(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let Some((first, rest)) = kv.children().split_first() else {
        return Err(Error::invalid_action("MapInstVar", "expected \"$in\" \"$out\" then a value table"));
    };
    Ok(Action::MapInstVar {
        input: first.name().to_string(),
        output: first.value().to_string(),
        table: rest
            .iter()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect(),
    })
}

pub(crate) fn parse_clear_outputs(_: &RuleRegistry, _: &Keyvalue) -> Result<Action> {
    Ok(Action::ClearOutputs)
}

pub(crate) fn parse_add_overlay(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let fixups = kv
        .find("fixup")
        .or_else(|| kv.find("localfixup"))
        .map(pairs)
        .unwrap_or_default();
    Ok(Action::AddOverlay(Overlay {
        file: leaf_or(kv, "file").to_string(),
        offset: vec_key(kv, "offset", DVec3::ZERO)?,
        angles: kv.get("angles").map(str::to_string),
        copy_fixup: kv.get_bool("copy_fixup", true),
        fixups,
    }))
}

pub(crate) fn parse_add_global(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let position = match kv.get("position") {
        Some(_) => Some(vec_key(kv, "position", DVec3::ZERO)?),
        None => None,
    };
    Ok(Action::AddGlobal(GlobalInstance {
        file: leaf_or(kv, "file").to_string(),
        name: kv.get_or("name", "").to_string(),
        position,
        angles: kv.get_or("angles", "0 0 0").to_string(),
        allow_multiple: kv.get_bool("allow_multiple", false),
    }))
}

pub(crate) fn parse_variant(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let (count_text, weights, seed) = if kv.has_children() {
        (kv.get_or("number", ""), kv.get_or("weights", ""), kv.get_or("seed", ""))
    } else {
        (kv.value(), "", "")
    };
    let count: usize = count_text
        .trim()
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| Error::invalid_action("Variant", format!("invalid variant count \"{count_text}\"")))?;
    Ok(Action::Variant {
        weights: parse_weights(count, weights),
        seed: seed.to_string(),
    })
}

pub(crate) fn parse_random_num(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let decimal = kv.get_bool("decimal", false);
    Ok(Action::RandomNum {
        var: kv.get_or("resultvar", "$random").to_string(),
        min: kv.get_float("min", 0.0),
        max: kv.get_float("max", 1.0),
        decimal,
        seed: kv.get_or("seed", "").to_string(),
    })
}

pub(crate) fn parse_random(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let mut chance = 100;
    let mut weights = "";
    let mut seed = String::new();
    let mut choices = Vec::new();
    for child in kv.children() {
        if child.is("chance") {
            chance = parse_chance(child.value())?;
        } else if child.is("weights") {
            weights = child.value();
        } else if child.is("seed") {
            seed = child.value().to_string();
        } else if child.is("group") {
            let group = child
                .children()
                .iter()
                .map(|sub| reg.parse_slot(sub))
                .collect::<Result<Vec<_>>>()?;
            choices.push(group);
        } else {
            choices.push(vec![reg.parse_slot(child)?]);
        }
    }
    Ok(Action::Random(RandomChoice {
        chance,
        weights: parse_weights(choices.len(), weights),
        seed,
        choices,
    }))
}

pub(crate) fn parse_add_output(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let output = kv.get_or("output", "");
    let input = kv.get_or("input", "");
    if output.is_empty() || input.is_empty() {
        return Err(Error::invalid_action("AddOutput", "needs both an output and an input"));
    }
    let times = if kv.get_bool("only_once", false) {
        1
    } else {
        kv.get_int("times", -1) as i32
    };
    Ok(Action::AddOutput(OutputSpec {
        output: output.to_string(),
        target: kv.get_or("target", "").to_string(),
        input: input.to_string(),
        params: kv.get("parm").or_else(|| kv.get("params")).unwrap_or("").to_string(),
        delay: kv.get_float("delay", 0.0),
        times,
    }))
}

pub(crate) fn parse_change_io(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    Ok(Action::ChangeIoType(IoChange {
        inputs: kv.find("inputs").map(pairs).unwrap_or_default(),
        outputs: kv.find("outputs").map(pairs).unwrap_or_default(),
        retarget: kv.get("retarget").map(str::to_string),
    }))
}

pub(crate) fn parse_set_tile(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let rows: Vec<String> = kv
        .children()
        .iter()
        .filter(|c| c.is("tile") || c.is("tiles"))
        .map(|c| c.value().to_string())
        .collect();
    if rows.is_empty() {
        return Err(Error::invalid_action("SetTile", "no \"tile\" rows"));
    }
    let chance = kv.get_or("chance", "100");
    Ok(Action::SetTile(TileEdit {
        offset: vec_key(kv, "offset", DVec3::new(-48.0, 48.0, 0.0))?,
        rows,
        force: kv.get_bool("force", false),
        chance: chance.trim().trim_end_matches('%').trim().parse().unwrap_or(100.0),
        seed: kv.get_or("seed", "").to_string(),
    }))
}

pub(crate) fn parse_template_brush(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let id = leaf_or(kv, "id").trim();
    if id.is_empty() {
        return Err(Error::invalid_action("TemplateBrush", "no template id"));
    }
    let mode_text = kv.get_or("mode", "");
    let mode = TemplateMode::parse(mode_text)
        .ok_or_else(|| Error::invalid_action("TemplateBrush", format!("unknown mode \"{mode_text}\"")))?;
    Ok(Action::TemplateBrush(TemplatePlacement {
        id: id.to_string(),
        offset: vec_key(kv, "offset", DVec3::ZERO)?,
        mode,
    }))
}

fn collide_box(kv: &Keyvalue) -> Result<CollideBox> {
    let contents = CollideType::parse(kv.get_or("type", "solid"))
        .map_err(|reason| Error::invalid_action("Collide", reason))?;
    Ok(CollideBox {
        min: vec_key(kv, "min", DVec3::splat(-64.0))?,
        max: vec_key(kv, "max", DVec3::splat(64.0))?,
        contents,
        tags: kv
            .get_or("tags", "")
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    })
}

pub(crate) fn parse_collide(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let nested: Vec<&Keyvalue> = kv.find_all("bbox").collect();
    let boxes = if nested.is_empty() {
        vec![collide_box(kv)?]
    } else {
        nested.into_iter().map(collide_box).collect::<Result<_>>()?
    };
    Ok(Action::Collide(boxes))
}

pub(crate) fn parse_set_style_var(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let names = |key: &str| {
        kv.children()
            .iter()
            .filter(|c| c.is(key))
            .map(|c| c.value().to_string())
            .collect::<Vec<_>>()
    };
    Ok(Action::SetStyleVar {
        set_true: names("settrue"),
        set_false: names("setfalse"),
    })
}

pub(crate) fn parse_set_has(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    let names = if kv.has_children() {
        kv.children().iter().map(|c| c.name().to_string()).collect()
    } else {
        vec![kv.value().to_string()]
    };
    Ok(Action::SetHas(names))
}

pub(crate) fn parse_set_option(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    Ok(Action::SetOption(pairs(kv)))
}

pub(crate) fn parse_debug(_: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    Ok(Action::Debug(kv.value().to_string()))
}

pub(crate) fn parse_nop(_: &RuleRegistry, _: &Keyvalue) -> Result<Action> {
    Ok(Action::Nop)
}

pub(crate) fn parse_skip_instance(_: &RuleRegistry, _: &Keyvalue) -> Result<Action> {
    Ok(Action::SkipInstance)
}

pub(crate) fn parse_end_condition(_: &RuleRegistry, _: &Keyvalue) -> Result<Action> {
    Ok(Action::EndCondition)
}

pub(crate) fn parse_sub_condition(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Action> {
    Ok(Action::Condition(Box::new(reg.parse_condition(kv)?)))
}

