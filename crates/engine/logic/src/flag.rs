//! Condition flags: typed tests evaluated against one instance

use crate::context::MapContext;
use crate::error::{Error, Result};
use crate::registry::RuleRegistry;
use glam::DVec3;
use rand::Rng;
use tracing::warn;
use vmf::{conv_bool, parse_vec, EntityId, Fixups, Keyvalue};
use world::{CollideType, TileType};

/// Comparison used by `InstVar` and `OffsetDist`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub fn parse(text: &str) -> Option<CompareOp> {
        let op = match text.trim() {
            "=" | "==" => CompareOp::Eq,
            "!=" | "<>" | "=/=" => CompareOp::Ne,
            "<" => CompareOp::Lt,
            ">" => CompareOp::Gt,
            "<=" | "=<" => CompareOp::Le,
            ">=" | "=>" => CompareOp::Ge,
            _ => return None,
        };
        Some(op)
    }

    pub fn apply<T: PartialOrd + ?Sized>(self, a: &T, b: &T) -> bool {
        match self {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Gt => a > b,
            CompareOp::Le => a <= b,
            CompareOp::Ge => a >= b,
        }
    }
}

/// A test on the current instance or the map as a whole
#[derive(Debug, Clone, PartialEq)]
pub enum Flag {
    /// Every sub-flag passes
    And(Vec<Flag>),
    /// At least one sub-flag passes
    Or(Vec<Flag>),
    /// Inverts exactly one sub-flag; any other count is false
    Not(Vec<Flag>),
    /// An odd number of sub-flags pass
    Xor(Vec<Flag>),
    Nor(Vec<Flag>),
    Nand(Vec<Flag>),

    /// Instance file is one of the files named by a selector
    Instance(String),
    /// Instance file contains the text
    InstFlag(String),
    /// Any instance in the map uses a file named by a selector
    HasInst(String),
    /// Fixup comparison, `$var op value` or a single boolean
    InstVar {
        lhs: String,
        op: String,
        rhs: Option<String>,
    },
    StyleVar(String),
    Has(String),
    GameMode(String),
    IsPreview(bool),
    /// Distance from the instance origin to its voxel centre
    OffsetDist { op: CompareOp, value: String },
    /// Passes for `chance` percent of instances
    Random { chance: i64, seed: String },
    /// Sub-tile at a local point has one of the types
    HasTile {
        offset: DVec3,
        normal: DVec3,
        types: Vec<TileType>,
    },
    /// Another item's collision volume overlaps a local box
    Collides {
        min: DVec3,
        max: DVec3,
        mask: CollideType,
    },
    /// Logs and passes
    Debug(String),
    Always,
    Never,
}

/// Substitute fixups, treating a bare unknown `$var` as blank
pub(crate) fn resolve_value(fixups: &Fixups, text: &str) -> String {
    let trimmed = text.trim();
    if let Some(name) = trimmed.strip_prefix('$') {
        if !name.contains(|c: char| c.is_whitespace()) && !fixups.contains(name) {
            return String::new();
        }
    }
    fixups.substitute(text)
}

impl Flag {
    /// Evaluate against an instance
    pub fn test(&self, ctx: &MapContext, inst: EntityId) -> bool {
        let ent = ctx.vmf.entity(inst);
        match self {
            Flag::And(subs) => subs.iter().all(|f| f.test(ctx, inst)),
            Flag::Or(subs) => subs.iter().any(|f| f.test(ctx, inst)),
            Flag::Not(subs) => match subs.as_slice() {
                [only] => !only.test(ctx, inst),
                _ => false,
            },
            Flag::Xor(subs) => subs.iter().filter(|f| f.test(ctx, inst)).count() % 2 == 1,
            Flag::Nor(subs) => !subs.iter().any(|f| f.test(ctx, inst)),
            Flag::Nand(subs) => !subs.iter().all(|f| f.test(ctx, inst)),

            Flag::Instance(selector) => ctx.locs.matches(selector, ent.file()),
            Flag::InstFlag(part) => ent
                .file()
                .to_ascii_lowercase()
                .contains(&part.to_ascii_lowercase()),
            Flag::HasInst(selector) => ctx.has_instance(selector),
            Flag::InstVar { lhs, op, rhs } => instvar(&ent.fixups, lhs, op, rhs.as_deref()),
            Flag::StyleVar(name) => ctx.settings.style_var(name),
            Flag::Has(name) => ctx.settings.has_attr(name),
            Flag::GameMode(mode) => ctx.settings.game_mode.eq_ignore_ascii_case(mode.trim()),
            Flag::IsPreview(value) => ctx.settings.is_preview == *value,
            Flag::OffsetDist { op, value } => {
                let origin = ent.origin();
                let centre = (origin / 128.0).floor() * 128.0 + 64.0;
                match resolve_value(&ent.fixups, value).trim().parse::<f64>() {
                    Ok(wanted) => op.apply(&origin.distance(centre), &wanted),
                    Err(_) => false,
                }
            }
            Flag::Random { chance, seed } => {
                let mut rng = ctx.rand.seed(b"rand_flag").entity(ent).str(seed).rng();
                rng.random_range(0..100) < *chance
            }
            Flag::HasTile {
                offset,
                normal,
                types,
            } => {
                let orient = ent.orientation();
                let pos = orient.rotate(*offset) + ent.origin();
                let norm = orient.rotate(*normal);
                ctx.tiles
                    .find_tile(pos, norm)
                    .and_then(|addr| ctx.tiles.get(addr))
                    .is_some_and(|state| types.contains(&state.ty))
            }
            Flag::Collides { min, max, mask } => {
                let orient = ent.orientation();
                let a = orient.rotate(*min) + ent.origin();
                let b = orient.rotate(*max) + ent.origin();
                let own = ent.targetname();
                ctx.collisions
                    .query(a, b, *mask)
                    .iter()
                    .any(|owner| !owner.eq_ignore_ascii_case(own))
            }
            Flag::Debug(text) => {
                warn!("Debug: {} ({})", text, ent.targetname());
                true
            }
            Flag::Always => true,
            Flag::Never => false,
        }
    }
}

fn instvar(fixups: &Fixups, lhs: &str, op: &str, rhs: Option<&str>) -> bool {
    let Some(rhs) = rhs else {
        return conv_bool(&fixups.substitute(lhs), false);
    };
    let op_text = fixups.substitute(op);
    let op = CompareOp::parse(&op_text).unwrap_or(CompareOp::Eq);
    let lhs = if !lhs.contains('$') && !rhs.contains('$') {
        warn!("Comparison \"{lhs} {op_text} {rhs}\" has no $var, assuming the first value");
        format!("${lhs}")
    } else {
        lhs.to_string()
    };
    let a = resolve_value(fixups, &lhs);
    let b = resolve_value(fixups, rhs);
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => op.apply(&x, &y),
        _ => op.apply(a.as_str(), b.as_str()),
    }
}

// Parsers, registered by name in the registry

fn children(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Vec<Flag>> {
    kv.children().iter().map(|child| reg.parse_flag(child)).collect()
}

pub(crate) fn parse_and(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::And(children(reg, kv)?))
}

pub(crate) fn parse_or(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Or(children(reg, kv)?))
}

pub(crate) fn parse_not(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    let subs = children(reg, kv)?;
    if subs.len() != 1 {
        warn!("NOT expects one flag, got {}", subs.len());
    }
    Ok(Flag::Not(subs))
}

pub(crate) fn parse_xor(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Xor(children(reg, kv)?))
}

pub(crate) fn parse_nor(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Nor(children(reg, kv)?))
}

pub(crate) fn parse_nand(reg: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Nand(children(reg, kv)?))
}

pub(crate) fn parse_instance(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Instance(kv.value().to_string()))
}

pub(crate) fn parse_inst_flag(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::InstFlag(kv.value().to_string()))
}

pub(crate) fn parse_has_inst(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::HasInst(kv.value().to_string()))
}

pub(crate) fn parse_instvar(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    let parts: Vec<&str> = kv.value().trim().splitn(3, ' ').collect();
    let flag = match parts.as_slice() {
        [lhs] => Flag::InstVar {
            lhs: lhs.to_string(),
            op: "==".to_string(),
            rhs: None,
        },
        [lhs, rhs] => Flag::InstVar {
            lhs: lhs.to_string(),
            op: "==".to_string(),
            rhs: Some(rhs.to_string()),
        },
        [lhs, op, rhs] => Flag::InstVar {
            lhs: lhs.to_string(),
            op: op.to_string(),
            rhs: Some(rhs.to_string()),
        },
        _ => return Err(Error::InvalidCondition("empty InstVar".into())),
    };
    Ok(flag)
}

pub(crate) fn parse_style_var(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::StyleVar(kv.value().trim().to_string()))
}

pub(crate) fn parse_has(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Has(kv.value().trim().to_string()))
}

pub(crate) fn parse_game_mode(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::GameMode(kv.value().trim().to_string()))
}

pub(crate) fn parse_is_preview(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::IsPreview(conv_bool(kv.value(), true)))
}

pub(crate) fn parse_offset_dist(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    let text = kv.value().trim();
    let (op, value) = match text.split_once(char::is_whitespace) {
        Some((op, value)) => (
            CompareOp::parse(op)
                .ok_or_else(|| Error::InvalidCondition(format!("bad OffsetDist operator \"{op}\"")))?,
            value.trim(),
        ),
        None => (CompareOp::Eq, text),
    };
    Ok(Flag::OffsetDist {
        op,
        value: value.to_string(),
    })
}

/// Percentage with an optional `%` sign
pub(crate) fn parse_chance(text: &str) -> Result<i64> {
    text.trim()
        .trim_end_matches('%')
        .trim()
        .parse()
        .map_err(|_| Error::InvalidCondition(format!("bad chance \"{text}\"")))
}

pub(crate) fn parse_random(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    if kv.has_children() {
        Ok(Flag::Random {
            chance: parse_chance(kv.get_or("chance", "100"))?,
            seed: kv.get_or("seed", "").to_string(),
        })
    } else {
        Ok(Flag::Random {
            chance: parse_chance(kv.value())?,
            seed: String::new(),
        })
    }
}

pub(crate) fn vec_key(kv: &Keyvalue, key: &str, default: DVec3) -> Result<DVec3> {
    match kv.get(key) {
        Some(text) if !text.trim().is_empty() => Ok(parse_vec(text)?),
        _ => Ok(default),
    }
}

fn tile_types(text: &str) -> Result<Vec<TileType>> {
    text.split([',', ' '])
        .filter(|t| !t.is_empty())
        .map(|t| {
            TileType::parse(t).ok_or_else(|| Error::InvalidCondition(format!("unknown tile type \"{t}\"")))
        })
        .collect()
}

pub(crate) fn parse_has_tile(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    let floor = DVec3::new(0.0, 0.0, -64.0);
    if !kv.has_children() {
        return Ok(Flag::HasTile {
            offset: floor,
            normal: DVec3::Z,
            types: tile_types(kv.value())?,
        });
    }
    Ok(Flag::HasTile {
        offset: vec_key(kv, "offset", floor)?,
        normal: vec_key(kv, "normal", DVec3::Z)?,
        types: tile_types(kv.get_or("type", ""))?,
    })
}

pub(crate) fn parse_collides(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    let mask = match kv.get("type") {
        Some(text) => CollideType::parse(text).map_err(Error::InvalidCondition)?,
        None => CollideType::EVERYTHING,
    };
    Ok(Flag::Collides {
        min: vec_key(kv, "min", DVec3::splat(-64.0))?,
        max: vec_key(kv, "max", DVec3::splat(64.0))?,
        mask,
    })
}

pub(crate) fn parse_debug(_: &RuleRegistry, kv: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Debug(kv.value().to_string()))
}

pub(crate) fn parse_always(_: &RuleRegistry, _: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Always)
}

pub(crate) fn parse_never(_: &RuleRegistry, _: &Keyvalue) -> Result<Flag> {
    Ok(Flag::Never)
}
