//! Point and brush entities

use crate::error::{Error, Result};
use crate::fixup::{is_replace_key, Fixups};
use crate::keyvalues::Keyvalue;
use crate::math::{format_vec, parse_vec_or_zero, Orientation};
use crate::output::Output;
use crate::solid::Solid;
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Entity with ordered keyvalues, fixups, outputs and brushes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: u32,
    keys: Vec<(String, String)>,
    pub fixups: Fixups,
    /// Key index the `replaceNN` run is written back at
    fixup_slot: Option<usize>,
    pub outputs: Vec<Output>,
    pub solids: Vec<Solid>,
    /// Unrecognised child blocks (`editor`, `hidden`...), kept verbatim
    pub extra: Vec<Keyvalue>,
    had_connections: bool,
    /// Inert entities stay addressable but are left out of the output
    #[serde(skip)]
    pub inert: bool,
}

impl Entity {
    pub fn new(classname: &str) -> Self {
        let mut ent = Entity::default();
        ent.set("classname", classname);
        ent
    }

    /// Build from a parsed `entity` or `world` block
    pub fn from_keyvalue(kv: &Keyvalue) -> Result<Self> {
        if !kv.has_children() {
            return Err(Error::UnexpectedKind {
                name: kv.name().to_string(),
                expected: "block",
            });
        }
        let mut ent = Entity::default();
        for child in kv.children() {
            if child.has_children() {
                if child.is("solid") {
                    ent.solids.push(Solid::from_keyvalue(child)?);
                } else if child.is("connections") {
                    ent.had_connections = true;
                    for conn in child.children() {
                        match Output::parse(conn.name(), conn.value()) {
                            Some(out) => ent.outputs.push(out),
                            None => tracing::warn!(
                                "Dropping malformed output \"{}\" \"{}\"",
                                conn.name(),
                                conn.value()
                            ),
                        }
                    }
                } else {
                    ent.extra.push(child.clone());
                }
            } else if child.is("id") {
                ent.id = child.value().trim().parse().map_err(|_| Error::InvalidValue {
                    kind: "id",
                    value: child.value().to_string(),
                })?;
            } else if is_replace_key(child.name()) {
                if ent.fixup_slot.is_none() {
                    ent.fixup_slot = Some(ent.keys.len());
                }
                if let Some((name, value)) = Fixups::parse_replace(child.value()) {
                    ent.fixups.set(&name, value);
                }
            } else {
                ent.keys.push((child.name().to_string(), child.value().to_string()));
            }
        }
        Ok(ent)
    }

    /// Convert back into a block with the given name
    pub fn to_keyvalue(&self, block_name: &str) -> Keyvalue {
        let mut children = vec![Keyvalue::leaf("id", self.id.to_string())];
        let fixup_slot = self.fixup_slot.unwrap_or(self.keys.len()).min(self.keys.len());
        for (i, (k, v)) in self.keys.iter().enumerate() {
            if i == fixup_slot {
                self.push_fixups(&mut children);
            }
            children.push(Keyvalue::leaf(k.as_str(), v.as_str()));
        }
        if fixup_slot == self.keys.len() {
            self.push_fixups(&mut children);
        }
        if !self.outputs.is_empty() || self.had_connections {
            children.push(Keyvalue::block(
                "connections",
                self.outputs
                    .iter()
                    .map(|o| Keyvalue::leaf(o.output.as_str(), o.value()))
                    .collect(),
            ));
        }
        children.extend(self.solids.iter().map(Solid::to_keyvalue));
        children.extend(self.extra.iter().cloned());
        Keyvalue::block(block_name, children)
    }

    fn push_fixups(&self, children: &mut Vec<Keyvalue>) {
        for (k, v) in self.fixups.to_replace_keys() {
            children.push(Keyvalue::leaf(k, v));
        }
    }

    /// Case-insensitive key lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Set a key, keeping its position if it exists
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.keys.iter_mut().rev().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, v)) => *v = value,
            None => self.keys.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.keys.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.keys.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn classname(&self) -> &str {
        self.get_or("classname", "")
    }

    pub fn is_class(&self, classname: &str) -> bool {
        self.classname().eq_ignore_ascii_case(classname)
    }

    pub fn targetname(&self) -> &str {
        self.get_or("targetname", "")
    }

    /// Instance file for `func_instance` entities
    pub fn file(&self) -> &str {
        self.get_or("file", "")
    }

    pub fn origin(&self) -> DVec3 {
        parse_vec_or_zero(self.get_or("origin", ""))
    }

    pub fn set_origin(&mut self, origin: DVec3) {
        self.set("origin", format_vec(origin));
    }

    pub fn orientation(&self) -> Orientation {
        match self.get("angles") {
            Some(text) if !text.trim().is_empty() => Orientation::parse(text).unwrap_or_else(|e| {
                tracing::warn!("{e} on entity {}, using identity", self.id);
                Orientation::IDENTITY
            }),
            _ => Orientation::IDENTITY,
        }
    }

    pub fn set_orientation(&mut self, orient: &Orientation) {
        self.set("angles", orient.to_angles_str());
    }

    pub fn is_brush(&self) -> bool {
        !self.solids.is_empty()
    }

    /// Outputs that fire `output` (case-insensitive)
    pub fn outputs_named<'a>(&'a self, output: &'a str) -> impl Iterator<Item = &'a Output> + 'a {
        self.outputs
            .iter()
            .filter(move |o| o.output.eq_ignore_ascii_case(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyvalues::parse_keyvalues;

    const INSTANCE: &str = r#"
entity
{
	"id" "12"
	"classname" "func_instance"
	"targetname" "door_1"
	"angles" "0 90 0"
	"file" "instances/door.vmf"
	"replace01" "$start_open 1"
	"replace02" "$skin 0"
	"origin" "64 128 0"
	connections
	{
		"OnOpen" "relay,Trigger,,0,-1"
	}
	editor
	{
		"color" "220 30 220"
	}
}
"#;

    fn parse() -> Entity {
        let kvs = parse_keyvalues(INSTANCE).unwrap();
        Entity::from_keyvalue(&kvs[0]).unwrap()
    }

    #[test]
    fn test_parse_instance() {
        let ent = parse();
        assert_eq!(ent.id, 12);
        assert!(ent.is_class("FUNC_INSTANCE"));
        assert_eq!(ent.file(), "instances/door.vmf");
        assert_eq!(ent.fixups.get("start_open"), Some("1"));
        assert_eq!(ent.origin(), DVec3::new(64.0, 128.0, 0.0));
        assert_eq!(ent.orientation().forward(), DVec3::Y);
        assert_eq!(ent.outputs.len(), 1);
        assert_eq!(ent.extra.len(), 1);
    }

    #[test]
    fn test_round_trip_keeps_layout() {
        let kvs = parse_keyvalues(INSTANCE).unwrap();
        let ent = Entity::from_keyvalue(&kvs[0]).unwrap();
        assert_eq!(ent.to_keyvalue("entity"), kvs[0]);
    }

    #[test]
    fn test_new_fixups_land_in_original_slot() {
        let mut ent = parse();
        ent.fixups.set("extra", "x");
        let kv = ent.to_keyvalue("entity");
        let names: Vec<&str> = kv.children().iter().map(Keyvalue::name).collect();
        assert_eq!(
            &names[..9],
            &["id", "classname", "targetname", "angles", "file", "replace01", "replace02", "replace03", "origin"]
        );
    }
}
