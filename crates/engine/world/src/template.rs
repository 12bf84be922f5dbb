//! Template System
//!
//! Templates are named groups of brushes and entities authored around the
//! world origin in a separate map. Placing one copies everything, moves it
//! into the owner's frame and gives every name a suffix unique to that
//! placement, so two copies of the same template never share a name.
//!
//! Template maps use two brush entity classes, `bee2_template_world` and
//! `bee2_template_detail`, plus any other entity, each tagged with a
//! `template_id` key.

use crate::error::{Error, Result};
use glam::DVec3;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use vmf::{Entity, EntityId, IdAllocator, Orientation, Solid, Vmf};

const WORLD_CLASS: &str = "bee2_template_world";
const DETAIL_CLASS: &str = "bee2_template_detail";

/// Where placed brushes end up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemplateMode {
    /// World brushes into the world, detail brushes into a `func_detail`
    #[default]
    Default,
    /// Everything merged into world geometry
    World,
    /// Everything in one `func_detail`
    Detail,
}

impl TemplateMode {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Some(TemplateMode::Default),
            "world" => Some(TemplateMode::World),
            "detail" => Some(TemplateMode::Detail),
            _ => None,
        }
    }
}

/// One loaded template
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub id: String,
    pub world: Vec<Solid>,
    pub detail: Vec<Solid>,
    pub entities: Vec<Entity>,
}

/// What a placement added to the map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placed {
    /// Ids of brushes added to the world
    pub world_brushes: Vec<u32>,
    /// The `func_detail` holding detail brushes, if there were any
    pub detail: Option<EntityId>,
    pub entities: Vec<EntityId>,
}

/// Every template available to the compile
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    templates: HashMap<String, Template>,
    placements: u32,
}

/// Names that are shared map-wide and must survive placement
fn is_global_name(name: &str) -> bool {
    name.starts_with('@') || name.starts_with('!')
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(&id.to_ascii_uppercase())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Load every template from a parsed template map
    ///
    /// Several entities in one map may share an id and are combined. An id
    /// already loaded from an earlier map is an error.
    pub fn load(&mut self, map: &Vmf) -> Result<()> {
        let mut found: HashMap<String, Template> = HashMap::new();
        for (_, ent) in map.entities() {
            let Some(raw_id) = ent.get("template_id").filter(|id| !id.trim().is_empty()) else {
                if ent.is_class(WORLD_CLASS) || ent.is_class(DETAIL_CLASS) {
                    warn!(entity = ent.id, "Template brush without a template_id");
                }
                continue;
            };
            let id = raw_id.trim().to_ascii_uppercase();
            let template = found.entry(id.clone()).or_insert_with(|| Template {
                id,
                ..Default::default()
            });
            if ent.is_class(WORLD_CLASS) {
                template.world.extend(ent.solids.iter().cloned());
            } else if ent.is_class(DETAIL_CLASS) {
                template.detail.extend(ent.solids.iter().cloned());
            } else {
                let mut copy = ent.clone();
                copy.remove("template_id");
                template.entities.push(copy);
            }
        }
        for (id, template) in found {
            if self.templates.contains_key(&id) {
                return Err(Error::DuplicateTemplate(id));
            }
            debug!(
                template = %id,
                world = template.world.len(),
                detail = template.detail.len(),
                entities = template.entities.len(),
                "Loaded template"
            );
            self.templates.insert(id, template);
        }
        info!(templates = self.templates.len(), "Template library ready");
        Ok(())
    }

    /// Copy a template into the map at `origin`, rotated by `orient`
    ///
    /// `owner` is the name of the instance placing it. Entity names get a
    /// suffix built from the owner and a placement counter; outputs between
    /// template entities follow the renaming. `@` and `!` names are left
    /// alone.
    pub fn instance(
        &mut self,
        vmf: &mut Vmf,
        name: &str,
        origin: DVec3,
        orient: &Orientation,
        owner: &str,
        mode: TemplateMode,
    ) -> Result<Placed> {
        let template = self
            .templates
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| Error::UnknownTemplate(name.to_string()))?;
        self.placements += 1;
        let suffix = if owner.is_empty() {
            format!("_{}", self.placements)
        } else {
            format!("-{owner}_{}", self.placements)
        };

        let mut side_ids = HashMap::new();
        let place = |solids: &[Solid], ids: &mut IdAllocator, side_ids: &mut HashMap<u32, u32>| {
            solids
                .iter()
                .map(|solid| {
                    let mut copy = solid.clone();
                    copy.localise(origin, orient);
                    renumber(&mut copy, ids, side_ids);
                    copy
                })
                .collect::<Vec<_>>()
        };
        let mut world = place(&template.world, &mut vmf.ids, &mut side_ids);
        let mut detail = place(&template.detail, &mut vmf.ids, &mut side_ids);
        match mode {
            TemplateMode::Default => {}
            TemplateMode::World => world.append(&mut detail),
            TemplateMode::Detail => {
                world.append(&mut detail);
                detail = std::mem::take(&mut world);
            }
        }

        let local_names: HashSet<String> = template
            .entities
            .iter()
            .map(|e| e.targetname().to_ascii_lowercase())
            .filter(|n| !n.is_empty() && !is_global_name(n))
            .collect();
        let rename = |target: &str| {
            if local_names.contains(&target.to_ascii_lowercase()) {
                format!("{target}{suffix}")
            } else {
                target.to_string()
            }
        };

        let mut placed = Placed {
            world_brushes: world.iter().map(|s| s.id).collect(),
            ..Default::default()
        };
        for brush in world {
            vmf.add_brush(brush);
        }
        if !detail.is_empty() {
            let mut func_detail = Entity::new("func_detail");
            func_detail.solids = detail;
            placed.detail = Some(vmf.add_entity(func_detail));
        }

        for ent in &template.entities {
            let mut copy = ent.clone();
            copy.id = 0;
            if copy.get("origin").is_some() {
                copy.set_origin(orient.rotate(ent.origin()) + origin);
            }
            copy.set_orientation(&ent.orientation().then(orient));
            for solid in &mut copy.solids {
                solid.localise(origin, orient);
                renumber(solid, &mut vmf.ids, &mut side_ids);
            }
            let targetname = copy.targetname().to_string();
            if !targetname.is_empty() {
                copy.set("targetname", rename(&targetname));
            }
            for output in &mut copy.outputs {
                output.target = rename(&output.target);
            }
            if let Some(sides) = copy.get("sides") {
                let remapped = sides
                    .split_whitespace()
                    .filter_map(|s| s.parse::<u32>().ok())
                    .filter_map(|s| side_ids.get(&s))
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                copy.set("sides", remapped);
            }
            placed.entities.push(vmf.add_entity(copy));
        }
        debug!(template = %template.id, owner, %origin, "Placed template");
        Ok(placed)
    }
}

/// Give a placed brush fresh ids, recording old to new face ids
fn renumber(solid: &mut Solid, ids: &mut IdAllocator, side_ids: &mut HashMap<u32, u32>) {
    solid.id = ids.solid();
    for side in &mut solid.sides {
        let new_id = ids.side();
        side_ids.insert(side.id, new_id);
        side.id = new_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmf::Output;

    fn library() -> TemplateLibrary {
        let mut src = Vmf::new();
        let mut ids = IdAllocator::default();

        let mut world = Entity::new(WORLD_CLASS);
        world.set("template_id", "door_frame");
        world.solids.push(Solid::cuboid(&mut ids, DVec3::ZERO, DVec3::splat(16.0), "metal/frame"));
        src.add_entity(world);

        let mut detail = Entity::new(DETAIL_CLASS);
        detail.set("template_id", "DOOR_FRAME");
        detail.solids.push(Solid::cuboid(
            &mut ids,
            DVec3::new(32.0, 0.0, 0.0),
            DVec3::new(48.0, 16.0, 16.0),
            "metal/trim",
        ));
        src.add_entity(detail);

        let mut light = Entity::new("light_spot");
        light.set("template_id", "door_frame");
        light.set("targetname", "lamp");
        light.set("origin", "64 0 0");
        light.set("angles", "0 0 0");
        light.outputs.push(Output::new("OnUser1", "relay", "Trigger"));
        src.add_entity(light);

        let mut relay = Entity::new("logic_relay");
        relay.set("template_id", "door_frame");
        relay.set("targetname", "relay");
        relay.set("origin", "0 64 0");
        relay.outputs.push(Output::new("OnTrigger", "@exit_door", "Open"));
        relay.outputs.push(Output::new("OnTrigger", "!activator", "Kill"));
        src.add_entity(relay);

        let mut lib = TemplateLibrary::new();
        lib.load(&src).unwrap();
        lib
    }

    #[test]
    fn test_load_groups_by_id() {
        let lib = library();
        assert_eq!(lib.len(), 1);
        let t = lib.get("Door_Frame").unwrap();
        assert_eq!(t.world.len(), 1);
        assert_eq!(t.detail.len(), 1);
        assert_eq!(t.entities.len(), 2);
        assert!(t.entities.iter().all(|e| e.get("template_id").is_none()));
    }

    #[test]
    fn test_duplicate_across_maps() {
        let mut lib = library();
        let mut again = Vmf::new();
        let mut ent = Entity::new("info_target");
        ent.set("template_id", "door_frame");
        again.add_entity(ent);
        assert!(matches!(lib.load(&again), Err(Error::DuplicateTemplate(id)) if id == "DOOR_FRAME"));
    }

    #[test]
    fn test_unknown_template() {
        let mut lib = library();
        let mut vmf = Vmf::new();
        let err = lib
            .instance(&mut vmf, "missing", DVec3::ZERO, &Orientation::IDENTITY, "", TemplateMode::Default)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTemplate(name) if name == "missing"));
    }

    #[test]
    fn test_instance_renames_and_rewires() {
        let mut lib = library();
        let mut vmf = Vmf::new();
        let placed = lib
            .instance(
                &mut vmf,
                "door_frame",
                DVec3::new(256.0, 0.0, 0.0),
                &Orientation::IDENTITY,
                "door_1",
                TemplateMode::Default,
            )
            .unwrap();
        assert_eq!(placed.world_brushes.len(), 1);
        assert_eq!(vmf.world.solids.len(), 1);
        let detail = vmf.entity(placed.detail.unwrap());
        assert!(detail.is_class("func_detail"));

        let lamp = vmf.entity(placed.entities[0]);
        assert_eq!(lamp.targetname(), "lamp-door_1_1");
        assert_eq!(lamp.origin(), DVec3::new(320.0, 0.0, 0.0));
        assert_eq!(lamp.outputs[0].target, "relay-door_1_1");

        let relay = vmf.entity(placed.entities[1]);
        assert_eq!(relay.outputs[0].target, "@exit_door");
        assert_eq!(relay.outputs[1].target, "!activator");
    }

    #[test]
    fn test_modes() {
        let mut lib = library();
        let mut vmf = Vmf::new();
        let id = Orientation::IDENTITY;
        let placed = lib
            .instance(&mut vmf, "door_frame", DVec3::ZERO, &id, "a", TemplateMode::World)
            .unwrap();
        assert_eq!(placed.world_brushes.len(), 2);
        assert!(placed.detail.is_none());

        let placed = lib
            .instance(&mut vmf, "door_frame", DVec3::ZERO, &id, "b", TemplateMode::Detail)
            .unwrap();
        assert!(placed.world_brushes.is_empty());
        assert_eq!(vmf.entity(placed.detail.unwrap()).solids.len(), 2);
    }

    #[test]
    fn test_rotated_placement() {
        let mut lib = library();
        let mut vmf = Vmf::new();
        let orient = Orientation::from_angles(0.0, 90.0, 0.0);
        let placed = lib
            .instance(&mut vmf, "door_frame", DVec3::new(0.0, 0.0, 64.0), &orient, "r", TemplateMode::Default)
            .unwrap();
        let lamp = vmf.entity(placed.entities[0]);
        assert_eq!(lamp.origin(), DVec3::new(0.0, 64.0, 64.0));
        assert_eq!(lamp.get("angles"), Some("0 90 0"));

        let (min, max) = vmf.world.solids[0].bbox();
        assert_eq!(min, DVec3::new(-16.0, 0.0, 64.0));
        assert_eq!(max, DVec3::new(0.0, 16.0, 80.0));
    }
}
