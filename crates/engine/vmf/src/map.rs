//! Whole-map scene graph

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::keyvalues::{parse_keyvalues, serialize_keyvalues, Keyvalue};
use crate::solid::Solid;
use serde::{Deserialize, Serialize};

/// Index of an entity in the map arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub usize);

/// Hands out fresh entity, brush and face ids
///
/// Each kind has its own counter, starting above the largest id found in
/// the source map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdAllocator {
    next_entity: u32,
    next_solid: u32,
    next_side: u32,
}

impl IdAllocator {
    pub fn entity(&mut self) -> u32 {
        self.next_entity += 1;
        self.next_entity
    }

    pub fn solid(&mut self) -> u32 {
        self.next_solid += 1;
        self.next_solid
    }

    pub fn side(&mut self) -> u32 {
        self.next_side += 1;
        self.next_side
    }

    fn observe(&mut self, ent: &Entity) {
        self.next_entity = self.next_entity.max(ent.id);
        for solid in &ent.solids {
            self.next_solid = self.next_solid.max(solid.id);
            for side in &solid.sides {
                self.next_side = self.next_side.max(side.id);
            }
        }
    }
}

/// A parsed map
///
/// Blocks before `world` and after the entities are kept untouched. Entities
/// live in an arena so [`EntityId`]s stay valid for the whole run; removal
/// is expressed by marking an entity inert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vmf {
    prelude: Vec<Keyvalue>,
    pub world: Entity,
    entities: Vec<Entity>,
    postlude: Vec<Keyvalue>,
    pub ids: IdAllocator,
}

impl Default for Vmf {
    fn default() -> Self {
        Vmf {
            prelude: Vec::new(),
            world: Entity::new("worldspawn"),
            entities: Vec::new(),
            postlude: Vec::new(),
            ids: IdAllocator::default(),
        }
    }
}

impl Vmf {
    pub fn new() -> Self {
        let mut vmf = Vmf::default();
        vmf.world.id = vmf.ids.entity();
        vmf
    }

    /// Parse map text
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_keyvalues(parse_keyvalues(text)?)
    }

    pub fn from_keyvalues(blocks: Vec<Keyvalue>) -> Result<Self> {
        let mut prelude = Vec::new();
        let mut postlude = Vec::new();
        let mut world = None;
        let mut entities = Vec::new();

        for block in blocks {
            if block.is("world") {
                world = Some(Entity::from_keyvalue(&block)?);
            } else if block.is("entity") {
                entities.push(Entity::from_keyvalue(&block)?);
            } else if world.is_none() && entities.is_empty() {
                prelude.push(block);
            } else {
                postlude.push(block);
            }
        }

        let world = world.ok_or(Error::MissingWorld)?;
        let mut ids = IdAllocator::default();
        ids.observe(&world);
        for ent in &entities {
            ids.observe(ent);
        }
        tracing::debug!(
            entities = entities.len(),
            brushes = world.solids.len(),
            "Parsed map"
        );
        Ok(Vmf {
            prelude,
            world,
            entities,
            postlude,
            ids,
        })
    }

    pub fn to_keyvalues(&self) -> Vec<Keyvalue> {
        let mut blocks = self.prelude.clone();
        blocks.push(self.world.to_keyvalue("world"));
        blocks.extend(
            self.entities
                .iter()
                .filter(|e| !e.inert)
                .map(|e| e.to_keyvalue("entity")),
        );
        blocks.extend(self.postlude.iter().cloned());
        blocks
    }

    /// Serialize the map, skipping inert entities
    pub fn serialize(&self) -> String {
        serialize_keyvalues(&self.to_keyvalues())
    }

    /// Add an entity, assigning an id when it has none
    pub fn add_entity(&mut self, mut ent: Entity) -> EntityId {
        if ent.id == 0 {
            ent.id = self.ids.entity();
        }
        for solid in &mut ent.solids {
            if solid.id == 0 {
                solid.renumber(&mut self.ids);
            }
        }
        self.entities.push(ent);
        EntityId(self.entities.len() - 1)
    }

    /// Add a brush to the world
    pub fn add_brush(&mut self, solid: Solid) {
        self.world.solids.push(solid);
    }

    /// Access an entity by id
    ///
    /// # Panics
    /// Panics if the id does not belong to this map.
    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0]
    }

    pub fn mark_inert(&mut self, id: EntityId) {
        self.entities[id.0].inert = true;
    }

    /// Every live entity
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.inert)
            .map(|(i, e)| (EntityId(i), e))
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Live entities with the given classname
    pub fn by_class<'a>(&'a self, classname: &'a str) -> impl Iterator<Item = (EntityId, &'a Entity)> + 'a {
        self.entities().filter(move |(_, e)| e.is_class(classname))
    }

    /// Live entities with the given targetname
    pub fn by_target<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (EntityId, &'a Entity)> + 'a {
        self.entities()
            .filter(move |(_, e)| e.targetname().eq_ignore_ascii_case(name))
    }
}
