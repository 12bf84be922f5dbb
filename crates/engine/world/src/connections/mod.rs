//! Connections Graph
//!
//! Logical wiring between items. Outputs on map entities whose target is
//! another item become [`Connection`]s in an arena; both ends refer to
//! items by [`ItemId`], so cycles are ordinary edges. Rules rewire the graph
//! while conditions run, and [`Connections::compact`] writes it back to the
//! map as real outputs within the engine's limits.
//!
//! ```text
//!   Vmf outputs ──parse──▶ items + links ──rules──▶ compact ──▶ Vmf outputs
//!                                                    │
//!                                  collapse pass-through items, invert,
//!                                  split fan-out through relays
//! ```

mod compact;

use crate::instance_locs::InstanceLocs;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};
use vmf::{EntityId, Output, Separator, Vmf};

/// Index of an item in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub usize);

/// Index of a link in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Item with its own behaviour
    Normal,
    /// Logic gate or indicator that only forwards its inputs
    PassThrough,
    /// Relay created while compacting
    Relay,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub name: String,
    pub entity: Option<EntityId>,
    pub kind: ItemKind,
    /// Inverted items flip their output and are never collapsed
    pub inverted: bool,
    removed: bool,
    inputs: Vec<LinkId>,
    outputs: Vec<LinkId>,
}

/// A directed edge from one item's output to another item's input
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub from: ItemId,
    pub to: ItemId,
    pub output: String,
    pub input: String,
    pub params: String,
    pub delay: f64,
    pub times: i32,
    /// Fire the inverse of `output` instead
    pub inverted: bool,
    pub sep: Separator,
}

impl Connection {
    pub fn new(from: ItemId, to: ItemId, output: impl Into<String>, input: impl Into<String>) -> Self {
        Connection {
            from,
            to,
            output: output.into(),
            input: input.into(),
            params: String::new(),
            delay: 0.0,
            times: -1,
            inverted: false,
            sep: Separator::Comma,
        }
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = !self.inverted;
        self
    }
}

fn default_max_outputs() -> usize {
    32
}

fn default_max_proxy_depth() -> usize {
    4
}

fn default_inverse_outputs() -> Vec<(String, String)> {
    [
        ("OnPressed", "OnUnPressed"),
        ("OnStartTouch", "OnEndTouch"),
        ("OnPowered", "OnUnpowered"),
        ("OnOpen", "OnClose"),
    ]
    .iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

/// Limits and item classification used by the graph
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    /// Most outputs a single entity may carry
    pub max_outputs: usize,
    /// Most relays chained behind one source
    pub max_proxy_depth: usize,
    pub relay_classname: String,
    pub relay_input: String,
    pub relay_output: String,
    /// Instance selectors for logic gates and indicators
    pub pass_through: Vec<String>,
    /// Fixup marking a pass-through item as inverted
    pub invert_var: String,
    /// Output names and their opposites, usable in both directions
    pub inverse_outputs: Vec<(String, String)>,
    /// Inputs switching a pass-through item on and off
    pub gate_inputs: (String, String),
    /// Outputs a pass-through item fires when switched on and off
    pub gate_outputs: (String, String),
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        ConnectionsConfig {
            max_outputs: default_max_outputs(),
            max_proxy_depth: default_max_proxy_depth(),
            relay_classname: "logic_relay".to_string(),
            relay_input: "Trigger".to_string(),
            relay_output: "OnTrigger".to_string(),
            pass_through: Vec::new(),
            invert_var: "$start_inverted".to_string(),
            inverse_outputs: default_inverse_outputs(),
            gate_inputs: ("Activate".to_string(), "Deactivate".to_string()),
            gate_outputs: ("OnActivated".to_string(), "OnDeactivated".to_string()),
        }
    }
}

impl ConnectionsConfig {
    /// Opposite of an output name, if one is configured
    pub fn inverse_of(&self, output: &str) -> Option<&str> {
        self.inverse_outputs.iter().find_map(|(a, b)| {
            if a.eq_ignore_ascii_case(output) {
                Some(b.as_str())
            } else if b.eq_ignore_ascii_case(output) {
                Some(a.as_str())
            } else {
                None
            }
        })
    }

    /// True for the gate input that switches it on, false for off
    fn gate_input_side(&self, input: &str) -> Option<bool> {
        side_of(&self.gate_inputs, input)
    }

    /// True for the gate output fired when on, false for off
    fn gate_output_side(&self, output: &str) -> Option<bool> {
        side_of(&self.gate_outputs, output)
    }
}

fn side_of((on, off): &(String, String), name: &str) -> Option<bool> {
    if on.eq_ignore_ascii_case(name) {
        Some(true)
    } else if off.eq_ignore_ascii_case(name) {
        Some(false)
    } else {
        None
    }
}

/// The item graph for one map
#[derive(Debug, Default)]
pub struct Connections {
    items: Vec<Item>,
    links: Vec<Option<Connection>>,
    by_name: HashMap<String, ItemId>,
    by_entity: HashMap<EntityId, ItemId>,
    relays_made: usize,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from every named entity in the map
    ///
    /// Outputs aimed at another item become links. From then on the graph
    /// owns them: [`Connections::apply`] replaces them with the current
    /// links, while every other output stays on its entity untouched.
    pub fn parse(vmf: &Vmf, cfg: &ConnectionsConfig, locs: &InstanceLocs) -> Self {
        let mut graph = Connections::new();
        for (id, ent) in vmf.entities() {
            let name = ent.targetname();
            if name.is_empty() || graph.item_by_name(name).is_some() {
                continue;
            }
            let pass = ent.is_class("func_instance")
                && cfg.pass_through.iter().any(|sel| locs.matches(sel, ent.file()));
            let item = graph.add_item(
                name,
                Some(id),
                if pass { ItemKind::PassThrough } else { ItemKind::Normal },
            );
            if pass && ent.fixups.bool(&cfg.invert_var) {
                graph.items[item.0].inverted = true;
            }
        }

        for id in vmf.entity_ids() {
            let Some(from) = graph.by_entity.get(&id).copied() else {
                continue;
            };
            for out in &vmf.entity(id).outputs {
                if let Some(to) = graph.item_by_name(&out.target) {
                    graph.add_link(Connection {
                        from,
                        to,
                        output: out.output.clone(),
                        input: out.input.clone(),
                        params: out.params.clone(),
                        delay: out.delay,
                        times: out.times,
                        inverted: false,
                        sep: out.sep,
                    });
                }
            }
        }
        info!(items = graph.items.len(), links = graph.link_count(), "Parsed connections");
        graph
    }

    /// Register an item; names are case-insensitive and must be unique
    pub fn add_item(&mut self, name: &str, entity: Option<EntityId>, kind: ItemKind) -> ItemId {
        let id = ItemId(self.items.len());
        self.items.push(Item {
            name: name.to_string(),
            entity,
            kind,
            inverted: false,
            removed: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        self.by_name.insert(name.to_ascii_lowercase(), id);
        if let Some(ent) = entity {
            self.by_entity.insert(ent, id);
        }
        id
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.0]
    }

    pub fn item_mut(&mut self, id: ItemId) -> &mut Item {
        &mut self.items[id.0]
    }

    pub fn item_by_name(&self, name: &str) -> Option<ItemId> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .copied()
            .filter(|id| !self.items[id.0].removed)
    }

    pub fn item_for_entity(&self, ent: EntityId) -> Option<ItemId> {
        self.by_entity.get(&ent).copied().filter(|id| !self.items[id.0].removed)
    }

    /// Live items in creation order
    pub fn items(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.removed)
            .map(|(i, item)| (ItemId(i), item))
    }

    pub fn link(&self, id: LinkId) -> Option<&Connection> {
        self.links.get(id.0).and_then(Option::as_ref)
    }

    pub fn link_count(&self) -> usize {
        self.links.iter().flatten().count()
    }

    /// Links leaving an item, in declaration order
    pub fn outputs(&self, item: ItemId) -> impl Iterator<Item = (LinkId, &Connection)> {
        self.items[item.0]
            .outputs
            .iter()
            .filter_map(|&l| self.link(l).map(|c| (l, c)))
    }

    /// Links arriving at an item, in declaration order
    pub fn inputs(&self, item: ItemId) -> impl Iterator<Item = (LinkId, &Connection)> {
        self.items[item.0]
            .inputs
            .iter()
            .filter_map(|&l| self.link(l).map(|c| (l, c)))
    }

    pub fn add_link(&mut self, conn: Connection) -> LinkId {
        let id = LinkId(self.links.len());
        self.items[conn.from.0].outputs.push(id);
        self.items[conn.to.0].inputs.push(id);
        self.links.push(Some(conn));
        id
    }

    pub fn remove_link(&mut self, id: LinkId) -> Option<Connection> {
        let conn = self.links.get_mut(id.0)?.take()?;
        self.items[conn.from.0].outputs.retain(|&l| l != id);
        self.items[conn.to.0].inputs.retain(|&l| l != id);
        Some(conn)
    }

    /// Point every link arriving at `item` to `new_item` instead
    pub fn retarget(&mut self, item: ItemId, new_item: ItemId) {
        if item == new_item {
            return;
        }
        let moved = std::mem::take(&mut self.items[item.0].inputs);
        for &l in &moved {
            if let Some(conn) = self.links[l.0].as_mut() {
                conn.to = new_item;
            }
        }
        debug!(
            from = %self.items[item.0].name,
            to = %self.items[new_item.0].name,
            links = moved.len(),
            "Retargeted inputs"
        );
        self.items[new_item.0].inputs.extend(moved);
    }

    /// Make every link leaving `item` start from `new_source`
    pub fn transfer_outputs(&mut self, item: ItemId, new_source: ItemId) {
        if item == new_source {
            return;
        }
        let moved = std::mem::take(&mut self.items[item.0].outputs);
        for &l in &moved {
            if let Some(conn) = self.links[l.0].as_mut() {
                conn.from = new_source;
            }
        }
        self.items[new_source.0].outputs.extend(moved);
    }

    /// Rename the input of every link arriving at `item` named `from`
    pub fn rename_inputs(&mut self, item: ItemId, from: &str, to: &str) -> usize {
        let mut count = 0;
        for l in self.items[item.0].inputs.clone() {
            if let Some(conn) = self.links[l.0].as_mut().filter(|c| c.input.eq_ignore_ascii_case(from)) {
                conn.input = to.to_string();
                count += 1;
            }
        }
        count
    }

    /// Rename the output of every link leaving `item` named `from`
    pub fn rename_outputs(&mut self, item: ItemId, from: &str, to: &str) -> usize {
        let mut count = 0;
        for l in self.items[item.0].outputs.clone() {
            if let Some(conn) = self.links[l.0].as_mut().filter(|c| c.output.eq_ignore_ascii_case(from)) {
                conn.output = to.to_string();
                count += 1;
            }
        }
        count
    }

    /// Drop an item and every link touching it, marking its entity inert
    pub fn remove_item(&mut self, item: ItemId, vmf: &mut Vmf) {
        let links: Vec<LinkId> = self.items[item.0]
            .inputs
            .iter()
            .chain(&self.items[item.0].outputs)
            .copied()
            .collect();
        for l in links {
            self.remove_link(l);
        }
        let it = &mut self.items[item.0];
        it.removed = true;
        if let Some(ent) = it.entity {
            vmf.mark_inert(ent);
        }
    }

    /// Write every link back to its source entity as an output
    ///
    /// Outputs aimed at items are owned by the graph, so any such output
    /// already on an entity is replaced.
    pub fn apply(&self, vmf: &mut Vmf, cfg: &ConnectionsConfig) {
        for (id, item) in self.items() {
            let Some(ent_id) = item.entity else {
                continue;
            };
            let existing = std::mem::take(&mut vmf.entity_mut(ent_id).outputs);
            let owned = |o: &Output| self.by_name.contains_key(&o.target.to_ascii_lowercase());
            // Links go where the first graph-owned output used to be
            let slot = existing.iter().position(owned);
            let mut outputs: Vec<Output> = existing.iter().filter(|o| !owned(*o)).cloned().collect();
            let links = self.outputs(id).map(|(_, conn)| self.to_output(conn, cfg));
            match slot {
                Some(slot) => {
                    let at = existing[..slot].iter().filter(|o| !owned(*o)).count();
                    outputs.splice(at..at, links);
                }
                None => outputs.extend(links),
            }
            vmf.entity_mut(ent_id).outputs = outputs;
        }
    }

    fn to_output(&self, conn: &Connection, cfg: &ConnectionsConfig) -> Output {
        let name = if conn.inverted {
            cfg.inverse_of(&conn.output).unwrap_or(&conn.output)
        } else {
            &conn.output
        };
        let mut out = Output::new(name, self.items[conn.to.0].name.as_str(), conn.input.as_str())
            .with_params(conn.params.as_str())
            .with_delay(conn.delay);
        out.times = conn.times;
        out.sep = conn.sep;
        out
    }
}
