//! Final rewrite of the graph into engine-legal outputs

use super::{Connection, Connections, ConnectionsConfig, ItemId, ItemKind, LinkId};
use crate::error::{Result, UserError};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};
use vmf::{Entity, EntityId, Vmf};

impl Connections {
    /// Rewrite the graph within the engine's limits and write it to the map
    ///
    /// Runs in order:
    /// 1. Pass-through items with no inputs are removed, ones fed by a
    ///    single item are collapsed into it, until nothing changes. Items
    ///    fed by entities outside the graph are kept.
    /// 2. Inverted links switch to the inverse output name.
    /// 3. Items with more outputs than allowed send groups of them through
    ///    relays, allocated breadth-first from the source.
    ///
    /// Returns the relay entities created. A graph already within limits is
    /// left as it is, so running this twice changes nothing the second time.
    pub fn compact(&mut self, vmf: &mut Vmf, cfg: &ConnectionsConfig) -> Result<Vec<EntityId>> {
        self.optimise_items(vmf, cfg)?;
        self.resolve_inversions(cfg);
        let relays = self.split_fanout(vmf, cfg)?;
        self.apply(vmf, cfg);
        info!(
            items = self.items().count(),
            links = self.link_count(),
            relays = relays.len(),
            "Compacted connections"
        );
        Ok(relays)
    }

    fn optimise_items(&mut self, vmf: &mut Vmf, cfg: &ConnectionsConfig) -> Result<()> {
        let fed_outside = self.fed_from_outside(vmf);
        loop {
            let mut changed = false;
            let candidates: Vec<ItemId> = self
                .items()
                .filter(|(id, item)| {
                    item.kind == ItemKind::PassThrough && !item.inverted && !fed_outside.contains(id)
                })
                .map(|(id, _)| id)
                .collect();
            for id in candidates {
                let inputs: Vec<LinkId> = self.inputs(id).map(|(l, _)| l).collect();
                if inputs.is_empty() {
                    debug!(item = %self.item(id).name, "Removing logic item without inputs");
                    self.remove_item(id, vmf);
                    changed = true;
                } else if self.collapse(id, &inputs, vmf, cfg)? {
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Items targeted by outputs on entities the graph does not own
    fn fed_from_outside(&self, vmf: &Vmf) -> HashSet<ItemId> {
        vmf.entities()
            .filter(|(id, _)| !self.by_entity.contains_key(id))
            .flat_map(|(_, ent)| ent.outputs.iter())
            .filter_map(|out| self.item_by_name(&out.target))
            .collect()
    }

    /// Fold a pass-through item into the single item feeding it
    ///
    /// Every output of the item is re-sourced to the feed output that
    /// switches it the same way: the "on" output to whatever activates the
    /// item, the "off" output to whatever deactivates it, or to the inverse
    /// of the activating output when nothing deactivates it. Returns false
    /// and leaves the graph alone when there are several feeding items or an
    /// output has no counterpart.
    fn collapse(&mut self, id: ItemId, inputs: &[LinkId], vmf: &mut Vmf, cfg: &ConnectionsConfig) -> Result<bool> {
        let feeds: Vec<Connection> = inputs.iter().filter_map(|&l| self.link(l).cloned()).collect();
        let Some(source) = feeds.first().map(|c| c.from) else {
            return Ok(false);
        };
        if feeds.iter().any(|c| c.from != source) {
            return Ok(false);
        }
        if source == id {
            let points: Vec<_> = self
                .item(id)
                .entity
                .map(|e| vmf.entity(e).origin())
                .into_iter()
                .collect();
            return Err(UserError::new(format!(
                "Logic items starting at \"{}\" form a loop with no outside input",
                self.item(id).name
            ))
            .with_context("Connections")
            .with_points(points)
            .with_text_list([self.item(id).name.clone()])
            .into());
        }

        let (mut on, mut off) = (None, None);
        for feed in &feeds {
            let slot = match cfg.gate_input_side(&feed.input) {
                Some(true) => &mut on,
                Some(false) => &mut off,
                None => return Ok(false),
            };
            if slot.replace(feed).is_some() {
                return Ok(false);
            }
        }

        let mut plan: Vec<(LinkId, String, &Connection)> = Vec::new();
        for (l, conn) in self.outputs(id) {
            let (wanted, other) = match cfg.gate_output_side(&conn.output) {
                Some(true) => (on, off),
                Some(false) => (off, on),
                None => return Ok(false),
            };
            let mapped = match (wanted, other) {
                (Some(feed), _) => (feed.output.clone(), feed),
                (None, Some(feed)) => match cfg.inverse_of(&feed.output) {
                    Some(inverse) => (inverse.to_string(), feed),
                    None => return Ok(false),
                },
                (None, None) => return Ok(false),
            };
            plan.push((l, mapped.0, mapped.1));
        }

        debug!(item = %self.item(id).name, into = %self.item(source).name, "Collapsing logic item");
        for &l in inputs {
            self.remove_link(l);
        }
        for (l, output, feed) in plan {
            let Some(conn) = self.links[l.0].as_mut() else {
                continue;
            };
            conn.from = source;
            conn.output = output;
            conn.delay += feed.delay;
            conn.inverted ^= feed.inverted;
            if conn.params.is_empty() {
                conn.params = feed.params.clone();
            }
            conn.times = match (feed.times, conn.times) {
                (a, b) if a > 0 && b > 0 => a.min(b),
                (a, b) => a.max(b),
            };
            self.items[source.0].outputs.push(l);
        }
        self.items[id.0].outputs.clear();
        self.remove_item(id, vmf);
        Ok(true)
    }

    fn resolve_inversions(&mut self, cfg: &ConnectionsConfig) {
        for conn in self.links.iter_mut().flatten().filter(|c| c.inverted) {
            match cfg.inverse_of(&conn.output) {
                Some(inverse) => conn.output = inverse.to_string(),
                None => warn!(output = %conn.output, "No inverse known for output, firing it unchanged"),
            }
            conn.inverted = false;
        }
    }

    /// Outputs an item's entity may still take from the graph
    fn capacity(&self, id: ItemId, vmf: &Vmf, cfg: &ConnectionsConfig) -> usize {
        let external = self.item(id).entity.map_or(0, |e| {
            vmf.entity(e)
                .outputs
                .iter()
                .filter(|o| !self.by_name.contains_key(&o.target.to_ascii_lowercase()))
                .count()
        });
        if external >= cfg.max_outputs {
            warn!(item = %self.item(id).name, external, "Entity already at the output limit");
        }
        cfg.max_outputs.saturating_sub(external).max(1)
    }

    fn split_fanout(&mut self, vmf: &mut Vmf, cfg: &ConnectionsConfig) -> Result<Vec<EntityId>> {
        let mut relays = Vec::new();
        let sources: Vec<ItemId> = self.items().map(|(id, _)| id).collect();
        for source in sources {
            let mut queue = VecDeque::from([(source, 0usize)]);
            while let Some((node, depth)) = queue.pop_front() {
                let cap = self.capacity(node, vmf, cfg);
                let links: Vec<LinkId> = self.outputs(node).map(|(l, _)| l).collect();
                if links.len() <= cap {
                    continue;
                }
                let groups = self.group_by_output(&links);
                if depth >= cfg.max_proxy_depth || groups.len() > cap {
                    let origin = self.item(node).entity.map(|e| vmf.entity(e).origin());
                    return Err(UserError::new(format!(
                        "\"{}\" has {} outputs, which cannot fit behind {} levels of relays",
                        self.item(source).name,
                        links.len(),
                        cfg.max_proxy_depth
                    ))
                    .with_context("Connections")
                    .with_points(origin)
                    .into());
                }

                let mut spare = cap - groups.len();
                for (output, group) in groups {
                    let wanted = group.len().div_ceil(cfg.max_outputs.max(1));
                    let extra = wanted.saturating_sub(1).min(spare);
                    spare -= extra;
                    for chunk in split_even(&group, 1 + extra) {
                        if chunk.len() < 2 {
                            continue;
                        }
                        let relay = self.make_relay(node, vmf, cfg);
                        relays.push(relay.1);
                        let mut feed = Connection::new(node, relay.0, output.as_str(), cfg.relay_input.as_str());
                        feed.sep = self.link(chunk[0]).map(|c| c.sep).unwrap_or_default();
                        self.add_link(feed);
                        for &l in chunk {
                            self.move_source(l, relay.0, &cfg.relay_output);
                        }
                        queue.push_back((relay.0, depth + 1));
                    }
                }
            }
        }
        Ok(relays)
    }

    /// Split links into groups sharing an output name, in order of first use
    fn group_by_output(&self, links: &[LinkId]) -> Vec<(String, Vec<LinkId>)> {
        let mut groups: Vec<(String, Vec<LinkId>)> = Vec::new();
        for &l in links {
            let Some(conn) = self.link(l) else {
                continue;
            };
            match groups.iter_mut().find(|(o, _)| o.eq_ignore_ascii_case(&conn.output)) {
                Some((_, group)) => group.push(l),
                None => groups.push((conn.output.clone(), vec![l])),
            }
        }
        groups
    }

    fn move_source(&mut self, link: LinkId, new_from: ItemId, output: &str) {
        let Some(conn) = self.links[link.0].as_mut() else {
            return;
        };
        let old = conn.from;
        conn.from = new_from;
        conn.output = output.to_string();
        self.items[old.0].outputs.retain(|&l| l != link);
        self.items[new_from.0].outputs.push(link);
    }

    fn make_relay(&mut self, source: ItemId, vmf: &mut Vmf, cfg: &ConnectionsConfig) -> (ItemId, EntityId) {
        let base = self.item(source).name.clone();
        let name = loop {
            self.relays_made += 1;
            let candidate = format!("{base}_relay{}", self.relays_made);
            if !self.by_name.contains_key(&candidate.to_ascii_lowercase()) {
                break candidate;
            }
        };
        let mut ent = Entity::new(&cfg.relay_classname);
        ent.set("targetname", name.as_str());
        if let Some(src) = self.item(source).entity {
            ent.set_origin(vmf.entity(src).origin());
        }
        let ent_id = vmf.add_entity(ent);
        (self.add_item(&name, Some(ent_id), ItemKind::Relay), ent_id)
    }
}

/// Cut `items` into `parts` contiguous runs whose lengths differ by at most one
fn split_even<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    let parts = parts.clamp(1, items.len().max(1));
    let base = items.len() / parts;
    let rem = items.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < rem);
        out.push(&items[start..start + len]);
        start += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::instance_locs::InstanceLocs;
    use vmf::Output;

    struct Fixture {
        vmf: Vmf,
        graph: Connections,
        cfg: ConnectionsConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                vmf: Vmf::new(),
                graph: Connections::new(),
                cfg: ConnectionsConfig::default(),
            }
        }

        fn item(&mut self, name: &str, kind: ItemKind) -> ItemId {
            let mut ent = Entity::new("func_instance");
            ent.set("targetname", name);
            let id = self.vmf.add_entity(ent);
            self.graph.add_item(name, Some(id), kind)
        }

        fn link(&mut self, from: ItemId, to: ItemId, output: &str, input: &str) -> LinkId {
            self.graph.add_link(Connection::new(from, to, output, input))
        }

        fn outputs_of(&self, name: &str) -> Vec<Output> {
            let (_, ent) = self.vmf.by_target(name).next().unwrap();
            ent.outputs.clone()
        }
    }

    #[test]
    fn test_chain_of_gates_collapses() {
        let mut f = Fixture::new();
        let button = f.item("button", ItemKind::Normal);
        let and1 = f.item("and1", ItemKind::PassThrough);
        let and2 = f.item("and2", ItemKind::PassThrough);
        let door = f.item("door", ItemKind::Normal);
        f.graph
            .add_link(Connection::new(button, and1, "OnPressed", "Activate").with_delay(0.25));
        f.link(and1, and2, "OnActivated", "Activate");
        f.link(and2, door, "OnActivated", "Open");

        f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        assert!(f.graph.item_by_name("and1").is_none());
        assert!(f.graph.item_by_name("and2").is_none());
        assert_eq!(f.vmf.entities().count(), 2);

        let outs = f.outputs_of("button");
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].output, "OnPressed");
        assert_eq!(outs[0].target, "door");
        assert_eq!(outs[0].input, "Open");
        assert_eq!(outs[0].delay, 0.25);
    }

    #[test]
    fn test_collapse_keeps_on_and_off_signals() {
        let mut f = Fixture::new();
        let button = f.item("button", ItemKind::Normal);
        let gate = f.item("gate", ItemKind::PassThrough);
        let door = f.item("door", ItemKind::Normal);
        f.link(button, gate, "OnPressed", "Activate");
        f.link(gate, door, "OnActivated", "Open");
        f.link(gate, door, "OnDeactivated", "Close");

        f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        assert!(f.graph.item_by_name("gate").is_none());
        let outs: Vec<_> = f
            .outputs_of("button")
            .into_iter()
            .map(|o| (o.output, o.input))
            .collect();
        assert_eq!(
            outs,
            vec![
                ("OnPressed".to_string(), "Open".to_string()),
                ("OnUnPressed".to_string(), "Close".to_string()),
            ]
        );
    }

    #[test]
    fn test_collapse_with_on_off_feed_pair() {
        let mut f = Fixture::new();
        let button = f.item("button", ItemKind::Normal);
        let gate = f.item("gate", ItemKind::PassThrough);
        let door = f.item("door", ItemKind::Normal);
        f.link(button, gate, "OnPressed", "Activate");
        f.link(button, gate, "OnUnPressed", "Deactivate");
        f.link(gate, door, "OnDeactivated", "Close");
        f.link(gate, door, "OnActivated", "Open");

        f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        assert!(f.graph.item_by_name("gate").is_none());
        let outs: Vec<_> = f
            .outputs_of("button")
            .into_iter()
            .map(|o| (o.output, o.input))
            .collect();
        assert_eq!(
            outs,
            vec![
                ("OnUnPressed".to_string(), "Close".to_string()),
                ("OnPressed".to_string(), "Open".to_string()),
            ]
        );
    }

    #[test]
    fn test_unmapped_gate_is_kept() {
        let mut f = Fixture::new();
        let timer = f.item("timer", ItemKind::Normal);
        let gate = f.item("gate", ItemKind::PassThrough);
        let door = f.item("door", ItemKind::Normal);
        // No inverse is configured for OnTimer, so the off side has no source
        f.link(timer, gate, "OnTimer", "Activate");
        f.link(gate, door, "OnDeactivated", "Close");
        // An input the gate does not forward
        let other = f.item("other", ItemKind::PassThrough);
        f.link(timer, other, "OnTimer", "SetValue");
        f.link(other, door, "OnActivated", "Open");

        f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        assert!(f.graph.item_by_name("gate").is_some());
        assert!(f.graph.item_by_name("other").is_some());
        assert_eq!(f.outputs_of("gate")[0].input, "Close");
        assert_eq!(f.outputs_of("timer").len(), 2);
    }

    #[test]
    fn test_gate_fed_by_unnamed_entity_is_kept() {
        let mut vmf = Vmf::new();
        let mut trigger = Entity::new("trigger_once");
        trigger.outputs.push(Output::new("OnTrigger", "gate", "Activate"));
        vmf.add_entity(trigger);
        let mut gate = Entity::new("func_instance");
        gate.set("targetname", "gate");
        gate.set("file", "instances/gate.vmf");
        gate.outputs.push(Output::new("OnActivated", "door", "Open"));
        let gate_id = vmf.add_entity(gate);
        let mut door = Entity::new("func_instance");
        door.set("targetname", "door");
        door.set("file", "instances/door.vmf");
        vmf.add_entity(door);

        let cfg = ConnectionsConfig {
            pass_through: vec!["instances/gate.vmf".to_string()],
            ..ConnectionsConfig::default()
        };
        let mut graph = Connections::parse(&vmf, &cfg, &InstanceLocs::new());
        let gate_item = graph.item_by_name("gate").unwrap();
        assert_eq!(graph.item(gate_item).kind, ItemKind::PassThrough);

        graph.compact(&mut vmf, &cfg).unwrap();
        assert!(graph.item_by_name("gate").is_some());
        assert!(!vmf.entity(gate_id).inert);
        let outs = &vmf.entity(gate_id).outputs;
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].target, "door");
        let (_, trigger) = vmf.by_class("trigger_once").next().unwrap();
        assert_eq!(trigger.outputs[0].target, "gate");
    }

    #[test]
    fn test_gates_with_several_inputs_stay() {
        let mut f = Fixture::new();
        let a = f.item("a", ItemKind::Normal);
        let b = f.item("b", ItemKind::Normal);
        let gate = f.item("gate", ItemKind::PassThrough);
        let lonely = f.item("lonely", ItemKind::PassThrough);
        let door = f.item("door", ItemKind::Normal);
        f.link(a, gate, "OnPressed", "Activate");
        f.link(b, gate, "OnPressed", "Activate");
        f.link(gate, door, "OnActivated", "Open");
        f.link(lonely, door, "OnActivated", "Close");

        f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        assert!(f.graph.item_by_name("gate").is_some());
        assert!(f.graph.item_by_name("lonely").is_none());
        assert_eq!(f.graph.inputs(door).count(), 1);
    }

    #[test]
    fn test_inverted_link_and_item() {
        let mut f = Fixture::new();
        let a = f.item("a", ItemKind::Normal);
        let not = f.item("not", ItemKind::PassThrough);
        f.graph.item_mut(not).inverted = true;
        let door = f.item("door", ItemKind::Normal);
        f.graph.add_link(Connection::new(a, not, "OnPressed", "Activate").inverted());
        f.link(not, door, "OnActivated", "Open");

        f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        assert!(f.graph.item_by_name("not").is_some());
        assert_eq!(f.outputs_of("a")[0].output, "OnUnPressed");
    }

    #[test]
    fn test_gate_loop_is_user_error() {
        let mut f = Fixture::new();
        let p1 = f.item("p1", ItemKind::PassThrough);
        let p2 = f.item("p2", ItemKind::PassThrough);
        f.link(p1, p2, "OnActivated", "Activate");
        f.link(p2, p1, "OnActivated", "Activate");
        let err = f.graph.compact(&mut f.vmf, &f.cfg).unwrap_err();
        match err {
            Error::User(user) => assert!(user.message.contains("loop")),
            other => panic!("expected a user error, got {other:?}"),
        }
    }

    #[test]
    fn test_fanout_respects_limit() {
        let mut f = Fixture::new();
        let button = f.item("button", ItemKind::Normal);
        let targets: Vec<ItemId> = (0..100).map(|i| f.item(&format!("panel{i}"), ItemKind::Normal)).collect();
        for &t in &targets {
            f.link(button, t, "OnPressed", "Extend");
        }
        f.link(button, targets[0], "OnUnPressed", "Retract");

        let relays = f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        assert!(!relays.is_empty());
        for (_, ent) in f.vmf.entities() {
            assert!(ent.outputs.len() <= f.cfg.max_outputs, "{} has too many outputs", ent.targetname());
        }
        // Every panel is still reached exactly once through the relays
        for &t in &targets {
            let extend = f.graph.inputs(t).filter(|(_, c)| c.input == "Extend").count();
            assert_eq!(extend, 1);
        }
        let source_outputs = f.outputs_of("button");
        assert!(source_outputs.iter().any(|o| o.output == "OnUnPressed" && o.target == "panel0"));
        assert!(source_outputs
            .iter()
            .filter(|o| o.output == "OnPressed")
            .all(|o| o.input == "Trigger"));
    }

    #[test]
    fn test_deep_fanout() {
        let mut f = Fixture::new();
        f.cfg.max_outputs = 4;
        let src = f.item("src", ItemKind::Normal);
        for i in 0..40 {
            let t = f.item(&format!("t{i}"), ItemKind::Normal);
            f.link(src, t, "OnTrigger", "Fire");
        }
        f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        for (_, ent) in f.vmf.entities() {
            assert!(ent.outputs.len() <= 4);
        }

        f.cfg.max_proxy_depth = 1;
        let mut g = Fixture::new();
        g.cfg = f.cfg.clone();
        let src = g.item("src", ItemKind::Normal);
        for i in 0..40 {
            let t = g.item(&format!("t{i}"), ItemKind::Normal);
            g.link(src, t, "OnTrigger", "Fire");
        }
        assert!(matches!(g.graph.compact(&mut g.vmf, &g.cfg), Err(Error::User(_))));
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut f = Fixture::new();
        let button = f.item("button", ItemKind::Normal);
        let gate = f.item("gate", ItemKind::PassThrough);
        for i in 0..50 {
            let t = f.item(&format!("t{i}"), ItemKind::Normal);
            f.link(gate, t, "OnActivated", "Enable");
        }
        f.link(button, gate, "OnPressed", "Activate");

        f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        let first = f.vmf.serialize();
        let relays = f.graph.compact(&mut f.vmf, &f.cfg).unwrap();
        assert!(relays.is_empty());
        assert_eq!(f.vmf.serialize(), first);

        // Parsing the compacted map again finds nothing left to do
        let mut reparsed = Vmf::parse(&first).unwrap();
        let mut graph = Connections::parse(&reparsed, &f.cfg, &InstanceLocs::new());
        assert!(graph.compact(&mut reparsed, &f.cfg).unwrap().is_empty());
        assert_eq!(reparsed.serialize(), first);
    }

    #[test]
    fn test_split_even() {
        let items: Vec<u32> = (0..10).collect();
        let parts = split_even(&items, 3);
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![4, 3, 3]);
        assert_eq!(split_even(&items, 0).len(), 1);
        assert_eq!(split_even::<u32>(&[], 4).len(), 1);
    }
}
