//! Everything a rule can read or change while the conditions run

use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use vmf::{EntityId, Vmf};
use world::{
    fold_path, Collisions, Connections, InstanceLocs, RandStreams, TemplateLibrary, TileGrid,
};

/// Compile-wide switches set by the editor and changed by global results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `SP` or `COOP`
    pub game_mode: String,
    pub is_preview: bool,
    pub style_vars: BTreeMap<String, bool>,
    /// Voice attributes present in the map
    pub has_attrs: BTreeMap<String, bool>,
    pub options: BTreeMap<String, String>,
    /// Where global instances go when a result gives no position
    pub global_ents_loc: DVec3,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            game_mode: default_game_mode(),
            is_preview: false,
            style_vars: BTreeMap::new(),
            has_attrs: BTreeMap::new(),
            options: BTreeMap::new(),
            global_ents_loc: default_global_ents_loc(),
        }
    }
}

fn default_game_mode() -> String {
    "SP".to_string()
}

fn default_global_ents_loc() -> DVec3 {
    DVec3::new(-2400.0, 0.0, 0.0)
}

fn lookup_flag(map: &BTreeMap<String, bool>, name: &str) -> bool {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name.trim()))
        .is_some_and(|(_, v)| *v)
}

fn store<V>(map: &mut BTreeMap<String, V>, name: &str, value: V) {
    let key = map
        .keys()
        .find(|k| k.eq_ignore_ascii_case(name.trim()))
        .cloned()
        .unwrap_or_else(|| name.trim().to_ascii_lowercase());
    map.insert(key, value);
}

impl Settings {
    pub fn style_var(&self, name: &str) -> bool {
        lookup_flag(&self.style_vars, name)
    }

    pub fn set_style_var(&mut self, name: &str, value: bool) {
        store(&mut self.style_vars, name, value);
    }

    pub fn has_attr(&self, name: &str) -> bool {
        lookup_flag(&self.has_attrs, name)
    }

    pub fn set_has_attr(&mut self, name: &str) {
        store(&mut self.has_attrs, name, true);
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.trim()))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_option(&mut self, name: &str, value: impl Into<String>) {
        store(&mut self.options, name, value.into());
    }
}

/// The map and all map-wide state the conditions work on
///
/// The fields are public so the pipeline can build each part separately
/// and take them back out once the rules have run.
#[derive(Debug, Default)]
pub struct MapContext {
    pub vmf: Vmf,
    pub settings: Settings,
    pub locs: InstanceLocs,
    pub rand: RandStreams,
    pub tiles: TileGrid,
    pub templates: TemplateLibrary,
    pub connections: Connections,
    pub collisions: Collisions,
    /// Folded paths of every instance file used in the map
    all_files: HashSet<String>,
    /// Files already placed by `AddGlobal`
    global_files: HashSet<String>,
}

impl MapContext {
    pub fn new(vmf: Vmf) -> Self {
        let mut ctx = MapContext {
            vmf,
            ..Default::default()
        };
        ctx.scan_files();
        ctx
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_locs(mut self, locs: InstanceLocs) -> Self {
        self.locs = locs;
        self
    }

    pub fn with_rand(mut self, rand: RandStreams) -> Self {
        self.rand = rand;
        self
    }

    pub fn with_tiles(mut self, tiles: TileGrid) -> Self {
        self.tiles = tiles;
        self
    }

    pub fn with_templates(mut self, templates: TemplateLibrary) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_connections(mut self, connections: Connections) -> Self {
        self.connections = connections;
        self
    }

    /// Rebuild the set of instance files present in the map
    pub fn scan_files(&mut self) {
        self.all_files = self
            .vmf
            .by_class("func_instance")
            .map(|(_, ent)| fold_path(ent.file()))
            .collect();
        debug!(files = self.all_files.len(), "Scanned instance files");
    }

    /// Live instances, in map order
    pub fn instances(&self) -> Vec<EntityId> {
        self.vmf.by_class("func_instance").map(|(id, _)| id).collect()
    }

    /// Record a file as used by the map
    pub fn note_file(&mut self, file: &str) {
        self.all_files.insert(fold_path(file));
    }

    /// True if any instance in the map uses a file named by the selector
    pub fn has_instance(&self, selector: &str) -> bool {
        let wanted = self.locs.resolve_filter(selector);
        self.all_files.iter().any(|f| wanted.contains(f))
    }

    /// Mark a global file as placed, returning false if it already was
    pub(crate) fn claim_global(&mut self, file: &str) -> bool {
        self.global_files.insert(fold_path(file))
    }

    /// Name of an entity living inside an instance
    ///
    /// Follows the instance's `fixup_style`: `0` prefixes the instance
    /// name, `1` suffixes it, `2` leaves names alone. Blank, `@global`
    /// and `!special` names are never changed.
    pub fn local_name(&self, inst: EntityId, name: &str) -> String {
        if name.is_empty() || name.starts_with(['@', '!']) {
            return name.to_string();
        }
        let ent = self.vmf.entity(inst);
        let inst_name = ent.targetname();
        if inst_name.is_empty() {
            return name.to_string();
        }
        match ent.get_or("fixup_style", "0").trim() {
            "1" => format!("{name}-{inst_name}"),
            "2" => name.to_string(),
            _ => format!("{inst_name}-{name}"),
        }
    }

    /// Insert a suffix before the file extension of an instance
    pub fn add_suffix(&mut self, inst: EntityId, suffix: &str) {
        let file = self.vmf.entity(inst).file().to_string();
        let new_file = match file.rsplit_once('.') {
            Some((stem, ext)) if !ext.contains('/') => format!("{stem}{suffix}.{ext}"),
            _ => format!("{file}{suffix}"),
        };
        self.note_file(&new_file);
        self.vmf.entity_mut(inst).set("file", new_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmf::Entity;

    fn instance(name: &str, file: &str) -> Entity {
        let mut ent = Entity::new("func_instance");
        ent.set("targetname", name);
        ent.set("file", file);
        ent
    }

    #[test]
    fn test_settings_are_case_insensitive() {
        let mut settings = Settings::default();
        settings.set_style_var("NoMidVoices", true);
        assert!(settings.style_var("nomidvoices"));
        settings.set_style_var("NOMIDVOICES", false);
        assert!(!settings.style_var("NoMidVoices"));
        assert_eq!(settings.style_vars.len(), 1);

        settings.set_option("Glass_Scale", "0.15");
        assert_eq!(settings.option("glass_scale"), Some("0.15"));
        assert!(!settings.has_attr("missing"));
    }

    #[test]
    fn test_settings_deserialize_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"is_preview": true, "style_vars": {"x": true}}"#).unwrap();
        assert!(settings.is_preview);
        assert_eq!(settings.game_mode, "SP");
        assert!(settings.style_var("X"));
        assert_eq!(settings.global_ents_loc, DVec3::new(-2400.0, 0.0, 0.0));
    }

    #[test]
    fn test_local_name_styles() {
        let mut vmf = Vmf::new();
        let plain = vmf.add_entity(instance("door_1", "a.vmf"));
        let mut suffixed = instance("door_2", "a.vmf");
        suffixed.set("fixup_style", "1");
        let suffixed = vmf.add_entity(suffixed);
        let ctx = MapContext::new(vmf);

        assert_eq!(ctx.local_name(plain, "relay"), "door_1-relay");
        assert_eq!(ctx.local_name(suffixed, "relay"), "relay-door_2");
        assert_eq!(ctx.local_name(plain, "@exit"), "@exit");
        assert_eq!(ctx.local_name(plain, "!player"), "!player");
        assert_eq!(ctx.local_name(plain, ""), "");
    }

    #[test]
    fn test_add_suffix_and_file_tracking() {
        let mut vmf = Vmf::new();
        let inst = vmf.add_entity(instance("a", "instances/BEE2/light.vmf"));
        let mut ctx = MapContext::new(vmf);
        assert!(ctx.has_instance("instances/bee2/LIGHT.vmf"));

        ctx.add_suffix(inst, "_var2");
        assert_eq!(ctx.vmf.entity(inst).file(), "instances/BEE2/light_var2.vmf");
        assert!(ctx.has_instance("instances/bee2/light_var2.vmf"));
        assert_eq!(ctx.instances(), vec![inst]);
    }
}
