//! Instance Location Index
//!
//! Maps package item ids and variant indices to the instance files placed
//! in the map, and resolves the selector strings rules use to name them:
//!
//! ```text
//! <ITEM_ID>              every variant of the item
//! <ITEM_ID:0,2>          the listed variant indices
//! <ITEM_ID:btn_white>    named variant groups
//! <ITEM_ID:bee2_frame>   a custom instance registered by name
//! [special]              a configured alias for another selector
//! instances/a.vmf        a raw file path
//! ```
//!
//! Several bracketed selectors can be joined with commas.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::warn;

/// Named variant indices shared by the stock items
const SUBITEM_NAMES: &[(&str, &[usize])] = &[
    // Cube
    ("standard", &[0]),
    ("companion", &[1]),
    ("comp", &[1]),
    ("reflect", &[2]),
    ("redirect", &[2]),
    ("reflection", &[2]),
    ("redirection", &[2]),
    ("laser", &[2]),
    ("sphere", &[3]),
    ("edgeless", &[3]),
    ("ball", &[3]),
    ("franken", &[4]),
    ("monster", &[4]),
    // Button
    ("weighted_white", &[0]),
    ("floor_white", &[0]),
    ("weighted_black", &[1]),
    ("floor_black", &[1]),
    ("cube_white", &[2]),
    ("cube_black", &[3]),
    ("sphere_white", &[4]),
    ("sphere_black", &[5]),
    ("ball_white", &[4]),
    ("ball_black", &[5]),
    ("edgeless_white", &[4]),
    ("edgeless_black", &[5]),
    ("btn_weighted", &[0, 1]),
    ("btn_floor", &[0, 1]),
    ("btn_cube", &[2, 3]),
    ("btn_sphere", &[4, 5]),
    ("btn_ball", &[4, 5]),
    ("btn_edgeless", &[4, 5]),
    ("btn_white", &[0, 2, 4]),
    ("btn_black", &[1, 3, 5]),
    // Track platform
    ("track_bottom_grate", &[0]),
    ("track_bottom", &[1]),
    ("track_middle", &[2]),
    ("track_top", &[3]),
    ("track_platform", &[4]),
    ("track_plat", &[4]),
    ("track_platform_oscillate", &[5]),
    ("track_plat_oscil", &[5]),
    ("track_single", &[6]),
    ("track_plats", &[4, 5]),
    ("track_platforms", &[4, 5]),
    ("track_rail", &[1, 2, 3, 6]),
    // Funnels
    ("fun_emitter", &[0]),
    ("fun_white", &[1]),
    ("fun_black", &[2]),
    ("fun_frame", &[1, 2]),
    // Fizzler
    ("fizz_base", &[0]),
    ("fizz_mdl", &[1]),
    ("fizz_model", &[1]),
];

// Aliases may refer to each other; stop well before a loop could matter
const MAX_ALIAS_DEPTH: usize = 8;

/// Which instance of an item a file belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variant {
    Index(usize),
    Custom(String),
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Index(i) => write!(f, "{i}"),
            Variant::Custom(name) => write!(f, "bee2_{name}"),
        }
    }
}

/// Normalise a file path for comparisons
pub fn fold_path(path: &str) -> String {
    path.trim().replace('\\', "/").to_ascii_lowercase()
}

/// Lookup table from items to their instance files
#[derive(Debug, Default)]
pub struct InstanceLocs {
    /// Folded item id -> files by variant index (`""` for unused slots)
    files: HashMap<String, Vec<String>>,
    /// Folded item id -> custom name -> file
    custom: HashMap<String, BTreeMap<String, String>>,
    /// Folded alias -> selector
    specials: HashMap<String, String>,
    item_for_file: HashMap<String, (String, Variant)>,
    cache: RefCell<HashMap<String, Vec<String>>>,
}

impl InstanceLocs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the instance files of an item, by variant index
    pub fn add_item<S: AsRef<str>>(&mut self, item_id: &str, files: &[S]) {
        let files: Vec<String> = files
            .iter()
            .map(|f| {
                let f = f.as_ref();
                if f == "." {
                    String::new()
                } else {
                    f.to_string()
                }
            })
            .collect();
        for (i, file) in files.iter().enumerate() {
            if !file.is_empty() {
                self.item_for_file
                    .insert(fold_path(file), (item_id.to_string(), Variant::Index(i)));
            }
        }
        self.files.insert(item_id.to_ascii_lowercase(), files);
        self.cache.borrow_mut().clear();
    }

    /// Register a named custom instance for an item
    pub fn add_custom(&mut self, item_id: &str, name: &str, file: &str) {
        let file = if file == "." { "" } else { file };
        if !file.is_empty() {
            self.item_for_file.insert(
                fold_path(file),
                (item_id.to_string(), Variant::Custom(name.to_ascii_lowercase())),
            );
        }
        self.custom
            .entry(item_id.to_ascii_lowercase())
            .or_default()
            .insert(name.to_ascii_lowercase(), file.to_string());
        self.cache.borrow_mut().clear();
    }

    /// Register a `[name]` alias
    pub fn add_special(&mut self, name: &str, selector: &str) {
        self.specials
            .insert(name.to_ascii_lowercase(), selector.to_string());
        self.cache.borrow_mut().clear();
    }

    /// Files used by one variant of an item
    ///
    /// Unknown ids and indices give an empty list.
    pub fn lookup(&self, item_id: &str, variant: usize) -> Vec<String> {
        self.files
            .get(&item_id.to_ascii_lowercase())
            .and_then(|files| files.get(variant))
            .filter(|f| !f.is_empty())
            .map(|f| vec![f.clone()])
            .unwrap_or_default()
    }

    /// Every file registered for an item
    pub fn item_files(&self, item_id: &str) -> &[String] {
        self.files
            .get(&item_id.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// File of a named custom instance
    pub fn custom(&self, item_id: &str, name: &str) -> Option<&str> {
        self.custom
            .get(&item_id.to_ascii_lowercase())?
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Reverse lookup from a file to the item that uses it
    pub fn item_for_file(&self, path: &str) -> Option<(&str, &Variant)> {
        self.item_for_file
            .get(&fold_path(path))
            .map(|(id, var)| (id.as_str(), var))
    }

    /// Resolve a selector into the files it names, in selector order
    pub fn resolve(&self, selector: &str) -> Vec<String> {
        if let Some(hit) = self.cache.borrow().get(selector) {
            return hit.clone();
        }
        let out = self.resolve_uncached(selector, 0);
        self.cache
            .borrow_mut()
            .insert(selector.to_string(), out.clone());
        out
    }

    /// Resolve a selector into a set of folded paths for matching
    pub fn resolve_filter(&self, selector: &str) -> HashSet<String> {
        self.resolve(selector)
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| fold_path(f))
            .collect()
    }

    /// Check whether `file` is one of the files named by `selector`
    pub fn matches(&self, selector: &str, file: &str) -> bool {
        self.resolve_filter(selector).contains(&fold_path(file))
    }

    /// Resolve to a single file
    ///
    /// The first match wins; several matches log a warning.
    pub fn resolve_one(&self, selector: &str) -> Option<String> {
        let mut files = self.resolve(selector);
        if files.len() > 1 {
            warn!("Selector \"{selector}\" returned multiple instances");
        }
        if files.is_empty() {
            None
        } else {
            Some(files.swap_remove(0))
        }
    }

    fn resolve_uncached(&self, selector: &str, depth: usize) -> Vec<String> {
        let Some(groups) = split_groups(selector) else {
            return vec![selector.trim().to_string()];
        };
        let mut out = Vec::new();
        for group in groups {
            if let Some(body) = group.strip_prefix('<').and_then(|g| g.strip_suffix('>')) {
                match self.resolve_item(body) {
                    Some(files) => out.extend(files),
                    None => return Vec::new(),
                }
            } else if let Some(name) = group.strip_prefix('[').and_then(|g| g.strip_suffix(']')) {
                let folded = name.trim().to_ascii_lowercase();
                match self.specials.get(&folded) {
                    Some(inner) if depth < MAX_ALIAS_DEPTH => {
                        out.extend(self.resolve_uncached(inner, depth + 1))
                    }
                    Some(_) => warn!("Instance category \"{name}\" nests too deeply"),
                    None => warn!("\"{name}\" is not a valid instance category!"),
                }
            }
        }
        out
    }

    fn resolve_item(&self, body: &str) -> Option<Vec<String>> {
        let (item_id, subitems) = match body.split_once(':') {
            Some((id, subs)) => (id.trim(), Some(subs)),
            None => (body.trim(), None),
        };
        let folded_id = item_id.to_ascii_lowercase();
        let Some(files) = self.files.get(&folded_id) else {
            warn!("\"{item_id}\" is not a valid item!");
            return None;
        };
        let Some(subitems) = subitems else {
            return Some(files.iter().filter(|f| !f.is_empty()).cloned().collect());
        };

        let mut out = Vec::new();
        for value in subitems.split(',') {
            let value = value.trim().to_ascii_lowercase();
            if let Some(custom) = value.strip_prefix("bee2_") {
                match self.custom.get(&folded_id).and_then(|c| c.get(custom)) {
                    Some(file) if !file.is_empty() => out.push(file.clone()),
                    Some(_) => {}
                    None => warn!("Invalid custom instance name \"{custom}\" for <{item_id}>"),
                }
                continue;
            }
            let indices: Vec<usize> = match SUBITEM_NAMES.iter().find(|(n, _)| *n == value) {
                Some((_, ind)) => ind.to_vec(),
                None => match value.parse() {
                    Ok(i) => vec![i],
                    Err(_) => {
                        warn!("\"{value}\" is not a valid instance subtype or index!");
                        continue;
                    }
                },
            };
            out.extend(
                indices
                    .into_iter()
                    .filter_map(|i| files.get(i))
                    .filter(|f| !f.is_empty())
                    .cloned(),
            );
        }
        Some(out)
    }
}

/// Split `<a>, [b]` into bracketed groups, or `None` for a raw path
fn split_groups(selector: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let mut rest = selector.trim_start();
    while let Some(open) = rest.chars().next() {
        let close = match open {
            '<' => '>',
            '[' => ']',
            _ => break,
        };
        let end = rest.find(close)?;
        groups.push(&rest[..=end]);
        rest = rest[end + 1..].trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }
    if groups.is_empty() {
        None
    } else {
        Some(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locs() -> InstanceLocs {
        let mut locs = InstanceLocs::new();
        locs.add_item(
            "ITEM_BUTTON_FLOOR",
            &[
                "instances/p2editor/button_weighted_white.vmf",
                "instances/p2editor/button_weighted_black.vmf",
                "instances/p2editor/button_cube_white.vmf",
                "",
            ],
        );
        locs.add_item("ITEM_INDICATOR_PANEL", &["instances/p2editor/indicator_panel.vmf"]);
        locs.add_custom("ITEM_BUTTON_FLOOR", "Frame", "instances/bee2/button_frame.vmf");
        locs.add_special("indPan", "<ITEM_INDICATOR_PANEL>");
        locs
    }

    #[test]
    fn test_lookup() {
        let locs = locs();
        assert_eq!(
            locs.lookup("item_button_floor", 1),
            vec!["instances/p2editor/button_weighted_black.vmf"]
        );
        assert!(locs.lookup("item_button_floor", 3).is_empty());
        assert!(locs.lookup("ITEM_MISSING", 0).is_empty());
    }

    #[test]
    fn test_selectors() {
        let locs = locs();
        assert_eq!(locs.resolve("<ITEM_BUTTON_FLOOR>").len(), 3);
        assert_eq!(
            locs.resolve("<ITEM_BUTTON_FLOOR:btn_white>"),
            vec![
                "instances/p2editor/button_weighted_white.vmf",
                "instances/p2editor/button_cube_white.vmf",
            ]
        );
        assert_eq!(
            locs.resolve("<item_button_floor:bee2_frame>, [INDPAN]"),
            vec![
                "instances/bee2/button_frame.vmf",
                "instances/p2editor/indicator_panel.vmf",
            ]
        );
        assert_eq!(locs.resolve("instances/raw.vmf"), vec!["instances/raw.vmf"]);
        assert!(locs.resolve("<ITEM_NOPE:0>").is_empty());
    }

    #[test]
    fn test_resolve_one_and_matching() {
        let locs = locs();
        assert_eq!(
            locs.resolve_one("<ITEM_BUTTON_FLOOR:0,1>").as_deref(),
            Some("instances/p2editor/button_weighted_white.vmf")
        );
        assert_eq!(locs.resolve_one("<ITEM_BUTTON_FLOOR:3>"), None);
        assert!(locs.matches("[indPan]", "Instances\\P2Editor\\Indicator_Panel.vmf"));
    }

    #[test]
    fn test_item_for_file() {
        let locs = locs();
        let (id, variant) = locs
            .item_for_file("instances/p2editor/button_cube_white.vmf")
            .unwrap();
        assert_eq!(id, "ITEM_BUTTON_FLOOR");
        assert_eq!(*variant, Variant::Index(2));
        let (_, custom) = locs.item_for_file("instances/bee2/button_frame.vmf").unwrap();
        assert_eq!(custom.to_string(), "bee2_frame");
    }
}
