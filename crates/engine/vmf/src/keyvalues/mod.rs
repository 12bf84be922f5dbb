//! Block-structured key-value trees
//!
//! Every map, rule file and template library shares this grammar: nested
//! `name { ... }` blocks holding `"key" "value"` pairs. Names keep their
//! original case but all lookups compare case-insensitively.

mod parser;
mod serializer;

pub use parser::parse_keyvalues;
pub use serializer::{serialize_keyvalues, write_keyvalue};

use serde::{Deserialize, Serialize};

/// Value held by a key-value node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Plain string value
    Leaf(String),
    /// Ordered child nodes
    Block(Vec<Keyvalue>),
}

/// A single named node in a key-value tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyvalue {
    name: String,
    value: Value,
}

impl Keyvalue {
    /// Create a leaf node
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Keyvalue {
            name: name.into(),
            value: Value::Leaf(value.into()),
        }
    }

    /// Create a block node
    pub fn block(name: impl Into<String>, children: Vec<Keyvalue>) -> Self {
        Keyvalue {
            name: name.into(),
            value: Value::Block(children),
        }
    }

    /// The node name with its original case
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename this node
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Case-insensitive name comparison
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Access the raw value
    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// The leaf value, or `""` for blocks
    pub fn value(&self) -> &str {
        match &self.value {
            Value::Leaf(v) => v,
            Value::Block(_) => "",
        }
    }

    /// Replace the value with a leaf string
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = Value::Leaf(value.into());
    }

    /// Check if this node is a block
    pub fn has_children(&self) -> bool {
        matches!(self.value, Value::Block(_))
    }

    /// Child nodes, empty for leaves
    pub fn children(&self) -> &[Keyvalue] {
        match &self.value {
            Value::Block(c) => c,
            Value::Leaf(_) => &[],
        }
    }

    /// Mutable child list; converts a leaf into an empty block first
    pub fn children_mut(&mut self) -> &mut Vec<Keyvalue> {
        if let Value::Leaf(_) = self.value {
            self.value = Value::Block(Vec::new());
        }
        match &mut self.value {
            Value::Block(c) => c,
            Value::Leaf(_) => unreachable!(),
        }
    }

    /// Consume the node, returning its children
    pub fn into_children(self) -> Vec<Keyvalue> {
        match self.value {
            Value::Block(c) => c,
            Value::Leaf(_) => Vec::new(),
        }
    }

    /// Append a child node
    pub fn push(&mut self, child: Keyvalue) {
        self.children_mut().push(child);
    }

    /// Find the last child with the given name
    ///
    /// Later keys override earlier ones, matching how the game reads them.
    pub fn find(&self, name: &str) -> Option<&Keyvalue> {
        self.children().iter().rev().find(|kv| kv.is(name))
    }

    /// Iterate over every child with the given name, in order
    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Keyvalue> + 'a {
        self.children().iter().filter(move |kv| kv.is(name))
    }

    /// Check for a child with the given name
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Leaf value of a child, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name).map(Keyvalue::value)
    }

    /// Leaf value of a child, falling back to a default
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Boolean value of a child
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.get(name)
            .map(|v| conv_bool(v, default))
            .unwrap_or(default)
    }

    /// Integer value of a child
    pub fn get_int(&self, name: &str, default: i64) -> i64 {
        self.get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Float value of a child
    pub fn get_float(&self, name: &str, default: f64) -> f64 {
        self.get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Set a child leaf, replacing the last existing one or appending
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let children = self.children_mut();
        match children.iter_mut().rev().find(|kv| kv.is(name)) {
            Some(kv) => kv.set_value(value),
            None => children.push(Keyvalue::leaf(name, value)),
        }
    }
}

/// Convert a string into a boolean using the usual map conventions
pub fn conv_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "t" => true,
        "0" | "false" | "no" | "n" | "f" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Keyvalue {
        Keyvalue::block(
            "Root",
            vec![
                Keyvalue::leaf("Key", "one"),
                Keyvalue::leaf("key", "two"),
                Keyvalue::leaf("Flag", "yes"),
                Keyvalue::leaf("Count", " 12 "),
                Keyvalue::block("Sub", vec![Keyvalue::leaf("a", "b")]),
            ],
        )
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_last_wins() {
        let kv = sample();
        assert_eq!(kv.get("KEY"), Some("two"));
        assert_eq!(kv.find_all("key").count(), 2);
        assert!(kv.get_bool("flag", false));
        assert_eq!(kv.get_int("count", 0), 12);
        assert_eq!(kv.get_or("missing", "dflt"), "dflt");
    }

    #[test]
    fn test_set_replaces_or_appends() {
        let mut kv = sample();
        kv.set("key", "three");
        assert_eq!(kv.get("key"), Some("three"));
        assert_eq!(kv.children()[0].value(), "one");

        kv.set("new", "x");
        assert_eq!(kv.children().last().map(Keyvalue::name), Some("new"));
    }

    #[test]
    fn test_leaf_converts_to_block() {
        let mut kv = Keyvalue::leaf("x", "y");
        assert!(!kv.has_children());
        kv.push(Keyvalue::leaf("a", "b"));
        assert!(kv.has_children());
        assert_eq!(kv.value(), "");
    }

    #[test]
    fn test_conv_bool() {
        assert!(conv_bool("1", false));
        assert!(!conv_bool("False", true));
        assert!(conv_bool("garbage", true));
    }
}
