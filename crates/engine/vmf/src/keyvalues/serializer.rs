use super::{Keyvalue, Value};
use std::fmt::Write;

fn is_bare_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Append a single node (and its children) to `out` at the given depth
pub fn write_keyvalue(out: &mut String, kv: &Keyvalue, depth: usize) {
    let indent = "\t".repeat(depth);
    match kv.raw() {
        Value::Leaf(v) => {
            let _ = writeln!(out, "{indent}\"{}\" \"{}\"", kv.name(), v);
        }
        Value::Block(children) => {
            if is_bare_name(kv.name()) {
                let _ = writeln!(out, "{indent}{}", kv.name());
            } else {
                let _ = writeln!(out, "{indent}\"{}\"", kv.name());
            }
            let _ = writeln!(out, "{indent}{{");
            for child in children {
                write_keyvalue(out, child, depth + 1);
            }
            let _ = writeln!(out, "{indent}}}");
        }
    }
}

/// Serialize a list of top-level nodes into text
pub fn serialize_keyvalues(items: &[Keyvalue]) -> String {
    let mut out = String::new();
    for kv in items {
        write_keyvalue(&mut out, kv, 0);
    }
    out
}
