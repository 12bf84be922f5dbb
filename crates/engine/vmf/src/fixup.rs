//! Instance fixup variables (`replaceNN` keyvalues)

use crate::keyvalues::conv_bool;
use serde::{Deserialize, Serialize};

fn strip_dollar(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

/// Ordered, case-insensitive `$var -> value` map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixups {
    vars: Vec<(String, String)>,
}

impl Fixups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = strip_dollar(name);
        self.vars.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Look up a variable; the leading `$` is optional
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.vars[i].1.as_str())
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set a variable, keeping its slot if it already exists
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.position(name) {
            Some(i) => self.vars[i].1 = value,
            None => self.vars.push((strip_dollar(name).to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.vars.remove(i).1)
    }

    pub fn bool(&self, name: &str) -> bool {
        self.get(name).map(|v| conv_bool(v, false)).unwrap_or(false)
    }

    pub fn int(&self, name: &str, default: i64) -> i64 {
        self.get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn float(&self, name: &str, default: f64) -> f64 {
        self.get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Iterate `(name, value)` pairs in insertion order, names without `$`
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replace `$var` references in `text` with their values
    ///
    /// `!$var` substitutes the inverted boolean of the variable. Unknown
    /// variables are left untouched.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(pos) = rest.find('$') {
            let name_len = rest[pos + 1..]
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len() - pos - 1);
            let name = &rest[pos + 1..pos + 1 + name_len];
            let inverted = rest[..pos].ends_with('!');
            let head = if inverted { &rest[..pos - 1] } else { &rest[..pos] };

            match self.get(name).filter(|_| !name.is_empty()) {
                Some(value) => {
                    out.push_str(head);
                    if inverted {
                        out.push_str(if conv_bool(value, false) { "0" } else { "1" });
                    } else {
                        out.push_str(value);
                    }
                }
                None => {
                    out.push_str(&rest[..pos + 1 + name_len]);
                }
            }
            rest = &rest[pos + 1 + name_len..];
        }
        out.push_str(rest);
        out
    }

    /// Parse the value of a `replaceNN` key (`$var value`)
    pub fn parse_replace(value: &str) -> Option<(String, String)> {
        let value = value.trim_start();
        let body = value.strip_prefix('$')?;
        match body.split_once(' ') {
            Some((name, v)) => Some((name.to_string(), v.to_string())),
            None => Some((body.to_string(), String::new())),
        }
    }

    /// `replaceNN` keyvalues, numbered from 01 in insertion order
    pub fn to_replace_keys(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, (k, v))| (format!("replace{:02}", i + 1), format!("${k} {v}")))
            .collect()
    }
}

/// True for `replace01`-style keys
pub fn is_replace_key(key: &str) -> bool {
    key.len() > 7
        && key[..7].eq_ignore_ascii_case("replace")
        && key[7..].chars().all(|c| c.is_ascii_digit())
}
