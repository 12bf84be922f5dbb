//! Entity I/O connections (`connections` block entries)

use crate::math::format_num;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between output fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Separator {
    #[default]
    Comma,
    /// `\x1b`, written by newer Hammer builds
    Escape,
}

impl Separator {
    fn as_char(self) -> char {
        match self {
            Separator::Comma => ',',
            Separator::Escape => '\x1b',
        }
    }
}

/// A single `"OnTrigger" "target,Input,params,delay,times"` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub output: String,
    pub target: String,
    pub input: String,
    pub params: String,
    pub delay: f64,
    /// `-1` fires forever
    pub times: i32,
    pub sep: Separator,
}

impl Output {
    pub fn new(output: impl Into<String>, target: impl Into<String>, input: impl Into<String>) -> Self {
        Output {
            output: output.into(),
            target: target.into(),
            input: input.into(),
            params: String::new(),
            delay: 0.0,
            times: -1,
            sep: Separator::Comma,
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    pub fn only_once(mut self) -> Self {
        self.times = 1;
        self
    }

    /// Parse the value half of a connection keyvalue
    ///
    /// Surplus commas belong to the parameter field, so everything between
    /// the input and the trailing delay/times pair is joined back together.
    pub fn parse(output: &str, value: &str) -> Option<Output> {
        let sep = if value.contains('\x1b') {
            Separator::Escape
        } else {
            Separator::Comma
        };
        let parts: Vec<&str> = value.split(sep.as_char()).collect();
        if parts.len() < 5 {
            return None;
        }
        let n = parts.len();
        let delay = parts[n - 2].trim().parse().unwrap_or(0.0);
        let times = parts[n - 1].trim().parse().unwrap_or(-1);
        Some(Output {
            output: output.to_string(),
            target: parts[0].to_string(),
            input: parts[1].to_string(),
            params: parts[2..n - 2].join(&sep.as_char().to_string()),
            delay,
            times,
            sep,
        })
    }

    /// Serialized value half of the keyvalue
    pub fn value(&self) -> String {
        let s = self.sep.as_char();
        format!(
            "{}{s}{}{s}{}{s}{}{s}{}",
            self.target,
            self.input,
            self.params,
            format_num(self.delay),
            self.times
        )
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}.{}", self.output, self.target, self.input)?;
        if !self.params.is_empty() {
            write!(f, "({})", self.params)?;
        }
        if self.delay != 0.0 {
            write!(f, " after {}s", format_num(self.delay))?;
        }
        Ok(())
    }
}
