//! Logic crate - Conditions engine for the map pre-compiler
//!
//! Declarative conditions are tested against every `func_instance` in the
//! map. Passing conditions run their results, which edit the instance and
//! the map-wide state held in [`MapContext`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Rule Engine                           │
//! ├─────────────────────────────────────────────────────────┤
//! │  RuleRegistry                                            │
//! │  ├── Flag and result names (case-insensitive)           │
//! │  ├── One-shot scope overrides                           │
//! │  └── Condition block parser                             │
//! ├─────────────────────────────────────────────────────────┤
//! │  Conditions                                              │
//! │  ├── Flags (AND / OR combined)                          │
//! │  ├── Results and else results                           │
//! │  └── Priority ordering                                  │
//! ├─────────────────────────────────────────────────────────┤
//! │  RuleTx                                                  │
//! │  ├── Record of every result run                         │
//! │  └── Global one-shot tracking                           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use logic::{Action, Condition, Flag, MapContext, OneShot, RuleEngine};
//! use vmf::{Entity, Vmf};
//!
//! let mut vmf = Vmf::new();
//! let mut door = Entity::new("func_instance");
//! door.set("file", "instances/door.vmf");
//! vmf.add_entity(door);
//!
//! let mut engine = RuleEngine::new();
//! engine.add(
//!     Condition::new()
//!         .with_flag(Flag::Instance("instances/door.vmf".into()))
//!         .then(Action::Suffix("locked".into()), OneShot::None),
//! );
//!
//! let mut ctx = MapContext::new(vmf);
//! engine.run(&mut ctx).unwrap();
//! let id = ctx.instances()[0];
//! assert_eq!(ctx.vmf.entity(id).file(), "instances/door_locked.vmf");
//! ```

mod action;
mod condition;
mod context;
mod engine;
mod error;
mod flag;
mod registry;
mod transaction;

pub use action::{
    Action, CollideBox, Flow, GlobalInstance, InstVarSuffix, IoChange, OutputSpec, Overlay,
    RandomChoice, TemplatePlacement, TileEdit,
};
pub use condition::{Combinator, Condition, OneShot, Slot};
pub use context::{MapContext, Settings};
pub use engine::RuleEngine;
pub use error::{Error, Result};
pub use flag::{CompareOp, Flag};
pub use registry::{default_scope, ActionParser, FlagParser, RuleRegistry};
pub use transaction::{RuleTx, TxChange};
