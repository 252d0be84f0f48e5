//! Declarative catalogues: intents and tool actions.
//!
//! The intent catalogue loads from TOML, validates, and hot-reloads on
//! checksum change with an atomic swap. The tool action registry holds
//! the callable external actions, their typed schemas, and the adapters
//! that invoke them.

pub mod actions;
pub mod intents;
pub mod reload;

pub use actions::{
    ArgIssue, HttpToolAdapter, InvocationCtx, ParamSpec, ParamType, SideEffect, ToolAction,
    ToolActionRegistry, ToolAdapter,
};
pub use intents::{IntentCatalog, IntentRegistry};
