//! Mixture-of-Experts voting engine.
//!
//! Polls multiple LLM experts with role-specific prompts, aggregates
//! their votes into a deterministic weighted consensus, optionally runs
//! debate rounds, and degrades to single-LLM mode when voting is
//! disabled or the consensus is unusable.

pub mod consensus;
pub mod engine;
pub mod experts;

pub use engine::VotingEngine;
