//! Entity recognition, validation, and the slot-filling dialog machine.
//!
//! Three extraction strategies (pattern, LLM, context) run concurrently
//! and merge by highest confidence per normalized value; the validator
//! normalizes and range-checks; the slot machine drives follow-up
//! questions until an intent's required slots are complete.

pub mod extract;
pub mod normalize;
pub mod patterns;
pub mod slots;

pub use extract::EntityRecognizer;
pub use normalize::EntityValidator;
pub use slots::{DialogState, SlotMachine, SlotOutcome};
