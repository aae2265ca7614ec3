//! Agent loop primitives (turns, events, compaction).

pub mod compaction;
pub mod events;
pub mod runner;
pub mod types;

pub use events::*;
pub use runner::*;
pub use types::*;
