//! conductor: a vendor-neutral agent runtime.
//!
//! A turn loop calls a model backend, gates each requested tool call through
//! a permission policy, runs the tools and feeds the results back until the
//! model stops asking for tools. Anthropic Messages and OpenAI Chat
//! Completions are supported through protocol adapters over one canonical
//! message model.
//!
//! # Quick Start
//!
//! ```no_run
//! use conductor::prelude::*;
//! use futures::StreamExt;
//!
//! # async fn example() -> conductor::error::Result<()> {
//! let config = ConductorConfig::from_env()?;
//! let runtime = AgentRuntime::builder(config).working_dir(".").build()?;
//! let mut turn = runtime.run_turn(
//!     vec![CanonicalMessage::user("Summarize README.md")],
//!     "anthropic",
//!     ToolSet::ReadOnly,
//!     TurnOptions::default(),
//! )?;
//! while let Some(event) = turn.events.next().await {
//!     if let AgentEventPayload::TextDelta { text } = event.payload {
//!         print!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod error;
pub mod permissions;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub mod subagents;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
