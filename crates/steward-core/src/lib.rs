//! # steward-core
//!
//! Core business logic for Steward, the remote operator console for a
//! command-execution agent.
//!
//! This crate is framework-agnostic and can be used by:
//! - HTTP server (via REST/WebSocket)
//! - Chat transport daemons (Telegram, Slack, ...)
//! - Local CLI frontends
//!
//! ## Key Concepts
//!
//! - **Session**: Persistent per-user conversational state (context, working
//!   directory, counters)
//! - **ExecutionHandle**: The live, owned representation of one in-flight
//!   agent invocation for a user
//! - **Intent**: Whether a request is read-only, mutating, or a control
//!   command handled by the engine itself

pub mod access;
pub mod attachments;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod intent;
pub mod persistence;
pub mod prompt;
pub mod registry;
pub mod session;
pub mod shell;
pub mod supervisor;
pub mod transcript;

// Re-export commonly used types
pub use access::AccessGate;
pub use config::Config;
pub use coordinator::{ExecutionCoordinator, Request, Response};
pub use events::{EventBus, ExecutionEvent};
pub use intent::{Intent, IntentClassifier};
pub use session::{Session, SessionStore};
