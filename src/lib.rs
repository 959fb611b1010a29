//! Market Intelligence Desk conversational core
//!
//! A session-oriented market research assistant that:
//! - Runs a bounded tool-calling loop per conversational turn
//! - Grounds answers in a versioned knowledge base via rank fusion
//! - Gates every input and output through a deterministic safety pipeline
//! - Meters model usage with a sliding-window rate limiter and cost ledger
//! - Reaches market data and the model only through typed trait seams
//!
//! TURN LOOP:
//! INPUT → GATE → MODEL → TOOLS? → MODEL → … → GATE → ANSWER

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod retrieval;
pub mod safety;
pub mod session;
pub mod tools;

pub use error::{CoreError, Result};

// Re-export common types
pub use config::CoreConfig;
pub use models::*;
pub use orchestrator::Orchestrator;
