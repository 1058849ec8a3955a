//! Financial Analyst Agent
//!
//! An autonomous research agent that answers financial questions by:
//! - Reasoning over the full conversation with an LLM
//! - Retrieving live market data via web search
//! - Generating and executing Python analysis code in a subprocess sandbox
//! - Self-correcting when a tool invocation fails
//! - Emitting a final answer (with any rendered charts) within a bounded
//!   number of iterations
//!
//! AGENT LOOP:
//! REASON → DISPATCH → OBSERVE → { REASON | CORRECT | DONE }

pub mod agent;
pub mod api;
pub mod correction;
pub mod error;
pub mod gemini;
pub mod models;
pub mod reasoner;
pub mod sandbox;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
