//! Backend adapters.
//!
//! Each adapter implements [`LlmProvider`](crate::llm::provider::LlmProvider)
//! and performs a single HTTP call per request.

pub mod chat;
pub mod direct;
pub mod gateway;
pub mod grounded;

pub use direct::DirectProvider;
pub use gateway::GatewayProvider;
pub use grounded::GroundedProvider;
