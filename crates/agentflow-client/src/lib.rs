//! # agentflow-client
//!
//! Collaborator contracts ([`AgentApi`], [`AppApi`]), the reqwest-backed
//! [`HttpBackend`], the SSE event decoder and a scripted [`MockBackend`].

pub mod api;
pub mod http;
pub mod mock;
pub mod sse;

pub use api::{AgentApi, AppApi, EventStream};
pub use http::HttpBackend;
pub use mock::{ChatCall, ConfirmCall, MockBackend, MockOp, MockStream};
