//! Translation between the browser-facing chat API and the upstream
//! `OpenAI`-compatible completions API.
//!
//! The core of the gateway: reshapes inbound chat payloads into upstream
//! requests and decodes the upstream event stream into caller-facing deltas.
//! Everything here is pure (no I/O); the transport lives in [`crate::relay`].

pub mod chat_types;
pub mod request;
pub mod streaming;
pub mod upstream_types;
