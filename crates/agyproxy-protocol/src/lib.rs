//! Wire types for the exposed OpenAI-compatible surface and the upstream
//! Cloud Code internal API, plus an incremental SSE parser.
//!
//! This crate is IO-free; everything here is plain serde data.

pub mod gemini;
pub mod openai;
pub mod sse;
