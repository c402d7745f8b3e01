//! These models represent the values passed between the pipeline stages
//!
//! A request's output travels through several formats:
//! - provider streaming payloads (gemini / openai server-sent events), read by the client
//! - [`fragment::ResponseFragment`], the internal unit handed from the client to the transport
//! - vercel data stream protocol lines, written by the server and read back by consumers
//!
//! We always convert the external formats into the internal structs at the edges.
pub mod fragment;
