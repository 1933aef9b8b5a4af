//! Post-processing and sanitization of outbound newsletter emails.
//!
//! [`generator::EmailGenerator`] is the entry point: it renders a
//! [`generator::GenerationRequest`] into the final HTML (or plain-text) body.

pub mod config;
pub mod dom;
pub mod generator;
pub mod inliner;
pub mod links;
pub mod merge_tags;
pub mod sanitizer;
pub mod shortcodes;
pub mod templates;
pub mod tracking;

pub use generator::{EmailGenerator, EmailKind, GenerateError, GenerationRequest};
