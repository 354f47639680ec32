//! Core orchestration engine for ProjectWarden.
//!
//! Wires the leaf components (canonical hasher, redactor, target resolver,
//! plan manager, confirmation tokens, mutation executor, audit log) into the
//! [`service::ControlService`] facade that implements the seven tool
//! operations. The framing layer (stdio/HTTP) lives outside this workspace
//! and talks to the facade only.

pub mod audit;
pub mod confirm;
pub mod executor;
pub mod hash;
pub mod plan;
pub mod redact;
pub mod resolver;
pub mod service;

pub use service::ControlService;
