//! FWA Core - policy model and compiler for the per-app network firewall agent
//!
//! This crate holds the pure part of the agent:
//!
//! - the subject model and the protected id range
//! - the static path catalog mapping capabilities to filter patterns
//! - the policy compiler producing ordered chain specifications and signatures
//! - the vendor-alias normalization applied to live chains
//!
//! Nothing in here touches the packet filter. Backends render [`ChainSpec`]
//! values; the engine plans and applies them.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod catalog;
mod chain;
mod compiler;
mod error;
mod policy;
mod subject;
mod summary;

pub use catalog::*;
pub use chain::*;
pub use compiler::*;
pub use error::*;
pub use policy::*;
pub use subject::*;
pub use summary::*;
