//! FWA Backend - packet-filter backends for the firewall agent
//!
//! The engine talks to the packet filter only through [`FilterBackend`]. This
//! crate provides:
//!
//! - [`IptablesBackend`]: renders chain specs into typed [`Script`]s and runs
//!   them through a privileged [`CommandChannel`]
//! - [`SuShellChannel`] / [`RetryingChannel`]: `su -c` execution with a direct
//!   shell fallback, timeouts and retry of transient failures
//! - [`MemoryBackend`]: map-backed backend with failure injection
//! - [`ScriptedChannel`]: channel double recording rendered scripts

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod backend;
mod channel;
mod config;
mod error;
mod iptables;
mod memory;
mod script;
mod scripted;

pub use backend::*;
pub use channel::*;
pub use config::*;
pub use error::*;
pub use iptables::*;
pub use memory::*;
pub use script::*;
pub use scripted::*;
