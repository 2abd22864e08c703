//! `fwa compile`: show what a policy compiles to without touching the filter.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fwa_backend::{BackendConfig, IptablesBackend, ScriptedChannel};
use fwa_core::{ChainSpec, PolicySignature, Subject, compile};
use serde::Serialize;

use crate::input::{parse_policies, read_input};
use crate::output::print_json;

/// Arguments for `fwa compile`.
#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Policy JSON (one object or an array). Use "-" for stdin.
    #[arg(long)]
    pub input: PathBuf,

    /// Also render the iptables script each policy installs.
    #[arg(long, default_value_t = false)]
    pub script: bool,
}

/// Compilation result for one policy.
#[derive(Debug, Serialize)]
pub struct CompiledPolicy {
    pub subject: Subject,
    pub signature: PolicySignature,
    /// No chain is needed; the subject stays unfiltered.
    pub unrestricted: bool,
    pub chain: ChainSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

pub fn run(args: &CompileArgs, backend: &BackendConfig) -> Result<()> {
    let policies = parse_policies(&read_input(&args.input)?)?;
    let renderer = IptablesBackend::new(ScriptedChannel::new(), backend);

    let mut compiled = Vec::with_capacity(policies.len());
    for policy in &policies {
        let (chain, signature) = compile(policy);
        let script = if args.script {
            let script = renderer
                .install_script(policy.subject, &chain)
                .with_context(|| format!("failed to render script for {}", policy.subject))?;
            Some(script.render(&backend.iptables))
        } else {
            None
        };
        compiled.push(CompiledPolicy {
            subject: policy.subject,
            signature,
            unrestricted: chain.is_empty(),
            chain,
            script,
        });
    }
    print_json(&compiled)
}
