//! iptables adapter.
//!
//! Renders [`ChainSpec`]s into iptables scripts and parses `iptables -S`
//! listings back into directives. Layout:
//!
//! ```text
//! OUTPUT    -> FA_APP    -m owner --uid-owner U -j FAU_U
//! INPUT     -> FA_APP_IN -m connmark --mark U   -j REJECT   (download blocked)
//! FAU_U        [-j CONNMARK --set-mark U] [returns...] -j REJECT
//! ```

use std::borrow::Cow;
use std::collections::BTreeSet;

use async_trait::async_trait;
use fwa_core::{ChainSpec, Directive, PathPattern, Subject};
use tracing::{debug, info, instrument};

use crate::{
    BackendConfig, BackendError, BackendResult, ChainNames, CommandChannel, ExecOutput,
    FilterBackend, Invocation, RetryingChannel, Script, Step, SuShellChannel,
};

const REJECT_WITH: [&str; 4] = ["-j", "REJECT", "--reject-with", "icmp-port-unreachable"];

/// [`FilterBackend`] driving iptables through a [`CommandChannel`].
#[derive(Debug)]
pub struct IptablesBackend<C> {
    channel: C,
    program: String,
    chains: ChainNames,
}

impl IptablesBackend<RetryingChannel<SuShellChannel>> {
    /// Backend over the privileged `su` channel with retries.
    #[must_use]
    pub fn privileged(config: &BackendConfig) -> Self {
        let channel = RetryingChannel::new(SuShellChannel::new(config), config.retry.clone());
        Self::new(channel, config)
    }
}

impl<C: CommandChannel> IptablesBackend<C> {
    #[must_use]
    pub fn new(channel: C, config: &BackendConfig) -> Self {
        Self {
            channel,
            program: config.iptables.clone(),
            chains: config.chains.clone(),
        }
    }

    #[must_use]
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    fn subject_chain(&self, subject: Subject) -> String {
        format!("{}{}", self.chains.subject_prefix, subject)
    }

    // ------------------------------------------------------------------------
    // Script builders
    // ------------------------------------------------------------------------

    fn dispatch_rule(&self, subject: Subject) -> Invocation {
        let uid = subject.to_string();
        Invocation::new([
            "-C",
            self.chains.output_container.as_str(),
            "-m",
            "owner",
            "--uid-owner",
            uid.as_str(),
            "-j",
            self.subject_chain(subject).as_str(),
        ])
    }

    fn inbound_reject_rule(&self, subject: Subject) -> Invocation {
        let uid = subject.to_string();
        let mut args = vec![
            "-C".to_string(),
            self.chains.input_container.clone(),
            "-m".to_string(),
            "connmark".to_string(),
            "--mark".to_string(),
            uid,
        ];
        args.extend(REJECT_WITH.iter().map(ToString::to_string));
        Invocation::new(args)
    }

    fn detach_steps(&self, subject: Subject) -> [Step; 2] {
        [
            Step::delete_all(self.dispatch_rule(subject)),
            Step::delete_all(self.inbound_reject_rule(subject)),
        ]
    }

    /// Script that ensures both containers exist and are hooked once.
    #[must_use]
    pub fn setup_script(&self) -> Script {
        let out = self.chains.output_container.as_str();
        let inp = self.chains.input_container.as_str();
        let mut script = Script::new();
        script
            .push(Step::Tolerant(Invocation::new(["-N", out])))
            .push(Step::Tolerant(Invocation::new(["-N", inp])))
            .push(Step::EnsurePresent {
                check: Invocation::new(["-C", "OUTPUT", "-j", out]),
                insert: Invocation::new(["-I", "OUTPUT", "1", "-j", out]),
            })
            .push(Step::EnsurePresent {
                check: Invocation::new(["-C", "INPUT", "-j", inp]),
                insert: Invocation::new(["-I", "INPUT", "1", "-j", inp]),
            });
        script
    }

    /// Script that replaces the subject's chain with `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unrenderable`] if the spec carries a directive
    /// read from a live chain that the adapter cannot reproduce.
    pub fn install_script(&self, subject: Subject, spec: &ChainSpec) -> BackendResult<Script> {
        if spec.is_empty() {
            return Ok(self.remove_script(subject));
        }
        let chain = self.subject_chain(subject);
        let mut script = Script::new();
        for step in self.detach_steps(subject) {
            script.push(step);
        }
        script
            .push(Step::Tolerant(Invocation::new(["-N", chain.as_str()])))
            .run(Invocation::new(["-F", chain.as_str()]));

        for directive in spec {
            let mut args = vec!["-A".to_string(), chain.clone()];
            args.extend(render_directive(subject, directive)?);
            script.run(Invocation::new(args));
        }
        if spec.tags_inbound() {
            script.run(self.inbound_reject_rule(subject).with_op("-A"));
        }
        script.run(self.dispatch_rule(subject).with_op("-A"));
        Ok(script)
    }

    /// Script that detaches and deletes the subject's chain.
    #[must_use]
    pub fn remove_script(&self, subject: Subject) -> Script {
        let chain = self.subject_chain(subject);
        let mut script = Script::new();
        for step in self.detach_steps(subject) {
            script.push(step);
        }
        script.push(Step::WhenPresent {
            probe: Invocation::new(["-S", chain.as_str()]),
            then: vec![
                Step::Run(Invocation::new(["-F", chain.as_str()])),
                Step::Run(Invocation::new(["-X", chain.as_str()])),
            ],
        });
        script
    }

    /// Script that unhooks and deletes the containers and the given chains.
    #[must_use]
    pub fn teardown_script(&self, subject_chains: &[String]) -> Script {
        let out = self.chains.output_container.as_str();
        let inp = self.chains.input_container.as_str();
        let mut script = Script::new();
        script
            .push(Step::delete_all(Invocation::new(["-C", "OUTPUT", "-j", out])))
            .push(Step::delete_all(Invocation::new(["-C", "INPUT", "-j", inp])))
            .push(Step::Tolerant(Invocation::new(["-F", out])))
            .push(Step::Tolerant(Invocation::new(["-F", inp])));
        for chain in subject_chains {
            script
                .push(Step::Tolerant(Invocation::new(["-F", chain.as_str()])))
                .push(Step::Tolerant(Invocation::new(["-X", chain.as_str()])));
        }
        script
            .push(Step::Tolerant(Invocation::new(["-X", out])))
            .push(Step::Tolerant(Invocation::new(["-X", inp])));
        script
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    async fn exec(&self, script: &Script) -> BackendResult<ExecOutput> {
        let text = script.render(&self.program);
        self.channel.execute(&text).await
    }

    async fn exec_checked(&self, script: &Script) -> BackendResult<ExecOutput> {
        self.exec(script).await?.into_result()
    }

    /// `iptables -S <chain>`; `None` if the chain does not exist.
    async fn list_rules(&self, chain: &str) -> BackendResult<Option<String>> {
        let mut script = Script::new();
        script.run(Invocation::new(["-S", chain]));
        let out = self.exec(&script).await?;
        if out.success() {
            return Ok(Some(out.stdout));
        }
        if is_missing_chain(&out) {
            return Ok(None);
        }
        out.into_result().map(|_| None)
    }

    /// `iptables -S` over the whole table.
    async fn list_table(&self) -> BackendResult<String> {
        let mut script = Script::new();
        script.run(Invocation::new(["-S"]));
        Ok(self.exec_checked(&script).await?.stdout)
    }

    async fn list_subject_chains(&self) -> BackendResult<Vec<String>> {
        let listing = self.list_table().await?;
        let marker = format!("-N {}", self.chains.subject_prefix);
        Ok(listing
            .lines()
            .filter(|line| line.starts_with(&marker))
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(ToString::to_string)
            .collect())
    }
}

#[async_trait]
impl<C: CommandChannel> FilterBackend for IptablesBackend<C> {
    #[instrument(skip(self))]
    async fn ensure_containers(&self) -> BackendResult<()> {
        self.exec_checked(&self.setup_script()).await?;
        Ok(())
    }

    #[instrument(skip(self, spec), fields(subject = %subject, directives = spec.len()))]
    async fn install_chain(&self, subject: Subject, spec: &ChainSpec) -> BackendResult<()> {
        let script = self.install_script(subject, spec)?;
        self.exec_checked(&script).await?;
        debug!("Chain installed");
        Ok(())
    }

    #[instrument(skip(self), fields(subject = %subject))]
    async fn remove_chain(&self, subject: Subject) -> BackendResult<()> {
        self.exec_checked(&self.remove_script(subject)).await?;
        debug!("Chain removed");
        Ok(())
    }

    async fn list_managed_subjects(&self) -> BackendResult<BTreeSet<Subject>> {
        let listing = self.list_table().await?;
        Ok(parse_managed_subjects(&self.chains, &listing))
    }

    async fn read_chain(&self, subject: Subject) -> BackendResult<ChainSpec> {
        let chain = self.subject_chain(subject);
        let Some(listing) = self.list_rules(&chain).await? else {
            return Ok(ChainSpec::empty());
        };
        let spec = parse_chain(subject, &chain, &listing);
        let input = &self.chains.input_container;
        let inbound = self
            .list_rules(input)
            .await?
            .map_or(0, |text| count_inbound_rejects(subject, input, &text));
        Ok(fold_inbound_rejects(subject, input, spec, inbound))
    }

    async fn is_enforcing(&self) -> BackendResult<bool> {
        let mut script = Script::new();
        script.run(Invocation::new([
            "-C",
            "OUTPUT",
            "-j",
            self.chains.output_container.as_str(),
        ]));
        Ok(self.exec(&script).await?.success())
    }

    async fn clear_all(&self) -> BackendResult<()> {
        let subject_chains = self.list_subject_chains().await?;
        info!(chains = subject_chains.len(), "Tearing down firewall chains");
        self.exec_checked(&self.teardown_script(&subject_chains))
            .await?;
        Ok(())
    }
}

// ============================================================================
// Rendering and parsing
// ============================================================================

fn render_directive(subject: Subject, directive: &Directive) -> BackendResult<Vec<String>> {
    let args: Vec<String> = match directive {
        Directive::ReturnIfMatches { pattern } => {
            let mut args = match pattern {
                PathPattern::Interface { glob } => vec!["-o".to_string(), glob.to_string()],
                PathPattern::Destination { cidr, tcp_port } => {
                    let mut args = vec!["-d".to_string(), cidr.to_string()];
                    if let Some(port) = tcp_port {
                        args.extend(
                            ["-p", "tcp", "-m", "tcp", "--dport"]
                                .iter()
                                .map(ToString::to_string),
                        );
                        args.push(port.to_string());
                    }
                    args
                }
            };
            args.extend(["-j".to_string(), "RETURN".to_string()]);
            args
        }
        Directive::TagForInboundReject => vec![
            "-j".to_string(),
            "CONNMARK".to_string(),
            "--set-mark".to_string(),
            subject.to_string(),
        ],
        Directive::RejectAll => REJECT_WITH.iter().map(ToString::to_string).collect(),
        Directive::Unrecognized { rule } => {
            return Err(BackendError::Unrenderable {
                subject,
                directive: rule.clone(),
            });
        }
    };
    Ok(args)
}

/// Subjects with a dispatch rule in the output container or a subject
/// chain of their own, from a whole-table `iptables -S` listing.
///
/// A subject chain whose dispatch rule was deleted still counts, so the
/// chain gets swept.
#[must_use]
pub fn parse_managed_subjects(chains: &ChainNames, listing: &str) -> BTreeSet<Subject> {
    let dispatch = format!("-A {} ", chains.output_container);
    let created = format!("-N {}", chains.subject_prefix);
    listing
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            if let Some(id) = line.strip_prefix(&created) {
                return id.parse::<Subject>().ok();
            }
            if !line.starts_with(&dispatch) {
                return None;
            }
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "--uid-owner")?;
            tokens.next()?.parse::<Subject>().ok()
        })
        .collect()
}

/// Count the subject's connmark reject rules in an input container listing.
fn count_inbound_rejects(subject: Subject, container: &str, listing: &str) -> usize {
    let prefix = format!("-A {container} ");
    listing
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(&prefix))
        .filter(|rest| {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            match tokens.as_slice() {
                ["-m", "connmark", "--mark", mark, "-j", "REJECT"]
                | [
                    "-m",
                    "connmark",
                    "--mark",
                    mark,
                    "-j",
                    "REJECT",
                    "--reject-with",
                    "icmp-port-unreachable",
                ] => parse_mark(mark) == Some(subject.id()),
                _ => false,
            }
        })
        .count()
}

/// A tagging chain needs exactly one inbound reject rule, any other chain
/// none. A mismatch is recorded as an unrecognized directive so the live
/// spec no longer equals the compiled one.
fn fold_inbound_rejects(
    subject: Subject,
    container: &str,
    spec: ChainSpec,
    inbound: usize,
) -> ChainSpec {
    if inbound == usize::from(spec.tags_inbound()) {
        return spec;
    }
    let mut directives = spec.directives().to_vec();
    directives.push(Directive::Unrecognized {
        rule: format!("{inbound} inbound reject rule(s) for {subject} in {container}"),
    });
    ChainSpec::from(directives)
}

/// Parse a per-subject chain listing into directives.
///
/// Rules the adapter never writes become [`Directive::Unrecognized`] so that
/// foreign edits register as drift.
#[must_use]
pub fn parse_chain(subject: Subject, chain: &str, listing: &str) -> ChainSpec {
    let prefix = format!("-A {chain} ");
    listing
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(&prefix).map(|rest| (line, rest)))
        .map(|(line, rest)| {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            parse_rule(subject, &tokens).unwrap_or_else(|| Directive::Unrecognized {
                rule: line.to_string(),
            })
        })
        .collect()
}

fn parse_rule(subject: Subject, tokens: &[&str]) -> Option<Directive> {
    match tokens {
        ["-o", glob, "-j", "RETURN"] => Some(Directive::return_if(PathPattern::Interface {
            glob: Cow::Owned((*glob).to_string()),
        })),
        ["-d", cidr, "-j", "RETURN"] => Some(Directive::return_if(destination(cidr, None))),
        ["-d", cidr, "-p", "tcp", "-m", "tcp", "--dport", port, "-j", "RETURN"] => {
            let port = port.parse::<u16>().ok()?;
            Some(Directive::return_if(destination(cidr, Some(port))))
        }
        ["-j", "CONNMARK", "--set-mark", mark] | ["-j", "CONNMARK", "--set-xmark", mark] => {
            (parse_mark(mark)? == subject.id()).then_some(Directive::TagForInboundReject)
        }
        ["-j", "REJECT"] | ["-j", "REJECT", "--reject-with", "icmp-port-unreachable"] => {
            Some(Directive::RejectAll)
        }
        _ => None,
    }
}

fn destination(cidr: &str, tcp_port: Option<u16>) -> PathPattern {
    PathPattern::Destination {
        cidr: Cow::Owned(cidr.to_string()),
        tcp_port,
    }
}

/// Accept `N`, `0xN`, and `0xN/0xffffffff` (how `-S` prints `--set-mark N`).
fn parse_mark(raw: &str) -> Option<u32> {
    let (value, mask) = match raw.split_once('/') {
        Some((value, mask)) => (value, Some(mask)),
        None => (raw, None),
    };
    if let Some(mask) = mask {
        if parse_number(mask)? != u32::MAX {
            return None;
        }
    }
    parse_number(value)
}

fn parse_number(raw: &str) -> Option<u32> {
    raw.strip_prefix("0x").map_or_else(
        || raw.parse().ok(),
        |hex| u32::from_str_radix(hex, 16).ok(),
    )
}

fn is_missing_chain(out: &ExecOutput) -> bool {
    out.stderr.contains("No chain") || out.stderr.contains("does not exist")
}
