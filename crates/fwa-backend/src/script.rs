//! Typed shell scripts.
//!
//! Backend operations are built as a list of [`Step`]s over filter-tool
//! [`Invocation`]s and rendered to POSIX shell only at the edge. Every argument
//! is quoted on render, so nothing a policy carries can change the shape of
//! the script.

use std::borrow::Cow;

use shell_escape::escape;

/// Arguments of one filter-tool call (the binary is supplied at render time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Same arguments with the leading operation flag (`-C`, `-A`, ...)
    /// replaced.
    #[must_use]
    pub fn with_op(&self, op: &str) -> Self {
        let mut args = self.args.clone();
        if let Some(first) = args.first_mut() {
            *first = op.to_string();
        }
        Self { args }
    }

    fn render(&self, program: &str) -> String {
        let mut line = quote(program).into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line
    }
}

fn quote(raw: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(raw))
}

/// One step of a backend script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Must succeed; aborts the script otherwise.
    Run(Invocation),
    /// Failure is ignored (creating a chain that may already exist).
    Tolerant(Invocation),
    /// Delete every copy of a rule: loop while `check` matches.
    DeleteAll { check: Invocation, delete: Invocation },
    /// Insert a rule unless `check` already matches.
    EnsurePresent { check: Invocation, insert: Invocation },
    /// Run `then` only if `probe` succeeds.
    WhenPresent { probe: Invocation, then: Vec<Step> },
}

impl Step {
    /// Build a delete-all step from a rule written with `-C`.
    #[must_use]
    pub fn delete_all(check: Invocation) -> Self {
        let delete = check.with_op("-D");
        Self::DeleteAll { check, delete }
    }

    fn render_into(&self, program: &str, indent: &str, out: &mut Vec<String>) {
        const QUIET: &str = ">/dev/null 2>&1";
        match self {
            Self::Run(inv) => out.push(format!("{indent}{} || exit 1", inv.render(program))),
            Self::Tolerant(inv) => {
                out.push(format!("{indent}{} {QUIET} || true", inv.render(program)));
            }
            Self::DeleteAll { check, delete } => out.push(format!(
                "{indent}while {} {QUIET}; do {} || exit 1; done",
                check.render(program),
                delete.render(program)
            )),
            Self::EnsurePresent { check, insert } => out.push(format!(
                "{indent}{} {QUIET} || {} || exit 1",
                check.render(program),
                insert.render(program)
            )),
            Self::WhenPresent { probe, then } => {
                out.push(format!("{indent}if {} {QUIET}; then", probe.render(program)));
                let nested = format!("{indent}  ");
                for step in then {
                    step.render_into(program, &nested, out);
                }
                out.push(format!("{indent}fi"));
            }
        }
    }
}

/// Ordered steps executed as one privileged call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn run(&mut self, inv: Invocation) -> &mut Self {
        self.push(Step::Run(inv))
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Render to shell text, one step per line.
    #[must_use]
    pub fn render(&self, program: &str) -> String {
        let mut lines = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            step.render_into(program, "", &mut lines);
        }
        lines.join("\n")
    }
}
