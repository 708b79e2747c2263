//! Scripted collaborators for exercising the reconciler and controller
//! without a real git binary or real filesystem failures.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::fs::{DirMover, TokioDirMover};
use crate::runner::{CommandError, CommandResult, CommandRunner, describe};

/// Canned outcome of a fake command.
#[derive(Debug, Clone)]
pub enum Reply {
    Result(CommandResult),
    LaunchFailed,
    TimedOut,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::Result(CommandResult::ok(stdout))
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Self::Result(CommandResult::failed(code, stderr))
    }
}

#[derive(Debug)]
struct Rule {
    prefix: Vec<String>,
    cwd: Option<PathBuf>,
    reply: Reply,
    delay: Option<Duration>,
    once: bool,
    used: bool,
}

impl Rule {
    fn matches(&self, args: &[String], cwd: &Path) -> bool {
        !self.used
            && args.starts_with(&self.prefix)
            && self.cwd.as_deref().is_none_or(|c| c == cwd)
    }
}

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// [`CommandRunner`] answering from a script of argument-prefix rules.
///
/// One-shot rules are consumed in registration order and take precedence;
/// among persistent rules the most recently registered match wins. An
/// unmatched call exits with code 1.
#[derive(Debug, Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
}

fn owned(prefix: &[&str]) -> Vec<String> {
    prefix.iter().map(|s| (*s).to_string()).collect()
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, rule: Rule) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
        self
    }

    /// Answer every call starting with `prefix`.
    pub fn on(&self, prefix: &[&str], reply: Reply) -> &Self {
        self.push(Rule {
            prefix: owned(prefix),
            cwd: None,
            reply,
            delay: None,
            once: false,
            used: false,
        })
    }

    /// Answer the next call starting with `prefix`, once.
    pub fn once(&self, prefix: &[&str], reply: Reply) -> &Self {
        self.push(Rule {
            prefix: owned(prefix),
            cwd: None,
            reply,
            delay: None,
            once: true,
            used: false,
        })
    }

    /// Answer calls starting with `prefix` made inside `cwd`.
    pub fn on_in(&self, cwd: impl Into<PathBuf>, prefix: &[&str], reply: Reply) -> &Self {
        self.push(Rule {
            prefix: owned(prefix),
            cwd: Some(cwd.into()),
            reply,
            delay: None,
            once: false,
            used: false,
        })
    }

    /// Like [`FakeRunner::on`], but the reply arrives after `delay`.
    pub fn on_delayed(&self, prefix: &[&str], delay: Duration, reply: Reply) -> &Self {
        self.push(Rule {
            prefix: owned(prefix),
            cwd: None,
            reply,
            delay: Some(delay),
            once: false,
            used: false,
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded calls whose arguments start with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        let prefix = owned(prefix);
        self.calls()
            .iter()
            .filter(|c| c.args.starts_with(&prefix))
            .count()
    }

    fn pick(&self, args: &[String], cwd: &Path) -> Option<(Reply, Option<Duration>)> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rule) = rules.iter_mut().find(|r| r.once && r.matches(args, cwd)) {
            rule.used = true;
            return Some((rule.reply.clone(), rule.delay));
        }
        rules
            .iter()
            .rev()
            .find(|r| !r.once && r.matches(args, cwd))
            .map(|r| (r.reply.clone(), r.delay))
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Call {
                args: args.to_vec(),
                cwd: cwd.to_path_buf(),
            });

        let Some((reply, delay)) = self.pick(args, cwd) else {
            return Ok(CommandResult::failed(
                1,
                format!("no scripted reply for `{}`", describe("git", args)),
            ));
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Result(result) => Ok(result),
            Reply::LaunchFailed => Err(CommandError::LaunchFailed {
                program: "git".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
            Reply::TimedOut => Err(CommandError::TimedOut {
                command: describe("git", args),
                timeout,
            }),
        }
    }
}

/// One scripted move outcome.
#[derive(Debug, Clone, Copy)]
pub enum MoveStep {
    Real,
    Fail(io::ErrorKind),
}

/// [`DirMover`] that performs real moves unless told to fail the next ones.
#[derive(Debug, Default)]
pub struct ScriptedMover {
    script: Mutex<VecDeque<MoveStep>>,
    moves: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl ScriptedMover {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unscripted move. Moves past the end of
    /// the script are real.
    pub fn then(&self, step: MoveStep) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }

    /// Every attempted move, in order.
    pub fn moves(&self) -> Vec<(PathBuf, PathBuf)> {
        self.moves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DirMover for ScriptedMover {
    async fn move_dir(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.moves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((from.to_path_buf(), to.to_path_buf()));
        let step = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(MoveStep::Real);
        match step {
            MoveStep::Real => TokioDirMover.move_dir(from, to).await,
            MoveStep::Fail(kind) => Err(io::Error::new(kind, "scripted move failure")),
        }
    }
}

/// Porcelain listing for `(path, branch)` pairs; `None` marks a detached HEAD.
pub fn porcelain_listing<P: AsRef<Path>>(entries: &[(P, Option<&str>)]) -> String {
    let mut out = String::new();
    for (i, (path, branch)) in entries.iter().enumerate() {
        out.push_str(&format!(
            "worktree {}\nHEAD {:040x}\n",
            path.as_ref().display(),
            i + 1
        ));
        match branch {
            Some(name) => out.push_str(&format!("branch refs/heads/{name}\n")),
            None => out.push_str("detached\n"),
        }
        out.push('\n');
    }
    out
}
