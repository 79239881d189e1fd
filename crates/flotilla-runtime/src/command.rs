//! External command execution.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use flotilla_registry::Secret;
use shell_escape::escape;
use tracing::debug;

/// A fully specified external command: no shell is involved, every
/// argument is passed to the process as a separate argv entry.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment. Values are treated as secrets and never rendered.
    pub env: Vec<(String, Secret)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: Secret) -> Self {
        self.env.push((key.into(), value));
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// The value following `flag`, if present.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        let idx = self.args.iter().position(|a| a == flag)?;
        self.args.get(idx + 1).map(String::as_str)
    }

    pub fn env_value(&self, key: &str) -> Option<&Secret> {
        self.env.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Shell-quoted rendering for logs. Environment values are omitted.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| escape(Cow::Borrowed(a.as_str())).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _) in &self.env {
            write!(f, "{key}=<redacted> ")?;
        }
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` and capture its output. An `Err` means the
    /// process could not be started at all.
    async fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        debug!(command = %invocation, "running");
        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &invocation.env {
            cmd.env(key, value.expose());
        }

        let output = cmd.output().await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

type Handler = Box<dyn Fn(&Invocation) -> io::Result<CommandOutput> + Send + Sync>;

/// Answers invocations from a closure instead of spawning processes.
///
/// Records the invocations it sees, all of them unless a history limit
/// is set. Used by tests and by the daemon's dry-run mode.
pub struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<VecDeque<Invocation>>,
    history_limit: Option<usize>,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> io::Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(VecDeque::new()),
            history_limit: None,
        }
    }

    /// Keep only the most recent `limit` invocations.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Every command exits 0 with empty output.
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(CommandOutput::success("")))
    }

    /// Invocations seen so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Invocations whose arguments contain `arg`.
    pub fn calls_with(&self, arg: &str) -> Vec<Invocation> {
        self.calls().into_iter().filter(|c| c.has_arg(arg)).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.history_limit != Some(0) {
                calls.push_back(invocation.clone());
            }
            if let Some(limit) = self.history_limit {
                while calls.len() > limit {
                    calls.pop_front();
                }
            }
        }
        (self.handler)(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_quotes_arguments() {
        let inv = Invocation::new("hyper")
            .args(["run", "--workdir", "/home/my agent"])
            .arg("it's");
        assert_eq!(
            inv.command_line(),
            r#"hyper run --workdir '/home/my agent' 'it'\''s'"#
        );
    }

    #[test]
    fn display_redacts_environment() {
        let inv = Invocation::new("hyper")
            .arg("config")
            .env("HYPER_SECRET_KEY", Secret::new("topsecret"));
        let rendered = inv.to_string();
        assert!(rendered.contains("HYPER_SECRET_KEY=<redacted>"));
        assert!(!rendered.contains("topsecret"));
    }

    #[test]
    fn arg_after_finds_flag_values() {
        let inv = Invocation::new("hyper").args(["--config", "/tmp/x", "run"]);
        assert_eq!(inv.arg_after("--config"), Some("/tmp/x"));
        assert_eq!(inv.arg_after("run"), None);
        assert_eq!(inv.arg_after("--size"), None);
    }

    #[tokio::test]
    async fn scripted_runner_records_calls() {
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("rm") {
                Ok(CommandOutput::failure(2, "no such container"))
            } else {
                Ok(CommandOutput::success("ok"))
            }
        });

        let out = runner.run(&Invocation::new("hyper").arg("ps")).await.unwrap();
        assert!(out.is_success());
        let out = runner.run(&Invocation::new("hyper").args(["rm", "x"])).await.unwrap();
        assert_eq!(out.status, Some(2));

        assert_eq!(runner.calls().len(), 2);
        assert_eq!(runner.calls_with("rm").len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn history_limit_keeps_latest_calls() {
        let runner = ScriptedRunner::succeeding().with_history_limit(2);
        for id in ["a", "b", "c"] {
            runner.run(&Invocation::new("hyper").args(["rm", id])).await.unwrap();
        }
        let kept: Vec<_> = runner.calls().into_iter().map(|c| c.args[1].clone()).collect();
        assert_eq!(kept, vec!["b", "c"]);

        let silent = ScriptedRunner::succeeding().with_history_limit(0);
        silent.run(&Invocation::new("hyper")).await.unwrap();
        assert!(silent.calls().is_empty());
    }

    #[tokio::test]
    async fn process_runner_captures_output_and_status() {
        let inv = Invocation::new("sh").args(["-c", "echo abc123; echo oops >&2; exit 3"]);
        let out = ProcessRunner.run(&inv).await.unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout.trim(), "abc123");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_passes_environment() {
        let inv = Invocation::new("sh")
            .args(["-c", "printf %s \"$FLOTILLA_TEST_VALUE\""])
            .env("FLOTILLA_TEST_VALUE", Secret::new("from-env"));
        let out = ProcessRunner.run(&inv).await.unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, "from-env");
    }

    #[tokio::test]
    async fn process_runner_reports_missing_binary() {
        let inv = Invocation::new("/nonexistent/flotilla-test-binary");
        assert!(ProcessRunner.run(&inv).await.is_err());
    }
}
