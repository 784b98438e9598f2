//! Child-process supervision.
//!
//! [`run`] spawns a program, optionally under a de-elevated identity, drains
//! stdout and stderr to completion, and waits for the exit status before
//! returning. When a [`PromptRule`] is given, stdout is scanned for the
//! prompt token and the scripted answer is written to stdin exactly once,
//! after which stdin is closed.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::elevation::RunAs;

/// Token printed by interactive license confirmations.
pub const YES_NO_PROMPT: &str = "[y/n]:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRule {
    pub pattern: String,
    pub answer: String,
}

impl PromptRule {
    pub fn yes_no() -> Self {
        Self {
            pattern: YES_NO_PROMPT.to_string(),
            answer: "y\n".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub run_as: Option<RunAs>,
    pub prompt: Option<PromptRule>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn run_as(mut self, identity: Option<RunAs>) -> Self {
        self.run_as = identity;
        self
    }

    pub fn answer_prompt(mut self, rule: PromptRule) -> Self {
        self.prompt = Some(rule);
        self
    }

    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub prompt_answered: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Zero exit status and nothing but whitespace on stderr.
    pub fn clean(&self) -> bool {
        self.success() && self.stderr.trim().is_empty()
    }

    pub fn exit_code_label(&self) -> String {
        self.exit_code
            .map_or_else(|| "signal".to_string(), |code| code.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    AwaitingPrompt,
    Answered,
    Draining,
}

/// Scans output chunks for a prompt token. Matches that straddle chunk
/// boundaries are found by carrying the tail of the previous chunk.
#[derive(Debug)]
pub struct PromptResponder {
    rule: PromptRule,
    state: PromptState,
    carry: String,
}

impl PromptResponder {
    pub fn new(rule: PromptRule) -> Self {
        Self {
            rule,
            state: PromptState::AwaitingPrompt,
            carry: String::new(),
        }
    }

    pub fn state(&self) -> PromptState {
        self.state
    }

    pub fn answer(&self) -> &str {
        &self.rule.answer
    }

    /// Feeds one output chunk. Returns `true` on the single transition into
    /// [`PromptState::Answered`]; every later call returns `false`.
    pub fn observe(&mut self, chunk: &str) -> bool {
        if self.state != PromptState::AwaitingPrompt {
            return false;
        }
        let mut window = std::mem::take(&mut self.carry);
        window.push_str(chunk);
        if window.contains(&self.rule.pattern) {
            self.state = PromptState::Answered;
            return true;
        }
        let keep = self.rule.pattern.chars().count().saturating_sub(1);
        let skip = window.chars().count().saturating_sub(keep);
        self.carry = window.chars().skip(skip).collect();
        false
    }

    /// Called once the answer has been written and stdin closed.
    pub fn mark_draining(&mut self) {
        if self.state == PromptState::Answered {
            self.state = PromptState::Draining;
        }
    }
}

fn build_command(spec: &ProcessSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.prompt.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }
    if let Some(identity) = &spec.run_as {
        apply_identity(&mut cmd, identity);
    }
    cmd
}

#[cfg(unix)]
fn apply_identity(cmd: &mut Command, identity: &RunAs) {
    cmd.uid(identity.uid).gid(identity.gid);
    // Never let the child inherit root's HOME.
    match &identity.home {
        Some(home) => cmd.env("HOME", home),
        None => cmd.env_remove("HOME"),
    };
    if let Some(user) = &identity.user {
        cmd.env("USER", user).env("LOGNAME", user);
    }
}

#[cfg(not(unix))]
fn apply_identity(_cmd: &mut Command, identity: &RunAs) {
    tracing::debug!(
        "Ignoring run-as identity {}:{} on this platform",
        identity.uid,
        identity.gid
    );
}

/// Runs `spec` to completion.
///
/// Returns `Err` only when the process could not be spawned or its output
/// could not be read; a non-zero exit is reported through the outcome.
pub async fn run(spec: &ProcessSpec) -> io::Result<ProcessOutcome> {
    tracing::info!("Running {}", spec.display());
    let mut child = build_command(spec).spawn()?;

    let mut stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr {
            err.read_to_end(&mut buf).await?;
        }
        Ok::<_, io::Error>(buf)
    });

    let mut responder = spec.prompt.clone().map(PromptResponder::new);
    let mut captured = Vec::new();
    let mut read_error = None;

    if let Some(mut out) = stdout {
        let mut buf = [0u8; 4096];
        loop {
            let read = match out.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) => {
                    read_error = Some(err);
                    break;
                }
            };
            captured.extend_from_slice(&buf[..read]);
            let text = String::from_utf8_lossy(&buf[..read]);
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                tracing::debug!(target: "sdkup::child", "{line}");
            }
            if let Some(responder) = responder.as_mut() {
                if responder.observe(&text) {
                    answer_prompt(stdin.take(), responder.answer()).await;
                    responder.mark_draining();
                }
            }
        }
    }

    drop(stdin);
    let status = child.wait().await?;
    let stderr = collect_stderr(stderr_task.await)?;

    if let Some(err) = read_error {
        return Err(err);
    }

    let outcome = ProcessOutcome {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&captured).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        prompt_answered: responder.is_some_and(|r| r.state() != PromptState::AwaitingPrompt),
    };
    tracing::debug!(
        "{} exited with {}",
        spec.program.display(),
        outcome.exit_code_label()
    );
    Ok(outcome)
}

/// An unreadable stderr must not pass for an empty one.
fn collect_stderr(
    joined: Result<io::Result<Vec<u8>>, tokio::task::JoinError>,
) -> io::Result<Vec<u8>> {
    match joined {
        Ok(Ok(buf)) => Ok(buf),
        Ok(Err(err)) => Err(io::Error::new(
            err.kind(),
            format!("failed to read child stderr: {err}"),
        )),
        Err(err) => Err(io::Error::other(format!("stderr reader stopped: {err}"))),
    }
}

async fn answer_prompt(stdin: Option<tokio::process::ChildStdin>, answer: &str) {
    let Some(mut input) = stdin else {
        return;
    };
    tracing::info!("Answering interactive prompt");
    if let Err(err) = input.write_all(answer.as_bytes()).await {
        tracing::warn!("Failed to answer prompt: {}", err);
    }
    let _ = input.shutdown().await;
}

/// Convenience for callers that only need a path-valued program name.
pub fn program_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_fires_exactly_once() {
        let mut responder = PromptResponder::new(PromptRule::yes_no());
        assert!(!responder.observe("Installing Archives:\n"));
        assert!(responder.observe("Do you accept the license 'android-sdk-license' [y/n]: "));
        assert_eq!(responder.state(), PromptState::Answered);
        responder.mark_draining();
        assert!(!responder.observe("Do you accept the license 'intel' [y/n]: "));
        assert_eq!(responder.state(), PromptState::Draining);
    }

    #[test]
    fn responder_matches_across_chunk_boundaries() {
        let mut responder = PromptResponder::new(PromptRule::yes_no());
        assert!(!responder.observe("accept the license [y"));
        assert!(!responder.observe("/"));
        assert!(responder.observe("n]: "));
    }

    #[test]
    fn responder_does_not_match_partial_token() {
        let mut responder = PromptResponder::new(PromptRule::yes_no());
        assert!(!responder.observe("[y/n]"));
        assert!(!responder.observe(" later: "));
        assert_eq!(responder.state(), PromptState::AwaitingPrompt);
    }

    #[test]
    fn outcome_with_stderr_is_not_clean() {
        let outcome = ProcessOutcome {
            exit_code: Some(0),
            stderr: "Warning: something\n".into(),
            ..ProcessOutcome::default()
        };
        assert!(outcome.success());
        assert!(!outcome.clean());
        assert_eq!(ProcessOutcome::default().exit_code_label(), "signal");
    }

    #[test]
    fn spec_display_joins_arguments() {
        let spec = ProcessSpec::new("/opt/sdk/tools/android")
            .args(["update", "sdk", "-u"])
            .arg("-a");
        assert_eq!(spec.display(), "/opt/sdk/tools/android update sdk -u -a");
        assert_eq!(program_name(&spec.program), "android");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_captures_exit_code_and_streams() {
        let spec = ProcessSpec::new("sh")
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3");
        let outcome = run(&spec).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert!(!outcome.prompt_answered);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_answers_prompt_once_and_closes_stdin() {
        // Two prompts: only the first gets an answer, the second read sees EOF.
        let script = r#"
            printf 'Accept? [y/n]: '
            read first || exit 10
            echo "first=$first"
            printf 'Again? [y/n]: '
            if read second; then echo "second=$second"; else echo "eof"; fi
        "#;
        let spec = ProcessSpec::new("sh")
            .arg("-c")
            .arg(script)
            .answer_prompt(PromptRule::yes_no());
        let outcome = run(&spec).await.unwrap();

        assert!(outcome.clean(), "stderr: {}", outcome.stderr);
        assert!(outcome.prompt_answered);
        assert!(outcome.stdout.contains("first=y"));
        assert!(outcome.stdout.contains("eof"));
        assert!(!outcome.stdout.contains("second="));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_without_prompt_gives_child_empty_stdin() {
        let spec = ProcessSpec::new("sh")
            .arg("-c")
            .arg("if read line; then echo got; else echo none; fi");
        let outcome = run(&spec).await.unwrap();
        assert_eq!(outcome.stdout.trim(), "none");
    }

    #[tokio::test]
    async fn stderr_read_failures_are_errors() {
        let broken = collect_stderr(Ok(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "pipe closed",
        ))));
        assert_eq!(broken.unwrap_err().kind(), io::ErrorKind::BrokenPipe);

        fn reader_dies() -> Vec<u8> {
            panic!("reader died")
        }
        let panicked = tokio::spawn(async { Ok::<_, io::Error>(reader_dies()) }).await;
        assert!(collect_stderr(panicked).is_err());

        assert_eq!(collect_stderr(Ok(Ok(b"warn".to_vec()))).unwrap(), b"warn");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let spec = ProcessSpec::new("/definitely/not/a/real/program");
        assert!(run(&spec).await.is_err());
    }
}
