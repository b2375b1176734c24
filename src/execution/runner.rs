// Engine process runner
//
// Launches exactly one engine process per call, streams its stdout and stderr
// line by line into the job record, and resolves to a tagged outcome once the
// process has exited. Stream reading happens in two reader tasks feeding a
// channel; the supervising loop is the only writer of the job.

use regex::Regex;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::RunnerError;
use super::registry::{CancellationToken, JobRegistry, ProcessHandle};
use crate::pipeline::PipelineDefinition;
use crate::store::JobStore;
use crate::workflow::AnalysisJob;

/// Progress marker printed by the engine. Matching free-form output is
/// fragile; a structured progress channel would replace it.
pub const PROGRESS_PATTERN: &str = r"(\d+)% complete";

/// Configuration for engine execution
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path or name of the engine executable
    pub engine_binary: PathBuf,
    /// Variables added to the inherited environment of every engine process
    pub environment: BTreeMap<String, String>,
    /// How long a cancelled process may take to exit before it is killed
    pub kill_grace: Duration,
    /// How long to keep draining output pipes after the process exited
    pub drain_timeout: Duration,
    /// Lines of stdout and stderr retained in the execution result
    pub tail_lines: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let mut environment = BTreeMap::new();
        environment.insert("NXF_ANSI_LOG".to_string(), "false".to_string());

        Self {
            engine_binary: PathBuf::from("nextflow"),
            environment,
            kill_grace: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(2),
            tail_lines: 200,
        }
    }
}

/// Fully resolved engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Added to the inherited environment; the parent's environment is never modified
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
    /// Directory the engine works in, reported back in the result
    pub work_dir: PathBuf,
}

impl EngineCommand {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
            work_dir: work_dir.into(),
        }
    }

    /// Engine invocation for a generated pipeline
    pub fn for_pipeline(config: &RunnerConfig, definition: &PipelineDefinition) -> Self {
        Self {
            program: config.engine_binary.clone(),
            args: definition.engine_args(),
            env: config.environment.clone(),
            current_dir: Some(definition.work_dir.clone()),
            work_dir: definition.work_dir.clone(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        // own process group so termination reaches the engine's children too
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// Captured facts about one finished engine process
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
    /// Last retained stdout lines
    pub stdout: String,
    /// Last retained stderr lines
    pub stderr: String,
    pub duration: Duration,
    pub work_dir: PathBuf,
}

impl ExecutionResult {
    /// Failure message carrying the tail of the captured error output
    pub fn error_message(&self) -> Option<String> {
        if self.success {
            return None;
        }

        let status = match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "termination by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Some(format!("engine exited with {}", status))
        } else {
            Some(format!("engine exited with {}: {}", status, stderr))
        }
    }
}

/// How an engine process ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Exit code 0
    Completed(ExecutionResult),
    /// Non-zero exit or killed by a signal
    Failed(ExecutionResult),
    /// Exited while a cancellation request was pending
    Cancelled(ExecutionResult),
}

impl RunOutcome {
    pub fn result(&self) -> &ExecutionResult {
        match self {
            RunOutcome::Completed(r) | RunOutcome::Failed(r) | RunOutcome::Cancelled(r) => r,
        }
    }

    pub fn into_result(self) -> ExecutionResult {
        match self {
            RunOutcome::Completed(r) | RunOutcome::Failed(r) | RunOutcome::Cancelled(r) => r,
        }
    }
}

/// Extracts progress percentages from engine output
#[derive(Debug, Clone)]
pub struct ProgressParser {
    pattern: Regex,
}

impl ProgressParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(PROGRESS_PATTERN)?,
        })
    }

    /// Percentage announced by a line, if any; oversized values saturate
    pub fn parse(&self, line: &str) -> Option<u32> {
        let captures = self.pattern.captures(line)?;
        let digits = captures.get(1)?.as_str();
        Some(digits.parse().unwrap_or(u32::MAX))
    }
}

#[derive(Debug)]
enum StreamLine {
    Stdout(String),
    Stderr(String),
}

/// Bounded buffer of the most recent lines of one stream
#[derive(Debug)]
struct LineTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LineTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
        }
    }

    fn push(&mut self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Supervises engine processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: RunnerConfig,
    registry: JobRegistry,
    progress: ProgressParser,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig, registry: JobRegistry) -> Result<Self, RunnerError> {
        Ok(Self {
            config,
            registry,
            progress: ProgressParser::new()?,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Run one engine process for `job` to completion
    ///
    /// On successful spawn the job moves `pending -> running` and is saved.
    /// Progress and log updates are saved as they arrive; a failed progress
    /// save is logged and does not stop the run. The job's terminal transition
    /// is left to the caller. Spawn failure leaves the job `pending`.
    pub async fn run(
        &self,
        command: &EngineCommand,
        job: &mut AnalysisJob,
        store: &dyn JobStore,
    ) -> Result<RunOutcome, RunnerError> {
        let job_id = job.id;
        debug!(job_id = %job_id, "Spawning engine: {}", command.display());

        let started = Instant::now();
        let mut child = command.to_command().spawn().map_err(|source| RunnerError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        let pid = child.id();

        let token = CancellationToken::new();
        let _registration = self
            .registry
            .register(job_id, ProcessHandle::new(pid, token.clone()));

        if let Err(e) = Self::mark_running(job, store) {
            warn!(job_id = %job_id, "Stopping engine, job could not be marked running: {}", e);
            Self::terminate(&mut child, pid);
            let _ = child.wait().await;
            return Err(e);
        }
        info!(job_id = %job_id, pid = ?pid, "Engine process started");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_lines(stdout, tx.clone(), StreamLine::Stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_lines(stderr, tx.clone(), StreamLine::Stderr)));
        }
        drop(tx);

        let mut stdout_tail = LineTail::new(self.config.tail_lines);
        let mut stderr_tail = LineTail::new(self.config.tail_lines);
        let mut exit_status: Option<ExitStatus> = None;
        let mut streams_open = true;
        let mut signalled = false;
        let mut cancelled_at_exit = false;

        let kill_deadline = tokio::time::sleep(Duration::MAX);
        tokio::pin!(kill_deadline);
        let drain_deadline = tokio::time::sleep(Duration::MAX);
        tokio::pin!(drain_deadline);

        while exit_status.is_none() || streams_open {
            tokio::select! {
                line = rx.recv(), if streams_open => match line {
                    Some(StreamLine::Stdout(line)) => {
                        stdout_tail.push(&line);
                        self.handle_stdout(job, store, line);
                    },
                    Some(StreamLine::Stderr(line)) => {
                        stderr_tail.push(&line);
                        handle_stderr(job, store, line);
                    },
                    None => streams_open = false,
                },
                status = child.wait(), if exit_status.is_none() => {
                    let status = status.map_err(RunnerError::Wait)?;
                    cancelled_at_exit = token.is_cancelled();
                    debug!(job_id = %job_id, "Engine process exited: {}", status);
                    exit_status = Some(status);
                    drain_deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.config.drain_timeout);
                },
                _ = token.cancelled(), if !signalled && exit_status.is_none() => {
                    signalled = true;
                    info!(job_id = %job_id, "Sending termination signal to engine");
                    Self::signal_terminate(&mut child, pid);
                    kill_deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.config.kill_grace);
                },
                _ = &mut kill_deadline, if signalled && exit_status.is_none() => {
                    warn!(job_id = %job_id, "Engine ignored termination signal, killing it");
                    if let Err(e) = child.start_kill() {
                        warn!(job_id = %job_id, "Failed to kill engine process: {}", e);
                    }
                    kill_deadline.as_mut().reset(tokio::time::Instant::now() + self.config.kill_grace);
                },
                _ = &mut drain_deadline, if exit_status.is_some() && streams_open => {
                    warn!(job_id = %job_id, "Output pipes still open after exit, abandoning them");
                    streams_open = false;
                },
            }
        }

        for reader in readers {
            reader.abort();
        }

        let Some(status) = exit_status else {
            return Err(RunnerError::Wait(std::io::Error::other("engine exit status lost")));
        };

        let result = ExecutionResult {
            success: status.success(),
            exit_code: status.code(),
            stdout: stdout_tail.joined(),
            stderr: stderr_tail.joined(),
            duration: started.elapsed(),
            work_dir: command.work_dir.clone(),
        };

        let outcome = if cancelled_at_exit {
            RunOutcome::Cancelled(result)
        } else if result.success {
            RunOutcome::Completed(result)
        } else {
            RunOutcome::Failed(result)
        };

        info!(
            job_id = %job_id,
            exit_code = ?outcome.result().exit_code,
            "Engine finished in {:?}",
            outcome.result().duration
        );
        Ok(outcome)
    }

    fn mark_running(job: &mut AnalysisJob, store: &dyn JobStore) -> Result<(), RunnerError> {
        job.start()?;
        store.save_job(job)?;
        Ok(())
    }

    fn handle_stdout(&self, job: &mut AnalysisJob, store: &dyn JobStore, line: String) {
        let Some(progress) = self.progress.parse(&line) else {
            debug!(job_id = %job.id, "stdout: {}", line);
            return;
        };

        match job.update_progress(progress, vec![line]) {
            Ok(_) => save_progress(job, store),
            Err(e) => warn!(job_id = %job.id, "Dropping progress update: {}", e),
        }
    }

    /// Graceful termination request
    fn signal_terminate(child: &mut Child, pid: Option<u32>) {
        #[cfg(unix)]
        if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => return,
                Err(e) => warn!("SIGTERM to process group {} failed: {}", pid, e),
            }
        }

        #[cfg(not(unix))]
        let _ = pid;

        if let Err(e) = child.start_kill() {
            warn!("Failed to kill engine process: {}", e);
        }
    }

    /// Immediate termination, used when the run is aborted before streaming
    fn terminate(child: &mut Child, pid: Option<u32>) {
        #[cfg(unix)]
        if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }

        #[cfg(not(unix))]
        let _ = pid;

        let _ = child.start_kill();
    }
}

fn handle_stderr(job: &mut AnalysisJob, store: &dyn JobStore, line: String) {
    debug!(job_id = %job.id, "stderr: {}", line);
    match job.append_logs(vec![line]) {
        Ok(()) => save_progress(job, store),
        Err(e) => warn!(job_id = %job.id, "Dropping log line: {}", e),
    }
}

fn save_progress(job: &AnalysisJob, store: &dyn JobStore) {
    if let Err(e) = store.save_job(job) {
        warn!(job_id = %job.id, "Failed to persist job progress: {}", e);
    }
}

/// Forward complete lines from one output stream
///
/// Lines are split on raw bytes and decoded lossily, so output that is not
/// valid UTF-8 never ends the stream.
async fn read_lines<R>(
    stream: R,
    tx: mpsc::UnboundedSender<StreamLine>,
    wrap: fn(String) -> StreamLine,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(wrap(decode_line(&buf))).is_err() {
                    break;
                }
            },
            Err(e) => {
                warn!("Stopped reading engine output: {}", e);
                break;
            },
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
