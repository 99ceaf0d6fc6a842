use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::config::{ProcessConfig, DEFAULT_WINDOWS_KITS_DIR};
use crate::context::Context;
use crate::error::{SpawnCause, SpawnError};
use crate::ntstatus;

/// Exit code reported when a process could not be observed to exit.
const UNOBSERVED_EXIT_CODE: i32 = 1;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to keep reading output after a timed-out process was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Options for a single command invocation.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Variables layered on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one command invocation.
///
/// `error` is set exactly when the process did not exit with code 0 and no
/// signal.
#[derive(Debug)]
pub struct SpawnResult {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Symbolic NTSTATUS name for the exit code (Windows only).
    pub exit_reason: Option<String>,
    pub signal_code: Option<String>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<SpawnError>,
}

impl SpawnResult {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    fn into_result(mut self) -> Result<SpawnResult, SpawnError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Raw observations collected while the process ran.
#[derive(Debug)]
struct Observed {
    exit_code: Option<i32>,
    signal_code: Option<String>,
    timed_out: bool,
    stdout: String,
    stderr: String,
    io_error: Option<io::Error>,
}

impl Default for Observed {
    fn default() -> Self {
        Self {
            exit_code: Some(UNOBSERVED_EXIT_CODE),
            signal_code: None,
            timed_out: false,
            stdout: String::new(),
            stderr: String::new(),
            io_error: None,
        }
    }
}

impl Observed {
    fn record_status(&mut self, status: ExitStatus) {
        self.exit_code = status.code();
        self.signal_code = signal_name(&status);
    }
}

/// Runs external commands and normalizes how they ended.
///
/// Arguments are always passed as a vector straight to the OS; nothing is
/// interpreted by a shell.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    ctx: Arc<Context>,
    ntstatus_header: Option<PathBuf>,
    windows_kits_dir: PathBuf,
    /// Translate non-zero exit codes to NTSTATUS names.
    windows_exit_codes: bool,
}

impl ProcessRunner {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            ntstatus_header: None,
            windows_kits_dir: PathBuf::from(DEFAULT_WINDOWS_KITS_DIR),
            windows_exit_codes: cfg!(windows),
        }
    }

    pub fn with_ntstatus_header(mut self, header: Option<PathBuf>) -> Self {
        self.ntstatus_header = header;
        self
    }

    pub fn with_windows_kits_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.windows_kits_dir = dir.into();
        self
    }

    pub fn with_windows_exit_codes(mut self, enabled: bool) -> Self {
        self.windows_exit_codes = enabled;
        self
    }

    pub fn from_config(ctx: Arc<Context>, config: &ProcessConfig) -> Self {
        Self::new(ctx)
            .with_windows_kits_dir(&config.windows_kits_dir)
            .with_ntstatus_header(config.ntstatus_header.clone())
    }

    /// Run `command` to completion without blocking the async runtime.
    pub async fn spawn<S: AsRef<str>>(&self, command: &[S], options: &SpawnOptions) -> SpawnResult {
        let command = to_owned_command(command);
        let mut observed = Observed::default();

        match build_async_command(&command, options) {
            Err(e) => observed.io_error = Some(e),
            Ok(mut cmd) => {
                debug!("$ {}", describe_command(&command));
                match cmd.spawn() {
                    Err(e) => observed.io_error = Some(e),
                    Ok(mut child) => {
                        let stdout = tokio::spawn(read_async_pipe(child.stdout.take()));
                        let stderr = tokio::spawn(read_async_pipe(child.stderr.take()));
                        let (status, timed_out) = match options.timeout {
                            None => (child.wait().await, false),
                            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                                Ok(status) => (status, false),
                                Err(_) => {
                                    kill_process_group(child.id());
                                    let _ = child.start_kill();
                                    (child.wait().await, true)
                                }
                            },
                        };

                        // Descendants may still hold the pipes after a kill.
                        let grace = timed_out.then_some(DRAIN_GRACE);
                        let stdout = drain_async_pipe(stdout, grace).await;
                        let stderr = drain_async_pipe(stderr, grace).await;
                        observed.timed_out = timed_out;
                        collect(&mut observed, status, stdout, stderr);
                    }
                }
            }
        }

        self.finish(&command, observed)
    }

    /// Run `command` to completion on the calling thread.
    pub fn spawn_sync<S: AsRef<str>>(&self, command: &[S], options: &SpawnOptions) -> SpawnResult {
        let command = to_owned_command(command);
        let mut observed = Observed::default();

        match build_sync_command(&command, options) {
            Err(e) => observed.io_error = Some(e),
            Ok(mut cmd) => {
                debug!("$ {}", describe_command(&command));
                match cmd.spawn() {
                    Err(e) => observed.io_error = Some(e),
                    Ok(mut child) => {
                        let stdout = read_sync_pipe(child.stdout.take());
                        let stderr = read_sync_pipe(child.stderr.take());
                        let (status, timed_out) = wait_sync(&mut child, options.timeout);
                        observed.timed_out = timed_out;
                        let grace = timed_out.then_some(DRAIN_GRACE);
                        let stdout = drain_sync_pipe(stdout, grace);
                        let stderr = drain_sync_pipe(stderr, grace);
                        collect(&mut observed, status, stdout, stderr);
                    }
                }
            }
        }

        self.finish(&command, observed)
    }

    /// Like [`ProcessRunner::spawn`], but a failed command becomes an `Err`.
    pub async fn spawn_safe<S: AsRef<str>>(
        &self,
        command: &[S],
        options: &SpawnOptions,
    ) -> Result<SpawnResult, SpawnError> {
        self.spawn(command, options).await.into_result()
    }

    /// Like [`ProcessRunner::spawn_sync`], but a failed command becomes an `Err`.
    pub fn spawn_sync_safe<S: AsRef<str>>(
        &self,
        command: &[S],
        options: &SpawnOptions,
    ) -> Result<SpawnResult, SpawnError> {
        self.spawn_sync(command, options).into_result()
    }

    fn finish(&self, command: &[String], observed: Observed) -> SpawnResult {
        let Observed {
            exit_code,
            signal_code,
            timed_out,
            stdout,
            stderr,
            io_error,
        } = observed;

        let exit_reason = match exit_code {
            Some(code) if code != 0 && self.windows_exit_codes => self.windows_exit_reason(code),
            _ => None,
        };

        let failed = io_error.is_some() || signal_code.is_some() || exit_code != Some(0);
        let error = failed.then(|| {
            let description = describe_command(command);
            let cause = best_cause(io_error, &stderr, &stdout);
            match &signal_code {
                Some(signal) => SpawnError::Killed {
                    signal: signal.clone(),
                    command: description,
                    cause,
                },
                None => SpawnError::Exited {
                    code: exit_reason
                        .clone()
                        .or_else(|| exit_code.map(|c| c.to_string()))
                        .unwrap_or_else(|| UNOBSERVED_EXIT_CODE.to_string()),
                    command: description,
                    cause,
                },
            }
        });

        SpawnResult {
            exit_code,
            exit_reason,
            signal_code,
            timed_out,
            stdout,
            stderr,
            error,
        }
    }

    fn windows_exit_reason(&self, code: i32) -> Option<String> {
        let header = self
            .ntstatus_header
            .clone()
            .or_else(|| ntstatus::locate_header(&self.windows_kits_dir))?;
        let contents = self.ctx.files().read(&header).ok()?;
        // Windows exit codes are unsigned 32-bit values.
        ntstatus::lookup(&contents, code as u32)
    }
}

/// Render a command line for error messages, quoting arguments with spaces.
pub fn describe_command<S: AsRef<str>>(command: &[S]) -> String {
    command
        .iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if arg.contains(' ') {
                format!("\"{}\"", arg.replace('"', "\\\""))
            } else {
                arg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_owned_command<S: AsRef<str>>(command: &[S]) -> Vec<String> {
    command.iter().map(|arg| arg.as_ref().to_string()).collect()
}

fn empty_command() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "command must not be empty")
}

fn build_async_command(
    command: &[String],
    options: &SpawnOptions,
) -> io::Result<tokio::process::Command> {
    let (program, args) = command.split_first().ok_or_else(empty_command)?;
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    #[cfg(unix)]
    if options.timeout.is_some() {
        cmd.process_group(0);
    }
    Ok(cmd)
}

fn build_sync_command(
    command: &[String],
    options: &SpawnOptions,
) -> io::Result<std::process::Command> {
    let (program, args) = command.split_first().ok_or_else(empty_command)?;
    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    #[cfg(unix)]
    if options.timeout.is_some() {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    Ok(cmd)
}

async fn read_async_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn read_sync_pipe<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> std::thread::JoinHandle<io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn wait_sync(
    child: &mut std::process::Child,
    timeout: Option<Duration>,
) -> (io::Result<ExitStatus>, bool) {
    let Some(limit) = timeout else {
        return (child.wait(), false);
    };

    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return (Ok(status), false),
            Ok(None) if Instant::now() >= deadline => {
                kill_process_group(Some(child.id()));
                let _ = child.kill();
                return (child.wait(), true);
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => return (Err(e), false),
        }
    }
}

/// Collect a reader task's output, giving up after `grace` if set.
async fn drain_async_pipe(
    reader: tokio::task::JoinHandle<io::Result<Vec<u8>>>,
    grace: Option<Duration>,
) -> io::Result<Vec<u8>> {
    let joined = match grace {
        None => reader.await,
        Some(grace) => {
            let abort = reader.abort_handle();
            match tokio::time::timeout(grace, reader).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    debug!("Output still open {:?} after kill; discarding", grace);
                    return Ok(Vec::new());
                }
            }
        }
    };
    joined.unwrap_or_else(|e| Err(io::Error::other(e)))
}

/// Join a reader thread, leaving it detached if it outlives `grace`.
fn drain_sync_pipe(
    reader: std::thread::JoinHandle<io::Result<Vec<u8>>>,
    grace: Option<Duration>,
) -> io::Result<Vec<u8>> {
    if let Some(grace) = grace {
        let deadline = Instant::now() + grace;
        while !reader.is_finished() {
            if Instant::now() >= deadline {
                debug!("Output still open {:?} after kill; discarding", grace);
                return Ok(Vec::new());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    reader.join().unwrap_or_else(|_| Ok(Vec::new()))
}

/// SIGKILL the process group led by `pid`; timed-out children lead their own.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!("killpg {} failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn collect(
    observed: &mut Observed,
    status: io::Result<ExitStatus>,
    stdout: io::Result<Vec<u8>>,
    stderr: io::Result<Vec<u8>>,
) {
    match status {
        Ok(status) => observed.record_status(status),
        Err(e) => observed.io_error = Some(e),
    }
    match stdout {
        Ok(bytes) => observed.stdout = String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            observed.io_error.get_or_insert(e);
        }
    }
    match stderr {
        Ok(bytes) => observed.stderr = String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            observed.io_error.get_or_insert(e);
        }
    }
}

fn best_cause(io_error: Option<io::Error>, stderr: &str, stdout: &str) -> Option<SpawnCause> {
    if let Some(e) = io_error {
        return Some(SpawnCause::Io(e));
    }
    [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .map(|s| SpawnCause::Output(s.to_string()))
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> Option<String> {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    let signal = status.signal()?;
    Some(
        Signal::try_from(signal)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| format!("signal {signal}")),
    )
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Arc::new(Context::new()))
    }

    #[test]
    fn test_describe_command_quotes_spaces() {
        let command = ["git", "commit", "-m", "say \"hi\" now"];
        assert_eq!(
            describe_command(&command),
            r#"git commit -m "say \"hi\" now""#
        );
        assert_eq!(describe_command(&["unzip", "-o"]), "unzip -o");
    }

    #[test]
    fn test_best_cause_preference() {
        let io = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            best_cause(Some(io), "err", "out"),
            Some(SpawnCause::Io(_))
        ));
        assert!(matches!(
            best_cause(None, "  err \n", "out"),
            Some(SpawnCause::Output(s)) if s == "err"
        ));
        assert!(matches!(
            best_cause(None, "   ", " out\n"),
            Some(SpawnCause::Output(s)) if s == "out"
        ));
        assert!(best_cause(None, "", "").is_none());
    }

    #[test]
    fn test_empty_command_is_an_error() {
        let empty: [&str; 0] = [];
        let result = runner().spawn_sync(&empty, &SpawnOptions::new());
        assert_eq!(result.exit_code, Some(1));
        let error = result.error.unwrap();
        assert!(matches!(
            error.cause(),
            Some(SpawnCause::Io(e)) if e.kind() == io::ErrorKind::InvalidInput
        ));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let result = runner()
            .spawn(&["definitely-not-a-real-binary-4f1c"], &SpawnOptions::new())
            .await;
        assert_eq!(result.exit_code, Some(1));
        assert!(result.signal_code.is_none());
        let error = result.error.unwrap();
        assert!(error.is_not_found());
        assert!(error
            .to_string()
            .starts_with("Command exited with code 1: definitely-not-a-real-binary-4f1c"));
    }

    const NTSTATUS_HEADER: &str = "\
#define STATUS_SUCCESS                   ((NTSTATUS)0x00000000L)
#define STATUS_ACCESS_VIOLATION          ((NTSTATUS)0xC0000005L)
#define STATUS_STACK_OVERFLOW            ((NTSTATUS)0xC00000FDL)
";

    fn exited_with(code: i32) -> Observed {
        Observed {
            exit_code: Some(code),
            ..Observed::default()
        }
    }

    #[test]
    fn test_windows_exit_code_is_named() {
        let header = PathBuf::from(r"C:\Kits\Include\10.0.22621.0\shared\ntstatus.h");
        let ctx = Arc::new(Context::new().with_file(&header, NTSTATUS_HEADER));
        let runner = ProcessRunner::new(ctx)
            .with_ntstatus_header(Some(header))
            .with_windows_exit_codes(true);
        let command = vec!["bun.exe".to_string(), "--version".to_string()];

        let result = runner.finish(&command, exited_with(0xC0000005_u32 as i32));
        assert_eq!(result.exit_code, Some(-1073741819));
        assert_eq!(result.exit_reason.as_deref(), Some("STATUS_ACCESS_VIOLATION"));
        assert!(matches!(
            result.error,
            Some(SpawnError::Exited { ref code, .. }) if code == "STATUS_ACCESS_VIOLATION"
        ));
        assert_eq!(
            result.error.unwrap().to_string(),
            "Command exited with code STATUS_ACCESS_VIOLATION: bun.exe --version"
        );

        let result = runner.finish(&command, exited_with(7));
        assert_eq!(result.exit_code, Some(7));
        assert!(result.exit_reason.is_none());
        assert!(matches!(
            result.error,
            Some(SpawnError::Exited { ref code, .. }) if code == "7"
        ));

        let result = runner.finish(&command, exited_with(0));
        assert!(result.success());
        assert!(result.exit_reason.is_none());
    }

    #[test]
    fn test_exit_codes_untranslated_when_disabled() {
        let header = PathBuf::from("ntstatus.h");
        let ctx = Arc::new(Context::new().with_file(&header, NTSTATUS_HEADER));
        let runner = ProcessRunner::new(ctx)
            .with_ntstatus_header(Some(header))
            .with_windows_exit_codes(false);

        let result = runner.finish(&["bun".to_string()], exited_with(0xC0000005_u32 as i32));
        assert!(result.exit_reason.is_none());
        assert!(matches!(
            result.error,
            Some(SpawnError::Exited { ref code, .. }) if code == "-1073741819"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_name() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(
            signal_name(&ExitStatus::from_raw(15)).as_deref(),
            Some("SIGTERM")
        );
        assert_eq!(signal_name(&ExitStatus::from_raw(0)), None);
    }
}
