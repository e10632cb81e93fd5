use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Exit-status value reported when a run timed out, failed to launch, or
/// failed mid-flight for a transient reason. A run carrying this status never
/// carries a measured runtime.
pub const STATUS_SENTINEL: i32 = -1;

/// Runtime value reported when the wall-clock duration was not measured
/// because the run did not complete normally.
pub const RUNTIME_SENTINEL: f64 = -1.0;

/// Command-template token substituted with a temporary file path. Its
/// presence anywhere in the command switches the executor to file-input mode.
pub const FILE_INPUT_TOKEN: &str = "@@";

/// Interval between `try_wait` polls while the child is running.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything observable from a single run of the target.
///
/// `status` is the process exit code, the negated signal number for a
/// signal-killed target, or [`STATUS_SENTINEL`]. `runtime` is wall-clock
/// seconds for a completed run and [`RUNTIME_SENTINEL`] otherwise; the two
/// sentinels always travel together.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub runtime: f64,
}

impl ExecutionResult {
    /// Result for a run that terminated on its own.
    pub fn completed(status: i32, stdout: Vec<u8>, stderr: Vec<u8>, runtime: f64) -> Self {
        Self {
            status,
            stdout,
            stderr,
            runtime,
        }
    }

    /// Result for a run that timed out or failed for a transient reason.
    /// Output captured before the failure is carried along best-effort;
    /// status and runtime are pinned to their sentinels so the two can never
    /// disagree.
    pub fn undetermined(stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            status: STATUS_SENTINEL,
            stdout,
            stderr,
            runtime: RUNTIME_SENTINEL,
        }
    }

    /// Whether this run hit the deadline or otherwise failed to produce a
    /// defined exit status.
    pub fn timed_out(&self) -> bool {
        self.status == STATUS_SENTINEL
    }
}

/// Runs an external target once per [`execute`](CommandExecutor::execute)
/// call, delivering the case on stdin or through a temporary file depending
/// on whether the command template contains [`FILE_INPUT_TOKEN`].
///
/// Each call is self-contained: it owns its child process, its deadline timer
/// and (in file mode) its own temporary file, so independent executors may
/// run concurrently without sharing state.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    /// The command template this executor was built with.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Whether the command template requests file-input delivery.
    pub fn uses_file_input(&self) -> bool {
        self.command.iter().any(|token| token == FILE_INPUT_TOKEN)
    }

    /// Executes the target once against `case`.
    ///
    /// This never returns an error: a run that cannot be launched, written
    /// to, or waited on is folded into an undetermined result so a single
    /// bad run can never abort a surrounding campaign. The temporary file
    /// backing file-input mode is removed before this returns, in every
    /// outcome.
    pub fn execute(&self, case: &[u8]) -> ExecutionResult {
        // Held until the end of the call; dropping it deletes the file.
        let mut case_file: Option<tempfile::NamedTempFile> = None;

        let argv = if self.uses_file_input() {
            let file = match tempfile::NamedTempFile::new() {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("Failed to create case file: {e}. Disregarding run.");
                    return ExecutionResult::undetermined(Vec::new(), Vec::new());
                }
            };
            if let Err(e) = file.as_file().write_all(case) {
                eprintln!("Failed to write case file: {e}. Disregarding run.");
                return ExecutionResult::undetermined(Vec::new(), Vec::new());
            }
            let path = match file.path().to_str() {
                Some(path) => path.to_string(),
                None => {
                    eprintln!("Case file path is not valid UTF-8. Disregarding run.");
                    return ExecutionResult::undetermined(Vec::new(), Vec::new());
                }
            };
            let argv: Vec<String> = self
                .command
                .iter()
                .map(|token| {
                    if token == FILE_INPUT_TOKEN {
                        path.clone()
                    } else {
                        token.clone()
                    }
                })
                .collect();
            case_file = Some(file);
            argv
        } else {
            self.command.clone()
        };

        let mut cmd = Command::new(&argv[0]);
        if argv.len() > 1 {
            cmd.args(&argv[1..]);
        }
        // The target never shares the fuzzer's console.
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                eprintln!("Failed to spawn {:?}: {e}. Disregarding run.", argv[0]);
                return ExecutionResult::undetermined(Vec::new(), Vec::new());
            }
        };
        let start = Instant::now();

        // Drain both output pipes off-thread so a chatty target cannot fill
        // a pipe and deadlock the wait loop below.
        let stdout_reader = child.stdout.take().map(spawn_pipe_reader);
        let stderr_reader = child.stderr.take().map(spawn_pipe_reader);

        // In stdin mode the case is fed from a writer thread for the same
        // reason; in file mode the handle is dropped untouched, closing the
        // child's stdin immediately.
        let stdin_writer: Option<JoinHandle<()>> = match child.stdin.take() {
            Some(mut stdin) if case_file.is_none() => {
                let payload = case.to_vec();
                Some(thread::spawn(move || {
                    // A broken pipe here just means the target exited early.
                    let _ = stdin.write_all(&payload);
                }))
            }
            _ => None,
        };

        let waited = self.wait_with_deadline(&mut child, start);

        if let Some(writer) = stdin_writer {
            let _ = writer.join();
        }
        let stdout = stdout_reader.map(collect_pipe).unwrap_or_default();
        let stderr = stderr_reader.map(collect_pipe).unwrap_or_default();
        drop(case_file);

        match waited {
            Some((status, runtime)) => ExecutionResult::completed(status, stdout, stderr, runtime),
            None => ExecutionResult::undetermined(stdout, stderr),
        }
    }

    /// Polls the child until it exits or the deadline passes. Returns the
    /// mapped exit status and runtime on normal termination, `None` when the
    /// child was killed for the deadline or the wait itself failed. The child
    /// is always reaped before this returns.
    fn wait_with_deadline(&self, child: &mut Child, start: Instant) -> Option<(i32, f64)> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let runtime = start.elapsed().as_secs_f64();
                    return Some((exit_status_value(status), runtime));
                }
                Ok(None) => {
                    if start.elapsed() >= self.timeout {
                        kill_and_reap(child);
                        return None;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    eprintln!("Unknown error while executing: {e}. Disregarding result.");
                    kill_and_reap(child);
                    return None;
                }
            }
        }
    }
}

/// Maps an `ExitStatus` to the signed integer the classifier compares
/// against: the exit code when there is one, the negated signal number for a
/// signal death, the sentinel when neither is available.
fn exit_status_value(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    STATUS_SENTINEL
}

fn kill_and_reap(child: &mut Child) {
    // SIGKILL, unconditionally; a stuck target gets no chance to object.
    if let Err(e) = child.kill() {
        eprintln!("Failed to kill child process: {e}");
    }
    let _ = child.wait();
}

fn spawn_pipe_reader<P: Read + Send + 'static>(mut pipe: P) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        // A read error after a kill is expected; keep whatever arrived.
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect_pipe(handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn stdin_mode_passes_case_bytes_on_standard_input() {
        let executor = CommandExecutor::new(vec!["cat".to_string()], Duration::from_secs(2));
        assert!(!executor.uses_file_input());

        let result = executor.execute(b"hello fuzzer");
        assert_eq!(result.status, 0);
        assert_eq!(result.stdout, b"hello fuzzer");
        assert!(result.runtime >= 0.0, "completed run must measure runtime");
        assert!(!result.timed_out());
    }

    #[test]
    fn exit_code_is_reported_verbatim() {
        let executor = CommandExecutor::new(sh("exit 7"), Duration::from_secs(2));
        let result = executor.execute(b"");
        assert_eq!(result.status, 7);
    }

    #[test]
    fn stderr_is_captured_separately() {
        let executor = CommandExecutor::new(sh("echo out; echo oops >&2"), Duration::from_secs(2));
        let result = executor.execute(b"");
        assert_eq!(result.stdout, b"out\n");
        assert_eq!(result.stderr, b"oops\n");
    }

    #[test]
    fn file_mode_substitutes_token_and_cleans_up() {
        // The target reports the substituted path so the test can verify the
        // temporary file is gone afterwards.
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat \"$1\"; printf '%s' \"$1\" >&2".to_string(),
            "sh".to_string(),
            FILE_INPUT_TOKEN.to_string(),
        ];
        let executor = CommandExecutor::new(command, Duration::from_secs(2));
        assert!(executor.uses_file_input());

        let result = executor.execute(b"file payload");
        assert_eq!(result.status, 0);
        assert_eq!(result.stdout, b"file payload");

        let reported_path = String::from_utf8(result.stderr).expect("path should be UTF-8");
        assert!(
            !reported_path.is_empty() && !reported_path.contains(FILE_INPUT_TOKEN),
            "token should have been substituted, got {reported_path:?}",
        );
        assert!(
            !Path::new(&reported_path).exists(),
            "case file {reported_path:?} must not survive the run",
        );
    }

    #[test]
    fn file_mode_cleans_up_after_nonzero_exit() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf '%s' \"$1\"; exit 3".to_string(),
            "sh".to_string(),
            FILE_INPUT_TOKEN.to_string(),
        ];
        let executor = CommandExecutor::new(command, Duration::from_secs(2));
        let result = executor.execute(b"x");
        assert_eq!(result.status, 3);
        let reported_path = String::from_utf8(result.stdout).unwrap();
        assert!(!Path::new(&reported_path).exists());
    }

    #[test]
    fn deadline_kills_target_with_bounded_overshoot() {
        let executor = CommandExecutor::new(
            vec!["sleep".to_string(), "5".to_string()],
            Duration::from_millis(200),
        );
        let start = Instant::now();
        let result = executor.execute(b"");
        let elapsed = start.elapsed();

        assert!(result.timed_out());
        assert_eq!(result.status, STATUS_SENTINEL);
        assert_eq!(result.runtime, RUNTIME_SENTINEL);
        assert!(
            elapsed < Duration::from_secs(2),
            "kill must not wait for the target to finish (took {elapsed:?})",
        );
    }

    #[test]
    fn timed_out_run_keeps_partial_output() {
        // stdout is closed before the hang so the pipe reader is not held
        // open by the sleeping child.
        let executor = CommandExecutor::new(
            sh("echo early; exec >/dev/null 2>&1; sleep 5"),
            Duration::from_millis(300),
        );
        let result = executor.execute(b"");
        assert!(result.timed_out());
        assert_eq!(result.stdout, b"early\n");
    }

    #[test]
    fn launch_failure_is_absorbed_not_propagated() {
        let executor = CommandExecutor::new(
            vec!["./no_such_binary_for_oddity_tests".to_string()],
            Duration::from_secs(1),
        );
        let result = executor.execute(b"data");
        assert!(result.timed_out());
        assert_eq!(result.runtime, RUNTIME_SENTINEL);
        assert!(result.stdout.is_empty() && result.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn signal_death_maps_to_negated_signal_number() {
        let executor = CommandExecutor::new(sh("kill -9 $$"), Duration::from_secs(2));
        let result = executor.execute(b"");
        assert_eq!(result.status, -9);
    }
}
