use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use tracing::{debug, info, warn};

use crate::{
    config::ExecutionConfig,
    workflow::step::{StepDefinition, StepStatus},
    Error, Result,
};

/// Exit code and captured streams of the most recent step that ran.
///
/// All three are `None` until a step has actually executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub exit_code: Option<i32>,
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

impl StepOutcome {
    pub fn new(exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: Some(stdout),
            stderr: Some(stderr),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> Option<String> {
        self.stdout
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn stderr_lossy(&self) -> Option<String> {
        self.stderr
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl StepDefinition {
    /// Runs the step's command as a child process and waits for it.
    ///
    /// `previous` is the outcome of the step that ran before this one; its
    /// stdout is fed to the child only when `with_stdin` is set. The step's
    /// exit code is recorded before its status moves to `TERMINATED`.
    pub fn execute(&mut self, previous: StepOutcome, config: &ExecutionConfig) -> Result<StepOutcome> {
        if self.status != StepStatus::Ready {
            return Err(Error::AlreadyExecuted(self.id.clone()));
        }

        let (program, args) = match self.command.as_deref() {
            Some([program, args @ ..]) => (program.clone(), args.to_vec()),
            _ => {
                return Err(Error::Validation(format!(
                    "Step '{}' has no command to execute",
                    self.id
                )))
            }
        };

        info!("Executing step: {} ({})", self.id, self.step.as_deref().unwrap_or(&program));
        debug!(
            "Step {} input: exit_code={:?}, stdout={} bytes, with_stdin={}",
            self.id,
            previous.exit_code,
            previous.stdout.as_ref().map_or(0, Vec::len),
            self.with_stdin
        );

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        self.set_status(StepStatus::Running);

        let mut child = command.spawn().map_err(|source| Error::Launch {
            step: self.id.clone(),
            program: program.clone(),
            source,
        })?;

        // Feed stdin from its own thread so a child that writes a lot before
        // reading cannot stall on a full stdout pipe.
        let writer = match (self.with_stdin, child.stdin.take()) {
            (true, Some(mut stdin)) => {
                let input = previous.stdout.unwrap_or_default();
                Some(thread::spawn(move || -> std::io::Result<()> {
                    match stdin.write_all(&input) {
                        Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                        _ => Ok(()),
                    }
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output()?;

        let fed = match writer.map(|writer| writer.join()) {
            None => Ok(()),
            Some(Ok(written)) => written.map_err(Error::from),
            Some(Err(_)) => Err(Error::Execution(format!("stdin writer for step '{}' panicked", self.id))),
        };

        let exit_code = exit_code_of(output.status);
        self.terminate(exit_code, fed)?;

        if exit_code == 0 {
            info!("Step {} completed successfully", self.id);
        } else {
            warn!("Step {} exited with code {}", self.id, exit_code);
        }

        Ok(StepOutcome::new(exit_code, output.stdout, output.stderr))
    }

    /// Records the exit code and moves to `TERMINATED`, then surfaces any
    /// error from feeding stdin. The child has exited either way.
    fn terminate(&mut self, exit_code: i32, fed: Result<()>) -> Result<()> {
        self.exit_code = Some(exit_code);
        self.set_status(StepStatus::Terminated);

        fed.map_err(|e| {
            warn!("Step {} exited with code {} but its stdin could not be fed: {}", self.id, exit_code, e);
            e
        })
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::workflow::step::StatusObserver;
    use std::sync::{Arc, Mutex};

    fn step(id: &str, line: &str) -> StepDefinition {
        StepDefinition::new(id, Some(line)).unwrap()
    }

    #[test]
    fn successful_execution_terminates_with_zero() {
        let mut s = step("Step with successful execution", "ls");
        let outcome = s.execute(StepOutcome::default(), &ExecutionConfig::default()).unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(s.exit_code(), Some(0));
        assert_eq!(s.status(), StepStatus::Terminated);
        assert!(s.to_string().contains(r#""status": "TERMINATED""#));
    }

    #[test]
    fn failed_execution_still_terminates() {
        let mut s = step("Step with failed execution", "false");
        let outcome = s.execute(StepOutcome::default(), &ExecutionConfig::default()).unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(s.status(), StepStatus::Terminated);
    }

    #[test]
    fn pipes_previous_stdout_into_stdin() {
        let previous = StepOutcome::new(0, b"John\nSteven\nBob\nAlice\nLucy\nGloria".to_vec(), Vec::new());
        let mut s = step("sort", "sort").with_stdin(true);
        let outcome = s.execute(previous, &ExecutionConfig::default()).unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(
            outcome.stdout_lossy().unwrap(),
            "Alice\nBob\nGloria\nJohn\nLucy\nSteven\n"
        );
    }

    #[test]
    fn stdin_bytes_pass_through_unchanged() {
        let input: Vec<u8> = (0u8..=255).cycle().take(256 * 1024).collect();
        let previous = StepOutcome::new(0, input.clone(), Vec::new());
        let mut s = step("cat", "cat").with_stdin(true);
        let outcome = s.execute(previous, &ExecutionConfig::default()).unwrap();
        assert_eq!(outcome.stdout, Some(input));
    }

    #[test]
    fn child_that_ignores_stdin_is_not_an_error() {
        let previous = StepOutcome::new(0, b"Some input text that will be ignored".to_vec(), Vec::new());
        let mut s = step("false", "false").with_stdin(true);
        let outcome = s.execute(previous, &ExecutionConfig::default()).unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(s.status(), StepStatus::Terminated);
    }

    #[test]
    fn without_stdin_previous_output_is_not_forwarded() {
        let previous = StepOutcome::new(0, b"should not arrive".to_vec(), Vec::new());
        let mut s = step("cat", "cat");
        let outcome = s.execute(previous, &ExecutionConfig::default()).unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout, Some(Vec::new()));
    }

    #[test]
    fn captures_stderr_and_exit_code() {
        let mut s = step("err", "sh -c 'echo oops >&2; exit 7'");
        let outcome = s.execute(StepOutcome::default(), &ExecutionConfig::default()).unwrap();
        assert_eq!(outcome.exit_code, Some(7));
        assert_eq!(outcome.stderr_lossy().unwrap(), "oops\n");
        assert_eq!(outcome.stdout, Some(Vec::new()));
    }

    #[test]
    fn signal_termination_is_negative() {
        let mut s = step("killed", "sh -c 'kill -9 $$'");
        let outcome = s.execute(StepOutcome::default(), &ExecutionConfig::default()).unwrap();
        assert_eq!(outcome.exit_code, Some(-9));
    }

    #[test]
    fn missing_program_is_a_launch_failure() {
        let mut s = step("ghost", "./definitely-not-here-swen");
        let err = s
            .execute(StepOutcome::default(), &ExecutionConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::Launch { ref step, .. } if step == "ghost"));
        assert_eq!(s.exit_code(), None);
    }

    #[test]
    fn second_execution_fails_fast() {
        let mut s = step("once", "true");
        s.execute(StepOutcome::default(), &ExecutionConfig::default()).unwrap();
        assert!(matches!(
            s.execute(StepOutcome::default(), &ExecutionConfig::default()),
            Err(Error::AlreadyExecuted(id)) if id == "once"
        ));
    }

    #[test]
    fn placeholder_cannot_execute() {
        let mut s = StepDefinition::new("noop", None).unwrap();
        assert!(matches!(
            s.execute(StepOutcome::default(), &ExecutionConfig::default()),
            Err(Error::Validation(_))
        ));
        assert_eq!(s.status(), StepStatus::Ready);
    }

    #[test]
    fn exit_code_is_recorded_before_terminated_is_announced() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut s = step("observed", "sh -c 'exit 4'").with_status_observer(StatusObserver::new(
            "recorder",
            move |_, from, to| sink.lock().unwrap().push((from, to)),
        ));
        s.execute(StepOutcome::default(), &ExecutionConfig::default()).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (StepStatus::Ready, StepStatus::Running),
                (StepStatus::Running, StepStatus::Terminated),
            ]
        );
        assert_eq!(s.exit_code(), Some(4));
    }

    #[test]
    fn stdin_feed_error_still_terminates_the_step() {
        let mut s = step("fed", "cat");
        s.set_status(StepStatus::Running);
        let fed = Err(Error::Io(std::io::Error::new(ErrorKind::Other, "disk on fire")));

        assert!(matches!(s.terminate(3, fed), Err(Error::Io(_))));
        assert_eq!(s.status(), StepStatus::Terminated);
        assert_eq!(s.exit_code(), Some(3));
        assert!(matches!(
            s.execute(StepOutcome::default(), &ExecutionConfig::default()),
            Err(Error::AlreadyExecuted(_))
        ));
    }

    #[test]
    fn runs_in_configured_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let config = ExecutionConfig {
            working_dir: Some(dir.path().to_path_buf()),
        };
        let mut s = step("cat-marker", "cat marker.txt");
        let outcome = s.execute(StepOutcome::default(), &config).unwrap();
        assert_eq!(outcome.stdout_lossy().unwrap(), "here");
    }
}
