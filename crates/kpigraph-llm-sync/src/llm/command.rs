use super::GenerationService;
use crate::error::GenerationError;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Runs an external program per prompt: prompt on stdin, text on stdout.
///
/// Useful for wrapping local inference scripts that have no HTTP server.
#[derive(Debug, Clone)]
pub struct CommandService {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    model: String,
}

impl CommandService {
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Option<Duration>) -> Self {
        let model = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "command".to_string());
        Self {
            program,
            args,
            timeout,
            model,
        }
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl GenerationService for CommandService {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let context = format!("generation command `{}`", self.program.display());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GenerationError::Transport(format!("failed to start {context}: {e}")))?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(GenerationError::Transport(format!(
                "failed to open stdin for {context}"
            )));
        };
        // The child may start answering before it has read the whole prompt.
        let payload = prompt.as_bytes().to_vec();
        let writer = thread::spawn(move || stdin.write_all(&payload));

        let out = wait_with_output_timeout(child, self.timeout, &context)?;
        if let Ok(Err(e)) = writer.join() {
            tracing::debug!(%context, error = %e, "prompt not fully consumed");
        }
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(GenerationError::from_backend_message(format!(
                "{context} failed (exit={:?}): {}",
                out.status.code(),
                stderr.trim()
            )));
        }

        String::from_utf8(out.stdout)
            .map_err(|e| GenerationError::Backend(format!("{context} returned non-utf8 stdout: {e}")))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Wait for `child`, killing it once `timeout` has elapsed.
///
/// stdout and stderr are drained on helper threads while polling.
pub(crate) fn wait_with_output_timeout(
    mut child: Child,
    timeout: Option<Duration>,
    context: &str,
) -> Result<Output, GenerationError> {
    let Some(timeout) = timeout else {
        return child
            .wait_with_output()
            .map_err(|e| GenerationError::Transport(format!("{context}: {e}")));
    };

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let start = Instant::now();
    let status = loop {
        let polled = child.try_wait().map_err(|e| {
            GenerationError::Transport(format!("{context}: failed to poll child status: {e}"))
        })?;
        if let Some(status) = polled {
            break status;
        }

        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(%context, secs = timeout.as_secs(), "generation command timed out");
            return Err(GenerationError::Timeout(timeout));
        }

        thread::sleep(Duration::from_millis(50));
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn echoes_through_cat() {
        let svc = CommandService::new(PathBuf::from("cat"), Vec::new(), Some(Duration::from_secs(10)));
        assert_eq!(svc.generate("{\"kpis\": []}").unwrap(), "{\"kpis\": []}");
        assert_eq!(svc.model_name(), "cat");
    }

    #[test]
    fn slow_commands_time_out() {
        let svc = CommandService::new(
            PathBuf::from("sleep"),
            vec!["5".to_string()],
            Some(Duration::from_millis(200)),
        );
        assert!(matches!(svc.generate(""), Err(GenerationError::Timeout(_))));
    }

    #[test]
    fn missing_program_is_a_transport_error() {
        let svc = CommandService::new(PathBuf::from("/nonexistent/kpigraph-model"), Vec::new(), None);
        assert!(matches!(svc.generate("x"), Err(GenerationError::Transport(_))));
    }
}
