use super::GenerationService;
use crate::error::GenerationError;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Bounds any service by a wall-clock deadline.
///
/// The call runs on a worker thread; past the deadline the caller gets
/// `GenerationError::Timeout` and the worker is left to finish on its own.
/// Its result is discarded.
pub struct DeadlineService {
    inner: Arc<dyn GenerationService>,
    deadline: Option<Duration>,
}

impl DeadlineService {
    pub fn new(inner: Arc<dyn GenerationService>, deadline: Option<Duration>) -> Self {
        Self { inner, deadline }
    }
}

impl GenerationService for DeadlineService {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let Some(deadline) = self.deadline else {
            return self.inner.generate(prompt);
        };

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        thread::Builder::new()
            .name("kpigraph-generate".to_string())
            .spawn(move || {
                let _ = tx.send(inner.generate(&prompt));
            })
            .map_err(|e| GenerationError::ResourceExhausted(format!("cannot spawn worker: {e}")))?;

        match rx.recv_timeout(deadline) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(model = self.inner.model_name(), secs = deadline.as_secs_f64(), "generation deadline exceeded");
                Err(GenerationError::Timeout(deadline))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(GenerationError::Backend(
                "generation worker exited without a result".to_string(),
            )),
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
