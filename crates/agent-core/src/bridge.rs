//! Hands instructions to the task that owns the [`CopilotRuntime`].
//!
//! Callers on other tasks or on plain OS threads send jobs through a bounded
//! channel and wait for the reply with a deadline. A caller that gives up
//! only stops waiting; the job itself runs to completion on the worker.

use std::time::Duration;

use ai_agent::AgentResult;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::runtime::{CopilotRuntime, RuntimeError};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(210);
const QUEUE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no reply from the runtime within {0:?}")]
    Timeout(Duration),
    #[error("runtime worker has stopped")]
    WorkerGone,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

enum Job {
    Message {
        text: String,
        reply: oneshot::Sender<Result<String, RuntimeError>>,
    },
    Task {
        text: String,
        reply: oneshot::Sender<Result<AgentResult, RuntimeError>>,
    },
}

/// Owns the runtime and serves jobs one at a time.
pub struct RuntimeWorker {
    runtime: CopilotRuntime,
    jobs: mpsc::Receiver<Job>,
}

impl RuntimeWorker {
    /// Pairs a worker with its handle. `handle` is the tokio runtime the
    /// blocking entry points re-enter.
    pub fn new(runtime: CopilotRuntime, handle: Handle) -> (Self, RuntimeHandle) {
        let (sender, jobs) = mpsc::channel(QUEUE_DEPTH);
        let worker = Self { runtime, jobs };
        let handle = RuntimeHandle {
            jobs: sender,
            deadline: DEFAULT_DEADLINE,
            tokio: handle,
        };
        (worker, handle)
    }

    /// Serves jobs until every handle is dropped, then gives the runtime
    /// back so the caller can shut it down.
    pub async fn run(mut self) -> CopilotRuntime {
        while let Some(job) = self.jobs.recv().await {
            match job {
                Job::Message { text, reply } => {
                    let result = self.runtime.process_message(&text).await;
                    if reply.send(result).is_err() {
                        debug!("caller stopped waiting for message reply");
                    }
                }
                Job::Task { text, reply } => {
                    let result = self.runtime.process_task(&text).await;
                    if reply.send(result).is_err() {
                        debug!("caller stopped waiting for task reply");
                    }
                }
            }
        }
        self.runtime
    }
}

#[derive(Clone)]
pub struct RuntimeHandle {
    jobs: mpsc::Sender<Job>,
    deadline: Duration,
    tokio: Handle,
}

impl RuntimeHandle {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn process_message(&self, text: &str) -> Result<String, BridgeError> {
        let (reply, response) = oneshot::channel();
        let job = Job::Message {
            text: text.to_string(),
            reply,
        };
        Ok(self.submit(job, response).await??)
    }

    pub async fn process_task(&self, text: &str) -> Result<AgentResult, BridgeError> {
        let (reply, response) = oneshot::channel();
        let job = Job::Task {
            text: text.to_string(),
            reply,
        };
        Ok(self.submit(job, response).await??)
    }

    /// For threads outside the tokio runtime. Panics if called from async
    /// context.
    pub fn blocking_process_message(&self, text: &str) -> Result<String, BridgeError> {
        self.tokio.block_on(self.process_message(text))
    }

    /// See [`Self::blocking_process_message`].
    pub fn blocking_process_task(&self, text: &str) -> Result<AgentResult, BridgeError> {
        self.tokio.block_on(self.process_task(text))
    }

    async fn submit<T>(
        &self,
        job: Job,
        response: oneshot::Receiver<T>,
    ) -> Result<T, BridgeError> {
        let exchange = async {
            self.jobs
                .send(job)
                .await
                .map_err(|_| BridgeError::WorkerGone)?;
            response.await.map_err(|_| BridgeError::WorkerGone)
        };
        match timeout(self.deadline, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline = ?self.deadline, "runtime did not answer in time");
                Err(BridgeError::Timeout(self.deadline))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_agent::testing::ScriptedModel;
    use ai_agent::{
        LanguageModelClient, LanguageModelError, LanguageModelResponse, Message, ModelOptions,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SlowModel {
        delay: Duration,
    }

    #[async_trait]
    impl LanguageModelClient for SlowModel {
        async fn complete(
            &self,
            _system: &Message,
            history: &[Message],
            _options: &ModelOptions,
        ) -> Result<LanguageModelResponse, LanguageModelError> {
            tokio::time::sleep(self.delay).await;
            let last = history.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(LanguageModelResponse::new(format!("done: {last}")))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_callers_reach_the_worker() {
        let model = ScriptedModel::new(vec!["Hello from the runtime".to_string()]);
        let runtime = CopilotRuntime::builder(model).build();
        let (worker, handle) = RuntimeWorker::new(runtime, Handle::current());
        let worker = tokio::spawn(worker.run());

        let reply = tokio::task::spawn_blocking(move || handle.blocking_process_message("hi"))
            .await
            .expect("blocking task joins")
            .expect("reply");
        assert_eq!(reply, "Hello from the runtime");

        let runtime = worker.await.expect("worker joins");
        assert_eq!(runtime.conversation().len(), 2);
    }

    #[tokio::test]
    async fn expired_deadline_does_not_cancel_the_job() {
        let model = Arc::new(SlowModel {
            delay: Duration::from_millis(150),
        });
        let runtime = CopilotRuntime::builder(model).build();
        let (worker, handle) = RuntimeWorker::new(runtime, Handle::current());
        assert_eq!(handle.deadline(), DEFAULT_DEADLINE);
        let handle = handle.with_deadline(Duration::from_millis(20));
        let worker = tokio::spawn(worker.run());

        let err = handle.process_message("first").await.expect_err("too slow");
        assert!(matches!(err, BridgeError::Timeout(_)));

        let patient = handle.with_deadline(Duration::from_secs(5));
        let result = patient.process_task("second").await.expect("task reply");
        assert_eq!(result.final_text, "done: second");
        drop(patient);

        let runtime = worker.await.expect("worker joins");
        assert_eq!(runtime.conversation().len(), 2);
        assert_eq!(runtime.conversation()[1].content, "done: first");
    }

    #[tokio::test]
    async fn stopped_worker_is_reported() {
        let model = ScriptedModel::new(Vec::new());
        let runtime = CopilotRuntime::builder(model).build();
        let (worker, handle) = RuntimeWorker::new(runtime, Handle::current());
        drop(worker);

        let err = handle.process_message("hi").await.expect_err("no worker");
        assert!(matches!(err, BridgeError::WorkerGone));
    }
}
