//! Admission control in front of the pipeline.
//!
//! A fixed set of worker tasks pulls jobs from one shared queue. When the
//! queue is full, [`AdmissionShell::submit`] refuses the request at once with
//! [`AdmissionError::Busy`] instead of letting it wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbiter_telemetry::metrics;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AdmissionConfig;
use crate::error::{AdmissionError, PdpError, PdpResult};
use crate::pipeline::{FinalResult, RequestPipeline};
use crate::request::AuthorizationRequest;

struct Job {
    request: AuthorizationRequest,
    reply: oneshot::Sender<FinalResult>,
}

#[derive(Clone)]
enum JobSender {
    Bounded(mpsc::Sender<Job>),
    Unbounded(mpsc::UnboundedSender<Job>),
}

impl JobSender {
    fn try_send(&self, job: Job) -> Result<(), AdmissionError> {
        match self {
            Self::Bounded(tx) => tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AdmissionError::Busy,
                mpsc::error::TrySendError::Closed(_) => AdmissionError::Closed,
            }),
            Self::Unbounded(tx) => tx.send(job).map_err(|_| AdmissionError::Closed),
        }
    }
}

enum JobReceiver {
    Bounded(mpsc::Receiver<Job>),
    Unbounded(mpsc::UnboundedReceiver<Job>),
}

impl JobReceiver {
    async fn recv(&mut self) -> Option<Job> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Worker pool and bounded queue in front of a [`RequestPipeline`].
pub struct AdmissionShell {
    config: AdmissionConfig,
    pipeline: Arc<RequestPipeline>,
    sender: Mutex<Option<JobSender>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl std::fmt::Debug for AdmissionShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionShell")
            .field("config", &self.config)
            .field("accepted", &self.accepted())
            .field("rejected", &self.rejected())
            .finish_non_exhaustive()
    }
}

impl AdmissionShell {
    /// Spawns the workers and opens the queue.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PdpError::Config` for a zero worker count or queue capacity.
    pub fn start(pipeline: Arc<RequestPipeline>, config: AdmissionConfig) -> PdpResult<Self> {
        if config.max_requests == 0 {
            return Err(PdpError::config("max_requests must be at least 1"));
        }

        let (sender, receiver) = match config.queue_capacity {
            Some(0) => {
                return Err(PdpError::config("request queue capacity must be at least 1"));
            }
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (JobSender::Bounded(tx), JobReceiver::Bounded(rx))
            }
            None => {
                warn!("request queue is unbounded, overload will not be rejected");
                let (tx, rx) = mpsc::unbounded_channel();
                (JobSender::Unbounded(tx), JobReceiver::Unbounded(rx))
            }
        };

        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let workers = (0..config.max_requests)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        let result = pipeline.evaluate(job.request).await;
                        if job.reply.send(result).is_err() {
                            debug!(worker, "requester went away before the result was ready");
                        }
                    }
                })
            })
            .collect();

        info!(
            workers = config.max_requests,
            queue_capacity = ?config.queue_capacity,
            "admission shell started"
        );

        Ok(Self {
            config,
            pipeline,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Queues a request and waits for its result.
    ///
    /// # Errors
    ///
    /// `AdmissionError::Busy` when the queue is full, `AdmissionError::Closed`
    /// once the shell is shut down.
    pub async fn submit(&self, request: AuthorizationRequest) -> Result<FinalResult, AdmissionError> {
        let sender = self.sender.lock().clone().ok_or(AdmissionError::Closed)?;
        let (reply, result) = oneshot::channel();

        if let Err(e) = sender.try_send(Job { request, reply }) {
            if e == AdmissionError::Busy {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                self.pipeline.status().record_rejection();
                metrics::record_admission_rejection();
                warn!("rejecting request, worker pool and request queue are saturated");
            }
            return Err(e);
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);

        result.await.map_err(|_| AdmissionError::Closed)
    }

    /// Whether the shell accepts requests.
    pub fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Requests accepted into the queue.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Requests refused as busy.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Closes the queue and waits for workers to finish what was queued.
    pub async fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "admission worker ended abnormally");
            }
        }
        info!(
            accepted = self.accepted(),
            rejected = self.rejected(),
            "admission shell stopped"
        );
    }
}

impl Drop for AdmissionShell {
    fn drop(&mut self) {
        for worker in self.workers.get_mut().drain(..) {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PolicyCache;
    use crate::config::CacheConfig;
    use crate::error::EngineError;
    use crate::outcome::{Decision, EvaluationOutcome};
    use crate::policy::PolicySnapshot;
    use crate::source::{PolicySource, StaticPolicySource};
    use std::time::Duration;

    async fn pipeline_with_delay(delay: Duration) -> Arc<RequestPipeline> {
        let source: Arc<dyn PolicySource> =
            Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        let cache = Arc::new(PolicyCache::new(source, CacheConfig::default()));
        cache.refresh_now().await;
        let engine = move |_: &AuthorizationRequest, _: &PolicySnapshot| -> Result<EvaluationOutcome, EngineError> {
            std::thread::sleep(delay);
            Ok(EvaluationOutcome::new(Decision::Permit, Vec::new(), None))
        };
        Arc::new(RequestPipeline::new(cache, Arc::new(engine)))
    }

    #[tokio::test]
    async fn test_submit_returns_result() {
        let shell = AdmissionShell::start(
            pipeline_with_delay(Duration::ZERO).await,
            AdmissionConfig::new().with_max_requests(2).with_queue_capacity(4),
        )
        .unwrap();

        let result = shell
            .submit(AuthorizationRequest::builder().request_id("r1").build())
            .await
            .unwrap();
        assert_eq!(result.request_id, "r1");
        assert_eq!(result.decision(), Decision::Permit);
        assert_eq!(shell.accepted(), 1);
        shell.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_saturation_rejects_busy() {
        let pipeline = pipeline_with_delay(Duration::from_millis(300)).await;
        let shell = Arc::new(
            AdmissionShell::start(
                Arc::clone(&pipeline),
                AdmissionConfig::new().with_max_requests(1).with_queue_capacity(1),
            )
            .unwrap(),
        );

        let mut submitted = Vec::new();
        for i in 0..2 {
            let shell = Arc::clone(&shell);
            submitted.push(tokio::spawn(async move {
                shell
                    .submit(AuthorizationRequest::builder().request_id(format!("r{i}")).build())
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let rejected = shell
            .submit(AuthorizationRequest::builder().request_id("overflow").build())
            .await;
        assert_eq!(rejected.unwrap_err(), AdmissionError::Busy);
        assert_eq!(shell.rejected(), 1);
        assert_eq!(pipeline.status().admission_rejections(), 1);

        for handle in submitted {
            assert!(handle.await.unwrap().is_ok());
        }
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_handler() {
        use crate::obligation::{FnObligationHandler, ObligationRegistry};
        use crate::outcome::{FulfillOn, Obligation};

        let source: Arc<dyn PolicySource> =
            Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        let cache = Arc::new(PolicyCache::new(source, CacheConfig::default()));
        cache.refresh_now().await;
        let engine = |_: &AuthorizationRequest, _: &PolicySnapshot| -> Result<EvaluationOutcome, EngineError> {
            Ok(EvaluationOutcome::new(
                Decision::Permit,
                vec![Obligation::new("boom", FulfillOn::Permit)],
                None,
            ))
        };
        let registry = Arc::new(ObligationRegistry::new());
        registry
            .register(Arc::new(FnObligationHandler::new("boom", |_, _, _| panic!("handler bug"))))
            .unwrap();
        let pipeline = Arc::new(RequestPipeline::new(cache, Arc::new(engine)).with_registry(registry));

        let shell = AdmissionShell::start(
            Arc::clone(&pipeline),
            AdmissionConfig::new().with_max_requests(1).with_queue_capacity(2),
        )
        .unwrap();

        for id in ["r1", "r2"] {
            let result = shell
                .submit(AuthorizationRequest::builder().request_id(id).build())
                .await
                .unwrap();
            assert_eq!(result.request_id, id);
            assert_eq!(result.decision(), Decision::Indeterminate);
        }
        assert_eq!(pipeline.status().total_requests(), 2);
        assert_eq!(pipeline.status().total_request_errors(), 2);
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_closed() {
        let shell = AdmissionShell::start(
            pipeline_with_delay(Duration::ZERO).await,
            AdmissionConfig::new().with_max_requests(1),
        )
        .unwrap();
        shell.shutdown().await;
        assert!(!shell.is_open());

        let err = shell
            .submit(AuthorizationRequest::builder().build())
            .await
            .unwrap_err();
        assert_eq!(err, AdmissionError::Closed);
    }

    #[tokio::test]
    async fn test_unbounded_queue_accepts() {
        let shell = AdmissionShell::start(
            pipeline_with_delay(Duration::ZERO).await,
            AdmissionConfig::new().with_max_requests(1).with_unbounded_queue(),
        )
        .unwrap();
        assert!(shell.submit(AuthorizationRequest::builder().build()).await.is_ok());
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let pipeline = pipeline_with_delay(Duration::ZERO).await;
        assert!(AdmissionShell::start(
            Arc::clone(&pipeline),
            AdmissionConfig::new().with_max_requests(0)
        )
        .is_err());
        assert!(AdmissionShell::start(pipeline, AdmissionConfig::new().with_queue_capacity(0)).is_err());
    }
}
