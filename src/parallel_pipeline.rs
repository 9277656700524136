// THEORY:
// The `parallel_pipeline` runs several uploads through the spot engine at once
// while keeping the measurement log exactly as a sequential run would write it.
//
// Key architectural principles:
// 1.  **Dispatcher + Workers**: A single dispatcher task hands uploads to a fixed
//     set of workers round-robin. Decoding and analysis are CPU-bound, so each
//     worker runs them on the blocking pool.
// 2.  **Sequence Numbers**: Every upload is stamped with a sequence number when
//     it is submitted. Workers may finish in any order.
// 3.  **Reorder Buffer**: Finished uploads park in a pending map until every
//     earlier sequence number has been committed. The buffer then flushes to the
//     ledger in order, one file's rows at a time, so rows of different files
//     never interleave and the log matches submission order.
// 4.  **Failures Fill Their Slot**: A file that fails to decode still commits an
//     empty slot, otherwise every later file would wait forever.
// 5.  **Bounded Window**: A streamed batch keeps at most two uploads per worker
//     in flight and hands outcomes back in order as they complete, so memory
//     follows the window, not the batch.

use crate::config::PipelineConfig;
use crate::core_modules::measurement::{Measurement, MeasurementLedger};
use crate::error::{Result, SpotError};
use crate::pipeline::{FileOutcome, SpotPipeline, Upload};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct UploadTask {
    sequence: u64,
    upload: Upload,
    result_sender: oneshot::Sender<FileOutcome>,
}

#[derive(Debug, Default)]
struct ReorderBuffer {
    next_expected: u64,
    pending: HashMap<u64, Vec<Measurement>>,
}

/// Commits per-file rows to the ledger in sequence order.
#[derive(Debug)]
struct OrderedCommit {
    ledger: Arc<MeasurementLedger>,
    buffer: Mutex<ReorderBuffer>,
}

impl OrderedCommit {
    fn new(ledger: Arc<MeasurementLedger>) -> Self {
        Self {
            ledger,
            buffer: Mutex::new(ReorderBuffer::default()),
        }
    }

    /// Parks `rows` under `sequence` and flushes every slot that is now in order.
    fn commit(&self, sequence: u64, rows: Vec<Measurement>) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.pending.insert(sequence, rows);
        loop {
            let next = buffer.next_expected;
            let Some(rows) = buffer.pending.remove(&next) else {
                break;
            };
            // Appending under the buffer lock keeps two flushes from racing.
            self.ledger.append_all(rows);
            buffer.next_expected += 1;
        }
        if !buffer.pending.is_empty() {
            debug!(
                waiting_on = buffer.next_expected,
                parked = buffer.pending.len(),
                "uploads finished out of order"
            );
        }
    }
}

struct WorkerPool {
    task_sender: mpsc::UnboundedSender<UploadTask>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the dispatcher and `worker_count` workers. Must be called from
    /// inside a tokio runtime.
    fn new(pipeline: Arc<SpotPipeline>, commit: Arc<OrderedCommit>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<UploadTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<UploadTask>())
            .unzip();

        let dispatcher_commit = Arc::clone(&commit);
        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if let Err(mpsc::error::SendError(task)) = worker_senders[worker_idx].send(task) {
                    warn!(sequence = task.sequence, worker = worker_idx, "worker is gone, upload dropped");
                    dispatcher_commit.commit(task.sequence, Vec::new());
                }
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .map(|mut worker_receiver| {
                let pipeline = Arc::clone(&pipeline);
                let commit = Arc::clone(&commit);
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let outcome = Self::process_upload_worker(&pipeline, task.upload).await;
                        commit.commit(task.sequence, outcome.measurements());
                        // The caller may have stopped waiting; the rows are committed either way.
                        let _ = task.result_sender.send(outcome);
                    }
                })
            })
            .collect();

        Self {
            task_sender,
            dispatcher,
            workers,
        }
    }

    async fn process_upload_worker(pipeline: &Arc<SpotPipeline>, upload: Upload) -> FileOutcome {
        let file_name = upload.file_name.clone();
        let pipeline = Arc::clone(pipeline);
        match tokio::task::spawn_blocking(move || pipeline.evaluate_upload(&upload)).await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                warn!(%file_name, %join_error, "analysis task failed");
                FileOutcome::Failed {
                    error: SpotError::WorkerPool(format!("analysis of `{file_name}` aborted: {join_error}")),
                    file_name,
                }
            }
        }
    }

    fn submit(&self, task: UploadTask) -> std::result::Result<(), UploadTask> {
        self.task_sender.send(task).map_err(|mpsc::error::SendError(task)| task)
    }

    async fn shutdown(self) {
        drop(self.task_sender);
        let _ = self.dispatcher.await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Concurrent front end to [`SpotPipeline`], committing into a shared ledger.
pub struct ParallelPipeline {
    pipeline: Arc<SpotPipeline>,
    worker_pool: WorkerPool,
    commit: Arc<OrderedCommit>,
    sequence_counter: AtomicU64,
    worker_count: usize,
}

impl ParallelPipeline {
    /// Validates `config` and starts one worker per CPU.
    pub fn new(config: PipelineConfig, ledger: Arc<MeasurementLedger>) -> Result<Self> {
        Self::with_workers(config, ledger, num_cpus::get())
    }

    pub fn with_workers(config: PipelineConfig, ledger: Arc<MeasurementLedger>, worker_count: usize) -> Result<Self> {
        let pipeline = Arc::new(SpotPipeline::new(config)?);
        let worker_count = worker_count.max(1);
        let commit = Arc::new(OrderedCommit::new(ledger));
        let worker_pool = WorkerPool::new(Arc::clone(&pipeline), Arc::clone(&commit), worker_count);
        Ok(Self {
            pipeline,
            worker_pool,
            commit,
            sequence_counter: AtomicU64::new(0),
            worker_count,
        })
    }

    pub fn pipeline(&self) -> &SpotPipeline {
        &self.pipeline
    }

    pub fn ledger(&self) -> &MeasurementLedger {
        &self.commit.ledger
    }

    /// Stamps the upload with the next sequence number and queues it.
    fn submit(&self, upload: Upload) -> Result<oneshot::Receiver<FileOutcome>> {
        let sequence = self.sequence_counter.fetch_add(1, Ordering::SeqCst);
        let (result_sender, result_receiver) = oneshot::channel();
        let task = UploadTask {
            sequence,
            upload,
            result_sender,
        };
        if let Err(task) = self.worker_pool.submit(task) {
            // Keep the sequence dense so later uploads are not held back.
            self.commit.commit(task.sequence, Vec::new());
            return Err(SpotError::WorkerPool(format!(
                "could not queue `{}`",
                task.upload.file_name
            )));
        }
        Ok(result_receiver)
    }

    async fn receive(result_receiver: oneshot::Receiver<FileOutcome>) -> Result<FileOutcome> {
        result_receiver
            .await
            .map_err(|_| SpotError::WorkerPool("worker dropped the result".to_string()))
    }

    /// Processes one upload. Its rows land in the ledger after those of every
    /// upload submitted before it.
    pub async fn process_upload(&self, upload: Upload) -> Result<FileOutcome> {
        let result_receiver = self.submit(upload)?;
        Self::receive(result_receiver).await
    }

    /// Submits all uploads in order, then waits for every outcome. Outcomes come
    /// back in submission order.
    pub async fn process_batch(&self, uploads: Vec<Upload>) -> Result<Vec<FileOutcome>> {
        let receivers = uploads
            .into_iter()
            .map(|upload| self.submit(upload))
            .collect::<Result<Vec<_>>>()?;
        futures::future::join_all(receivers.into_iter().map(Self::receive))
            .await
            .into_iter()
            .collect()
    }

    /// Streams uploads through the pool with at most two per worker in flight.
    /// Uploads are pulled lazily and `on_outcome` sees outcomes in submission
    /// order, each one after its rows are in the ledger.
    pub async fn process_batch_with(
        &self,
        uploads: impl IntoIterator<Item = Upload>,
        mut on_outcome: impl FnMut(FileOutcome),
    ) -> Result<()> {
        let window = self.worker_count * 2;
        let mut in_flight = VecDeque::with_capacity(window);
        for upload in uploads {
            if in_flight.len() >= window {
                if let Some(result_receiver) = in_flight.pop_front() {
                    on_outcome(Self::receive(result_receiver).await?);
                }
            }
            in_flight.push_back(self.submit(upload)?);
        }
        while let Some(result_receiver) = in_flight.pop_front() {
            on_outcome(Self::receive(result_receiver).await?);
        }
        Ok(())
    }

    /// Stops accepting uploads and waits for the queued ones to finish.
    pub async fn shutdown(self) {
        self.worker_pool.shutdown().await;
    }
}
