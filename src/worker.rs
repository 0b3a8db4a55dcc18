//! Dedicated inference thread. It owns both models, and callers only talk to
//! it through channels carrying owned buffers.
//!
//! Jobs run one at a time in submission order. Up to `queue_depth` jobs may
//! wait behind the one in flight. Past that `submit` fails with
//! [`Error::QueueFull`] rather than blocking the caller. A depth of 0 rejects
//! any job submitted while another is running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, span, trace, warn, Level};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::pipeline::{JobResult, Pipeline};

pub type JobId = u64;

struct Job {
    id: JobId,
    bytes: Vec<u8>,
    reply: Sender<Result<JobResult>>,
}

pub struct Worker {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    // accepted jobs not yet answered, including the one running
    in_flight: Arc<AtomicUsize>,
    queue_depth: usize,
    job_timeout: Option<Duration>,
}

/// Handle on one submitted job.
pub struct JobTicket {
    id: JobId,
    reply: Receiver<Result<JobResult>>,
}

impl Worker {
    /// Loads models from `config` on the worker thread and returns once they
    /// are warmed up.
    pub fn start(config: &PipelineConfig) -> Result<Worker> {
        let load_config = config.clone();
        Worker::start_with(config, move || Pipeline::load(&load_config))
    }

    /// Like [`Worker::start`], taking queue depth and timeout from `config`
    /// but building the pipeline with `load`.
    pub fn start_with<F>(config: &PipelineConfig, load: F) -> Result<Worker>
    where
        F: FnOnce() -> Result<Pipeline> + Send + 'static,
    {
        let mut worker = Worker::spawn(config.queue_depth, load)?;
        worker.job_timeout = config.job_timeout;
        Ok(worker)
    }

    /// Spawns the worker thread, builds the pipeline there with `load`, runs
    /// warm-up and blocks until that has finished.
    pub fn spawn<F>(queue_depth: usize, load: F) -> Result<Worker>
    where
        F: FnOnce() -> Result<Pipeline> + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = flume::unbounded::<Job>();
        let (ready_tx, ready_rx) = flume::bounded::<Result<()>>(1);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let serve_in_flight = in_flight.clone();

        let handle = thread::Builder::new()
            .name("inference-worker".into())
            .spawn(move || {
                let span = span!(Level::INFO, "inference_worker");
                let _guard = span.enter();

                let pipeline = load().and_then(|mut p| {
                    p.warm_up()?;
                    Ok(p)
                });
                match pipeline {
                    Ok(pipeline) => {
                        let _ = ready_tx.send(Ok(()));
                        serve(pipeline, jobs_rx, &serve_in_flight);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => info!("Inference worker ready"),
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::WorkerStopped);
            }
        }

        Ok(Worker {
            jobs: Some(jobs_tx),
            handle: Some(handle),
            next_id: AtomicU64::new(1),
            in_flight,
            queue_depth,
            job_timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Worker {
        self.job_timeout = Some(timeout);
        self
    }

    /// Queues an image without waiting for it to be processed.
    pub fn submit(&self, bytes: Vec<u8>) -> Result<JobTicket> {
        let jobs = self.jobs.as_ref().ok_or(Error::WorkerStopped)?;
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n <= self.queue_depth).then_some(n + 1)
            })
            .map_err(|_| Error::QueueFull(self.queue_depth))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = flume::bounded(1);

        if jobs
            .send(Job {
                id,
                bytes,
                reply: reply_tx,
            })
            .is_err()
        {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::WorkerStopped);
        }

        trace!("Queued job {id}");
        Ok(JobTicket {
            id,
            reply: reply_rx,
        })
    }

    /// Submits and waits, honouring the configured timeout.
    pub fn run(&self, bytes: Vec<u8>) -> Result<JobResult> {
        self.wait(self.submit(bytes)?)
    }

    /// Waits on a ticket from this worker, honouring the configured timeout.
    pub fn wait(&self, ticket: JobTicket) -> Result<JobResult> {
        match self.job_timeout {
            Some(timeout) => ticket.wait_timeout(timeout),
            None => ticket.wait(),
        }
    }

    /// Stops accepting jobs, lets queued ones finish and joins the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.jobs.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Inference worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl JobTicket {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn wait(self) -> Result<JobResult> {
        self.reply.recv().map_err(|_| Error::WorkerStopped)?
    }

    /// Gives up after `timeout`. The job itself keeps running and its result
    /// is dropped when it arrives.
    pub fn wait_timeout(self, timeout: Duration) -> Result<JobResult> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(flume::RecvTimeoutError::Timeout) => Err(Error::Timeout(self.id, timeout)),
            Err(flume::RecvTimeoutError::Disconnected) => Err(Error::WorkerStopped),
        }
    }

    pub async fn wait_async(self) -> Result<JobResult> {
        self.reply.recv_async().await.map_err(|_| Error::WorkerStopped)?
    }

    /// Non-blocking poll, for callers driving their own event loop.
    pub fn try_take(&self) -> Option<Result<JobResult>> {
        match self.reply.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::WorkerStopped)),
        }
    }
}

fn serve(mut pipeline: Pipeline, jobs: Receiver<Job>, in_flight: &AtomicUsize) {
    for job in jobs.iter() {
        let span = span!(Level::INFO, "job", id = job.id);
        let _guard = span.enter();
        let start = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(&job.bytes)))
            .unwrap_or_else(|_| Err(Error::ModelInvocation("pipeline panicked".into())));

        match &result {
            Ok(r) => debug!("Found {} faces in {:?}", r.faces.len(), start.elapsed()),
            Err(e) => warn!("Job failed after {:?}: {e}", start.elapsed()),
        }

        in_flight.fetch_sub(1, Ordering::AcqRel);
        if job.reply.send(result).is_err() {
            trace!("Caller dropped job {}", job.id);
        }
    }

    info!("Inference worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CLASSIFIER_SIZE, DETECTOR_WIDTH};
    use crate::pipeline::tests::{fake_pipeline, FakeClassifier, FakeDetector};
    use crate::pipeline::{Detection, FaceDetector};
    use crate::orientation::tests::encode_jpeg;
    use crate::shapes::rect::RectF32;
    use image::RgbImage;
    use std::sync::{Arc, Mutex};

    /// Reports each image it sees and waits for permission before answering.
    struct GatedDetector {
        started: Sender<(u32, u32)>,
        gate: Receiver<()>,
    }

    impl FaceDetector for GatedDetector {
        fn detect(&mut self, img: &RgbImage) -> Result<Vec<Detection>> {
            let _ = self.started.send(img.dimensions());
            let _ = self.gate.recv();
            Ok(Vec::new())
        }
    }

    struct PanickyDetector;

    impl FaceDetector for PanickyDetector {
        fn detect(&mut self, img: &RgbImage) -> Result<Vec<Detection>> {
            if img.height() == 13 {
                panic!("boom");
            }
            Ok(Vec::new())
        }
    }

    fn jpeg(w: u32, h: u32) -> Vec<u8> {
        encode_jpeg(&RgbImage::new(w, h))
    }

    #[test]
    fn test_results_follow_submission_order() -> anyhow::Result<()> {
        let detector = FakeDetector {
            boxes: vec![RectF32::new(0., 0., 32., 32.)],
            ..Default::default()
        };
        let seen = detector.seen.clone();
        let worker = Worker::spawn(2, move || {
            Ok(Pipeline::new(detector, FakeClassifier, DETECTOR_WIDTH, CLASSIFIER_SIZE))
        })?;

        let first = worker.submit(jpeg(1280, 960))?;
        let second = worker.submit(jpeg(640, 320))?;
        assert!(first.id() < second.id());

        let second = second.wait()?;
        let first = first.wait()?;

        assert_eq!(first.image.dimensions(), (1280, 960));
        assert_eq!(second.image.dimensions(), (640, 320));
        // warm-up, then both jobs in order
        assert_eq!(*seen.lock().unwrap(), vec![(640, 480), (640, 480), (640, 320)]);
        Ok(())
    }

    #[test]
    fn test_worker_survives_failed_job() -> anyhow::Result<()> {
        let worker = Worker::spawn(1, || Ok(fake_pipeline(Vec::new())))?;

        assert!(matches!(worker.run(b"garbage".to_vec()), Err(Error::Decode(_))));
        assert!(worker.run(jpeg(64, 48))?.faces.is_empty());
        Ok(())
    }

    #[test]
    fn test_worker_survives_panicking_predictor() -> anyhow::Result<()> {
        let worker = Worker::spawn(1, || {
            Ok(Pipeline::new(PanickyDetector, FakeClassifier, 100, CLASSIFIER_SIZE))
        })?;

        assert!(matches!(
            worker.run(jpeg(100, 13)),
            Err(Error::ModelInvocation(_))
        ));
        assert!(worker.run(jpeg(100, 50)).is_ok());
        Ok(())
    }

    #[test]
    fn test_queue_full_is_rejected() -> anyhow::Result<()> {
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::unbounded();
        // let warm-up through
        gate_tx.send(())?;

        let worker = Worker::spawn(1, move || {
            Ok(Pipeline::new(
                GatedDetector {
                    started: started_tx,
                    gate: gate_rx,
                },
                FakeClassifier,
                DETECTOR_WIDTH,
                CLASSIFIER_SIZE,
            ))
        })?;
        assert_eq!(started_rx.recv()?, (640, 480));

        let running = worker.submit(jpeg(640, 100))?;
        assert_eq!(started_rx.recv()?, (640, 100));

        let queued = worker.submit(jpeg(640, 200))?;
        assert!(matches!(worker.submit(jpeg(640, 300)), Err(Error::QueueFull(1))));

        gate_tx.send(())?;
        gate_tx.send(())?;
        assert_eq!(running.wait()?.image.height(), 100);
        assert_eq!(queued.wait()?.image.height(), 200);
        Ok(())
    }

    #[test]
    fn test_wait_timeout_then_late_result_is_dropped() -> anyhow::Result<()> {
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::unbounded();
        gate_tx.send(())?;

        let worker = Worker::spawn(1, move || {
            Ok(Pipeline::new(
                GatedDetector {
                    started: started_tx,
                    gate: gate_rx,
                },
                FakeClassifier,
                DETECTOR_WIDTH,
                CLASSIFIER_SIZE,
            ))
        })?
        .with_timeout(Duration::from_millis(20));
        started_rx.recv()?;

        assert!(matches!(
            worker.run(jpeg(640, 100)),
            Err(Error::Timeout(_, d)) if d == Duration::from_millis(20)
        ));

        let ticket = worker.submit(jpeg(640, 200))?;
        let id = ticket.id();
        assert!(matches!(
            ticket.wait_timeout(Duration::from_millis(5)),
            Err(Error::Timeout(t, _)) if t == id
        ));

        for _ in 0..3 {
            gate_tx.send(())?;
        }
        assert_eq!(started_rx.recv()?, (640, 100));
        assert_eq!(started_rx.recv()?, (640, 200));
        let late = worker.submit(jpeg(640, 300))?;
        assert_eq!(late.wait()?.image.height(), 300);
        Ok(())
    }

    fn gated_pipeline(started: Sender<(u32, u32)>, gate: Receiver<()>) -> Pipeline {
        Pipeline::new(
            GatedDetector { started, gate },
            FakeClassifier,
            DETECTOR_WIDTH,
            CLASSIFIER_SIZE,
        )
    }

    #[test]
    fn test_zero_depth_accepts_when_idle() -> anyhow::Result<()> {
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::unbounded();
        gate_tx.send(())?;

        let worker = Worker::spawn(0, move || Ok(gated_pipeline(started_tx, gate_rx)))?;
        started_rx.recv()?;

        // straight after the ready handshake
        let running = worker.submit(jpeg(640, 100))?;
        assert_eq!(started_rx.recv()?, (640, 100));
        assert!(matches!(worker.submit(jpeg(640, 200)), Err(Error::QueueFull(0))));

        gate_tx.send(())?;
        assert_eq!(running.wait()?.image.height(), 100);

        // straight after a reply
        gate_tx.send(())?;
        assert_eq!(worker.run(jpeg(640, 300))?.image.height(), 300);
        Ok(())
    }

    #[test]
    fn test_start_with_applies_config() -> anyhow::Result<()> {
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::unbounded();
        gate_tx.send(())?;

        let config = PipelineConfig {
            queue_depth: 0,
            job_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let worker = Worker::start_with(&config, move || Ok(gated_pipeline(started_tx, gate_rx)))?;
        started_rx.recv()?;

        assert!(matches!(
            worker.run(jpeg(640, 100)),
            Err(Error::Timeout(_, d)) if d == Duration::from_millis(20)
        ));
        assert!(matches!(worker.submit(jpeg(640, 200)), Err(Error::QueueFull(0))));

        gate_tx.send(())?;
        Ok(())
    }

    #[test]
    fn test_wait_async() -> anyhow::Result<()> {
        let worker = Worker::spawn(1, || Ok(fake_pipeline(Vec::new())))?;
        let ticket = worker.submit(jpeg(48, 32))?;

        let result = pollster::block_on(ticket.wait_async())?;
        assert_eq!(result.image.dimensions(), (48, 32));
        Ok(())
    }

    #[test]
    fn test_try_take_polls() -> anyhow::Result<()> {
        let worker = Worker::spawn(1, || Ok(fake_pipeline(Vec::new())))?;
        let ticket = worker.submit(jpeg(32, 32))?;

        let result = loop {
            if let Some(r) = ticket.try_take() {
                break r;
            }
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(result?.image.dimensions(), (32, 32));
        Ok(())
    }

    #[test]
    fn test_failed_load_is_reported() {
        let res = Worker::spawn(1, || Err(Error::ModelLoad("missing.onnx".into())));
        assert!(matches!(res, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_shutdown_finishes_queued_jobs() -> anyhow::Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = FakeDetector {
            seen: seen.clone(),
            ..Default::default()
        };
        let worker = Worker::spawn(4, move || {
            Ok(Pipeline::new(detector, FakeClassifier, DETECTOR_WIDTH, CLASSIFIER_SIZE))
        })?;

        let tickets: Vec<_> = (1..=3)
            .map(|i| worker.submit(jpeg(640, 10 * i)))
            .collect::<Result<_>>()?;
        worker.shutdown();

        assert_eq!(seen.lock().unwrap().len(), 4);
        for ticket in tickets {
            assert!(ticket.wait().is_ok());
        }
        Ok(())
    }
}
