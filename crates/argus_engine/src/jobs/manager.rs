//! The job manager.
//!
//! A FIFO queue drained by one consumer thread. Each job runs in a fresh
//! worker process spawned through the configured launcher; the parent
//! observes completion via exit status and never shares state with the
//! worker. Exactly one job runs at a time.

use argus_protocol::{JobModel, JobSpec, JobType, QueueStatus};
use std::collections::VecDeque;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Spawns the worker process for one job.
pub type WorkerLauncher = Box<dyn Fn(&JobSpec) -> std::io::Result<Child> + Send + Sync>;

/// The default launcher: re-invoke the current executable's hidden
/// `job-worker` subcommand with the serialized spec.
pub fn default_launcher() -> WorkerLauncher {
    Box::new(|spec| {
        let exe = std::env::current_exe()?;
        let payload = serde_json::to_string(spec)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        std::process::Command::new(exe)
            .arg("job-worker")
            .arg("--spec")
            .arg(payload)
            .spawn()
    })
}

struct RunningJob {
    spec: JobSpec,
    child: Child,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<JobSpec>,
    running: Option<RunningJob>,
    counter: i64,
}

pub struct JobManager {
    inner: Arc<Mutex<Inner>>,
    shutdown: Arc<AtomicBool>,
}

impl JobManager {
    /// Start the manager and its consumer thread.
    pub fn start(launcher: WorkerLauncher) -> Arc<Self> {
        let manager = Arc::new(Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        let inner = Arc::clone(&manager.inner);
        let shutdown = Arc::clone(&manager.shutdown);
        std::thread::Builder::new()
            .name("job-consumer".to_string())
            .spawn(move || job_consumer(inner, shutdown, launcher))
            .expect("failed to spawn job consumer thread");

        info!("JobManager started");
        manager
    }

    /// Next monotonically increasing queue id.
    pub fn next_job_id(&self) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.counter += 1;
        inner.counter
    }

    /// Append a job to the queue.
    pub fn enqueue(&self, spec: JobSpec) {
        let mut inner = self.inner.lock().unwrap();
        info!("Enqueued job {}: {}", spec.queue_id, spec.job_type);
        inner.queue.push_back(spec);
    }

    /// Snapshot: the running job (if any) first, then the queue in FIFO
    /// order.
    pub fn get_queue_status(&self) -> QueueStatus {
        let inner = self.inner.lock().unwrap();
        let mut queue = Vec::with_capacity(inner.queue.len() + 1);
        if let Some(running) = &inner.running {
            queue.push(JobModel::from_spec(&running.spec, true));
        }
        queue.extend(inner.queue.iter().map(|spec| JobModel::from_spec(spec, false)));
        QueueStatus { queue }
    }

    /// Cancel specific jobs; the running one is killed, queued ones are
    /// removed. Returns the ids actually cancelled.
    pub fn cancel(&self, queue_ids: &[i64]) -> Vec<i64> {
        let mut cancelled = Vec::new();
        let mut inner = self.inner.lock().unwrap();
        for &qid in queue_ids {
            if inner
                .running
                .as_ref()
                .map(|r| r.spec.queue_id == qid)
                .unwrap_or(false)
            {
                if let Some(id) = kill_running(&mut inner) {
                    cancelled.push(id);
                }
                continue;
            }
            let before = inner.queue.len();
            inner.queue.retain(|spec| spec.queue_id != qid);
            if inner.queue.len() < before {
                info!("Cancelled queued job {qid}");
                cancelled.push(qid);
            }
        }
        cancelled
    }

    /// Kill the running worker, if any.
    pub fn cancel_current(&self) -> Option<i64> {
        let mut inner = self.inner.lock().unwrap();
        kill_running(&mut inner)
    }

    /// Whether a job with this tag for this index is queued or running.
    pub fn has_tagged_job(&self, tag: &str, index_db: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        let matches = |spec: &JobSpec| {
            spec.tag.as_deref() == Some(tag) && spec.index_db == index_db
        };
        inner.queue.iter().any(matches)
            || inner.running.as_ref().map(|r| matches(&r.spec)).unwrap_or(false)
    }

    /// Stop the consumer thread and kill any running worker.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cancel_current();
    }
}

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

fn kill_running(inner: &mut Inner) -> Option<i64> {
    let mut running = inner.running.take()?;
    let queue_id = running.spec.queue_id;
    let pid = running.child.id();
    terminate_child(&mut running.child, pid, queue_id);
    let _ = running.child.wait();
    info!("Cancelled running job {queue_id} (pid {pid})");
    Some(queue_id)
}

/// Stop a worker: SIGTERM first so it can exit cleanly, SIGKILL once the
/// grace period runs out.
#[cfg(unix)]
fn terminate_child(child: &mut Child, pid: u32, queue_id: i64) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    let deadline = std::time::Instant::now() + TERMINATE_GRACE;
    while std::time::Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(e) => {
                error!("Failed to poll worker {pid} for job {queue_id}: {e}");
                break;
            }
        }
    }
    if let Err(e) = child.kill() {
        error!("Failed to kill worker {pid} for job {queue_id}: {e}");
    }
}

#[cfg(not(unix))]
fn terminate_child(child: &mut Child, pid: u32, queue_id: i64) {
    // No portable soft-terminate signal; kill outright.
    if let Err(e) = child.kill() {
        error!("Failed to kill worker {pid} for job {queue_id}: {e}");
    }
}

fn job_consumer(inner: Arc<Mutex<Inner>>, shutdown: Arc<AtomicBool>, launcher: WorkerLauncher) {
    while !shutdown.load(Ordering::SeqCst) {
        // Claim the next job while the slot is free.
        let spec = {
            let mut guard = inner.lock().unwrap();
            if guard.running.is_none() {
                guard.queue.pop_front()
            } else {
                None
            }
        };

        let Some(spec) = spec else {
            std::thread::sleep(Duration::from_millis(200));
            continue;
        };

        let queue_id = spec.queue_id;
        match launcher(&spec) {
            Ok(child) => {
                info!("Starting job {queue_id} in process {}", child.id());
                inner.lock().unwrap().running = Some(RunningJob { spec, child });
            }
            Err(e) => {
                error!("Failed to spawn worker for job {queue_id}: {e}");
                continue;
            }
        }

        // Poll for exit; cancellation swaps `running` out underneath us.
        loop {
            std::thread::sleep(Duration::from_millis(100));
            let mut guard = inner.lock().unwrap();
            let Some(running) = guard.running.as_mut() else {
                break; // cancelled
            };
            if running.spec.queue_id != queue_id {
                break;
            }
            match running.child.try_wait() {
                Ok(Some(status)) => {
                    if status.success() {
                        info!("Job {queue_id} completed");
                    } else {
                        error!("Job {queue_id} exited with {status}");
                    }
                    guard.running = None;
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to poll worker for job {queue_id}: {e}");
                    guard.running = None;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: i64) -> JobSpec {
        JobSpec {
            queue_id: id,
            job_type: JobType::FolderRescan,
            index_db: "default".into(),
            inference_id: None,
            batch_size: None,
            threshold: None,
            log_id: None,
            tag: None,
        }
    }

    /// Launcher running a short shell sleep.
    fn sleeping_launcher(seconds: f64) -> WorkerLauncher {
        Box::new(move |_| {
            std::process::Command::new("sh")
                .arg("-c")
                .arg(format!("sleep {seconds}"))
                .spawn()
        })
    }

    fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn jobs_run_one_at_a_time_in_fifo_order() {
        let manager = JobManager::start(sleeping_launcher(0.2));
        manager.enqueue(spec(manager.next_job_id()));
        manager.enqueue(spec(manager.next_job_id()));

        assert!(wait_until(
            || {
                let status = manager.get_queue_status();
                status.queue.first().map(|j| j.running) == Some(true)
            },
            Duration::from_secs(2)
        ));
        let status = manager.get_queue_status();
        assert_eq!(status.queue.len(), 2);
        assert_eq!(status.queue[0].queue_id, 1);
        assert!(!status.queue[1].running);

        assert!(wait_until(
            || manager.get_queue_status().queue.is_empty(),
            Duration::from_secs(5)
        ));
        manager.shutdown();
    }

    #[test]
    fn cancel_removes_queued_jobs() {
        let manager = JobManager::start(sleeping_launcher(5.0));
        let first = manager.next_job_id();
        let second = manager.next_job_id();
        manager.enqueue(spec(first));
        manager.enqueue(spec(second));

        assert!(wait_until(
            || manager
                .get_queue_status()
                .queue
                .first()
                .map(|j| j.running)
                .unwrap_or(false),
            Duration::from_secs(2)
        ));

        let cancelled = manager.cancel(&[second]);
        assert_eq!(cancelled, vec![second]);
        // Unknown ids are not reported as cancelled.
        assert!(manager.cancel(&[999]).is_empty());

        let cancelled = manager.cancel(&[first]);
        assert_eq!(cancelled, vec![first]);
        assert!(wait_until(
            || manager.get_queue_status().queue.is_empty(),
            Duration::from_secs(2)
        ));
        manager.shutdown();
    }

    #[test]
    fn cancel_current_kills_the_worker() {
        let manager = JobManager::start(sleeping_launcher(30.0));
        let id = manager.next_job_id();
        manager.enqueue(spec(id));

        assert!(wait_until(
            || manager
                .get_queue_status()
                .queue
                .first()
                .map(|j| j.running)
                .unwrap_or(false),
            Duration::from_secs(2)
        ));
        assert_eq!(manager.cancel_current(), Some(id));
        assert!(manager.get_queue_status().queue.is_empty());
        manager.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_lets_the_worker_exit_on_sigterm() {
        // The worker exits cleanly on TERM; cancellation must finish well
        // inside the kill grace period.
        let launcher: WorkerLauncher = Box::new(|_| {
            std::process::Command::new("sh")
                .arg("-c")
                .arg("trap 'exit 0' TERM; sleep 30 & wait")
                .spawn()
        });
        let manager = JobManager::start(launcher);
        let id = manager.next_job_id();
        manager.enqueue(spec(id));

        assert!(wait_until(
            || manager
                .get_queue_status()
                .queue
                .first()
                .map(|j| j.running)
                .unwrap_or(false),
            Duration::from_secs(2)
        ));
        let start = std::time::Instant::now();
        assert_eq!(manager.cancel_current(), Some(id));
        assert!(start.elapsed() < TERMINATE_GRACE);
        manager.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn stubborn_worker_is_killed_after_the_grace_period() {
        let launcher: WorkerLauncher = Box::new(|_| {
            std::process::Command::new("sh")
                .arg("-c")
                .arg("trap '' TERM; sleep 30")
                .spawn()
        });
        let manager = JobManager::start(launcher);
        let id = manager.next_job_id();
        manager.enqueue(spec(id));

        assert!(wait_until(
            || manager
                .get_queue_status()
                .queue
                .first()
                .map(|j| j.running)
                .unwrap_or(false),
            Duration::from_secs(2)
        ));
        let start = std::time::Instant::now();
        assert_eq!(manager.cancel_current(), Some(id));
        // TERM was ignored, so the grace period elapsed before the kill.
        assert!(start.elapsed() >= TERMINATE_GRACE);
        assert!(manager.get_queue_status().queue.is_empty());
        manager.shutdown();
    }

    #[test]
    fn tagged_job_lookup_sees_queue_and_running() {
        let manager = JobManager::start(sleeping_launcher(1.0));
        let mut tagged = spec(manager.next_job_id());
        tagged.tag = Some("cronjob".into());
        manager.enqueue(tagged);

        assert!(manager.has_tagged_job("cronjob", "default"));
        assert!(!manager.has_tagged_job("cronjob", "other"));
        manager.shutdown();
    }
}
