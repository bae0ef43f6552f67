//! Job admission keyed by repository URL.
//!
//! At most one job per URL is registered at a time. Registration happens
//! synchronously in [`JobScheduler::spawn`], so two back-to-back requests
//! can never both start; the entry is dropped when the task ends however it
//! ends (success, error, panic or abort). With `serialize_jobs` enabled a
//! job also holds the global job slot for its whole run.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::{Result, SyncError};
use super::progress::{ProgressHandle, ProgressNode, ProgressTree};

/// Label of the progress step recorded while waiting for the job slot.
pub const WAITING_FOR_JOBS: &str = "Waiting for existing jobs to finish";

struct JobEntry {
    id: u64,
    cancel: CancellationToken,
    /// Fired once the task has ended and deregistered
    done: CancellationToken,
}

/// Handle to a running job. Dropping it detaches the job.
pub struct JobHandle<T> {
    url: String,
    task: JoinHandle<Result<T>>,
}

impl<T> JobHandle<T> {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the job's result.
    pub async fn wait(self) -> Result<T> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SyncError::JobFailed {
                url: self.url,
                message: e.to_string(),
            }),
        }
    }
}

/// Removes the job's registration when the task ends.
struct Registration {
    jobs: Arc<DashMap<String, JobEntry>>,
    url: String,
    id: u64,
    done: CancellationToken,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.jobs.remove_if(&self.url, |_, entry| entry.id == self.id);
        self.done.cancel();
        crate::debug_log!("SUBSCRIPTION", "Job {} for {} deregistered", self.id, self.url);
    }
}

pub struct JobScheduler {
    runtime: Handle,
    jobs: Arc<DashMap<String, JobEntry>>,
    /// Latest progress tree per repository URL
    progress: DashMap<String, ProgressTree>,
    /// Serializes whole runs across repositories when present
    job_slot: Option<Arc<Mutex<()>>>,
    next_id: AtomicU64,
}

impl JobScheduler {
    pub fn new(runtime: Handle, serialize_jobs: bool) -> Self {
        Self {
            runtime,
            jobs: Arc::new(DashMap::new()),
            progress: DashMap::new(),
            job_slot: serialize_jobs.then(|| Arc::new(Mutex::new(()))),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_running(&self, url: &str) -> bool {
        self.jobs.contains_key(url)
    }

    pub fn running_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Snapshot of the latest job's progress for `url`.
    pub fn progress(&self, url: &str) -> Option<ProgressNode> {
        self.progress.get(url).map(|tree| tree.snapshot())
    }

    /// Signal the running job for `url`, if any, to stop.
    pub fn cancel(&self, url: &str) -> bool {
        match self.jobs.get(url) {
            Some(entry) => {
                entry.cancel.cancel();
                log::info!("Cancellation requested for {}", url);
                true
            }
            None => false,
        }
    }

    /// Cancel the running job for `url`, if any, and wait until it has ended.
    ///
    /// Once this returns, the job can no longer touch the store or the
    /// library. Returns `false` if nothing was running.
    pub async fn cancel_and_wait(&self, url: &str) -> bool {
        let done = match self.jobs.get(url) {
            Some(entry) => {
                entry.cancel.cancel();
                entry.done.clone()
            }
            None => return false,
        };
        log::info!("Cancellation requested for {}, waiting for the job to end", url);
        done.cancelled().await;
        true
    }

    /// Start `job` for `url` unless one is already running.
    ///
    /// The job receives the root of a fresh progress tree (replacing any
    /// previous one for `url`) and its cancellation token.
    pub fn spawn<T, F, Fut>(&self, url: &str, label: String, job: F) -> Option<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(ProgressHandle, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        match self.jobs.entry(url.to_string()) {
            Entry::Occupied(_) => {
                crate::debug_log!("SUBSCRIPTION", "Job for {} already running, skipping", url);
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(JobEntry {
                    id,
                    cancel: cancel.clone(),
                    done: done.clone(),
                });
            }
        }

        let tree = ProgressTree::new(label);
        self.progress.insert(url.to_string(), tree.clone());

        let registration = Registration {
            jobs: Arc::clone(&self.jobs),
            url: url.to_string(),
            id,
            done,
        };
        let job_slot = self.job_slot.clone();
        let job_url = url.to_string();
        crate::debug_info!("SUBSCRIPTION", "Job {} for {} started", id, url);

        let task = self.runtime.spawn(async move {
            let _registration = registration;
            let root = tree.root();

            let _slot = match job_slot {
                Some(slot) => {
                    let waiting = root.child(WAITING_FOR_JOBS);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            waiting.fail(&"cancelled");
                            root.fail(&"cancelled");
                            return Err(SyncError::Cancelled { url: job_url });
                        }
                        guard = slot.lock_owned() => {
                            waiting.finish("");
                            Some(guard)
                        }
                    }
                }
                None => None,
            };

            let result = job(root.clone(), cancel).await;
            if let Err(e) = &result {
                root.fail(e);
            }
            result
        });

        Some(JobHandle {
            url: url.to_string(),
            task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_spawn_is_rejected_while_running() {
        let scheduler = JobScheduler::new(Handle::current(), false);
        let release = CancellationToken::new();
        let gate = release.clone();

        let first = scheduler
            .spawn("u", "job".to_string(), move |_, _| async move {
                gate.cancelled().await;
                Ok(1)
            })
            .unwrap();
        assert!(scheduler.is_running("u"));
        assert!(
            scheduler
                .spawn("u", "job".to_string(), |_, _| async { Ok(2) })
                .is_none()
        );

        release.cancel();
        assert_eq!(first.wait().await.unwrap(), 1);
        assert!(!scheduler.is_running("u"));

        let again = scheduler
            .spawn("u", "job".to_string(), |_, _| async { Ok(3) })
            .unwrap();
        assert_eq!(again.wait().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_registration_cleared_after_panic() {
        let scheduler = JobScheduler::new(Handle::current(), false);
        let handle = scheduler
            .spawn("u", "job".to_string(), |_, _| async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            handle.wait().await,
            Err(SyncError::JobFailed { .. })
        ));
        assert!(!scheduler.is_running("u"));
    }

    #[tokio::test]
    async fn test_cancel_reaches_job() {
        let scheduler = JobScheduler::new(Handle::current(), false);
        let handle = scheduler
            .spawn("u", "job".to_string(), |_, cancel| async move {
                cancel.cancelled().await;
                Err::<(), _>(SyncError::Cancelled {
                    url: "u".to_string(),
                })
            })
            .unwrap();
        assert!(scheduler.cancel("u"));
        assert!(handle.wait().await.unwrap_err().is_cancelled());
        assert!(!scheduler.cancel("u"));
    }

    #[tokio::test]
    async fn test_cancel_and_wait_returns_after_job_ends() {
        let scheduler = JobScheduler::new(Handle::current(), false);
        let cleaned_up = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&cleaned_up);
        let _handle = scheduler
            .spawn("u", "job".to_string(), move |_, cancel| async move {
                cancel.cancelled().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert!(scheduler.cancel_and_wait("u").await);
        assert_eq!(cleaned_up.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running("u"));
        assert!(!scheduler.cancel_and_wait("u").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_job_slot_serializes_runs() {
        let scheduler = JobScheduler::new(Handle::current(), true);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|url| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                scheduler
                    .spawn(url, url.to_string(), move |_, _| async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();

        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        let progress = scheduler.progress("b").unwrap();
        assert!(progress.find(WAITING_FOR_JOBS).is_some());
    }

    #[tokio::test]
    async fn test_progress_replaced_per_job() {
        let scheduler = JobScheduler::new(Handle::current(), false);
        let first = scheduler
            .spawn("u", "first".to_string(), |root, _| async move {
                root.child("step").finish("");
                Ok(())
            })
            .unwrap();
        first.wait().await.unwrap();
        assert_eq!(scheduler.progress("u").unwrap().children.len(), 1);

        let second = scheduler
            .spawn("u", "second".to_string(), |_, _| async { Ok(()) })
            .unwrap();
        second.wait().await.unwrap();
        let progress = scheduler.progress("u").unwrap();
        assert_eq!(progress.label, "second");
        assert!(progress.children.is_empty());
    }
}
