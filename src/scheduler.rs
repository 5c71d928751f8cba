//! Periodic background jobs with a connectivity precondition.
//!
//! A job is scheduled under a name; at most one instance per name is ever
//! logically active, and scheduling under an existing name replaces the
//! pending one instead of queuing alongside it. Runs are gated on a
//! [`Connectivity`] check; offline ticks defer the run rather than failing
//! it. Failed runs retry with a doubling delay capped at the base interval
//! before the regular cadence resumes.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// How often to re-probe while offline.
const OFFLINE_POLL: Duration = Duration::from_secs(30);

/// First retry delay after a failed run; doubles per consecutive failure.
const RETRY_BASE: Duration = Duration::from_secs(60);

// ============================================================================
// Connectivity
// ============================================================================

/// Precondition probe consulted before every run.
pub trait Connectivity: Send + Sync + 'static {
    fn is_online(&self) -> impl Future<Output = bool> + Send;
}

/// Probes reachability with a short TCP connect to a well-known endpoint.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        // Cloudflare's public resolver: answers TCP/53 from nearly anywhere
        Self::new("1.1.1.1:53", Duration::from_secs(3))
    }
}

impl Connectivity for TcpProbe {
    async fn is_online(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }
}

/// No-op probe for one-shot invocations and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Registry of named periodic jobs. Dropping the scheduler aborts every job;
/// no background work outlives it.
#[derive(Default)]
pub struct Scheduler {
    jobs: HashMap<String, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` now and then at least every `every`, under `name`.
    ///
    /// Replace-existing semantics: if a job is already scheduled under this
    /// name, its pending task is aborted first. A re-schedule supersedes,
    /// it never stacks.
    pub fn schedule<C, F, Fut>(
        &mut self,
        name: impl Into<String>,
        every: Duration,
        connectivity: C,
        job: F,
    ) where
        C: Connectivity,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(run_job_loop(name.clone(), every, connectivity, job));
        if let Some(previous) = self.jobs.insert(name.clone(), handle) {
            tracing::debug!(job = %name, "Replacing pending scheduled job");
            previous.abort();
        }
    }

    /// Abort the named job. Returns false when nothing was scheduled.
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.jobs.remove(name) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (name, handle) in self.jobs.drain() {
            tracing::debug!(job = %name, "Aborting scheduled job");
            handle.abort();
        }
    }
}

async fn run_job_loop<C, F, Fut>(name: String, every: Duration, connectivity: C, mut job: F)
where
    C: Connectivity,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut consecutive_failures: u32 = 0;

    loop {
        if !connectivity.is_online().await {
            tracing::debug!(job = %name, "Offline, deferring run");
            tokio::time::sleep(OFFLINE_POLL.min(every)).await;
            continue;
        }

        match job().await {
            Ok(()) => {
                consecutive_failures = 0;
                tokio::time::sleep(every).await;
            }
            Err(error) => {
                consecutive_failures += 1;
                let delay = retry_delay(consecutive_failures, every);
                tracing::warn!(
                    job = %name,
                    error = %error,
                    attempt = consecutive_failures,
                    retry_in_secs = delay.as_secs(),
                    "Job failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn retry_delay(consecutive_failures: u32, cap: Duration) -> Duration {
    // 60s, 120s, 240s, ... capped at the job's own interval
    let exponent = consecutive_failures.saturating_sub(1).min(6);
    let delay = RETRY_BASE.saturating_mul(2u32.saturating_pow(exponent));
    delay.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Probe whose answer tests can flip at will.
    #[derive(Clone, Default)]
    struct Switch(Arc<AtomicBool>);

    impl Switch {
        fn online() -> Self {
            Switch(Arc::new(AtomicBool::new(true)))
        }
        fn set(&self, online: bool) {
            self.0.store(online, Ordering::SeqCst);
        }
    }

    impl Connectivity for Switch {
        async fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn counting_job(runs: &Arc<AtomicUsize>) -> impl FnMut() -> futures::future::Ready<anyhow::Result<()>> + Send + 'static
    {
        let runs = Arc::clone(runs);
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_schedule() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            "refresh",
            Duration::from_secs(900),
            Switch::online(),
            counting_job(&runs),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1, "first run is immediate");

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_pending_job() {
        let first_runs = Arc::new(AtomicUsize::new(0));
        let second_runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();

        scheduler.schedule(
            "refresh",
            Duration::from_secs(900),
            Switch::online(),
            counting_job(&first_runs),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(first_runs.load(Ordering::SeqCst), 1);

        // Same name: the pending first job must be superseded, not doubled
        scheduler.schedule(
            "refresh",
            Duration::from_secs(900),
            Switch::online(),
            counting_job(&second_runs),
        );

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(first_runs.load(Ordering::SeqCst), 1, "old job stopped");
        assert!(second_runs.load(Ordering::SeqCst) >= 2, "new job runs");
    }

    #[tokio::test(start_paused = true)]
    async fn offline_ticks_defer_instead_of_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let probe = Switch::default(); // offline
        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            "refresh",
            Duration::from_secs(900),
            probe.clone(),
            counting_job(&runs),
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0, "no runs while offline");

        probe.set(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1, "runs once connectivity returns");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_back_off_then_recover() {
        let runs = Arc::new(AtomicUsize::new(0));
        let fail_first = Arc::new(AtomicBool::new(true));
        let mut scheduler = Scheduler::new();

        let runs_in_job = Arc::clone(&runs);
        let fail_flag = Arc::clone(&fail_first);
        scheduler.schedule("refresh", Duration::from_secs(900), Switch::online(), move || {
            runs_in_job.fetch_add(1, Ordering::SeqCst);
            let fail = fail_flag.swap(false, Ordering::SeqCst);
            futures::future::ready(if fail {
                Err(anyhow::anyhow!("network down"))
            } else {
                Ok(())
            })
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1, "first attempt failed");

        // Retry arrives after the 60s backoff, well before the 900s interval
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2, "retried after backoff");

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3, "normal cadence resumed");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            "refresh",
            Duration::from_secs(900),
            Switch::online(),
            counting_job(&runs),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(scheduler.cancel("refresh"));
        assert!(!scheduler.is_scheduled("refresh"));
        assert!(!scheduler.cancel("refresh"), "second cancel finds nothing");

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let cap = Duration::from_secs(900);
        assert_eq!(retry_delay(1, cap), Duration::from_secs(60));
        assert_eq!(retry_delay(2, cap), Duration::from_secs(120));
        assert_eq!(retry_delay(3, cap), Duration::from_secs(240));
        assert_eq!(retry_delay(10, cap), cap, "never exceeds the interval");

        let short_cap = Duration::from_secs(30);
        assert_eq!(retry_delay(1, short_cap), short_cap);
    }
}
