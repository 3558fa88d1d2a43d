/// Named, independently cancellable polling tasks
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};

/// A spawned poll loop. The first tick fires immediately; aborting (or
/// dropping) the task stops the timer and drops any tick in flight.
pub struct PollTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PollTask {
    /// Spawn `tick` every `every`, each run bounded by `tick_timeout`.
    /// A notification on `trigger` runs an extra tick right away.
    pub fn spawn<F, Fut>(
        name: &'static str,
        every: Duration,
        tick_timeout: Duration,
        trigger: Option<Arc<Notify>>,
        tick: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                match &trigger {
                    Some(notify) => {
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = notify.notified() => {
                                debug!("{}: out-of-band refresh", name);
                            }
                        }
                    }
                    None => {
                        ticker.tick().await;
                    }
                }

                match timeout(tick_timeout, tick()).await {
                    Ok(Ok(true)) => {}
                    Ok(Ok(false)) => debug!("{}: tick skipped", name),
                    Ok(Err(e)) => warn!("{} poll failed: {}", name, e),
                    Err(_) => warn!("{} poll timed out after {:?}", name, tick_timeout),
                }
            }
        });

        debug!("Started {} poller (every {:?})", name, every);
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            debug!("Stopping {} poller", self.name);
        }
        self.handle.abort();
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<Result<bool>> {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(true))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let count = Arc::new(AtomicUsize::new(0));
        let _task = PollTask::spawn(
            "test",
            Duration::from_secs(10),
            Duration::from_secs(10),
            None,
            counting(count.clone()),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_extra_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        let _task = PollTask::spawn(
            "test",
            Duration::from_secs(60),
            Duration::from_secs(60),
            Some(notify.clone()),
            counting(count.clone()),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        notify.notify_one();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticking() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = PollTask::spawn(
            "test",
            Duration::from_secs(1),
            Duration::from_secs(1),
            None,
            counting(count.clone()),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        task.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
