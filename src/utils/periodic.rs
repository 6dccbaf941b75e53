use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// 后台周期任务，析构或调用 `stop` 时终止
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// 每隔 `period` 调用一次 `tick`，首次调用在一个周期之后。
    /// `tick` 返回 `false` 时任务自行结束。必须在 tokio 运行时内调用。
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !tick() {
                    tracing::debug!(task = name, "Periodic task finished");
                    break;
                }
            }
        });

        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");
        Self { name, handle }
    }

    pub fn stop(&self) {
        if !self.handle.is_finished() {
            tracing::debug!(task = self.name, "Stopping periodic task");
        }
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = PeriodicTask::spawn("test", Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(26)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.stop();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ends_when_tick_returns_false() {
        let task = PeriodicTask::spawn("once", Duration::from_secs(1), || false);
        time::sleep(Duration::from_secs(2)).await;
        assert!(!task.is_running());
    }
}
