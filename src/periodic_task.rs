use std::future::Future;

use rocket::tokio::{
    self,
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};

/// A task that runs repeatedly at a fixed period until cancelled.
/// The first run happens immediately.
///
/// Dropping the task cancels it as well, so a forgotten handle never leaks
/// the timer or anything the task owns.
pub struct PeriodicTask {
    task_handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Start running `tick` every `period`.
    ///
    /// A tick is never run concurrently with the previous one; if a tick
    /// overruns the period, the next one is delayed rather than bunched up.
    pub fn new<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });

        Self { task_handle }
    }

    /// Cancel the task and wait for it to wind down.
    /// Any in-flight tick is abandoned at its next await point.
    pub async fn cancel(mut self) {
        self.task_handle.abort();
        // The only way the loop ends is by being aborted, or by a tick panicking.
        if let Err(e) = (&mut self.task_handle).await {
            if e.is_panic() {
                log::error!("Periodic task panicked before it was cancelled");
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.task_handle.abort();
    }
}
