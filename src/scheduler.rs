//! Time-based resubmission: one-shot delays and fixed-interval repeats.
//!
//! The scheduler owns no execution machinery of its own. Each firing clones
//! the caller's template event with a fresh id and pushes it through the
//! normal submission path, so scheduled work is ordered, retried, and
//! reported exactly like directly-submitted work.

use crate::event::Event;
use crate::handler::DispatcherHandle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A running scheduled job. Dropping it stops the job.
pub struct Scheduler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Submit one copy of `template` after `delay`.
    pub fn once(dispatcher: DispatcherHandle, template: Event, delay: Duration) -> Self {
        let token = CancellationToken::new();
        let job_token = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = job_token.cancelled() => return,
            }
            let event = template.from_template();
            if let Err(err) = dispatcher.submit(event).await {
                warn!(event_type = %template.event_type, error = %err, "Scheduled submission failed");
            }
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Submit a fresh copy of `template` every `every`, starting one full
    /// interval from now. Ticks missed while the runtime was busy are
    /// skipped rather than bursted. The job stops itself once the
    /// dispatcher refuses submissions.
    pub fn repeating(dispatcher: DispatcherHandle, template: Event, every: Duration) -> Self {
        let token = CancellationToken::new();
        let job_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = job_token.cancelled() => return,
                }
                let event = template.from_template();
                match dispatcher.submit(event).await {
                    Ok(id) => debug!(event_id = %id, event_type = %template.event_type, "Scheduled firing submitted"),
                    Err(err) => {
                        warn!(event_type = %template.event_type, error = %err, "Stopping schedule");
                        return;
                    }
                }
            }
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop the job and wait for its task to wind down.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn once_against_a_gone_dispatcher_does_not_panic() {
        let template = Event::builder("tick").build().unwrap();
        let job = Scheduler::once(
            DispatcherHandle::detached(),
            template,
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        job.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_before_the_delay_elapses() {
        let template = Event::builder("tick").build().unwrap();
        let job = Scheduler::once(
            DispatcherHandle::detached(),
            template,
            Duration::from_secs(60),
        );
        job.stop().await;
    }

    #[tokio::test]
    async fn dropping_the_job_cancels_its_task() {
        let template = Event::builder("tick").build().unwrap();
        let job = Scheduler::repeating(
            DispatcherHandle::detached(),
            template,
            Duration::from_secs(60),
        );
        let token = job.token.clone();
        drop(job);
        token.cancelled().await;
    }
}
