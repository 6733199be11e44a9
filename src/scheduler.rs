//! Round timers
//!
//! The round machine never sleeps itself. It asks a [`Scheduler`] to deliver
//! an [`AlarmMessage`] later and keeps the returned [`TimerHandle`]; dropping
//! or cancelling the handle stops the alarm. [`TokioScheduler`] delivers
//! alarms over an mpsc channel from spawned tasks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::AbortHandle};
use web_time::SystemTime;

/// Timed events of a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Countdown re-render, once per second while a round runs
    Tick {
        /// Question of the round the tick belongs to
        mcq_id: String,
    },
    /// The round deadline (plus grace) passed
    Deadline {
        /// Question of the round the deadline belongs to
        mcq_id: String,
    },
}

impl AlarmMessage {
    /// Question the alarm belongs to
    pub fn mcq_id(&self) -> &str {
        match self {
            Self::Tick { mcq_id } | Self::Deadline { mcq_id } => mcq_id,
        }
    }
}

/// Owned handle of a scheduled alarm
///
/// The alarm is cancelled when the handle is cancelled or dropped.
#[must_use = "dropping a timer handle cancels the alarm"]
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    /// Creates a handle that runs `cancel` once when released
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stops the alarm
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Source of delayed alarms
pub trait Scheduler {
    /// Delivers `message` once after `delay`
    fn once(&mut self, message: AlarmMessage, delay: Duration) -> TimerHandle;

    /// Delivers `message` every `period`, first after one period
    fn every(&mut self, message: AlarmMessage, period: Duration) -> TimerHandle;
}

/// Scheduler backed by tokio tasks
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    alarms: mpsc::UnboundedSender<AlarmMessage>,
}

impl TokioScheduler {
    /// Creates a scheduler delivering alarms to `alarms`
    pub fn new(alarms: mpsc::UnboundedSender<AlarmMessage>) -> Self {
        Self { alarms }
    }

    fn handle(abort: AbortHandle) -> TimerHandle {
        TimerHandle::new(move || abort.abort())
    }
}

impl Scheduler for TokioScheduler {
    fn once(&mut self, message: AlarmMessage, delay: Duration) -> TimerHandle {
        let alarms = self.alarms.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = alarms.send(message);
        });
        Self::handle(task.abort_handle())
    }

    fn every(&mut self, message: AlarmMessage, period: Duration) -> TimerHandle {
        let alarms = self.alarms.clone();
        let task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if alarms.send(message.clone()).is_err() {
                    break;
                }
            }
        });
        Self::handle(task.abort_handle())
    }
}

/// Milliseconds since the unix epoch
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
pub(crate) mod manual {
    //! A scheduler that only records what was asked of it

    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[derive(Debug, Clone)]
    pub struct Scheduled {
        pub message: AlarmMessage,
        pub delay: Duration,
        pub repeating: bool,
        cancelled: Arc<AtomicBool>,
    }

    impl Scheduled {
        pub fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct ManualScheduler {
        scheduled: Arc<Mutex<Vec<Scheduled>>>,
    }

    impl ManualScheduler {
        pub fn all(&self) -> Vec<Scheduled> {
            self.scheduled.lock().unwrap().clone()
        }

        pub fn armed(&self) -> Vec<Scheduled> {
            self.all().into_iter().filter(|s| !s.is_cancelled()).collect()
        }

        fn push(&self, message: AlarmMessage, delay: Duration, repeating: bool) -> TimerHandle {
            let cancelled = Arc::new(AtomicBool::new(false));
            self.scheduled.lock().unwrap().push(Scheduled {
                message,
                delay,
                repeating,
                cancelled: cancelled.clone(),
            });
            TimerHandle::new(move || cancelled.store(true, Ordering::SeqCst))
        }
    }

    impl Scheduler for ManualScheduler {
        fn once(&mut self, message: AlarmMessage, delay: Duration) -> TimerHandle {
            self.push(message, delay, false)
        }

        fn every(&mut self, message: AlarmMessage, period: Duration) -> TimerHandle {
            self.push(message, period, true)
        }
    }
}
