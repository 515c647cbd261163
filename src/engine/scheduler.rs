//! Per-session delayed callbacks
//!
//! Every timer has a purpose. Scheduling a purpose that already has a pending
//! timer in the same session cancels the old one first, so at most one timer
//! per (session, purpose) can fire. Fired timers are delivered over a channel
//! and dispatched by [`spawn_timer_loop`].

use super::error::HandlerError;
use super::session::{Session, SessionKey};
use super::AppContext;
use crate::storage::NewErrorRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a timer is for, at most one pending timer per purpose and session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerPurpose(pub &'static str);

impl fmt::Display for TimerPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Data handed to the callback when a timer fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerPayload {
    pub session: SessionKey,
    /// Account the timer was scheduled for
    pub account_id: Option<i64>,
    /// Durable row the timer refers to
    pub record_id: Option<i64>,
}

impl TimerPayload {
    #[must_use]
    pub const fn chat_id(&self) -> i64 {
        self.session.chat_id
    }
}

/// Handle of a pending timer kept in its session
#[derive(Debug)]
pub struct TimerHandle {
    pub id: u64,
    pub purpose: TimerPurpose,
    pub deadline: Instant,
    token: CancellationToken,
}

impl TimerHandle {
    fn cancel(&self) {
        self.token.cancel();
    }
}

/// A timer that ran to its deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: u64,
    pub purpose: TimerPurpose,
    pub payload: TimerPayload,
}

/// Receiving end of fired timers
pub type TimerReceiver = UnboundedReceiver<FiredTimer>;

/// Schedules and cancels timers
pub struct Scheduler {
    next_id: AtomicU64,
    fired: UnboundedSender<FiredTimer>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> (Self, TimerReceiver) {
        let (fired, rx) = unbounded_channel();
        (
            Self {
                next_id: AtomicU64::new(1),
                fired,
            },
            rx,
        )
    }

    /// Schedule a timer, superseding any pending timer with the same purpose
    pub fn schedule(
        &self,
        session: &mut Session,
        purpose: TimerPurpose,
        delay: Duration,
        payload: TimerPayload,
    ) -> u64 {
        if let Some(previous) = session.take_timer(purpose) {
            previous.cancel();
            debug!(%purpose, timer_id = previous.id, "Timer superseded");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let child = token.clone();
        let fired_tx = self.fired.clone();
        let fired = FiredTimer {
            id,
            purpose,
            payload,
        };

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = child.cancelled() => {
                    debug!(%purpose, timer_id = id, "Timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    if fired_tx.send(fired).is_err() {
                        warn!(%purpose, timer_id = id, "Timer fired after shutdown");
                    }
                }
            }
        });

        session.insert_timer(TimerHandle {
            id,
            purpose,
            deadline: Instant::now() + delay,
            token,
        });
        info!(%purpose, timer_id = id, delay_secs = delay.as_secs(), "Timer scheduled");
        id
    }

    /// Cancel the pending timer of a purpose, returns `false` if there was none
    pub fn cancel(&self, session: &mut Session, purpose: TimerPurpose) -> bool {
        session.take_timer(purpose).is_some_and(|handle| {
            handle.cancel();
            info!(%purpose, timer_id = handle.id, "Timer cancelled");
            true
        })
    }
}

/// Follow-up action of a timer purpose
#[async_trait]
pub trait TimerCallback: Send + Sync {
    async fn fire(&self, app: Arc<AppContext>, payload: TimerPayload) -> Result<(), HandlerError>;
}

/// Callbacks keyed by purpose
#[derive(Clone, Default)]
pub struct TimerCallbacks {
    callbacks: HashMap<TimerPurpose, Arc<dyn TimerCallback>>,
}

impl TimerCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on(mut self, purpose: TimerPurpose, callback: impl TimerCallback + 'static) -> Self {
        self.callbacks.insert(purpose, Arc::new(callback));
        self
    }

    fn get(&self, purpose: TimerPurpose) -> Option<Arc<dyn TimerCallback>> {
        self.callbacks.get(&purpose).cloned()
    }
}

/// Run the callbacks of fired timers until the scheduler is dropped
pub fn spawn_timer_loop(
    app: Arc<AppContext>,
    callbacks: TimerCallbacks,
    mut rx: TimerReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(fired) = rx.recv().await {
            let Some(callback) = callbacks.get(fired.purpose) else {
                warn!(purpose = %fired.purpose, "No callback for fired timer");
                continue;
            };
            let app = app.clone();
            tokio::spawn(async move {
                if let Some(session) = app.sessions.get(&fired.payload.session).await {
                    session.lock().await.discard_fired(fired.purpose, fired.id);
                }

                let key = fired.payload.session;
                let account_id = fired.payload.account_id;
                if let Err(e) = callback.fire(app.clone(), fired.payload).await {
                    error!(purpose = %fired.purpose, error = %e, "Timer callback failed");
                    let record = NewErrorRecord {
                        account_id,
                        handler_name: fired.purpose.to_string(),
                        description: e.to_string(),
                    };
                    if let Err(e) = app.storage.record_error(record).await {
                        warn!(error = %e, "Failed to write error record");
                    }
                }
                app.sessions.release(&key).await;
            });
        }
        debug!("Timer loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORK: TimerPurpose = TimerPurpose("work");
    const KEY: SessionKey = SessionKey {
        chat_id: 1,
        user_id: Some(1),
    };

    fn payload(record_id: i64) -> TimerPayload {
        TimerPayload {
            session: KEY,
            account_id: None,
            record_id: Some(record_id),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (scheduler, mut rx) = Scheduler::new();
        let mut session = Session::new(KEY);
        let id = scheduler.schedule(&mut session, WORK, Duration::from_secs(60), payload(1));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let fired = rx.recv().await;
        assert_eq!(fired.map(|f| f.id), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_supersedes_pending_timer() {
        let (scheduler, mut rx) = Scheduler::new();
        let mut session = Session::new(KEY);
        scheduler.schedule(&mut session, WORK, Duration::from_secs(10), payload(1));
        let second = scheduler.schedule(&mut session, WORK, Duration::from_secs(20), payload(2));

        tokio::time::sleep(Duration::from_secs(30)).await;
        let fired = rx.recv().await;
        assert_eq!(fired.as_ref().map(|f| f.id), Some(second));
        assert_eq!(fired.and_then(|f| f.payload.record_id), Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (scheduler, mut rx) = Scheduler::new();
        let mut session = Session::new(KEY);
        scheduler.schedule(&mut session, WORK, Duration::from_secs(10), payload(1));

        assert!(scheduler.cancel(&mut session, WORK));
        assert!(!scheduler.cancel(&mut session, WORK));
        assert!(session.timer(WORK).is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_discard_fired_keeps_newer_handle() {
        let mut session = Session::new(KEY);
        session.insert_timer(TimerHandle {
            id: 7,
            purpose: WORK,
            deadline: Instant::now(),
            token: CancellationToken::new(),
        });

        session.discard_fired(WORK, 3);
        assert!(session.timer(WORK).is_some());
        session.discard_fired(WORK, 7);
        assert!(session.timer(WORK).is_none());
    }
}
