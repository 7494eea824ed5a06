// ABOUTME: Per-channel debounce timers that wait for humans to stop typing
// ABOUTME: Rescheduling a channel replaces its pending timer; the last call wins

use crate::metrics;
use crate::traits::TypingProbe;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How the delay grows while someone keeps typing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Multiplier applied to the delay each time the probe reports typing
    pub factor: u32,
    /// Upper bound for the grown delay
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            factor: 10,
            cap: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// Delay to use after the probe reported typing at `current`
    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.factor.max(1))
            .min(self.cap.max(current))
    }
}

/// What a pending timer is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Initial debounce window
    Debouncing,
    /// Probe reported typing at least once; waiting with a grown delay
    TypingWait,
}

struct TimerSlot {
    id: u64,
    handle: JoinHandle<()>,
    typing_wait: Arc<AtomicBool>,
}

type TimerTable = Arc<Mutex<HashMap<String, TimerSlot>>>;

/// Polling interval used by [`TurnScheduler::wait_idle`]
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Counts an action as running until dropped
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Debounces actions per channel.
///
/// At most one timer is pending per channel. Once a timer fires its action
/// is detached from the table, so rescheduling never cancels an action
/// that already started.
pub struct TurnScheduler<P: TypingProbe + ?Sized + 'static> {
    probe: Arc<P>,
    policy: BackoffPolicy,
    timers: TimerTable,
    running: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl<P: TypingProbe + ?Sized + 'static> TurnScheduler<P> {
    pub fn new(probe: Arc<P>, policy: BackoffPolicy) -> Self {
        Self {
            probe,
            policy,
            timers: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Arm (or re-arm) the timer for `channel_id`.
    ///
    /// Any pending timer for the channel is cancelled. When the new timer
    /// fires and nobody is typing, `action` runs exactly once.
    pub fn schedule<F, Fut>(&self, channel_id: &str, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let typing_wait = Arc::new(AtomicBool::new(false));

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timers.remove(channel_id) {
            previous.handle.abort();
            tracing::debug!(channel_id = %channel_id, "Superseded pending turn timer");
        }

        let handle = tokio::spawn(run_timer(
            Arc::clone(&self.probe),
            Arc::clone(&self.timers),
            Arc::clone(&self.running),
            self.policy,
            channel_id.to_string(),
            id,
            delay,
            Arc::clone(&typing_wait),
            action,
        ));

        timers.insert(
            channel_id.to_string(),
            TimerSlot {
                id,
                handle,
                typing_wait,
            },
        );
    }

    /// Cancel the pending timer for a channel; returns whether one existed
    pub fn cancel(&self, channel_id: &str) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        match timers.remove(channel_id) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    /// State of the pending timer for a channel, if any
    pub fn pending(&self, channel_id: &str) -> Option<TimerState> {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.get(channel_id).map(|slot| {
            if slot.typing_wait.load(Ordering::Relaxed) {
                TimerState::TypingWait
            } else {
                TimerState::Debouncing
            }
        })
    }

    /// Number of channels with a pending timer
    pub fn pending_count(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no timer is pending and no fired action is still running
    pub fn is_idle(&self) -> bool {
        // A firing timer bumps `running` before leaving the table, so both
        // are read under the table lock
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.is_empty() && self.running.load(Ordering::SeqCst) == 0
    }

    /// Wait for pending timers to fire and their actions to finish
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

impl<P: TypingProbe + ?Sized + 'static> Drop for TurnScheduler<P> {
    fn drop(&mut self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, slot) in timers.drain() {
            slot.handle.abort();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_timer<P, F, Fut>(
    probe: Arc<P>,
    timers: TimerTable,
    running: Arc<AtomicUsize>,
    policy: BackoffPolicy,
    channel_id: String,
    id: u64,
    mut delay: Duration,
    typing_wait: Arc<AtomicBool>,
    action: F,
) where
    P: TypingProbe + ?Sized,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::time::sleep(delay).await;

        let typing = match probe.is_typing(&channel_id).await {
            Ok(typing) => typing,
            Err(e) => {
                tracing::warn!(
                    channel_id = %channel_id,
                    error = %e,
                    "Typing probe failed, treating as not typing"
                );
                false
            }
        };
        if !typing {
            break;
        }

        delay = policy.next_delay(delay);
        typing_wait.store(true, Ordering::Relaxed);
        metrics::record_typing_backoff();
        tracing::debug!(
            channel_id = %channel_id,
            delay_ms = delay.as_millis() as u64,
            "Someone is typing, waiting longer"
        );
    }

    // Leave the table before running so a reschedule cannot abort the action
    let running_guard = {
        let mut timers = timers.lock().unwrap_or_else(|e| e.into_inner());
        match timers.get(&channel_id) {
            Some(slot) if slot.id == id => {
                running.fetch_add(1, Ordering::SeqCst);
                timers.remove(&channel_id);
                Some(RunningGuard(running))
            }
            _ => None,
        }
    };
    if let Some(_running) = running_guard {
        action().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_by_factor() {
        let policy = BackoffPolicy {
            factor: 10,
            cap: Duration::from_secs(300),
        };
        assert_eq!(
            policy.next_delay(Duration::from_secs(5)),
            Duration::from_secs(50)
        );
        assert_eq!(
            policy.next_delay(Duration::from_secs(50)),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_backoff_never_shrinks_below_current() {
        let policy = BackoffPolicy {
            factor: 10,
            cap: Duration::from_secs(1),
        };
        assert_eq!(
            policy.next_delay(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_backoff_zero_factor_is_treated_as_one() {
        let policy = BackoffPolicy {
            factor: 0,
            cap: Duration::from_secs(300),
        };
        assert_eq!(
            policy.next_delay(Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }
}
