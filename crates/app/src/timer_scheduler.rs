//! Timer scheduler: one tokio task per armed timer.
//!
//! Firings are sent as [`Timer`] values on the channel given to
//! [`TimerScheduler::new`]; what a firing triggers is up to the receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use homegate_domain::error::GatewayError;
use homegate_domain::id::TimerId;
use homegate_domain::time::now;
use homegate_domain::timer::Timer;

use crate::ports::Storage;
use crate::sync::lock;

type Armed = Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>;

pub struct TimerScheduler<S> {
    storage: S,
    firings: mpsc::Sender<Timer>,
    armed: Armed,
    running: AtomicBool,
}

impl<S: Storage> TimerScheduler<S> {
    pub fn new(storage: S, firings: mpsc::Sender<Timer>) -> Self {
        Self {
            storage,
            firings,
            armed: Arc::new(Mutex::new(HashMap::new())),
            running: AtomicBool::new(false),
        }
    }

    /// Arm `timer`. No-op when it is already armed.
    ///
    /// Returns `true` when the timer was armed by this call. Invalid timers and
    /// one-shots whose instant has passed are not armed.
    #[tracing::instrument(skip(self, timer), fields(timer_id = %timer.id, name = %timer.name))]
    pub fn set(&self, timer: &Timer) -> bool {
        if let Err(err) = timer.validate() {
            tracing::warn!(error = %err, "invalid timer not armed");
            return false;
        }
        let mut armed = lock(&self.armed);
        if armed.contains_key(&timer.id) {
            return false;
        }
        let Some(delay) = timer.schedule.first_delay(now()) else {
            tracing::warn!("one-shot timer is in the past, not armed");
            return false;
        };
        let task = tokio::spawn(run_timer(
            timer.clone(),
            delay,
            self.firings.clone(),
            Arc::downgrade(&self.armed),
        ));
        armed.insert(timer.id, task);
        tracing::debug!(?delay, "timer armed");
        true
    }

    /// Cancel the timer. Returns whether it was armed.
    pub fn delete(&self, id: TimerId) -> bool {
        let task = lock(&self.armed).remove(&id);
        match task {
            Some(task) => {
                task.abort();
                tracing::debug!(timer_id = %id, "timer disarmed");
                true
            }
            None => false,
        }
    }

    /// Disarm when armed, arm otherwise. Returns whether it is armed afterwards.
    pub fn toggle_timer(&self, timer: &Timer) -> bool {
        if self.delete(timer.id) {
            false
        } else {
            self.set(timer)
        }
    }

    #[must_use]
    pub fn is_armed(&self, id: TimerId) -> bool {
        lock(&self.armed).contains_key(&id)
    }

    /// Arm every timer flagged for boot.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the timers cannot be listed.
    pub async fn start(&self) -> Result<usize, GatewayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let timers = self.storage.list_boot_timers().await?;
        let armed = timers.iter().filter(|timer| self.set(timer)).count();
        tracing::info!(armed, "timer scheduler started");
        Ok(armed)
    }

    /// Cancel every armed timer.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for (_, task) in lock(&self.armed).drain() {
            task.abort();
        }
        tracing::info!("timer scheduler stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn run_timer(
    timer: Timer,
    delay: Duration,
    firings: mpsc::Sender<Timer>,
    armed: Weak<Mutex<HashMap<TimerId, JoinHandle<()>>>>,
) {
    tokio::time::sleep(delay).await;
    let Some(period) = timer.schedule.period() else {
        if let Some(armed) = armed.upgrade() {
            lock(&armed).remove(&timer.id);
        }
        tracing::debug!(timer_id = %timer.id, "timer fired");
        if firings.send(timer).await.is_err() {
            tracing::debug!("timer receiver gone");
        }
        return;
    };

    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        tracing::debug!(timer_id = %timer.id, "timer fired");
        if firings.send(timer.clone()).await.is_err() {
            tracing::debug!("timer receiver gone");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::testing::InMemoryStorage;

    fn scheduler(
        storage: InMemoryStorage) -> (TimerScheduler<InMemoryStorage>, mpsc::Receiver<Timer>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        (TimerScheduler::new(storage, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn should_fire_one_shot_once_and_disarm() {
        let (scheduler, mut rx) = scheduler(InMemoryStorage::default());
        let timer = Timer::at("Wake", now() + chrono::Duration::seconds(10));

        assert!(scheduler.set(&timer));
        let fired = rx.recv().await.unwrap();

        assert_eq!(fired.id, timer.id);
        assert!(!scheduler.is_armed(timer.id));
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_arm_past_one_shot() {
        let (scheduler, _rx) = scheduler(InMemoryStorage::default());
        let timer = Timer::at("Yesterday", now() - chrono::Duration::hours(24));

        assert!(!scheduler.set(&timer));
        assert!(!scheduler.is_armed(timer.id));
    }

    #[tokio::test(start_paused = true)]
    async fn should_fire_repeating_timer_one_second_after_arming_then_every_interval() {
        let (scheduler, mut rx) = scheduler(InMemoryStorage::default());
        let timer = Timer::every("Poll", 1);
        let armed_at = Instant::now();

        scheduler.set(&timer);
        rx.recv().await.unwrap();
        let first = armed_at.elapsed();
        rx.recv().await.unwrap();
        let second = armed_at.elapsed();

        assert!(first >= Duration::from_secs(1) && first < Duration::from_secs(2));
        assert!(second >= Duration::from_secs(61) && second < Duration::from_secs(62));
        assert!(scheduler.is_armed(timer.id));
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_second_set() {
        let (scheduler, _rx) = scheduler(InMemoryStorage::default());
        let timer = Timer::every("Poll", 5);

        assert!(scheduler.set(&timer));
        assert!(!scheduler.set(&timer));
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_firing_after_delete() {
        let (scheduler, mut rx) = scheduler(InMemoryStorage::default());
        let timer = Timer::every("Poll", 1);
        scheduler.set(&timer);

        assert!(scheduler.delete(timer.id));
        tokio::time::sleep(Duration::from_secs(180)).await;

        assert!(rx.try_recv().is_err());
        assert!(!scheduler.delete(timer.id));
    }

    #[tokio::test(start_paused = true)]
    async fn should_toggle_timer() {
        let (scheduler, _rx) = scheduler(InMemoryStorage::default());
        let timer = Timer::every("Poll", 5);

        assert!(scheduler.toggle_timer(&timer));
        assert!(!scheduler.toggle_timer(&timer));
        assert!(!scheduler.is_armed(timer.id));
    }

    #[tokio::test(start_paused = true)]
    async fn should_refuse_zero_interval() {
        let (scheduler, _rx) = scheduler(InMemoryStorage::default());
        assert!(!scheduler.set(&Timer::every("Broken", 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_arm_boot_timers_on_start_and_disarm_on_stop() {
        let boot = Timer::every("Boot", 5).with_boot_init(true);
        let manual = Timer::every("Manual", 5);
        let storage = InMemoryStorage::default().with_timer(&boot).with_timer(&manual);
        let (scheduler, _rx) = scheduler(storage);

        assert_eq!(scheduler.start().await.unwrap(), 1);
        assert!(scheduler.is_armed(boot.id));
        assert!(!scheduler.is_armed(manual.id));

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(!scheduler.is_armed(boot.id));
    }
}
