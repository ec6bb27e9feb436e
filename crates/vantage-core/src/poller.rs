// ── Shared polling timers ──
//
// Many consumers may poll the same resource key at different cadences.
// The registry runs exactly one timer per key at the fastest requested
// interval and invokes every registrant's callback on each tick, in
// registration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::lock;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Per-registrant tick suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Skip ticks while the application is hidden.
    pub suppress_when_hidden: bool,
    /// Skip ticks while the application is offline.
    pub suppress_when_offline: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            suppress_when_hidden: true,
            suppress_when_offline: true,
        }
    }
}

impl PollOptions {
    /// Tick regardless of visibility or connectivity.
    pub fn always() -> Self {
        Self {
            suppress_when_hidden: false,
            suppress_when_offline: false,
        }
    }
}

/// Application visibility and connectivity, as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub hidden: bool,
    pub online: bool,
}

impl Default for Presence {
    fn default() -> Self {
        Self {
            hidden: false,
            online: true,
        }
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;

struct Registrant {
    interval: Duration,
    callback: Callback,
    options: PollOptions,
    active: Arc<AtomicBool>,
}

struct PollerEntry {
    registrants: IndexMap<u64, Registrant>,
    interval: Duration,
    timer: CancellationToken,
    generation: u64,
}

impl PollerEntry {
    fn min_interval(&self) -> Option<Duration> {
        self.registrants.values().map(|r| r.interval).min()
    }

    /// A tick is skipped only when every registrant opts out for the
    /// current presence.
    fn suppressed(&self, presence: Presence) -> bool {
        let hidden = presence.hidden
            && self
                .registrants
                .values()
                .all(|r| r.options.suppress_when_hidden);
        let offline = !presence.online
            && self
                .registrants
                .values()
                .all(|r| r.options.suppress_when_offline);
        hidden || offline
    }
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, PollerEntry>,
    presence: Presence,
    next_id: u64,
    next_generation: u64,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    cancel: CancellationToken,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── PollerRegistry ───────────────────────────────────────────────

/// One shared timer per resource key.
///
/// Cloning yields another handle to the same registry. Registering
/// spawns timer tasks, so it needs a Tokio runtime.
#[derive(Clone)]
pub struct PollerRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for PollerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Register `callback` to run at most every `interval` for `key`.
    ///
    /// The first tick fires one effective interval after the timer
    /// (re)starts. A zero interval is treated as one millisecond.
    pub fn register<F>(
        &self,
        key: &str,
        interval: Duration,
        options: PollOptions,
        callback: F,
    ) -> PollRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let active = Arc::new(AtomicBool::new(true));
        let registrant = Registrant {
            interval,
            callback: Arc::new(callback),
            options,
            active: Arc::clone(&active),
        };

        let mut state = lock(&self.inner.state);
        state.next_id += 1;
        let id = state.next_id;

        if state.entries.contains_key(key) {
            self.inner.restart_if_changed(&mut state, key, |entry| {
                entry.registrants.insert(id, registrant);
            });
        } else {
            let (timer, generation) = self.inner.spawn_timer(&mut state, key, interval);
            let mut registrants = IndexMap::new();
            registrants.insert(id, registrant);
            state.entries.insert(
                key.to_owned(),
                PollerEntry {
                    registrants,
                    interval,
                    timer,
                    generation,
                },
            );
            debug!(key, interval_ms = millis(interval), "poller started");
        }
        drop(state);

        PollRegistration {
            registry: Arc::downgrade(&self.inner),
            key: key.to_owned(),
            id,
            active,
        }
    }

    /// Effective interval for `key`, if anyone polls it.
    pub fn interval(&self, key: &str) -> Option<Duration> {
        lock(&self.inner.state).entries.get(key).map(|e| e.interval)
    }

    pub fn registrant_count(&self, key: &str) -> usize {
        lock(&self.inner.state)
            .entries
            .get(key)
            .map_or(0, |e| e.registrants.len())
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.inner.state).entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn set_hidden(&self, hidden: bool) {
        lock(&self.inner.state).presence.hidden = hidden;
    }

    pub fn set_online(&self, online: bool) {
        lock(&self.inner.state).presence.online = online;
    }

    pub fn presence(&self) -> Presence {
        lock(&self.inner.state).presence
    }

    /// Stop every timer and drop every registration.
    pub fn shutdown(&self) {
        let mut state = lock(&self.inner.state);
        for (_, entry) in state.entries.drain() {
            entry.timer.cancel();
            for registrant in entry.registrants.values() {
                registrant.active.store(false, Ordering::Release);
            }
        }
    }
}

impl std::fmt::Debug for PollerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerRegistry")
            .field("keys", &self.active_keys())
            .field("presence", &self.presence())
            .finish_non_exhaustive()
    }
}

impl RegistryInner {
    fn spawn_timer(
        self: &Arc<Self>,
        state: &mut RegistryState,
        key: &str,
        period: Duration,
    ) -> (CancellationToken, u64) {
        state.next_generation += 1;
        let generation = state.next_generation;
        let token = self.cancel.child_token();
        let registry = Arc::downgrade(self);
        let key = key.to_owned();
        let cancel = token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.fire(&key, generation);
                    }
                }
            }
            trace!(key, generation, "poller timer stopped");
        });

        (token, generation)
    }

    /// Apply `change` to the entry for `key` and restart its timer if the
    /// effective interval moved. Removes the entry once it is empty.
    fn restart_if_changed(
        self: &Arc<Self>,
        state: &mut RegistryState,
        key: &str,
        change: impl FnOnce(&mut PollerEntry),
    ) {
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        change(entry);

        let Some(wanted) = entry.min_interval() else {
            entry.timer.cancel();
            state.entries.remove(key);
            debug!(key, "last registrant left, poller stopped");
            return;
        };
        if wanted == entry.interval {
            return;
        }

        entry.timer.cancel();
        let previous = entry.interval;
        let (timer, generation) = self.spawn_timer(state, key, wanted);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.timer = timer;
            entry.generation = generation;
            entry.interval = wanted;
        }
        debug!(
            key,
            from_ms = millis(previous),
            to_ms = millis(wanted),
            "poller interval changed"
        );
    }

    fn fire(&self, key: &str, generation: u64) {
        let callbacks: Vec<(Callback, Arc<AtomicBool>)> = {
            let state = lock(&self.state);
            let Some(entry) = state.entries.get(key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            if entry.suppressed(state.presence) {
                trace!(key, "poll tick suppressed");
                return;
            }
            entry
                .registrants
                .values()
                .map(|r| (Arc::clone(&r.callback), Arc::clone(&r.active)))
                .collect()
        };
        for (callback, active) in callbacks {
            if active.load(Ordering::Acquire) {
                callback();
            }
        }
    }

    fn unregister(self: &Arc<Self>, key: &str, id: u64) {
        let mut state = lock(&self.state);
        self.restart_if_changed(&mut state, key, |entry| {
            entry.registrants.shift_remove(&id);
        });
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── PollRegistration ─────────────────────────────────────────────

/// Handle for one registrant. Dropping it unregisters.
pub struct PollRegistration {
    registry: Weak<RegistryInner>,
    key: String,
    id: u64,
    active: Arc<AtomicBool>,
}

impl PollRegistration {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for PollRegistration {
    fn drop(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.key, self.id);
        }
    }
}

impl std::fmt::Debug for PollRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollRegistration")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn single_registrant_ticks_at_its_interval() {
        let registry = PollerRegistry::new();
        let (count, cb) = counter();
        let _reg = registry.register("traffic", ms(1000), PollOptions::default(), cb);

        tokio::time::sleep(ms(999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(ms(1002)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_interval_wins_and_reverts() {
        let registry = PollerRegistry::new();
        let (slow, slow_cb) = counter();
        let (fast, fast_cb) = counter();

        let slow_reg = registry.register("clash-info", ms(1000), PollOptions::default(), slow_cb);
        let fast_reg = registry.register("clash-info", ms(300), PollOptions::default(), fast_cb);
        assert_eq!(registry.interval("clash-info"), Some(ms(300)));

        tokio::time::sleep(ms(950)).await;
        assert_eq!(slow.load(Ordering::SeqCst), 3);
        assert_eq!(fast.load(Ordering::SeqCst), 3);

        drop(fast_reg);
        assert_eq!(registry.interval("clash-info"), Some(ms(1000)));
        tokio::time::sleep(ms(1050)).await;
        assert_eq!(slow.load(Ordering::SeqCst), 4);
        assert_eq!(fast.load(Ordering::SeqCst), 3);

        slow_reg.unregister();
        assert!(registry.active_keys().is_empty());
        tokio::time::sleep(ms(5000)).await;
        assert_eq!(slow.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_run_in_registration_order() {
        let registry = PollerRegistry::new();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let regs: Vec<PollRegistration> = ["first", "second", "third"]
            .into_iter()
            .map(|name| {
                let order = Arc::clone(&order);
                registry.register("rules", ms(100), PollOptions::default(), move || {
                    lock(&order).push(name);
                })
            })
            .collect();

        tokio::time::sleep(ms(150)).await;
        assert_eq!(*lock(&order), vec!["first", "second", "third"]);
        drop(regs);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_suppresses_only_when_everyone_agrees() {
        let registry = PollerRegistry::new();
        let (count, cb) = counter();
        let _reg = registry.register("memory", ms(100), PollOptions::default(), cb);

        registry.set_hidden(true);
        tokio::time::sleep(ms(450)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let (always, always_cb) = counter();
        let _always = registry.register("memory", ms(100), PollOptions::always(), always_cb);
        tokio::time::sleep(ms(220)).await;
        assert_eq!(always.load(Ordering::SeqCst), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_suppresses_ticks() {
        let registry = PollerRegistry::new();
        let (count, cb) = counter();
        let _reg = registry.register("proxies", ms(100), PollOptions::default(), cb);

        registry.set_online(false);
        tokio::time::sleep(ms(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        registry.set_online(true);
        tokio::time::sleep(ms(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_all_timers() {
        let registry = PollerRegistry::new();
        let (count, cb) = counter();
        let reg = registry.register("traffic", ms(100), PollOptions::default(), cb);

        registry.shutdown();
        tokio::time::sleep(ms(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.registrant_count("traffic"), 0);
        drop(reg);
    }
}
