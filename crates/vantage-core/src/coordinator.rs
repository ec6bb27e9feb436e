// ── Coordinator ──
//
// Composition root for the coordination layer. Owns one of each shared
// registry and wires the switch queue to the profile store: switch
// outcomes are applied optimistically, then confirmed by a fetch from
// the profile source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vantage_api::{Connect, EngineClient, WsConnector};

use crate::channel::StreamHub;
use crate::config::{CoreConfig, ReconnectConfig};
use crate::error::CoreError;
use crate::lock;
use crate::model::{ProfilesConfig, SwitchResult};
use crate::poller::{PollOptions, PollRegistration, PollerRegistry};
use crate::store::{ProfileSource, ProfileStore, ProfilesFile};
use crate::switch_queue::{SwitchEvent, SwitchObserver, SwitchQueue, SwitchTask};

/// Poller key used for background profile refreshes.
pub const PROFILES_POLL_KEY: &str = "profiles";

/// Entry point for consumers.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`. Construct one per
/// process and hand clones to every consumer.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    streams: StreamHub,
    pollers: PollerRegistry,
    switches: SwitchQueue,
    profiles: ProfileStore,
    source: Arc<dyn ProfileSource>,
    /// Bumped per hydration; only the newest result is committed.
    hydration: AtomicU64,
    cancel: CancellationToken,
    bridge: Mutex<Option<SwitchObserver>>,
}

impl Coordinator {
    pub fn new(
        connect: Arc<dyn Connect>,
        source: Arc<dyn ProfileSource>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let switches = SwitchQueue::new();
        let inner = Arc::new_cyclic(|weak: &Weak<CoordinatorInner>| {
            let bridge_target = weak.clone();
            let bridge = switches.subscribe(move |event| {
                if let Some(inner) = bridge_target.upgrade() {
                    inner.on_switch_event(event);
                }
            });
            CoordinatorInner {
                streams: StreamHub::new(connect, reconnect),
                pollers: PollerRegistry::new(),
                switches: switches.clone(),
                profiles: ProfileStore::new(),
                source,
                hydration: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                bridge: Mutex::new(Some(bridge)),
            }
        });
        Self { inner }
    }

    /// Wire the engine's WebSocket streams and the on-disk profile index.
    pub fn from_config(config: &CoreConfig) -> Self {
        let connect = Arc::new(WsConnector::new(
            config.engine_url.clone(),
            config.secret.clone(),
        ));
        let source = Arc::new(ProfilesFile::new(config.profiles_path.clone()));
        Self::new(connect, source, config.reconnect)
    }

    pub fn streams(&self) -> &StreamHub {
        &self.inner.streams
    }

    pub fn pollers(&self) -> &PollerRegistry {
        &self.inner.pollers
    }

    pub fn switches(&self) -> &SwitchQueue {
        &self.inner.switches
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.inner.profiles
    }

    /// Enqueue a profile switch. Its outcome reaches the profile store
    /// through the bridge.
    pub fn switch_profile(&self, task: SwitchTask) {
        self.inner.switches.enqueue(task);
    }

    /// A switch is running or its confirmation fetch is outstanding.
    pub fn is_switching(&self) -> bool {
        self.inner.switches.is_running() || self.inner.profiles.is_hydrating()
    }

    /// Fetch canonical profiles now and commit them.
    pub async fn refresh_profiles(&self) -> Result<ProfilesConfig, CoreError> {
        let generation = self.inner.next_hydration();
        let fetched = tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => {
                return Err(CoreError::Internal("coordinator shut down".into()));
            }
            result = self.inner.source.fetch() => result,
        };
        match fetched {
            Ok(data) => {
                self.inner.commit(generation, data.clone());
                Ok(data)
            }
            Err(e) => {
                warn!(error = %e, "profile refresh failed");
                Err(CoreError::Hydration { message: e.message() })
            }
        }
    }

    /// Refresh profiles in the background every `interval`, sharing one
    /// timer with any other caller polling profiles.
    pub fn poll_profiles(&self, interval: Duration) -> PollRegistration {
        let target = Arc::downgrade(&self.inner);
        self.inner.pollers.register(
            PROFILES_POLL_KEY,
            interval,
            PollOptions::default(),
            move || {
                if let Some(inner) = target.upgrade() {
                    inner.spawn_hydration();
                }
            },
        )
    }

    /// Stop hydration, detach the bridge, close every stream and timer.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        drop(lock(&self.inner.bridge).take());
        self.inner.streams.shutdown();
        self.inner.pollers.shutdown();
        info!("coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// A switch task that reloads the engine with profile `uid` and then
    /// persists it as current in the profile index.
    pub fn engine_switch_task(
        engine: EngineClient,
        file: ProfilesFile,
        uid: impl Into<String>,
        notify_on_success: bool,
    ) -> SwitchTask {
        let uid = uid.into();
        SwitchTask::new(uid.clone(), notify_on_success, move || async move {
            let profiles = file.load().await?;
            let item = profiles
                .item(&uid)
                .ok_or_else(|| CoreError::ProfileNotFound { uid: uid.clone() })?;
            let path = file.item_path(item)?;
            debug!(profile = %uid, path = %path.display(), "reloading engine config");
            engine
                .reload_config(&path.to_string_lossy(), true)
                .await
                .map_err(CoreError::from)?;
            file.set_current(&uid).await?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("streams", &self.inner.streams)
            .field("switches", &self.inner.switches)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl CoordinatorInner {
    fn on_switch_event(self: &Arc<Self>, event: &SwitchEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        match event {
            SwitchEvent::Success(task) => {
                self.profiles.apply_switch_result(SwitchResult::success(
                    task.profile_id.clone(),
                    task.notify_on_success,
                ));
                self.spawn_hydration();
            }
            SwitchEvent::Error { task, message } => {
                self.profiles.apply_switch_result(SwitchResult::failure(
                    task.profile_id.clone(),
                    task.notify_on_success,
                    message.clone(),
                ));
            }
            SwitchEvent::Start(_) | SwitchEvent::Queued(_) | SwitchEvent::Idle => {}
        }
    }

    fn next_hydration(&self) -> u64 {
        self.hydration.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn spawn_hydration(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let generation = self.next_hydration();
        let fetch = self.source.fetch();
        let cancel = self.cancel.child_token();
        let target = Arc::downgrade(self);

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = fetch => result,
            };
            let Some(inner) = target.upgrade() else {
                return;
            };
            match result {
                Ok(data) => inner.commit(generation, data),
                Err(e) => warn!(error = %e, generation, "hydration failed, keeping optimistic state"),
            }
        });
    }

    fn commit(&self, generation: u64, data: ProfilesConfig) {
        if self.hydration.load(Ordering::Acquire) != generation {
            debug!(generation, "discarding stale hydration");
            return;
        }
        self.profiles.commit_hydrated(data);
        debug!(generation, "profiles hydrated");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    use super::*;
    use crate::model::ProfileItem;
    use crate::testing::ScriptedConnector;

    fn profiles(current: &str) -> ProfilesConfig {
        let items = ["p1", "p2"]
            .into_iter()
            .map(|uid| serde_yaml::from_str::<ProfileItem>(&format!("uid: {uid}")).unwrap())
            .collect();
        ProfilesConfig {
            current: Some(current.into()),
            items,
            ..ProfilesConfig::default()
        }
    }

    /// Source returning a shared, mutable value after an optional gate.
    fn source(
        backing: Arc<Mutex<ProfilesConfig>>,
        gate: Option<Arc<Notify>>,
    ) -> Arc<dyn ProfileSource> {
        Arc::new(move || {
            let backing = Arc::clone(&backing);
            let gate = gate.clone();
            async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(lock(&backing).clone())
            }
        })
    }

    fn coordinator(source: Arc<dyn ProfileSource>) -> Coordinator {
        Coordinator::new(
            ScriptedConnector::new([]),
            source,
            ReconnectConfig::default(),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_optimistic_then_hydrated() {
        let backing = Arc::new(Mutex::new(profiles("p1")));
        let gate = Arc::new(Notify::new());
        let coord = coordinator(source(Arc::clone(&backing), Some(Arc::clone(&gate))));

        gate.notify_one();
        coord.refresh_profiles().await.unwrap();
        assert_eq!(coord.profiles().effective_current().as_deref(), Some("p1"));

        *lock(&backing) = profiles("p2");
        coord.switch_profile(SwitchTask::new("p2", true, || async { Ok(()) }));
        settle().await;

        assert_eq!(coord.profiles().effective_current().as_deref(), Some("p2"));
        assert!(coord.is_switching());

        gate.notify_one();
        settle().await;
        let snap = coord.profiles().snapshot();
        assert!(!snap.hydrating);
        assert_eq!(snap.optimistic_current, None);
        assert_eq!(snap.confirmed, Some(profiles("p2")));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_switch_records_result_only() {
        let backing = Arc::new(Mutex::new(profiles("p1")));
        let coord = coordinator(source(backing, None));
        coord.refresh_profiles().await.unwrap();

        coord.switch_profile(SwitchTask::new("p2", false, || async {
            Err(CoreError::Rejected {
                message: "bad yaml".into(),
            })
        }));
        settle().await;

        let snap = coord.profiles().snapshot();
        assert_eq!(snap.optimistic_current, None);
        assert!(!snap.hydrating);
        let result = snap.last_result.unwrap();
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("bad yaml"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_hydration_keeps_optimistic_state() {
        let failing: Arc<dyn ProfileSource> = Arc::new(|| async {
            Err::<ProfilesConfig, _>(CoreError::Internal("disk gone".into()))
        });
        let coord = coordinator(failing);

        coord.switch_profile(SwitchTask::new("p2", true, || async { Ok(()) }));
        settle().await;

        let snap = coord.profiles().snapshot();
        assert!(snap.hydrating);
        assert_eq!(snap.optimistic_current.as_deref(), Some("p2"));
        assert!(coord.refresh_profiles().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_hydration_is_discarded() {
        let backing = Arc::new(Mutex::new(profiles("p1")));
        let gate = Arc::new(Notify::new());
        let coord = coordinator(source(Arc::clone(&backing), Some(Arc::clone(&gate))));

        coord.switch_profile(SwitchTask::new("p1", false, || async { Ok(()) }));
        settle().await;
        // A second switch starts a newer hydration before the first resolves.
        coord.switch_profile(SwitchTask::new("p2", false, || async { Ok(()) }));
        settle().await;
        *lock(&backing) = profiles("p2");

        gate.notify_waiters();
        settle().await;
        assert_eq!(
            coord.profiles().snapshot().confirmed.unwrap().current.as_deref(),
            Some("p2")
        );
        assert!(!coord.profiles().is_hydrating());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_profiles_refreshes_in_background() {
        let backing = Arc::new(Mutex::new(profiles("p1")));
        let coord = coordinator(source(Arc::clone(&backing), None));
        let registration = coord.poll_profiles(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(coord.profiles().effective_current().as_deref(), Some("p1"));

        *lock(&backing) = profiles("p2");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(coord.profiles().effective_current().as_deref(), Some("p2"));

        drop(registration);
        assert!(coord.pollers().active_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_detaches_bridge() {
        let backing = Arc::new(Mutex::new(profiles("p1")));
        let coord = coordinator(source(backing, None));
        let _sub = coord.streams().subscribe("traffic", |_| {}, |_| {});

        coord.shutdown();
        assert!(coord.is_shut_down());
        assert!(coord.streams().active_keys().is_empty());

        coord.switch_profile(SwitchTask::new("p2", true, || async { Ok(()) }));
        settle().await;
        assert_eq!(coord.profiles().last_result(), None);
    }
}
