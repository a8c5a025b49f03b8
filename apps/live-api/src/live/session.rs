//! Per-client session: scene connections, expected-scene queues and data
//! listener subscriptions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use utoipa::ToSchema;

use scenecast_common::random_token;

use crate::error::LiveError;

use super::client::ClientInfo;
use super::connection::{Connection, DataUpdate, DATA_UPDATE_TOPIC};
use super::index::DataListenerIndex;
use super::menu::MenuItem;
use super::postponed::{PendingRequest, PostponedCache};
use super::registry::SessionRegistry;

type ConnectedCallback = Box<dyn FnOnce() + Send + 'static>;
type RemovedCallback = Box<dyn FnOnce(bool) + Send + 'static>;

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Data ids a client wants live updates for: either a list of ids or a map
/// keyed by id (as produced by a server-side render).
#[derive(Debug, Clone, PartialEq)]
pub enum Bindings {
    Ids(Vec<String>),
    Keyed(serde_json::Map<String, Value>),
}

impl Bindings {
    pub fn into_ids(self) -> Vec<String> {
        match self {
            Bindings::Ids(ids) => ids,
            Bindings::Keyed(map) => map.into_iter().map(|(id, _)| id).collect(),
        }
    }
}

impl From<Vec<String>> for Bindings {
    fn from(ids: Vec<String>) -> Self {
        Bindings::Ids(ids)
    }
}

impl From<&[&str]> for Bindings {
    fn from(ids: &[&str]) -> Self {
        Bindings::Ids(ids.iter().map(|id| id.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Bindings {
    fn from(ids: [&str; N]) -> Self {
        Bindings::from(&ids[..])
    }
}

impl From<Value> for Bindings {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Bindings::Ids(items.iter().filter_map(scalar_id).collect()),
            Value::Object(map) => Bindings::Keyed(map),
            // Scalars and null have no keys to bind.
            _ => Bindings::Ids(Vec::new()),
        }
    }
}

/// String form of a JSON id value (`"abc"`, `42`, `{"$oid": "..."}`).
pub(crate) fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => match map.get("$oid") {
            Some(Value::String(oid)) => Some(oid.clone()),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// A connected scene as seen by its session.
struct SceneSlot {
    connection: Arc<dyn Connection>,
    /// Distinguishes a reconnect under the same scene id from the original.
    serial: u64,
    connected_at: Instant,
    last_update: Option<Instant>,
}

impl SceneSlot {
    fn push(&mut self, update: &DataUpdate) {
        self.last_update = Some(Instant::now());
        self.connection.send(DATA_UPDATE_TOPIC, update);
    }
}

#[derive(Default)]
struct DataListener {
    listening_scenes: HashSet<String>,
    last_data: Option<Value>,
    last_update: Option<Instant>,
    last_preregister: Option<Instant>,
}

struct SessionState {
    last_activity_date: DateTime<Utc>,
    last_scene_connection: Option<DateTime<Utc>>,
    connection_count: usize,
    request_count: u64,
    action_count: u64,
    next_serial: u64,
    expected: HashMap<String, VecDeque<DataUpdate>>,
    connections: HashMap<String, SceneSlot>,
    data_listener_ids: HashMap<String, DataListener>,
    on_connected: Vec<ConnectedCallback>,
    on_removed: Vec<RemovedCallback>,
    menu_item: Option<Box<dyn MenuItem>>,
    removed: bool,
}

/// Shared services a session reports back to.
pub(crate) struct SessionLinks {
    pub index: Arc<DataListenerIndex>,
    pub registry: Weak<SessionRegistry>,
    pub session_count: Arc<AtomicUsize>,
    pub postponed_max_age: Duration,
}

/// Monitoring snapshot of a session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionStats {
    pub id: String,
    pub created: DateTime<Utc>,
    pub last_activity_date: DateTime<Utc>,
    pub last_scene_connection: Option<DateTime<Utc>>,
    pub connection_count: usize,
    pub request_count: u64,
    pub action_count: u64,
    pub idle_time_ms: u64,
    pub scenes: Vec<String>,
    pub expected_scenes: Vec<String>,
    pub data_ids: Vec<String>,
    pub postponed: usize,
}

/// One client's logical identity across any number of scenes.
pub struct Session {
    id: String,
    created: DateTime<Utc>,
    client: ClientInfo,
    state: Mutex<SessionState>,
    postponed: PostponedCache<PendingRequest>,
    index: Arc<DataListenerIndex>,
    registry: Weak<SessionRegistry>,
    session_count: Arc<AtomicUsize>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        client: ClientInfo,
        links: SessionLinks,
        menu_item: Option<Box<dyn MenuItem>>,
    ) -> Self {
        links.session_count.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();

        Self {
            id,
            created: now,
            client,
            state: Mutex::new(SessionState {
                last_activity_date: now,
                last_scene_connection: None,
                connection_count: 0,
                request_count: 0,
                action_count: 0,
                next_serial: 0,
                expected: HashMap::new(),
                connections: HashMap::new(),
                data_listener_ids: HashMap::new(),
                on_connected: Vec::new(),
                on_removed: Vec::new(),
                menu_item,
                removed: false,
            }),
            postponed: PostponedCache::new(links.postponed_max_age),
            index: links.index,
            registry: links.registry,
            session_count: links.session_count,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn client(&self) -> &ClientInfo {
        &self.client
    }

    // -- postponed requests -------------------------------------------------

    /// Park a request until it can be resumed with the returned token.
    pub fn postpone(&self, request: PendingRequest) -> String {
        let token = random_token();
        self.postponed.set(token.clone(), request);
        token
    }

    /// Take back a postponed request. Fails once it expired or was resumed.
    pub fn resume(&self, token: &str) -> Result<PendingRequest, LiveError> {
        self.postponed.take(token)
    }

    pub fn evict_postponed(&self) -> usize {
        self.postponed.evict_expired()
    }

    // -- scenes -------------------------------------------------------------

    /// Announce that `scene_id` will connect later. Updates addressed to it
    /// are queued until then. Calling again discards anything queued.
    pub fn expect_scene(&self, scene_id: &str) {
        self.state
            .lock()
            .expected
            .insert(scene_id.to_string(), VecDeque::new());
    }

    /// Attach a live scene connection.
    ///
    /// Flushes `when_connected` callbacks if this is the only active
    /// connection, then replays whatever was queued for the scene. The
    /// returned handle detaches the scene again when disconnected or dropped.
    pub fn register_connection(self: &Arc<Self>, connection: Arc<dyn Connection>) -> SceneHandle {
        let scene_id = connection.scene_id().to_string();
        let client = connection.client().label();

        let (serial, replayed, callbacks) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if state.removed {
                tracing::debug!(
                    session_id = %self.id,
                    scene_id = %scene_id,
                    "scene attached to a removed session, releasing it"
                );
                // Serial 0 never matches a slot, so the handle is inert.
                return SceneHandle {
                    session: Arc::downgrade(self),
                    scene_id,
                    serial: 0,
                    released: AtomicBool::new(true),
                };
            }

            state.next_serial += 1;
            let serial = state.next_serial;
            state.connection_count += 1;
            state.last_scene_connection = Some(Utc::now());

            let callbacks = if state.connection_count == 1 {
                std::mem::take(&mut state.on_connected)
            } else {
                Vec::new()
            };

            let mut slot = SceneSlot {
                connection,
                serial,
                connected_at: Instant::now(),
                last_update: None,
            };

            let mut replayed = 0;
            if let Some(queue) = state.expected.get_mut(&scene_id) {
                if !queue.is_empty() {
                    replayed = queue.len();
                    for update in queue.drain(..) {
                        slot.connection.send(DATA_UPDATE_TOPIC, &update);
                    }
                    slot.last_update = Some(Instant::now());
                }
            }

            if state.connections.insert(scene_id.clone(), slot).is_some() {
                tracing::warn!(
                    session_id = %self.id,
                    scene_id = %scene_id,
                    "scene reconnected before its previous connection ended"
                );
            }

            (serial, replayed, callbacks)
        };

        tracing::info!(
            session_id = %self.id,
            scene_id = %scene_id,
            client = %client,
            replayed,
            "scene connected"
        );

        for callback in callbacks {
            callback();
        }

        SceneHandle {
            session: Arc::downgrade(self),
            scene_id,
            serial,
            released: AtomicBool::new(false),
        }
    }

    fn disconnect(&self, scene_id: &str, serial: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.connection_count = state.connection_count.saturating_sub(1);

        // A newer connection for the same scene keeps its bindings.
        let current = state
            .connections
            .get(scene_id)
            .is_some_and(|slot| slot.serial == serial);
        if current {
            state.connections.remove(scene_id);
            for listener in state.data_listener_ids.values_mut() {
                listener.listening_scenes.remove(scene_id);
            }
        }

        tracing::info!(
            session_id = %self.id,
            scene_id = %scene_id,
            connections = state.connection_count,
            "scene disconnected"
        );
    }

    /// Run `callback` once the session has a connected scene.
    ///
    /// When a scene is already connected the callback is spawned on the
    /// current runtime rather than run inline, so it never executes before
    /// this call returns. Outside a runtime it runs inline instead.
    pub fn when_connected<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.connection_count > 0 {
            drop(state);
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { callback() });
                }
                Err(_) => {
                    tracing::debug!(session_id = %self.id, "no runtime, running callback inline");
                    callback();
                }
            }
        } else if !state.removed {
            state.on_connected.push(Box::new(callback));
        }
    }

    /// Wait until a scene is connected. Returns `false` if the session was
    /// removed first.
    pub async fn wait_connected(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.when_connected(move || {
            let _ = tx.send(());
        });
        rx.await.is_ok()
    }

    // -- data bindings ------------------------------------------------------

    /// Subscribe to updates for the given data ids.
    ///
    /// Without a scene this pre-registers the ids (e.g. during a server-side
    /// render). With a connected scene the scene starts listening and, if
    /// the session holds data newer than what the scene has seen, receives
    /// it immediately. Bindings for a scene that is not connected are not
    /// recorded; the scene has to bind again once attached.
    pub fn register_bindings(&self, bindings: impl Into<Bindings>, scene_id: Option<&str>) {
        let ids = bindings.into().into_ids();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.removed {
            tracing::warn!(session_id = %self.id, "bindings registered on a removed session");
            return;
        }

        for data_id in ids {
            let listener = state.data_listener_ids.entry(data_id.clone()).or_default();

            match scene_id {
                None => listener.last_preregister = Some(Instant::now()),
                Some(scene_id) => match state.connections.get_mut(scene_id) {
                    None => {
                        listener.last_preregister = Some(Instant::now());
                        tracing::debug!(
                            session_id = %self.id,
                            scene_id = %scene_id,
                            data_id = %data_id,
                            "binding for unconnected scene not recorded"
                        );
                    }
                    Some(slot) => {
                        listener.listening_scenes.insert(scene_id.to_string());

                        let seen = slot
                            .last_update
                            .or(listener.last_preregister)
                            .unwrap_or(slot.connected_at);
                        if let (Some(data), Some(updated)) =
                            (&listener.last_data, listener.last_update)
                        {
                            if updated > seen {
                                slot.push(&DataUpdate::new(data_id.clone(), data.clone()));
                            }
                        }
                    }
                },
            }

            self.index.subscribe(&data_id, &self.id);
        }
    }

    /// Push new data for `id` to this session's scenes.
    ///
    /// With a scene id only that scene is addressed; if it has not connected
    /// yet but is expected, the update is queued for it. Without one every
    /// scene listening to `id` gets the update.
    pub fn send_data_update(&self, id: &str, data: Value, scene_id: Option<&str>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(listener) = state.data_listener_ids.get_mut(id) else {
            return;
        };

        listener.last_data = Some(data.clone());
        listener.last_update = Some(Instant::now());
        let update = DataUpdate::new(id, data);

        match scene_id {
            Some(scene_id) => {
                if let Some(slot) = state.connections.get_mut(scene_id) {
                    slot.push(&update);
                } else if let Some(queue) = state.expected.get_mut(scene_id) {
                    queue.push_back(update);
                } else {
                    tracing::trace!(
                        session_id = %self.id,
                        scene_id = %scene_id,
                        data_id = %id,
                        "dropping update for unknown scene"
                    );
                }
            }
            None => {
                for scene_id in &listener.listening_scenes {
                    if let Some(slot) = state.connections.get_mut(scene_id) {
                        slot.push(&update);
                    }
                }
            }
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Register a callback for when the session leaves the registry. The
    /// flag tells whether it expired.
    pub fn on_removed<F>(&self, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let mut state = self.state.lock();
        if !state.removed {
            state.on_removed.push(Box::new(callback));
        }
    }

    /// Teardown hook run by the registry when this session is removed.
    ///
    /// Attached scenes are released, which ends their transports, and
    /// expected scenes are forgotten.
    pub fn removed(&self, expired: bool) {
        let (callbacks, detached) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.removed {
                return;
            }
            state.removed = true;

            for data_id in state.data_listener_ids.keys() {
                self.index.unsubscribe(data_id, &self.id);
            }
            state.data_listener_ids.clear();
            state.on_connected.clear();
            state.expected.clear();

            if let Some(item) = state.menu_item.take() {
                item.remove();
            }

            (
                std::mem::take(&mut state.on_removed),
                std::mem::take(&mut state.connections),
            )
        };

        if !detached.is_empty() {
            tracing::debug!(
                session_id = %self.id,
                scenes = detached.len(),
                "releasing attached scenes"
            );
        }
        drop(detached);

        let _ = self
            .session_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        tracing::info!(session_id = %self.id, expired, "session removed");

        for callback in callbacks {
            callback(expired);
        }
    }

    /// Remove this session from its registry.
    pub fn destroy(&self) {
        match self.registry.upgrade() {
            Some(registry) => {
                registry.remove(&self.id, false);
            }
            None => self.removed(false),
        }
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    // -- counters -----------------------------------------------------------

    pub fn connection_count(&self) -> usize {
        self.state.lock().connection_count
    }

    pub fn request_count(&self) -> u64 {
        self.state.lock().request_count
    }

    /// Overwrite the request count. Any non-zero value counts as activity.
    pub fn set_request_count(&self, amount: u64) {
        let mut state = self.state.lock();
        state.request_count = amount;
        if amount > 0 {
            state.last_activity_date = Utc::now();
        }
    }

    pub fn record_request(&self) -> u64 {
        let mut state = self.state.lock();
        state.request_count += 1;
        state.last_activity_date = Utc::now();
        state.request_count
    }

    pub fn action_count(&self) -> u64 {
        self.state.lock().action_count
    }

    pub fn set_action_count(&self, amount: u64) {
        self.state.lock().action_count = amount;
    }

    pub fn record_action(&self) -> u64 {
        let mut state = self.state.lock();
        state.action_count += 1;
        state.action_count
    }

    pub fn last_activity_date(&self) -> DateTime<Utc> {
        self.state.lock().last_activity_date
    }

    pub fn last_scene_connection(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_scene_connection
    }

    pub fn idle_time(&self) -> Duration {
        (Utc::now() - self.last_activity_date())
            .to_std()
            .unwrap_or_default()
    }

    // -- inspection ---------------------------------------------------------

    pub fn is_connected(&self, scene_id: &str) -> bool {
        self.state.lock().connections.contains_key(scene_id)
    }

    /// Data ids this session holds a listener entry for.
    pub fn data_ids(&self) -> Vec<String> {
        self.state.lock().data_listener_ids.keys().cloned().collect()
    }

    pub fn listening_scenes(&self, data_id: &str) -> Vec<String> {
        self.state
            .lock()
            .data_listener_ids
            .get(data_id)
            .map(|listener| listener.listening_scenes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of updates queued for an expected scene.
    pub fn queued_updates(&self, scene_id: &str) -> usize {
        self.state
            .lock()
            .expected
            .get(scene_id)
            .map_or(0, VecDeque::len)
    }

    pub fn stats(&self) -> SessionStats {
        let state = self.state.lock();
        let idle = (Utc::now() - state.last_activity_date)
            .to_std()
            .unwrap_or_default();

        let mut scenes: Vec<String> = state.connections.keys().cloned().collect();
        scenes.sort();
        let mut expected_scenes: Vec<String> = state.expected.keys().cloned().collect();
        expected_scenes.sort();
        let mut data_ids: Vec<String> = state.data_listener_ids.keys().cloned().collect();
        data_ids.sort();

        SessionStats {
            id: self.id.clone(),
            created: self.created,
            last_activity_date: state.last_activity_date,
            last_scene_connection: state.last_scene_connection,
            connection_count: state.connection_count,
            request_count: state.request_count,
            action_count: state.action_count,
            idle_time_ms: idle.as_millis() as u64,
            scenes,
            expected_scenes,
            data_ids,
            postponed: self.postponed.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_activity(&self, by: Duration) {
        let mut state = self.state.lock();
        state.last_activity_date = state.last_activity_date - chrono::Duration::from_std(by).unwrap();
    }
}

/// Disconnect hook for a registered scene connection.
///
/// Calling [`SceneHandle::disconnect`] (or dropping the handle) detaches the
/// scene from its session exactly once.
#[must_use = "dropping the handle disconnects the scene"]
pub struct SceneHandle {
    session: Weak<Session>,
    scene_id: String,
    serial: u64,
    released: AtomicBool,
}

impl SceneHandle {
    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    pub fn disconnect(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(session) = self.session.upgrade() {
            session.disconnect(&self.scene_id, self.serial);
        }
    }
}

impl Drop for SceneHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}
