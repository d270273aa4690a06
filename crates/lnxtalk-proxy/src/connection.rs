//! Connection proxy
//!
//! Mirrors a remote connection object: a status machine (connecting,
//! connected, disconnected), a set of optional interfaces discovered at
//! runtime, and shared numeric handles for contacts. Feature introspection
//! is driven by a [`ReadinessEngine`]; raw status notifications go through a
//! [`StatusController`] so the published (status, reason) pair only changes
//! once every feature applicable to the new status has settled.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use lnxtalk_core::{
    ConfigError, Feature, Features, ObjectStatus, PropertyMap, ProxyConfig, ProxyEvent, RpcError,
    RpcTransport, StatusReason, TaskQueue, Value,
};
use lnxtalk_handles::{
    ContextKey, Handle, HandleContext, HandleRef, HandleRegistry, HandleReleaser, HandleType,
};
use lnxtalk_readiness::{
    FeatureGraph, IntrospectFn, IntrospectToken, Introspectable, PendingReady, ReadinessEngine,
    StatusAction, StatusController,
};

/// The main connection interface
pub const CONNECTION_IFACE: &str = "org.lnxtalk.Connection";
/// Optional presence interface
pub const SIMPLE_PRESENCE_IFACE: &str = "org.lnxtalk.Connection.Interface.SimplePresence";
/// Optional contacts interface
pub const CONTACTS_IFACE: &str = "org.lnxtalk.Connection.Interface.Contacts";

/// Connection features
pub mod features {
    use lnxtalk_core::{Feature, ProxyKind};

    /// Basic introspection: status, interfaces, self handle
    pub const CORE: Feature = Feature::core(ProxyKind::Connection, 0, "Core");
    /// Readiness gate that completes once the connection is established
    pub const CONNECTED: Feature = Feature::new(ProxyKind::Connection, 1, "Connected");
    /// The local user's own contact attributes
    pub const SELF_CONTACT: Feature = Feature::new(ProxyKind::Connection, 2, "SelfContact");
    /// Available presence statuses
    pub const SIMPLE_PRESENCE: Feature = Feature::new(ProxyKind::Connection, 3, "SimplePresence");
    /// The contact list
    pub const ROSTER: Feature = Feature::new(ProxyKind::Connection, 4, "Roster");
}

/// Events published by a connection proxy
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The published (status, reason) pair changed; only emitted once the
    /// new status has fully settled
    StatusChanged {
        status: ObjectStatus,
        reason: StatusReason,
    },
    /// The proxy is permanently dead
    Invalidated { name: String, message: String },
}

// ============================================================================
// Handle release adapter
// ============================================================================

fn handle_type_code(handle_type: HandleType) -> u64 {
    match handle_type {
        HandleType::Contact => 1,
        HandleType::Room => 2,
        HandleType::List => 3,
        HandleType::Group => 4,
    }
}

/// Fire-and-forget boundary between the handle context and the wire
struct TransportHandleReleaser {
    transport: Arc<dyn RpcTransport>,
}

impl HandleReleaser for TransportHandleReleaser {
    fn release_handles(&self, handle_type: HandleType, handles: Vec<Handle>) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let args = vec![
                Value::from(handle_type_code(handle_type)),
                Value::from(handles),
            ];
            if let Err(err) = transport
                .invoke(CONNECTION_IFACE, "ReleaseHandles", args)
                .await
            {
                warn!(%handle_type, error = %err, "Batched handle release failed");
            }
        });
    }
}

// ============================================================================
// Connection
// ============================================================================

#[derive(Default)]
struct ConnState {
    self_handle: Option<Handle>,
    has_immortal_handles: bool,
    self_contact_attributes: Option<PropertyMap>,
    self_contact_ref: Option<HandleRef>,
    presence_statuses: Option<Value>,
    roster_handles: Vec<Handle>,
    roster_refs: Vec<HandleRef>,
}

/// Proxy for a remote connection object
pub struct Connection {
    transport: Arc<dyn RpcTransport>,
    config: ProxyConfig,
    registry: Arc<HandleRegistry>,
    context_key: ContextKey,
    handle_context: Arc<HandleContext>,
    engine: Arc<ReadinessEngine>,
    controller: Mutex<StatusController>,
    state: Mutex<ConnState>,
    events: broadcast::Sender<ConnectionEvent>,
    /// Token parked by the Connected feature until the status arrives
    connected_token: Mutex<Option<IntrospectToken>>,
}

impl Connection {
    /// Creates a proxy for the remote connection the config names
    ///
    /// The proxy starts at the `Unknown` status; readiness requests begin
    /// introspecting immediately and pick up the real status from the first
    /// `GetAll` answer or `StatusChanged` notification, whichever is first.
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        registry: Arc<HandleRegistry>,
        config: ProxyConfig,
        queue: TaskQueue,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let context_key = ContextKey::new(&config.bus_name, &config.object_path);
        let releaser: Arc<dyn HandleReleaser> = Arc::new(TransportHandleReleaser {
            transport: transport.clone(),
        });
        let handle_context = registry.acquire(context_key.clone(), releaser, queue.clone());
        let (events, _) = broadcast::channel(32);

        let connection = Arc::new_cyclic(|weak: &Weak<Self>| {
            let graph = Self::feature_graph(weak.clone());
            let engine = ReadinessEngine::new(graph, ObjectStatus::Unknown, queue);
            Self {
                transport,
                config,
                registry,
                context_key,
                handle_context,
                engine,
                controller: Mutex::new(StatusController::new()),
                state: Mutex::new(ConnState::default()),
                events,
                connected_token: Mutex::new(None),
            }
        });

        let weak = Arc::downgrade(&connection);
        connection.engine.set_on_status_ready(move |status| {
            if let Some(connection) = weak.upgrade() {
                connection.status_ready(status);
            }
        });

        Ok(connection)
    }

    fn feature_graph(weak: Weak<Self>) -> FeatureGraph {
        let known = [
            ObjectStatus::Unknown,
            ObjectStatus::Connecting,
            ObjectStatus::Connected,
        ];
        let connected = [ObjectStatus::Connected];

        let spawn_main: IntrospectFn = {
            let weak = weak.clone();
            Arc::new(move |token| {
                if let Some(connection) = weak.upgrade() {
                    tokio::spawn(connection.introspect_main(token));
                }
            })
        };
        let watch_connected: IntrospectFn = {
            let weak = weak.clone();
            Arc::new(move |token| {
                if let Some(connection) = weak.upgrade() {
                    connection.introspect_connected(token);
                }
            })
        };
        let spawn_self_contact: IntrospectFn = {
            let weak = weak.clone();
            Arc::new(move |token| {
                if let Some(connection) = weak.upgrade() {
                    tokio::spawn(connection.introspect_self_contact(token));
                }
            })
        };
        let spawn_presence: IntrospectFn = {
            let weak = weak.clone();
            Arc::new(move |token| {
                if let Some(connection) = weak.upgrade() {
                    tokio::spawn(connection.introspect_simple_presence(token));
                }
            })
        };
        let spawn_roster: IntrospectFn = {
            let weak = weak;
            Arc::new(move |token| {
                if let Some(connection) = weak.upgrade() {
                    tokio::spawn(connection.introspect_roster(token));
                }
            })
        };

        FeatureGraph::builder()
            .add(features::CORE, Introspectable::new(known, [], [], spawn_main))
            .add(
                features::CONNECTED,
                Introspectable::new(known, [], [], watch_connected),
            )
            .add(
                features::SELF_CONTACT,
                Introspectable::new(connected, [features::CORE], [], spawn_self_contact),
            )
            .add(
                features::SIMPLE_PRESENCE,
                Introspectable::new(
                    connected,
                    [features::CORE],
                    [SIMPLE_PRESENCE_IFACE.to_string()],
                    spawn_presence,
                ),
            )
            .add(
                features::ROSTER,
                Introspectable::new(
                    connected,
                    [features::CORE],
                    [CONTACTS_IFACE.to_string()],
                    spawn_roster,
                ),
            )
            .build()
            .expect("static connection feature graph must be valid")
    }

    // ========================================================================
    // Readiness
    // ========================================================================

    /// Requests the given features (plus Core) to become ready
    pub fn become_ready(&self, features: Features) -> PendingReady {
        self.engine.become_ready(features)
    }

    /// True once every given feature is satisfied
    pub fn is_ready(&self, features: &Features) -> bool {
        self.engine.is_ready(features)
    }

    pub fn actual_features(&self) -> Features {
        self.engine.actual_features()
    }

    pub fn requested_features(&self) -> Features {
        self.engine.requested_features()
    }

    pub fn missing_features(&self) -> Features {
        self.engine.missing_features()
    }

    // ========================================================================
    // Introspection procedures
    // ========================================================================

    async fn introspect_main(self: Arc<Self>, token: IntrospectToken) {
        const MAIN_PROPERTIES: [&str; 4] =
            ["Status", "Interfaces", "SelfHandle", "HasImmortalHandles"];

        let mut props = match self.transport.get_all(CONNECTION_IFACE).await {
            Ok(props) => props,
            Err(err) => {
                token.complete(Err(err));
                return;
            }
        };

        // Per-property fallback for anything the bulk call did not answer
        for name in MAIN_PROPERTIES {
            if props.contains_key(name) {
                continue;
            }
            match self.transport.get(CONNECTION_IFACE, name).await {
                Ok(value) => {
                    props.insert(name.to_string(), value);
                }
                Err(err) => {
                    debug!(property = name, error = %err, "Property fallback fetch failed");
                }
            }
        }

        self.apply_main_properties(&props);
        token.complete(Ok(()));
    }

    /// Completes once the connection reaches the Connected status
    ///
    /// The token is parked rather than tied to a remote call; it is
    /// force-completed when the status arrives, and also on any other status
    /// transition so the engine can re-evaluate for the new status.
    fn introspect_connected(&self, token: IntrospectToken) {
        let pending = self
            .controller
            .lock()
            .expect("connection controller lock poisoned")
            .pending_status();
        if pending == ObjectStatus::Connected {
            token.complete_forced();
        } else {
            *self
                .connected_token
                .lock()
                .expect("connection token lock poisoned") = Some(token);
        }
    }

    async fn introspect_self_contact(self: Arc<Self>, token: IntrospectToken) {
        let self_handle = self
            .state
            .lock()
            .expect("connection state lock poisoned")
            .self_handle;
        let Some(self_handle) = self_handle else {
            token.complete(Err(RpcError::not_available(
                "Self handle was not learned during core introspection",
            )));
            return;
        };

        self.handle_request_started(HandleType::Contact);
        let result = self
            .transport
            .invoke(
                CONTACTS_IFACE,
                "GetContactAttributes",
                vec![Value::from(self_handle)],
            )
            .await;

        match result {
            Ok(value) => {
                let attributes: PropertyMap = value
                    .as_object()
                    .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                let handle_ref = self.make_handle_ref(HandleType::Contact, self_handle);
                {
                    let mut state = self.state.lock().expect("connection state lock poisoned");
                    state.self_contact_attributes = Some(attributes);
                    state.self_contact_ref = handle_ref;
                }
                self.handle_request_landed(HandleType::Contact);
                token.complete(Ok(()));
            }
            Err(err) => {
                self.handle_request_landed(HandleType::Contact);
                token.complete(Err(err));
            }
        }
    }

    async fn introspect_simple_presence(self: Arc<Self>, token: IntrospectToken) {
        match self.transport.get(SIMPLE_PRESENCE_IFACE, "Statuses").await {
            Ok(value) => {
                self.state
                    .lock()
                    .expect("connection state lock poisoned")
                    .presence_statuses = Some(value);
                token.complete(Ok(()));
            }
            Err(err) => token.complete(Err(err)),
        }
    }

    async fn introspect_roster(self: Arc<Self>, token: IntrospectToken) {
        self.handle_request_started(HandleType::Contact);
        let result = self
            .transport
            .invoke(CONTACTS_IFACE, "GetContactList", Vec::new())
            .await;

        match result {
            Ok(value) => {
                let handles: Vec<Handle> = value
                    .as_array()
                    .map(|list| list.iter().filter_map(Value::as_u64).collect())
                    .unwrap_or_default();
                let refs: Vec<HandleRef> = handles
                    .iter()
                    .filter_map(|handle| self.make_handle_ref(HandleType::Contact, *handle))
                    .collect();
                {
                    let mut state = self.state.lock().expect("connection state lock poisoned");
                    state.roster_handles = handles;
                    state.roster_refs = refs;
                }
                self.handle_request_landed(HandleType::Contact);
                token.complete(Ok(()));
            }
            Err(err) => {
                self.handle_request_landed(HandleType::Contact);
                token.complete(Err(err));
            }
        }
    }

    fn apply_main_properties(&self, props: &PropertyMap) {
        if let Some(code) = props.get("Status").and_then(Value::as_u64) {
            let status = u32::try_from(code)
                .map(ObjectStatus::from_code)
                .unwrap_or(ObjectStatus::Unknown);
            if status.is_known() {
                let learned = self
                    .controller
                    .lock()
                    .expect("connection controller lock poisoned")
                    .force_status(status);
                if learned {
                    self.engine.force_current_status(status);
                    if status == ObjectStatus::Connected {
                        self.unpark_connected_token();
                    }
                }
            } else {
                warn!(code, "Remote reported an unrecognized status code");
            }
        }

        if let Some(list) = props.get("Interfaces").and_then(Value::as_array) {
            let interfaces: Vec<String> = list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            self.engine.set_interfaces(interfaces);
        }

        if let Some(handle) = props.get("SelfHandle").and_then(Value::as_u64) {
            self.state
                .lock()
                .expect("connection state lock poisoned")
                .self_handle = Some(handle);
        }

        if let Some(immortal) = props.get("HasImmortalHandles").and_then(Value::as_bool) {
            self.state
                .lock()
                .expect("connection state lock poisoned")
                .has_immortal_handles = immortal;
        }
    }

    fn unpark_connected_token(&self) {
        let token = self
            .connected_token
            .lock()
            .expect("connection token lock poisoned")
            .take();
        if let Some(token) = token {
            token.complete_forced();
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Feeds a push event from the transport into the proxy
    ///
    /// Events arriving after invalidation are dropped.
    pub fn handle_event(self: &Arc<Self>, event: ProxyEvent) {
        if !self.engine.is_valid() {
            debug!("Dropping event for an invalidated connection");
            return;
        }

        match event {
            ProxyEvent::StatusChanged { status, reason } => {
                let action = self
                    .controller
                    .lock()
                    .expect("connection controller lock poisoned")
                    .status_changed(status, reason);
                match action {
                    StatusAction::Ignore => {}
                    StatusAction::Introspect(new_status) => {
                        self.engine.set_current_status(new_status);
                        // Let a parked Connected-watch land so the engine can
                        // re-evaluate it for the new status
                        self.unpark_connected_token();
                    }
                    StatusAction::Invalidate {
                        status,
                        error_name,
                        message,
                    } => {
                        let published = self
                            .controller
                            .lock()
                            .expect("connection controller lock poisoned")
                            .on_status_ready(status);
                        if let Some((status, reason)) = published {
                            let _ = self.events.send(ConnectionEvent::StatusChanged {
                                status,
                                reason,
                            });
                        }
                        self.invalidate(error_name, &message);
                    }
                }
            }
            ProxyEvent::PropertiesChanged(delta) => self.apply_main_properties(&delta),
            ProxyEvent::Invalidated { name, message } => self.invalidate(&name, &message),
        }
    }

    fn status_ready(&self, status: ObjectStatus) {
        let published = self
            .controller
            .lock()
            .expect("connection controller lock poisoned")
            .on_status_ready(status);
        if let Some((status, reason)) = published {
            let _ = self
                .events
                .send(ConnectionEvent::StatusChanged { status, reason });
        }
    }

    /// Subscribes to proxy events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Permanently invalidates the proxy
    ///
    /// Pending and future readiness requests fail with the given reason and
    /// no further events are accepted. There is no recovery; callers build a
    /// new proxy to reconnect.
    pub fn invalidate(&self, name: &str, message: &str) {
        if !self.engine.is_valid() {
            return;
        }
        warn!(error = name, message, "Invalidating connection proxy");
        self.connected_token
            .lock()
            .expect("connection token lock poisoned")
            .take();
        self.engine.invalidate(name, message);
        let _ = self.events.send(ConnectionEvent::Invalidated {
            name: name.to_string(),
            message: message.to_string(),
        });
    }

    pub fn is_valid(&self) -> bool {
        self.engine.is_valid()
    }

    pub fn invalidation_reason(&self) -> Option<RpcError> {
        self.engine.invalidation_reason()
    }

    // ========================================================================
    // Handles
    // ========================================================================

    fn immortal(&self) -> bool {
        self.state
            .lock()
            .expect("connection state lock poisoned")
            .has_immortal_handles
    }

    /// References a handle in the shared context; no-op when the remote
    /// keeps handles valid forever
    pub fn ref_handle(&self, handle_type: HandleType, handle: Handle) {
        if self.immortal() {
            return;
        }
        self.handle_context.ref_handle(handle_type, handle);
    }

    /// Drops a handle reference; no-op when handles are immortal
    pub fn unref_handle(&self, handle_type: HandleType, handle: Handle) {
        if self.immortal() {
            return;
        }
        self.handle_context.unref_handle(handle_type, handle);
    }

    /// Marks a handle request in flight, holding back deferred releases
    pub fn handle_request_started(&self, handle_type: HandleType) {
        if self.immortal() {
            return;
        }
        self.handle_context.request_started(handle_type);
    }

    /// Marks a handle request landed
    pub fn handle_request_landed(&self, handle_type: HandleType) {
        if self.immortal() {
            return;
        }
        self.handle_context.request_landed(handle_type);
    }

    fn make_handle_ref(&self, handle_type: HandleType, handle: Handle) -> Option<HandleRef> {
        if self.immortal() {
            return None;
        }
        Some(HandleRef::new(
            self.handle_context.clone(),
            handle_type,
            handle,
        ))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The remote object identity this proxy mirrors
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The last fully settled status
    pub fn status(&self) -> ObjectStatus {
        self.controller
            .lock()
            .expect("connection controller lock poisoned")
            .status()
    }

    /// The reason accompanying the last settled status
    pub fn status_reason(&self) -> StatusReason {
        self.controller
            .lock()
            .expect("connection controller lock poisoned")
            .reason()
    }

    /// The local user's handle; requires Core
    pub fn self_handle(&self) -> Option<Handle> {
        if !self.check_ready(features::CORE, "self_handle") {
            return None;
        }
        self.state
            .lock()
            .expect("connection state lock poisoned")
            .self_handle
    }

    /// Whether the remote keeps handles valid forever; requires Core
    pub fn has_immortal_handles(&self) -> bool {
        if !self.check_ready(features::CORE, "has_immortal_handles") {
            return false;
        }
        self.immortal()
    }

    /// The local user's contact attributes; requires SelfContact
    pub fn self_contact_attributes(&self) -> Option<PropertyMap> {
        if !self.check_ready(features::SELF_CONTACT, "self_contact_attributes") {
            return None;
        }
        self.state
            .lock()
            .expect("connection state lock poisoned")
            .self_contact_attributes
            .clone()
    }

    /// Presence statuses the remote supports; requires SimplePresence
    pub fn presence_statuses(&self) -> Option<Value> {
        if !self.check_ready(features::SIMPLE_PRESENCE, "presence_statuses") {
            return None;
        }
        self.state
            .lock()
            .expect("connection state lock poisoned")
            .presence_statuses
            .clone()
    }

    /// Contact handles on the roster; requires Roster
    pub fn roster_handles(&self) -> Vec<Handle> {
        if !self.check_ready(features::ROSTER, "roster_handles") {
            return Vec::new();
        }
        self.state
            .lock()
            .expect("connection state lock poisoned")
            .roster_handles
            .clone()
    }

    fn check_ready(&self, feature: Feature, accessor: &str) -> bool {
        let ready = self.engine.is_ready(&Features::from([feature]));
        if !ready {
            warn!(%feature, accessor, "Accessor called before its feature became ready");
        }
        ready
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Handle refs must unref before the registry tears the context down
        {
            let mut state = self.state.lock().expect("connection state lock poisoned");
            state.self_contact_ref = None;
            state.roster_refs.clear();
        }
        self.registry.release(&self.context_key);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("bus_name", &self.config.bus_name)
            .field("object_path", &self.config.object_path)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
