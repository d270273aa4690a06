//! Account proxy
//!
//! Mirrors a remote account object: static configuration (protocol, display
//! name, icon), an optional avatar, and protocol metadata. Accounts have no
//! connection lifecycle, so the readiness engine runs entirely at the
//! `Unknown` sentinel status and never re-introspects.
//!
//! Property updates go through a deterministic pipeline: raw properties are
//! applied first (sorted by key), then a fixed list of derived-field
//! recompute steps runs, then change events go out in that same order.
//! Derived fields never feed back into raw properties, so a cascade cannot
//! nest.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use lnxtalk_core::{
    names, ConfigError, Feature, Features, ObjectStatus, PropertyMap, ProxyConfig, ProxyEvent,
    RpcError, RpcTransport, TaskQueue, Value,
};
use lnxtalk_readiness::{
    FeatureGraph, IntrospectFn, IntrospectToken, Introspectable, PendingReady, ReadinessEngine,
};

/// The main account interface
pub const ACCOUNT_IFACE: &str = "org.lnxtalk.Account";
/// Optional avatar interface
pub const AVATAR_IFACE: &str = "org.lnxtalk.Account.Interface.Avatar";

/// Account features
pub mod features {
    use lnxtalk_core::{Feature, ProxyKind};

    /// Basic account properties
    pub const CORE: Feature = Feature::core(ProxyKind::Account, 0, "Core");
    /// The account's avatar image
    pub const AVATAR: Feature = Feature::new(ProxyKind::Account, 1, "Avatar");
    /// Protocol parameter metadata
    pub const PROTOCOL_INFO: Feature = Feature::new(ProxyKind::Account, 2, "ProtocolInfo");
    /// Capabilities derived from the protocol
    pub const CAPABILITIES: Feature = Feature::new(ProxyKind::Account, 3, "Capabilities");
}

/// Events published by an account proxy
#[derive(Debug, Clone)]
pub enum AccountEvent {
    /// A cached property (raw or derived) changed
    PropertyChanged { name: String },
    /// The proxy is permanently dead
    Invalidated { name: String, message: String },
}

// ============================================================================
// Account
// ============================================================================

#[derive(Default)]
struct AccountState {
    /// Raw remote properties, as last seen
    properties: PropertyMap,
    /// Derived: explicit Service property or the normalized protocol name
    service_name: String,
    /// Derived: explicit Icon property or `im-<protocol>`
    icon_name: String,
    avatar: Option<Value>,
    protocol_info: Option<Value>,
    capabilities: Option<Value>,
}

/// Proxy for a remote account object
pub struct Account {
    transport: Arc<dyn RpcTransport>,
    config: ProxyConfig,
    engine: Arc<ReadinessEngine>,
    state: Mutex<AccountState>,
    events: broadcast::Sender<AccountEvent>,
}

impl Account {
    /// Creates a proxy for the remote account the config names
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        config: ProxyConfig,
        queue: TaskQueue,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(32);

        let account = Arc::new_cyclic(|weak: &Weak<Self>| {
            let graph = Self::feature_graph(weak.clone());
            let engine = ReadinessEngine::new(graph, ObjectStatus::Unknown, queue);
            Self {
                transport,
                config,
                engine,
                state: Mutex::new(AccountState::default()),
                events,
            }
        });
        Ok(account)
    }

    fn feature_graph(weak: Weak<Self>) -> FeatureGraph {
        let unknown = [ObjectStatus::Unknown];

        let spawn_main: IntrospectFn = {
            let weak = weak.clone();
            Arc::new(move |token| {
                if let Some(account) = weak.upgrade() {
                    tokio::spawn(account.introspect_main(token));
                }
            })
        };
        let spawn_avatar: IntrospectFn = {
            let weak = weak.clone();
            Arc::new(move |token| {
                if let Some(account) = weak.upgrade() {
                    tokio::spawn(account.introspect_avatar(token));
                }
            })
        };
        let spawn_protocol_info: IntrospectFn = {
            let weak = weak.clone();
            Arc::new(move |token| {
                if let Some(account) = weak.upgrade() {
                    tokio::spawn(account.introspect_protocol_info(token));
                }
            })
        };
        let spawn_capabilities: IntrospectFn = {
            let weak = weak;
            Arc::new(move |token| {
                if let Some(account) = weak.upgrade() {
                    tokio::spawn(account.introspect_capabilities(token));
                }
            })
        };

        FeatureGraph::builder()
            .add(
                features::CORE,
                Introspectable::new(unknown, [], [], spawn_main),
            )
            .add(
                features::AVATAR,
                Introspectable::new(
                    unknown,
                    [features::CORE],
                    [AVATAR_IFACE.to_string()],
                    spawn_avatar,
                ),
            )
            .add(
                features::PROTOCOL_INFO,
                Introspectable::new(unknown, [features::CORE], [], spawn_protocol_info),
            )
            .add(
                features::CAPABILITIES,
                Introspectable::new(
                    unknown,
                    [features::CORE, features::PROTOCOL_INFO],
                    [],
                    spawn_capabilities,
                ),
            )
            .build()
            .expect("static account feature graph must be valid")
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

    pub fn missing_features(&self) -> Features {
        self.engine.missing_features()
    }

    // ========================================================================
    // Introspection procedures
    // ========================================================================

    async fn introspect_main(self: Arc<Self>, token: IntrospectToken) {
        let props = match self.transport.get_all(ACCOUNT_IFACE).await {
            Ok(props) => props,
            Err(err) => {
                token.complete(Err(err));
                return;
            }
        };
        // An account learns its interfaces exactly once; an absent property
        // means there are none, and interface-gated features must settle
        // rather than wait forever
        if !props.contains_key("Interfaces") {
            self.engine.set_interfaces(Vec::new());
        }
        self.update_properties(props);
        token.complete(Ok(()));
    }

    async fn introspect_avatar(self: Arc<Self>, token: IntrospectToken) {
        match self.transport.get(AVATAR_IFACE, "Avatar").await {
            Ok(value) => {
                self.state
                    .lock()
                    .expect("account state lock poisoned")
                    .avatar = Some(value);
                token.complete(Ok(()));
            }
            Err(err) => token.complete(Err(err)),
        }
    }

    async fn introspect_protocol_info(self: Arc<Self>, token: IntrospectToken) {
        match self
            .transport
            .invoke(ACCOUNT_IFACE, "GetProtocolInfo", Vec::new())
            .await
        {
            Ok(value) => {
                self.state
                    .lock()
                    .expect("account state lock poisoned")
                    .protocol_info = Some(value);
                token.complete(Ok(()));
            }
            Err(err) => token.complete(Err(err)),
        }
    }

    async fn introspect_capabilities(self: Arc<Self>, token: IntrospectToken) {
        match self
            .transport
            .invoke(ACCOUNT_IFACE, "GetCapabilities", Vec::new())
            .await
        {
            Ok(value) => {
                self.state
                    .lock()
                    .expect("account state lock poisoned")
                    .capabilities = Some(value);
                token.complete(Ok(()));
            }
            Err(err) => token.complete(Err(err)),
        }
    }

    // ========================================================================
    // Property pipeline
    // ========================================================================

    /// Applies a batch of raw properties and recomputes derived fields
    ///
    /// Change events go out in a deterministic order: raw keys sorted, then
    /// the derived fields in their fixed recompute order.
    pub fn update_properties(&self, delta: PropertyMap) {
        if !self.engine.is_valid() {
            return;
        }

        let mut interfaces = None;
        let mut changed: Vec<String> = Vec::new();
        {
            let mut state = self.state.lock().expect("account state lock poisoned");

            let mut keys: Vec<&String> = delta.keys().collect();
            keys.sort();
            for key in keys {
                let value = &delta[key];
                if key == "Interfaces" {
                    interfaces = Some(
                        value
                            .as_array()
                            .map(|list| {
                                list.iter()
                                    .filter_map(Value::as_str)
                                    .map(str::to_string)
                                    .collect()
                            })
                            .unwrap_or_default(),
                    );
                }
                if state.properties.get(key) != Some(value) {
                    state.properties.insert(key.clone(), value.clone());
                    changed.push(key.clone());
                }
            }

            changed.extend(Self::recompute_derived(&mut state));
        }

        if let Some(interfaces) = interfaces {
            self.engine.set_interfaces(interfaces);
        }
        for name in changed {
            let _ = self.events.send(AccountEvent::PropertyChanged { name });
        }
    }

    /// The fixed derived-field recompute steps, in order
    fn recompute_derived(state: &mut AccountState) -> Vec<String> {
        let mut changed = Vec::new();
        let protocol = state
            .properties
            .get("Protocol")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        // Service name: explicit Service property, else the normalized
        // protocol name
        let service = state
            .properties
            .get("Service")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| protocol.to_ascii_lowercase().replace('_', "-"));
        if service != state.service_name {
            state.service_name = service;
            changed.push("ServiceName".to_string());
        }

        // Icon name: explicit Icon property, else im-<protocol>
        let icon = state
            .properties
            .get("Icon")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if protocol.is_empty() {
                    String::new()
                } else {
                    format!("im-{protocol}")
                }
            });
        if icon != state.icon_name {
            state.icon_name = icon;
            changed.push("IconName".to_string());
        }

        changed
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Feeds a push event from the transport into the proxy
    pub fn handle_event(self: &Arc<Self>, event: ProxyEvent) {
        if !self.engine.is_valid() {
            debug!("Dropping event for an invalidated account");
            return;
        }
        match event {
            ProxyEvent::PropertiesChanged(delta) => self.update_properties(delta),
            ProxyEvent::Invalidated { name, message } => self.invalidate(&name, &message),
            ProxyEvent::StatusChanged { .. } => {
                warn!("Account objects have no status machine; ignoring status change");
            }
        }
    }

    /// Handles the remote account being removed
    pub fn handle_removed(&self) {
        self.invalidate(names::OBJECT_REMOVED, "The account was removed");
    }

    /// Subscribes to proxy events
    pub fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.events.subscribe()
    }

    /// Permanently invalidates the proxy
    pub fn invalidate(&self, name: &str, message: &str) {
        if !self.engine.is_valid() {
            return;
        }
        warn!(error = name, message, "Invalidating account proxy");
        self.engine.invalidate(name, message);
        let _ = self.events.send(AccountEvent::Invalidated {
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
    // Accessors
    // ========================================================================

    /// The remote object identity this proxy mirrors
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The user-visible account name; requires Core
    pub fn display_name(&self) -> String {
        self.string_property("DisplayName")
    }

    /// The protocol this account speaks; requires Core
    pub fn protocol_name(&self) -> String {
        self.string_property("Protocol")
    }

    /// Whether the account is enabled; requires Core
    pub fn is_enabled(&self) -> bool {
        if !self.check_ready(features::CORE, "is_enabled") {
            return false;
        }
        self.state
            .lock()
            .expect("account state lock poisoned")
            .properties
            .get("Enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Derived service name; requires Core
    pub fn service_name(&self) -> String {
        if !self.check_ready(features::CORE, "service_name") {
            return String::new();
        }
        self.state
            .lock()
            .expect("account state lock poisoned")
            .service_name
            .clone()
    }

    /// Derived icon name; requires Core
    pub fn icon_name(&self) -> String {
        if !self.check_ready(features::CORE, "icon_name") {
            return String::new();
        }
        self.state
            .lock()
            .expect("account state lock poisoned")
            .icon_name
            .clone()
    }

    /// The avatar payload; requires Avatar
    pub fn avatar(&self) -> Option<Value> {
        if !self.check_ready(features::AVATAR, "avatar") {
            return None;
        }
        self.state
            .lock()
            .expect("account state lock poisoned")
            .avatar
            .clone()
    }

    /// Protocol parameter metadata; requires ProtocolInfo
    pub fn protocol_info(&self) -> Option<Value> {
        if !self.check_ready(features::PROTOCOL_INFO, "protocol_info") {
            return None;
        }
        self.state
            .lock()
            .expect("account state lock poisoned")
            .protocol_info
            .clone()
    }

    /// Capabilities; requires Capabilities
    pub fn capabilities(&self) -> Option<Value> {
        if !self.check_ready(features::CAPABILITIES, "capabilities") {
            return None;
        }
        self.state
            .lock()
            .expect("account state lock poisoned")
            .capabilities
            .clone()
    }

    fn string_property(&self, name: &str) -> String {
        if !self.check_ready(features::CORE, name) {
            return String::new();
        }
        self.state
            .lock()
            .expect("account state lock poisoned")
            .properties
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }

    fn check_ready(&self, feature: Feature, accessor: &str) -> bool {
        let ready = self.engine.is_ready(&Features::from([feature]));
        if !ready {
            warn!(%feature, accessor, "Accessor called before its feature became ready");
        }
        ready
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("bus_name", &self.config.bus_name)
            .field("object_path", &self.config.object_path)
            .finish_non_exhaustive()
    }
}
