//! Scripted transport for end-to-end proxy tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use lnxtalk_core::{PropertyMap, RpcError, RpcTransport, Value};

/// Installs a per-process tracing subscriber writing to the test harness
///
/// Later calls are no-ops, so every test can call this from its setup helper.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

/// An in-memory transport answering from scripted responses
///
/// Unscripted calls fail with NotAvailable; `hang_get_all` makes a bulk
/// property read never answer, for tests that race a status change against
/// introspection.
#[derive(Default)]
pub struct MockTransport {
    get_all_answers: Mutex<HashMap<String, Result<PropertyMap, RpcError>>>,
    get_answers: Mutex<HashMap<(String, String), Result<Value, RpcError>>>,
    invoke_answers: Mutex<HashMap<(String, String), Result<Value, RpcError>>>,
    hanging_get_all: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer_get_all(&self, interface: &str, props: PropertyMap) {
        self.get_all_answers
            .lock()
            .unwrap()
            .insert(interface.to_string(), Ok(props));
    }

    pub fn answer_get(&self, interface: &str, property: &str, value: Value) {
        self.get_answers
            .lock()
            .unwrap()
            .insert((interface.to_string(), property.to_string()), Ok(value));
    }

    pub fn answer_invoke(&self, interface: &str, method: &str, value: Value) {
        self.invoke_answers
            .lock()
            .unwrap()
            .insert((interface.to_string(), method.to_string()), Ok(value));
    }

    /// Makes `get_all` on this interface hang forever
    pub fn hang_get_all(&self, interface: &str) {
        self.hanging_get_all
            .lock()
            .unwrap()
            .insert(interface.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn invoke(
        &self,
        interface: &str,
        method: &str,
        _args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        self.record(format!("invoke {interface} {method}"));
        self.invoke_answers
            .lock()
            .unwrap()
            .get(&(interface.to_string(), method.to_string()))
            .cloned()
            .unwrap_or_else(|| {
                Err(RpcError::not_available(format!(
                    "no scripted answer for {interface}.{method}"
                )))
            })
    }

    async fn get_all(&self, interface: &str) -> Result<PropertyMap, RpcError> {
        self.record(format!("get_all {interface}"));
        if self.hanging_get_all.lock().unwrap().contains(interface) {
            std::future::pending::<()>().await;
        }
        self.get_all_answers
            .lock()
            .unwrap()
            .get(interface)
            .cloned()
            .unwrap_or_else(|| {
                Err(RpcError::not_available(format!(
                    "no scripted properties for {interface}"
                )))
            })
    }

    async fn get(&self, interface: &str, property: &str) -> Result<Value, RpcError> {
        self.record(format!("get {interface} {property}"));
        self.get_answers
            .lock()
            .unwrap()
            .get(&(interface.to_string(), property.to_string()))
            .cloned()
            .unwrap_or_else(|| {
                Err(RpcError::not_available(format!(
                    "no scripted answer for {interface}.{property}"
                )))
            })
    }
}

/// Builds a property bag from literal pairs
pub fn props(pairs: &[(&str, Value)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}
