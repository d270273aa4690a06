//! End-to-end account proxy tests against a scripted transport

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use lnxtalk_core::{names, Features, ProxyConfig, ProxyEvent, RpcError, TaskQueue};
use lnxtalk_proxy::features::account as features;
use lnxtalk_proxy::interfaces::{ACCOUNT_IFACE, AVATAR_IFACE};
use lnxtalk_proxy::{Account, AccountEvent};
use lnxtalk_readiness::PendingReady;

use common::{init_tracing, props, MockTransport};

fn new_account(transport: Arc<MockTransport>) -> Arc<Account> {
    init_tracing();
    let queue = TaskQueue::new();
    queue.spawn_driver();
    let config = ProxyConfig::new(
        "org.lnxtalk.AccountManager",
        "/org/lnxtalk/Account/jabber/work",
    )
    .unwrap();
    Account::new(transport, config, queue).unwrap()
}

async fn settle(pending: PendingReady) -> Result<(), RpcError> {
    tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("readiness request did not settle")
}

fn drain(events: &mut broadcast::Receiver<AccountEvent>) -> Vec<AccountEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_core_properties_and_derived_fallbacks() {
    let transport = MockTransport::new();
    transport.answer_get_all(
        ACCOUNT_IFACE,
        props(&[
            ("DisplayName", json!("Work account")),
            ("Protocol", json!("jabber")),
            ("Enabled", json!(true)),
            ("Interfaces", json!([AVATAR_IFACE])),
        ]),
    );
    let account = new_account(transport);

    settle(account.become_ready(Features::new())).await.unwrap();

    assert_eq!(account.display_name(), "Work account");
    assert_eq!(account.protocol_name(), "jabber");
    assert!(account.is_enabled());
    // No explicit Service/Icon: both derive from the protocol
    assert_eq!(account.service_name(), "jabber");
    assert_eq!(account.icon_name(), "im-jabber");
}

#[tokio::test]
async fn test_explicit_service_and_icon_win() {
    let transport = MockTransport::new();
    transport.answer_get_all(
        ACCOUNT_IFACE,
        props(&[
            ("Protocol", json!("jabber")),
            ("Service", json!("google-talk")),
            ("Icon", json!("work-badge")),
        ]),
    );
    let account = new_account(transport);

    settle(account.become_ready(Features::new())).await.unwrap();

    assert_eq!(account.service_name(), "google-talk");
    assert_eq!(account.icon_name(), "work-badge");
}

#[tokio::test]
async fn test_avatar_and_capabilities_ready() {
    let transport = MockTransport::new();
    transport.answer_get_all(
        ACCOUNT_IFACE,
        props(&[
            ("Protocol", json!("jabber")),
            ("Interfaces", json!([AVATAR_IFACE])),
        ]),
    );
    transport.answer_get(AVATAR_IFACE, "Avatar", json!(["aGk=", "image/png"]));
    transport.answer_invoke(ACCOUNT_IFACE, "GetProtocolInfo", json!({"params": []}));
    transport.answer_invoke(ACCOUNT_IFACE, "GetCapabilities", json!(["text"]));
    let account = new_account(transport);

    settle(account.become_ready(Features::from([
        features::AVATAR,
        features::CAPABILITIES,
    ])))
    .await
    .unwrap();

    assert_eq!(account.avatar(), Some(json!(["aGk=", "image/png"])));
    assert_eq!(account.capabilities(), Some(json!(["text"])));
    // Capabilities pulled ProtocolInfo in as a dependency
    assert_eq!(account.protocol_info(), Some(json!({"params": []})));
}

#[tokio::test]
async fn test_avatar_without_interface_fails_without_calls() {
    let transport = MockTransport::new();
    transport.answer_get_all(
        ACCOUNT_IFACE,
        props(&[("Protocol", json!("jabber")), ("Interfaces", json!([]))]),
    );
    let account = new_account(transport.clone());

    let err = settle(account.become_ready(Features::from([features::AVATAR])))
        .await
        .unwrap_err();

    assert_eq!(err.name, names::NOT_AVAILABLE);
    assert!(account.missing_features().contains(&features::AVATAR));
    assert_eq!(transport.count_calls(&format!("get {AVATAR_IFACE}")), 0);
}

#[tokio::test]
async fn test_property_change_events_are_ordered() {
    let transport = MockTransport::new();
    transport.answer_get_all(ACCOUNT_IFACE, props(&[("Protocol", json!("jabber"))]));
    let account = new_account(transport);
    settle(account.become_ready(Features::new())).await.unwrap();

    let mut events = account.subscribe();
    drain(&mut events);

    account.handle_event(ProxyEvent::PropertiesChanged(props(&[(
        "Protocol",
        json!("irc"),
    )])));

    // Raw change first, then the derived recompute steps in fixed order
    let names: Vec<String> = drain(&mut events)
        .into_iter()
        .map(|event| match event {
            AccountEvent::PropertyChanged { name } => name,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(names, ["Protocol", "ServiceName", "IconName"]);

    assert_eq!(account.protocol_name(), "irc");
    assert_eq!(account.service_name(), "irc");
    assert_eq!(account.icon_name(), "im-irc");
}

#[tokio::test]
async fn test_unchanged_properties_emit_nothing() {
    let transport = MockTransport::new();
    transport.answer_get_all(ACCOUNT_IFACE, props(&[("Protocol", json!("jabber"))]));
    let account = new_account(transport);
    settle(account.become_ready(Features::new())).await.unwrap();

    let mut events = account.subscribe();
    drain(&mut events);

    account.handle_event(ProxyEvent::PropertiesChanged(props(&[(
        "Protocol",
        json!("jabber"),
    )])));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_removed_account_invalidates() {
    let transport = MockTransport::new();
    transport.answer_get_all(ACCOUNT_IFACE, props(&[("Protocol", json!("jabber"))]));
    let account = new_account(transport);
    settle(account.become_ready(Features::new())).await.unwrap();
    let mut events = account.subscribe();

    account.handle_removed();

    assert!(!account.is_valid());
    assert_eq!(
        account.invalidation_reason().map(|err| err.name),
        Some(names::OBJECT_REMOVED.to_string())
    );
    match events.try_recv() {
        Ok(AccountEvent::Invalidated { name, .. }) => assert_eq!(name, names::OBJECT_REMOVED),
        other => panic!("expected an invalidation event, got {other:?}"),
    }

    let err = settle(account.become_ready(Features::new()))
        .await
        .unwrap_err();
    assert_eq!(err.name, names::OBJECT_REMOVED);

    // Late property pushes are dropped
    account.handle_event(ProxyEvent::PropertiesChanged(props(&[(
        "Protocol",
        json!("irc"),
    )])));
    assert!(!account.is_ready(&Features::from([features::CORE])));
}
