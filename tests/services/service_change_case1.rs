//! Case 1: a service flag ties a hook to a discovered service
//!
//! Scenario:
//!
//! 1. The discovery store holds one `web` instance.
//! 2. Start container `lb` whose file hook carries `service=web`.
//! 3. Register a second `web` instance.
//! 4. Stop `lb`.
//!
//! Expected Result:
//!
//! - registering the hook only runs its `Created` action
//! - the new instance causes one `ServiceChanged` action for `lb`
//! - the endpoints resolve both instances, the published port first
//! - after the stop nobody watches `web` any more

use std::sync::Arc;

use config_hook::action::Trigger;
use config_hook::discovery::DiscoveryBackend;
use config_hook::discovery::Endpoint;
use config_hook::discovery::EtcdDiscovery;

use crate::common::eventually;
use crate::common::MemoryStore;
use crate::common::TestService;
use crate::enable_logger;

const LB: &[(&str, &str)] = &[
    ("CONFIG_HOOK_FILE_LB", "/etc/haproxy/haproxy.cfg"),
    ("CONFIG_HOOK_FILE_LB_KEY", "/lb/haproxy"),
    ("CONFIG_HOOK_FILE_LB_EXEC", "/usr/sbin/haproxy-reload"),
    ("CONFIG_HOOK_FILE_LB_FLAGS", "service=web"),
];

#[tokio::test]
async fn test_service_change_triggers_flagged_hook() {
    enable_logger();
    let registrations = MemoryStore::new();
    registrations.put(
        "/services/web/web-1",
        r#"{"ipaddress": "10.0.0.1", "port": 80, "host_port": 49153}"#,
    );
    let discovery: Arc<dyn DiscoveryBackend> = Arc::new(EtcdDiscovery::new(registrations.clone()));

    let mut service = TestService::new(Some(discovery));
    let agent = service
        .dispatcher
        .as_ref()
        .and_then(|dispatcher| dispatcher.discovery())
        .expect("discovery agent");
    let started = service.start();
    let runtime = service.runtime.clone();
    assert!(eventually(|| runtime.listener_count() == 2).await);

    // 2. creation watches the flagged service
    runtime.start("lb", LB);
    let action = service.next_action().await.unwrap();
    assert_eq!(action.trigger, Trigger::Created);
    assert_eq!(agent.listeners("web"), 1);

    // baseline read, then the first blocking wait
    assert!(eventually(|| registrations.polls() >= 1).await);
    assert!(service.no_action().await);

    // 3. a new instance
    registrations.put("/services/web/web-2", r#"{"ipaddress": "10.0.0.2", "port": 8080}"#);
    let action = service.next_action().await.expect("service changed action");
    assert_eq!(action.container_id, "lb");
    assert_eq!(
        action.trigger,
        Trigger::ServiceChanged {
            service: "web".to_string()
        }
    );
    assert!(service.no_action().await);

    let mut endpoints = agent.endpoints("web").await.unwrap();
    endpoints.sort_by(|a, b| a.address.cmp(&b.address));
    assert_eq!(
        endpoints,
        vec![
            Endpoint {
                address: "10.0.0.1".to_string(),
                port: 49153
            },
            Endpoint {
                address: "10.0.0.2".to_string(),
                port: 8080
            },
        ]
    );

    // 4. destruction releases the service watch
    runtime.stop("lb");
    assert!(eventually(|| !started.registries.contains("lb")).await);
    assert_eq!(agent.listeners("web"), 0);
    assert!(agent.watched_services().is_empty());

    service.shutdown().await;
}
