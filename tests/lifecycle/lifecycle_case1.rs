//! Case 1: a container's hooks follow it through its lifecycle
//!
//! Scenario:
//!
//! 1. Start the dispatcher with no running containers.
//! 2. Start container `web-1` declaring one file hook on `/services/haproxy/cfg`.
//! 3. Write a new value under the hook's key.
//! 4. Stop the container and write to the key again.
//!
//! Expected Result:
//!
//! - `web-1` is registered and its key watched; one `Created` action runs
//! - the write causes exactly one `NodeChanged` action for `web-1`
//! - after the stop, the registry and the watch are gone and no action runs

use config_hook::action::Trigger;
use config_hook::hook::HookDeclaration;

use crate::common::eventually;
use crate::common::TestService;
use crate::enable_logger;

const HAPROXY_KEY: &str = "/services/haproxy/cfg";

const WEB: &[(&str, &str)] = &[
    ("CONFIG_HOOK_FILE_HAPROXY", "/etc/haproxy/haproxy.cfg"),
    ("CONFIG_HOOK_FILE_HAPROXY_KEY", HAPROXY_KEY),
    ("CONFIG_HOOK_FILE_HAPROXY_EXEC", "/usr/sbin/haproxy-reload"),
    ("HOSTNAME", "web-1"),
];

#[tokio::test]
async fn test_container_lifecycle_drives_watches_and_actions() {
    enable_logger();
    let mut service = TestService::new(None);
    let started = service.start();
    let runtime = service.runtime.clone();
    let store = service.store.clone();
    assert!(eventually(|| runtime.listener_count() == 2).await);

    // 2. creation
    runtime.start("web-1", WEB);
    let action = service.next_action().await.expect("created action");
    assert_eq!(action.container_id, "web-1");
    assert_eq!(action.trigger, Trigger::Created);
    match &action.hook {
        HookDeclaration::File(hook) => {
            assert_eq!(hook.id, "HAPROXY");
            assert_eq!(hook.file, "/etc/haproxy/haproxy.cfg");
            assert_eq!(hook.key, HAPROXY_KEY);
        }
        other => panic!("unexpected hook {:?}", other),
    }
    assert!(started.registries.contains("web-1"));
    assert_eq!(started.watcher.subscribers(HAPROXY_KEY), 1);

    // 3. one change, one action
    assert!(eventually(|| store.polls() >= 1).await);
    store.put(HAPROXY_KEY, "backend web\n  server a 10.0.0.1:80");
    let action = service.next_action().await.expect("node changed action");
    assert_eq!(action.container_id, "web-1");
    assert_eq!(
        action.trigger,
        Trigger::NodeChanged {
            path: HAPROXY_KEY.to_string()
        }
    );
    assert!(service.no_action().await);

    // 4. destruction
    runtime.stop("web-1");
    assert!(eventually(|| !started.registries.contains("web-1")).await);
    assert_eq!(started.watcher.subscribers(HAPROXY_KEY), 0);
    assert!(started.watcher.watched_keys().is_empty());

    store.put(HAPROXY_KEY, "backend none");
    assert!(service.no_action().await);

    service.shutdown().await;
    assert!(started.watcher.is_closed());
}

#[tokio::test]
async fn test_change_under_a_watched_directory_reaches_every_owner() {
    enable_logger();
    let mut service = TestService::new(None);
    let started = service.start();
    let runtime = service.runtime.clone();
    let store = service.store.clone();
    assert!(eventually(|| runtime.listener_count() == 2).await);

    runtime.start("a", &[("CONFIG_HOOK_FILE_APP", "/etc/app.conf"), ("CONFIG_HOOK_FILE_APP_KEY", "/app")]);
    runtime.start("b", &[("CONFIG_HOOK_FILE_APP", "/etc/app.conf"), ("CONFIG_HOOK_FILE_APP_KEY", "/app/db")]);
    runtime.start("c", &[("CONFIG_HOOK_FILE_APP", "/etc/app.conf"), ("CONFIG_HOOK_FILE_APP_KEY", "/application")]);
    for _ in 0..3 {
        assert_eq!(service.next_action().await.unwrap().trigger, Trigger::Created);
    }
    assert_eq!(started.registries.len(), 3);

    assert!(eventually(|| store.polls() >= 1).await);
    store.put("/app/db/host", "db.internal");

    let mut owners = vec![
        service.next_action().await.unwrap().container_id,
        service.next_action().await.unwrap().container_id,
    ];
    owners.sort();
    assert_eq!(owners, vec!["a".to_string(), "b".to_string()]);
    assert!(service.no_action().await);

    service.shutdown().await;
}
