//! Containers already running when the service starts are registered
//! before any lifecycle event arrives.
//!
//! Scenario:
//!
//! 1. Three containers are running: one with a file hook and a keys hook,
//!    one without any hook, one whose only hook is incomplete.
//! 2. Start the dispatcher.
//!
//! Expected Result:
//!
//! - only the first container is registered
//! - one `Created` action runs per declared hook

use config_hook::action::Trigger;
use config_hook::hook::HookKind;

use crate::common::eventually;
use crate::common::TestService;
use crate::enable_logger;

#[tokio::test]
async fn test_running_containers_are_reconciled_at_startup() {
    enable_logger();
    let mut service = TestService::new(None);
    service.runtime.insert(
        "proxy",
        &[
            ("CONFIG_HOOK_FILE_NGINX", "/etc/nginx/nginx.conf"),
            ("CONFIG_HOOK_FILE_NGINX_KEY", "/proxy/nginx"),
            ("CONFIG_HOOK_FILE_NGINX_CHECK", "nginx -t"),
            ("CONFIG_HOOK_FILE_NGINX_EXEC", "nginx -s reload"),
            ("CONFIG_HOOK_KEYS_SEED", "/etc/seed.keys"),
        ],
    );
    service.runtime.insert("plain", &[("PATH", "/usr/bin")]);
    service.runtime.insert("broken", &[("CONFIG_HOOK_FILE_BROKEN", "/etc/broken.conf")]);

    let started = service.start();

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let action = service.next_action().await.expect("created action");
        assert_eq!(action.container_id, "proxy");
        assert_eq!(action.trigger, Trigger::Created);
        kinds.push(action.hook.kind());
    }
    kinds.sort_by_key(|kind| kind.to_string());
    assert_eq!(kinds, vec![HookKind::File, HookKind::Keys]);
    assert!(service.no_action().await);

    assert_eq!(started.registries.container_ids(), vec!["proxy".to_string()]);
    assert_eq!(started.watcher.subscribers("/proxy/nginx"), 1);

    let runtime = service.runtime.clone();
    assert!(eventually(|| runtime.listener_count() == 2).await);
    service.shutdown().await;
}
