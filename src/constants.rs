// -
// Hook grammar

/// Default prefix marking an environment variable as a config hook
pub(crate) const DEFAULT_HOOK_PREFIX: &str = "CONFIG_HOOK_";

/// Sub-grammar discriminators following the prefix
pub(crate) const HOOK_FILE_TOKEN: &str = "FILE_";
pub(crate) const HOOK_KEYS_TOKEN: &str = "KEYS_";

/// Flag entry asking for a service discovery watch
pub(crate) const HOOK_FLAG_SERVICE: &str = "service";

// -
// Collaborator defaults

pub(crate) const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";
pub(crate) const DEFAULT_STORE_URL: &str = "etcd://127.0.0.1:4001";

/// Root of the key space observed by the store watch loop
pub(crate) const STORE_BASE_KEY: &str = "/";

/// Namespace holding etcd service documents
pub(crate) const ETCD_SERVICES_NAMESPACE: &str = "/services";

// -
// Container events

pub(crate) const DOCKER_EVENT_START: &str = "start";
pub(crate) const DOCKER_EVENT_DIE: &str = "die";
pub(crate) const DOCKER_EVENT_DESTROY: &str = "destroy";

// -
// Settings

/// Environment prefix for service settings, e.g. `CONFIG_HOOKD__STORE__URL`
pub(crate) const SETTINGS_ENV_PREFIX: &str = "CONFIG_HOOKD";
