use std::net::SocketAddr;
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref HOOK_REGISTRIES: IntGauge = IntGauge::new(
        "hook_registries",
        "Number of containers currently holding valid config hooks"
    )
    .expect("metric can not be created");

    pub static ref HOOK_PARSE_ERRORS: IntCounter = IntCounter::new(
        "hook_parse_errors",
        "Environment variables carrying the hook prefix but breaking the grammar"
    )
    .expect("metric can not be created");

    pub static ref HOOKS_PRUNED: IntCounter = IntCounter::new(
        "hooks_pruned",
        "Incomplete hook declarations removed during validation"
    )
    .expect("metric can not be created");

    pub static ref NODE_CHANGES_DELIVERED: IntCounterVec = IntCounterVec::new(
        Opts::new("node_changes_delivered", "Store changes delivered to subscribers"),
        &["operation"]
    )
    .expect("metric can not be created");

    pub static ref DELIVERIES_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("deliveries_dropped", "Notifications dropped on a full or closed queue"),
        &["queue"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_BACKOFFS: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_backoffs", "Failed long-polls followed by a retry delay"),
        &["loop"]
    )
    .expect("metric can not be created");

    pub static ref SERVICE_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("service_events", "Endpoint set changes emitted per service"),
        &["service"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HOOK_REGISTRIES.clone()),
        Box::new(HOOK_PARSE_ERRORS.clone()),
        Box::new(HOOKS_PRUNED.clone()),
        Box::new(NODE_CHANGES_DELIVERED.clone()),
        Box::new(DELIVERIES_DROPPED.clone()),
        Box::new(WATCH_BACKOFFS.clone()),
        Box::new(SERVICE_EVENTS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {}", e);
        }
    }
}

/// Serves `/metrics` on `addr` until the shutdown signal fires.
///
/// A failed bind is logged and the service carries on without metrics.
pub async fn start_server(
    addr: SocketAddr,
    mut shutdown_signal: watch::Receiver<()>,
) {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));

    let metrics_route = warp::path!("metrics")
        .map(|| REGISTRY.clone())
        .and_then(metrics_handler);

    let bound = warp::serve(metrics_route).try_bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_signal.changed().await;
    });
    match bound {
        Ok((local, server)) => {
            info!("serving metrics on {}", local);
            server.await;
        }
        Err(e) => error!("metrics server can not bind {}: {}", addr, e),
    }
}

pub(crate) async fn metrics_handler(registry: Registry) -> Result<impl Reply, Rejection> {
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    let res = match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };
    Ok(res)
}
