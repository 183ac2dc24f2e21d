use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use tracing::info;

use crate::admission::{handle, ResourceHandler, RouteState};
use crate::metrics::WardenMetrics;
use crate::release::ReleaseFilter;

/// Mounts one route per operation the handler declares, under
/// `/validate/<resource>/<op>` and `/mutate/<resource>/<op>`. Undeclared
/// operations get no route at all.
pub fn register<H: ResourceHandler>(
    mut router: Router,
    handler: Arc<H>,
    filter: Arc<ReleaseFilter>,
    metrics: Arc<WardenMetrics>,
) -> Router {
    for &op in handler.operations() {
        let path = format!(
            "/{}/{}/{}",
            op.webhook(),
            handler.resource(),
            op.operation()
        );
        info!(path, "registering webhook route");
        let state = RouteState {
            handler: handler.clone(),
            filter: filter.clone(),
            metrics: metrics.clone(),
            op,
        };
        router = router.route(&path, post(handle::<H>).with_state(state));
    }
    router
}
