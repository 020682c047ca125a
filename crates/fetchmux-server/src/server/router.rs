use crate::server::{
    admission::AdmissionLayer,
    service::handler::{MultiplexService, multiplex},
};
use axum::{Router, routing::any};
use tower_http::trace::TraceLayer;

/// Builds the HTTP application: `/` served by [`multiplex`], behind the
/// admission gate, with request tracing outermost.
///
/// Rejected requests are still traced, which keeps overload visible in the
/// logs.
pub fn build_router(service: MultiplexService, admission: AdmissionLayer) -> Router {
    Router::new()
        .route("/", any(multiplex))
        .with_state(service)
        .layer(admission)
        .layer(TraceLayer::new_for_http())
}
