use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::{AdmissionRequest, Verdict};
use crate::service::AbuseGuard;

/// Admission middleware placed in front of every business route
///
/// Resolves the identity and scope of the request, runs the admission
/// pipeline and either answers with the rejection or forwards the request and
/// adds the quota headers to its response.
pub async fn admission<B>(
    State(guard): State<Arc<AbuseGuard>>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let path = request.uri().path();

    let admission = AdmissionRequest {
        identity: guard.identity(peer, request.headers()),
        scope: guard.scope_for(path),
        endpoint: request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(path)
            .to_string(),
    };

    let span = tracing::Span::current();
    span.record("identity", admission.identity.as_str());
    span.record("scope", admission.scope.as_str());

    match guard.admit(&admission).await {
        Verdict::Deny(rejection) => rejection.into_response(),
        Verdict::Allow { quota } => {
            let mut response = next.run(request).await;
            if let Some(info) = quota {
                info.apply_headers(response.headers_mut());
            }
            response
        }
    }
}
