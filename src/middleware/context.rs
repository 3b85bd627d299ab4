use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Duration;

use crate::context::RequestContext;
use crate::AppState;

/// Request context middleware
/// Gives every request its own cancellation token and deadline.
/// The token is cancelled if the request future is dropped before a response
/// is produced (client disconnect).
pub async fn request_context(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = match state.config.server.request_timeout_secs {
        0 => RequestContext::background(),
        secs => RequestContext::with_timeout(Duration::from_secs(secs)),
    };

    let guard = ctx.cancellation_token().clone().drop_guard();
    request.extensions_mut().insert(ctx);

    let response = next.run(request).await;
    guard.disarm();
    response
}
