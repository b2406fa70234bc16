use crate::error::GatewayError;
use crate::proxy::context::RequestContext;
use crate::server::PipelineState;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response};
use tracing::{debug, warn};

/// Run one request through the pipeline:
///
/// 1. ROUTE_MATCH:  split the client path, pick the rule, bind the route
/// 2. PLUGIN_CHAIN: route plugins in order, then the base handler
/// 3. LOG:          outcome metrics
///
/// Failures are returned untouched; rendering them is up to the caller
/// (see [`error_response`] for a default rendering).
pub async fn handle_request(
    state: &PipelineState,
    ctx: &mut RequestContext,
) -> Result<Response<Bytes>, GatewayError> {
    phase_route_match(state, ctx)?;

    let result = state.chain.next(ctx).await;

    let outcome = match &result {
        Ok(resp) => {
            debug!(
                trace_id = %ctx.trace_id(),
                status = resp.status().as_u16(),
                elapsed_ms = ctx.start.elapsed().as_millis() as u64,
                "proxy: request done"
            );
            "ok"
        }
        Err(e) => {
            warn!(trace_id = %ctx.trace_id(), "proxy: request failed, error={}", e);
            "error"
        }
    };
    metrics::histogram!("gateway_pipeline_duration_seconds", "outcome" => outcome)
        .record(ctx.start.elapsed().as_secs_f64());
    result
}

fn phase_route_match(state: &PipelineState, ctx: &mut RequestContext) -> Result<(), GatewayError> {
    let method = ctx.method.clone();
    let parts = ctx.client_path_parts()?.clone();
    let matched = match state.routing.resolve(&parts.service, &method, &parts.path) {
        Ok(m) => m,
        Err(e) => {
            let result = match e {
                GatewayError::AccessForbidden { .. } => "forbidden",
                GatewayError::NoRouteMatch { .. } => "miss",
                _ => "error",
            };
            metrics::counter!("gateway_route_match_total", "result" => result).increment(1);
            debug!(
                trace_id = %ctx.trace_id(),
                "proxy: route match failed, service={}, path={}, error={}",
                parts.service,
                parts.path,
                e
            );
            return Err(e);
        }
    };

    metrics::counter!("gateway_route_match_total", "result" => "hit").increment(1);
    debug!(
        trace_id = %ctx.trace_id(),
        api_id = matched.api.id,
        backend_path = %matched.backend_path,
        "proxy: route matched, service={}, path={}",
        parts.service,
        parts.path
    );
    ctx.bind_route(matched);
    Ok(())
}

/// Default JSON rendering of a pipeline failure.
pub fn error_response(err: &GatewayError, trace_id: &str) -> Response<Bytes> {
    let body = serde_json::json!({
        "message": err.to_string(),
        "status": err.status().as_u16(),
        "trace_id": trace_id,
    });
    let mut resp = Response::new(Bytes::from(body.to_string()));
    *resp.status_mut() = err.status();
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}
