use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: &[Handler] = &[
    handlers::core::try_handle,
    handlers::users::try_handle,
    handlers::academic::try_handle,
    handlers::students::try_handle,
    handlers::fees::try_handle,
    handlers::ledger::try_handle,
    handlers::portal::try_handle,
    handlers::reports::try_handle,
    handlers::audit::try_handle,
    handlers::notifications::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
    let _enter = span.enter();

    for family in FAMILIES {
        if let Some(resp) = family(state, &req) {
            if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
                tracing::debug!(error = %resp["error"]["code"], "request rejected");
            }
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
