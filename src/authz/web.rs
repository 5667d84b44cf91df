use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::authz::codec;
use crate::authz::sanitize;
use crate::authz::types::{AuthorizationRequest, Effect, PolicyRule, RuleKind};
use crate::storage;
use crate::web::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/reload", post(handle_reload))
        .route("/v1/policies", get(list_policies).post(create_policy))
        .route("/v1/policies/export", get(export_policies))
        .route("/v1/policies/dedupe", post(dedupe_policies))
        .route("/v1/policies/sanitize", post(sanitize_policies))
        .route("/v1/policies/subject/:subject", get(policies_for_subject))
        .route("/v1/policies/:id", delete(delete_policy))
        .route("/healthz", get(health))
        .with_state(state)
}

async fn handle_check(
    State(state): State<AppState>,
    Json(req): Json<AuthorizationRequest>,
) -> impl IntoResponse {
    let decision = state.enforcer.check_permission_detailed(
        &req.subject,
        &req.object,
        &req.action,
        req.context,
    );

    // the decision is the answer; a failed audit write must not turn it
    // into an error response
    if let Err(e) =
        storage::record_access(&state.db, &req.subject, &req.object, &req.action, &decision).await
    {
        error!(error = %e, "failed to persist access log");
    }

    Json(decision)
}

async fn handle_reload(State(state): State<AppState>) -> impl IntoResponse {
    match state.enforcer.reload().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Admin input for a new rule. `kind` selects the shape:
/// `{"kind":"p","subject":...,"object":...,"action":...}` or
/// `{"kind":"g","member":...,"role":...}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum NewPolicy {
    P {
        subject: String,
        object: String,
        action: String,
        #[serde(default)]
        effect: Option<String>,
        #[serde(default)]
        context: Option<serde_json::Value>,
    },
    G {
        member: String,
        role: String,
    },
}

async fn create_policy(
    State(state): State<AppState>,
    Json(input): Json<NewPolicy>,
) -> impl IntoResponse {
    let rule = match build_rule(input) {
        Ok(rule) => rule,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
    };

    let repository = state.enforcer.repository();
    match repository.create(&rule).await {
        Ok(created) => {
            reload_after_mutation(&state).await;
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn build_rule(input: NewPolicy) -> Result<PolicyRule, String> {
    let rule = match input {
        NewPolicy::P {
            subject,
            object,
            action,
            effect,
            context,
        } => {
            let effect = match effect.as_deref() {
                None => Effect::Allow,
                Some(raw) => Effect::parse(raw).ok_or_else(|| format!("unknown effect `{raw}`"))?,
            };
            let context = match context {
                None => None,
                Some(value) if value.is_object() => Some(value.to_string()),
                Some(_) => return Err("context must be a JSON object".to_string()),
            };
            let fields = [
                Some(subject),
                Some(object),
                Some(action),
                Some(effect.as_str().to_string()),
                context,
            ]
            .map(|f| sanitize::sanitize(f.as_deref()));
            PolicyRule::new(RuleKind::P, fields.to_vec())
        }
        NewPolicy::G { member, role } => {
            let fields =
                [Some(member), Some(role)].map(|f| sanitize::sanitize(f.as_deref()));
            PolicyRule::new(RuleKind::G, fields.to_vec())
        }
    };
    rule.validate()?;
    Ok(rule)
}

async fn list_policies(State(state): State<AppState>) -> impl IntoResponse {
    match state.enforcer.repository().list_all().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn policies_for_subject(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> impl IntoResponse {
    match state.enforcer.repository().find_by_subject(&subject).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.enforcer.repository().delete(id).await {
        Ok(()) => {
            reload_after_mutation(&state).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Dump the store in the policy line text format.
async fn export_policies(State(state): State<AppState>) -> impl IntoResponse {
    let rows = match state.enforcer.repository().list_all().await {
        Ok(rows) => rows,
        Err(e) => return e.into_response(),
    };

    let mut body = String::new();
    for row in rows {
        let Some(kind) = RuleKind::parse(&row.ptype) else {
            warn!(rule_id = row.id, ptype = %row.ptype, "skipping row with unknown ptype in export");
            continue;
        };
        let sanitized: Vec<Option<String>> = row
            .fields
            .iter()
            .map(|f| sanitize::sanitize(f.as_deref()))
            .collect();
        body.push_str(&codec::encode(kind, &sanitized));
        body.push('\n');
    }

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn dedupe_policies(State(state): State<AppState>) -> impl IntoResponse {
    match storage::dedupe_policies(&state.db).await {
        Ok(removed) => {
            reload_after_mutation(&state).await;
            Json(json!({ "removed": removed })).into_response()
        }
        Err(e) => {
            error!(error = %e, "policy dedupe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn sanitize_policies(State(state): State<AppState>) -> impl IntoResponse {
    match storage::sanitize_store(&state.db).await {
        Ok((scanned, changed)) => {
            reload_after_mutation(&state).await;
            Json(json!({ "scanned": scanned, "changed": changed })).into_response()
        }
        Err(e) => {
            error!(error = %e, "policy sanitization sweep failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Mutations refresh the snapshot immediately; a failed refresh is
/// logged, the store write already succeeded.
async fn reload_after_mutation(state: &AppState) {
    if let Err(e) = state.enforcer.reload().await {
        error!(error = %e, "policy reload after mutation failed");
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
