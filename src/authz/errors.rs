use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Malformed policy line: {message}")]
    #[diagnostic(
        code(fulcrum::authz::malformed_policy_line),
        help("The raw line is preserved in the error; fix or delete the stored row")
    )]
    MalformedPolicyLine {
        rule_id: Option<i64>,
        line: String,
        message: String,
    },

    #[error("Invalid policy rule: {0}")]
    #[diagnostic(
        code(fulcrum::authz::invalid_rule),
        help("Permission rules need subject, object, action and an allow/deny effect; grouping rules need member and role")
    )]
    InvalidRule(String),

    #[error("Policy repository unavailable: {0}")]
    #[diagnostic(
        code(fulcrum::authz::repository_unavailable),
        help("The previous policy snapshot remains active")
    )]
    RepositoryUnavailable(String),

    #[error("Policy reload timed out after {seconds}s")]
    #[diagnostic(
        code(fulcrum::authz::reload_timeout),
        help("The previous policy snapshot remains active")
    )]
    ReloadTimeout { seconds: u64 },

    #[error("Policy evaluation failed: {message}")]
    #[diagnostic(code(fulcrum::authz::policy_eval))]
    PolicyEval {
        rule_id: Option<i64>,
        message: String,
    },
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthzError::MalformedPolicyLine { .. } | AuthzError::InvalidRule(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AuthzError::RepositoryUnavailable(_) | AuthzError::ReloadTimeout { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AuthzError::PolicyEval { .. } => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
