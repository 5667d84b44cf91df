use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FulcrumError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(fulcrum::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(fulcrum::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(fulcrum::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(fulcrum::db))]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] crate::authz::errors::AuthzError),

    #[error("Bad request: {0}")]
    #[diagnostic(code(fulcrum::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(fulcrum::other))]
    Other(String),
}
