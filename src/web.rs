//! HTTP surface: wires settings, database and enforcer into the axum
//! router exposed by `authz::web` and serves it.

use std::net::SocketAddr;
use std::sync::Arc;

use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;

use crate::authz::enforcer::Enforcer;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub enforcer: Arc<Enforcer>,
}

pub async fn serve(
    settings: Settings,
    db: DatabaseConnection,
    enforcer: Arc<Enforcer>,
) -> miette::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .into_diagnostic()?;

    let state = AppState {
        settings: Arc::new(settings),
        db,
        enforcer,
    };
    let router = crate::authz::web::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!(%addr, "fulcrum listening");
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}
