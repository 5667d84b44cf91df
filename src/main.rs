use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use fulcrum::authz::enforcer::Enforcer;
use fulcrum::settings::Settings;
use fulcrum::{jobs, storage, web};

#[derive(Parser, Debug)]
#[command(
    name = "fulcrum",
    version,
    about = "Attribute-based access control decision service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database)
    let db = storage::init(&settings.database).await?;

    // make a fresh deployment governable
    let seeded = storage::ensure_bootstrap_policies(&db).await?;
    if seeded > 0 {
        tracing::info!(rules = seeded, "Policy store was empty, seeded defaults");
    }

    // build the enforcer and pull the stored rules in
    let repository = Arc::new(storage::SeaOrmPolicyRepository::new(db.clone()));
    let enforcer = Arc::new(
        Enforcer::new(repository)
            .with_dev_fallback(settings.authz.dev_fallback)
            .with_reload_timeout(Duration::from_secs(settings.authz.reload_timeout_secs)),
    );
    match enforcer.reload().await {
        Ok(report) if !report.errors.is_empty() => {
            tracing::warn!(
                skipped = report.errors.len(),
                "Some policy rows were excluded from the initial load"
            );
        }
        Ok(_) => {}
        Err(e) => {
            // serve with an empty snapshot rather than refusing to start;
            // a later reload can recover
            tracing::error!(error = %e, "Initial policy load failed");
        }
    }

    // optional scheduled reload
    let _scheduler = match &settings.authz.reload_schedule {
        Some(schedule) => {
            Some(jobs::init_scheduler(db.clone(), enforcer.clone(), schedule).await?)
        }
        None => None,
    };

    // start web server
    web::serve(settings, db, enforcer).await?;
    Ok(())
}
