use crate::authz::enforcer::Enforcer;
use crate::entities;
use crate::errors::FulcrumError;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter, Set};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Start the job scheduler with the periodic policy reload job.
///
/// `schedule` is a six-field cron expression (seconds first), e.g.
/// "0 */5 * * * *" for every five minutes.
pub async fn init_scheduler(
    db: DatabaseConnection,
    enforcer: Arc<Enforcer>,
    schedule: &str,
) -> Result<JobScheduler, FulcrumError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| FulcrumError::Other(format!("Failed to create job scheduler: {e}")))?;

    let db_clone = db.clone();
    let enforcer_clone = enforcer.clone();

    let reload_job = Job::new_async(schedule, move |_uuid, _l| {
        let db = db_clone.clone();
        let enforcer = enforcer_clone.clone();
        Box::pin(async move {
            info!("Running policy_reload job");
            run_reload(&db, &enforcer).await;
        })
    })
    .map_err(|e| FulcrumError::Other(format!("Failed to create policy reload job: {e}")))?;

    sched
        .add(reload_job)
        .await
        .map_err(|e| FulcrumError::Other(format!("Failed to add policy reload job: {e}")))?;

    sched
        .start()
        .await
        .map_err(|e| FulcrumError::Other(format!("Failed to start job scheduler: {e}")))?;

    info!(schedule, "Job scheduler started");
    Ok(sched)
}

async fn run_reload(db: &DatabaseConnection, enforcer: &Enforcer) {
    let execution_id = start_job_execution(db, "policy_reload").await.ok();

    match enforcer.reload().await {
        Ok(report) => {
            info!(
                policies = report.policy_count,
                skipped = report.errors.len(),
                "Scheduled policy reload completed"
            );
            if let Some(id) = execution_id {
                let _ = complete_job_execution(
                    db,
                    id,
                    true,
                    None,
                    Some(report.policy_count as i64),
                    Some(report.errors.len() as i64),
                )
                .await;
            }
        }
        Err(e) => {
            error!("Scheduled policy reload failed: {e}");
            if let Some(id) = execution_id {
                let _ =
                    complete_job_execution(db, id, false, Some(e.to_string()), None, None).await;
            }
        }
    }
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, FulcrumError> {
    let execution = entities::job_execution::ActiveModel {
        job_name: Set(job_name.to_string()),
        started_at: Set(chrono::Utc::now().timestamp()),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        policies_loaded: Set(None),
        rows_skipped: Set(None),
        ..Default::default()
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    policies_loaded: Option<i64>,
    rows_skipped: Option<i64>,
) -> Result<(), FulcrumError> {
    use entities::job_execution::{Column, Entity};

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active = execution.into_active_model();
        active.completed_at = Set(Some(chrono::Utc::now().timestamp()));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.policies_loaded = Set(policies_loaded);
        active.rows_skipped = Set(rows_skipped);
        active.update(db).await?;
    }

    Ok(())
}

/// Manually trigger a job by name (useful for admin tooling)
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    enforcer: &Enforcer,
    job_name: &str,
) -> Result<(), FulcrumError> {
    if job_name != "policy_reload" {
        return Err(FulcrumError::Other(format!("Unknown job name: {job_name}")));
    }
    info!("Manually triggering job: {job_name}");
    run_reload(db, enforcer).await;
    Ok(())
}
