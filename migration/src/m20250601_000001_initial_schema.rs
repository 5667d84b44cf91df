use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create policy_rules table: one row per permission or grouping rule,
        // columns mirror the line format positions (ptype, v0..v5)
        manager
            .create_table(
                Table::create()
                    .table(PolicyRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PolicyRules::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string(PolicyRules::Ptype))
                    .col(string_null(PolicyRules::V0))
                    .col(string_null(PolicyRules::V1))
                    .col(string_null(PolicyRules::V2))
                    .col(string_null(PolicyRules::V3))
                    .col(string_null(PolicyRules::V4))
                    .col(string_null(PolicyRules::V5))
                    .to_owned(),
            )
            .await?;

        // Subject lookups scan (ptype, v0)
        manager
            .create_index(
                Index::create()
                    .name("idx_policy_rules_ptype_v0")
                    .table(PolicyRules::Table)
                    .col(PolicyRules::Ptype)
                    .col(PolicyRules::V0)
                    .to_owned(),
            )
            .await?;

        // Create access_logs table: one row per authorization decision
        manager
            .create_table(
                Table::create()
                    .table(AccessLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccessLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string_null(AccessLogs::UserId))
                    .col(string(AccessLogs::Subject))
                    .col(string(AccessLogs::Object))
                    .col(string(AccessLogs::Action))
                    .col(big_integer(AccessLogs::Allowed))
                    .col(string(AccessLogs::Reason))
                    .col(string_null(AccessLogs::Context))
                    .col(big_integer(AccessLogs::ResponseTimeMs))
                    .col(string_null(AccessLogs::IpAddress))
                    .col(string_null(AccessLogs::UserAgent))
                    .col(big_integer(AccessLogs::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_access_logs_created_at")
                    .table(AccessLogs::Table)
                    .col(AccessLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Create job_executions table for scheduled reload bookkeeping
        manager
            .create_table(
                Table::create()
                    .table(JobExecutions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobExecutions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string(JobExecutions::JobName))
                    .col(big_integer(JobExecutions::StartedAt))
                    .col(big_integer_null(JobExecutions::CompletedAt))
                    .col(big_integer_null(JobExecutions::Success))
                    .col(string_null(JobExecutions::ErrorMessage))
                    .col(big_integer_null(JobExecutions::PoliciesLoaded))
                    .col(big_integer_null(JobExecutions::RowsSkipped))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobExecutions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AccessLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PolicyRules::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum PolicyRules {
    Table,
    Id,
    Ptype,
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
}

#[derive(DeriveIden)]
enum AccessLogs {
    Table,
    Id,
    UserId,
    Subject,
    Object,
    Action,
    Allowed,
    Reason,
    Context,
    ResponseTimeMs,
    IpAddress,
    UserAgent,
    CreatedAt,
}

#[derive(DeriveIden)]
enum JobExecutions {
    Table,
    Id,
    JobName,
    StartedAt,
    CompletedAt,
    Success,
    ErrorMessage,
    PoliciesLoaded,
    RowsSkipped,
}
