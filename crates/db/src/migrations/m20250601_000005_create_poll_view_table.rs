//! Create poll view table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PollView::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PollView::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PollView::PollId).string_len(36).not_null())
                    .col(ColumnDef::new(PollView::ViewerId).string_len(36))
                    .col(
                        ColumnDef::new(PollView::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_poll_view_poll")
                            .from(PollView::Table, PollView::PollId)
                            .to(Poll::Table, Poll::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: poll_id (for counting a poll's views)
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_view_poll_id")
                    .table(PollView::Table)
                    .col(PollView::PollId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PollView::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PollView {
    Table,
    Id,
    PollId,
    ViewerId,
    CreatedAt,
}

#[derive(Iden)]
enum Poll {
    Table,
    Id,
}
