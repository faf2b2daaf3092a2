use indoc::indoc;

use super::DelayedJobMigration;

pub const M000001_MIGRATION: DelayedJobMigration = DelayedJobMigration {
    name: "m000001",
    is_breaking: false,
    stmts: &[indoc! {r#"
        create table :DJ_SCHEMA.jobs (
            id bigserial primary key,
            handler jsonb not null,
            queue text not null default 'default',
            priority int not null default 9,
            attempts int not null default 0,
            run_at timestamptz,
            locked_at timestamptz,
            locked_by text,
            failed_at timestamptz,
            error text,
            created_at timestamptz not null default now()
        );
    "#}],
};
