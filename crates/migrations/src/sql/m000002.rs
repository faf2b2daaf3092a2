use indoc::indoc;

use super::DelayedJobMigration;

pub const M000002_MIGRATION: DelayedJobMigration = DelayedJobMigration {
    name: "m000002",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create index jobs_queue_priority_idx
                on :DJ_SCHEMA.jobs (queue, priority)
                where failed_at is null;
        "#},
        indoc! {r#"
            create index jobs_locked_by_idx
                on :DJ_SCHEMA.jobs (locked_by)
                where locked_by is not null;
        "#},
    ],
};
