use std::time::Duration;

use delayed_job::clock::Clock;
use delayed_job::runner::run_and_release_job;
use delayed_job::{
    claim_job, ClaimOptions, HandlerPayload, JobOutcome, JobSpec, JobStore, WorkerUtils,
};
use serde_json::json;

use crate::helpers::{
    memory_store, worker_options, AlwaysFail, Panics, ReplaceWithSucceed, Retry, Succeed,
};

mod helpers;

#[tokio::test]
async fn it_should_delete_completed_jobs() {
    helpers::enable_logs().await;
    let (store, _clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a").init().unwrap();
    let job = worker
        .create_utils()
        .add_job(&Succeed, JobSpec::default())
        .await
        .unwrap();

    let outcome = worker.process_next_job().await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Completed));
    assert!(store.get_job(*job.id()).await.unwrap().is_none());
    assert_eq!(worker.process_next_job().await.unwrap(), None);
}

#[tokio::test]
async fn it_should_fail_permanently_after_max_attempts() {
    let (store, clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a")
        .max_attempts(3)
        .init()
        .unwrap();
    let job = worker
        .create_utils()
        .add_job(
            &AlwaysFail {
                message: "Uh oh".into(),
            },
            JobSpec::default(),
        )
        .await
        .unwrap();
    assert_eq!(*job.priority(), 9);

    for attempt in 1..=3 {
        let Some(JobOutcome::Failed(failure)) = worker.process_next_job().await.unwrap() else {
            panic!("attempt {attempt} should fail");
        };
        assert_eq!(failure.attempts(), attempt);
        assert_eq!(failure.permanently(), attempt == 3);

        let stored = store.get_job(*job.id()).await.unwrap().unwrap();
        assert!(!stored.is_locked());
        if attempt < 3 {
            assert!(stored.failed_at().is_none());
            assert!(stored.error().is_none());
        }
    }

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*stored.attempts(), 3);
    assert_eq!(*stored.failed_at(), Some(clock.now()));
    assert!(stored.error().as_deref().unwrap().contains("Uh oh"));

    clock.advance(chrono::Duration::days(30));
    assert_eq!(worker.process_next_job().await.unwrap(), None);

    let status = worker.create_utils().status("default").await.unwrap();
    assert_eq!(status.failed(), 1);
    assert_eq!(status.outstanding(), 0);
}

#[tokio::test]
async fn it_should_reschedule_without_counting_a_failure() {
    let (store, clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a").init().unwrap();
    let job = worker
        .create_utils()
        .add_job(
            &Retry {
                interval_secs: Some(60 * 60),
                ..Default::default()
            },
            JobSpec::default(),
        )
        .await
        .unwrap();
    let now = clock.now();

    let outcome = worker.process_next_job().await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Rescheduled { failure: None }));

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*stored.attempts(), 0);
    assert_eq!(*stored.run_at(), Some(now + chrono::Duration::hours(1)));
    assert!(!stored.is_locked());
    assert_eq!(stored.handler(), job.handler());

    assert_eq!(worker.process_next_job().await.unwrap(), None);

    clock.advance(chrono::Duration::minutes(59));
    assert_eq!(worker.process_next_job().await.unwrap(), None);

    clock.advance(chrono::Duration::minutes(1));
    assert!(matches!(
        worker.process_next_job().await.unwrap(),
        Some(JobOutcome::Rescheduled { .. })
    ));
}

#[tokio::test]
async fn it_should_default_the_retry_interval_to_two_hours() {
    let (store, clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a").init().unwrap();
    let job = worker
        .create_utils()
        .add_job(&Retry::default(), JobSpec::default())
        .await
        .unwrap();
    let now = clock.now();

    worker.process_next_job().await.unwrap();

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*stored.run_at(), Some(now + chrono::Duration::hours(2)));
}

#[tokio::test]
async fn it_should_count_a_retry_as_failure_when_asked() {
    let (store, _clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a")
        .max_attempts(2)
        .init()
        .unwrap();
    let job = worker
        .create_utils()
        .add_job(
            &Retry {
                interval_secs: Some(0),
                count_as_failure: true,
                ..Default::default()
            },
            JobSpec::default(),
        )
        .await
        .unwrap();

    let Some(JobOutcome::Rescheduled {
        failure: Some(failure),
    }) = worker.process_next_job().await.unwrap()
    else {
        panic!("expected a counted retry");
    };
    assert_eq!(failure.attempts(), 1);
    assert!(!failure.permanently());

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*stored.attempts(), 1);
    assert!(!stored.is_locked());

    let Some(JobOutcome::Rescheduled {
        failure: Some(failure),
    }) = worker.process_next_job().await.unwrap()
    else {
        panic!("expected a counted retry");
    };
    assert!(failure.permanently());

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert!(stored.is_failed());
    assert_eq!(*stored.attempts(), 2);
    assert!(stored.error().is_some());
}

#[tokio::test]
async fn it_should_keep_the_lock_when_asked() {
    let (store, clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a").init().unwrap();
    let job = worker
        .create_utils()
        .add_job(
            &Retry {
                interval_secs: Some(60),
                keep_lock: true,
                ..Default::default()
            },
            JobSpec::default(),
        )
        .await
        .unwrap();

    worker.process_next_job().await.unwrap();

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert!(stored.is_locked_by("worker-a"));
    assert_eq!(*stored.attempts(), 0);

    clock.advance(chrono::Duration::minutes(2));
    let other = claim_job(&store, "default", "worker-b", &ClaimOptions::default())
        .await
        .unwrap();
    assert!(other.is_none());
}

#[tokio::test]
async fn it_should_store_the_mutated_handler() {
    let (store, _clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a").init().unwrap();
    let job = worker
        .create_utils()
        .add_job(
            &Retry {
                interval_secs: Some(0),
                update_handler: true,
                ..Default::default()
            },
            JobSpec::default(),
        )
        .await
        .unwrap();

    worker.process_next_job().await.unwrap();
    worker.process_next_job().await.unwrap();

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    let payload = HandlerPayload::from_value(stored.handler()).unwrap();
    assert_eq!(payload.kind(), "retry");
    assert_eq!(payload.data()["runs"], json!(2));
}

#[tokio::test]
async fn it_should_replace_the_handler() {
    let (store, clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a").init().unwrap();
    let job = worker
        .create_utils()
        .add_job(&ReplaceWithSucceed, JobSpec::default())
        .await
        .unwrap();

    assert_eq!(
        worker.process_next_job().await.unwrap(),
        Some(JobOutcome::Rescheduled { failure: None })
    );
    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(
        HandlerPayload::from_value(stored.handler()).unwrap().kind(),
        "succeed"
    );

    clock.advance(chrono::Duration::hours(1));
    assert_eq!(
        worker.process_next_job().await.unwrap(),
        Some(JobOutcome::Completed)
    );
    assert!(store.get_job(*job.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn it_should_count_undecodable_handlers_as_failures() {
    let (store, _clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a").init().unwrap();
    let unknown = worker
        .create_utils()
        .add_raw_job(
            HandlerPayload::new("nobody_handles_this", json!({})),
            JobSpec::default(),
        )
        .await
        .unwrap();

    let Some(JobOutcome::Failed(failure)) = worker.process_next_job().await.unwrap() else {
        panic!("unknown handler kind should fail");
    };
    assert_eq!(failure.attempts(), 1);
    assert!(!failure.permanently());

    let stored = store.get_job(*unknown.id()).await.unwrap().unwrap();
    assert!(stored.failed_at().is_none());
    assert!(!stored.is_locked());
}

#[tokio::test]
async fn it_should_fail_malformed_payloads_like_any_other_error() {
    let (store, _clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a")
        .max_attempts(1)
        .init()
        .unwrap();
    let malformed = worker
        .create_utils()
        .add_raw_job(
            HandlerPayload::new("always_fail", json!({ "message": 42 })),
            JobSpec::default(),
        )
        .await
        .unwrap();

    let Some(JobOutcome::Failed(failure)) = worker.process_next_job().await.unwrap() else {
        panic!("malformed payload should fail");
    };
    assert!(failure.permanently());

    let stored = store.get_job(*malformed.id()).await.unwrap().unwrap();
    assert_eq!(*stored.attempts(), 1);
    assert!(stored.error().as_deref().unwrap().contains("always_fail"));
}

#[tokio::test]
async fn it_should_survive_a_panicking_handler() {
    let (store, _clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a")
        .max_attempts(1)
        .init()
        .unwrap();
    let job = worker
        .create_utils()
        .add_job(&Panics, JobSpec::default())
        .await
        .unwrap();

    let Some(JobOutcome::Failed(failure)) = worker.process_next_job().await.unwrap() else {
        panic!("panicking job should fail");
    };
    assert!(failure.permanently());

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert!(stored.error().as_deref().unwrap().contains("panicked"));
}

#[tokio::test]
async fn it_should_not_clobber_a_lock_taken_over_by_another_worker() {
    let (store, _clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a").init().unwrap();
    WorkerUtils::new(store.clone())
        .add_job(&Succeed, JobSpec::default())
        .await
        .unwrap();

    let job = claim_job(&store, "default", "worker-a", &ClaimOptions::default())
        .await
        .unwrap()
        .unwrap();

    store.release_locks("worker-a").await.unwrap();
    let taken = claim_job(
        &store,
        "default",
        "worker-b",
        &ClaimOptions::new(Duration::from_secs(60), 5),
    )
    .await
    .unwrap()
    .unwrap();

    let outcome = run_and_release_job(job, &worker).await.unwrap();
    assert_eq!(outcome, JobOutcome::LockLost);

    let stored = store.get_job(*taken.id()).await.unwrap().unwrap();
    assert!(stored.is_locked_by("worker-b"));
}

#[tokio::test]
async fn it_should_keep_the_lock_on_a_retry_counted_as_failure() {
    let (store, clock) = memory_store();
    let worker = worker_options(store.clone(), "worker-a")
        .max_attempts(2)
        .init()
        .unwrap();
    let job = worker
        .create_utils()
        .add_job(
            &Retry {
                interval_secs: Some(0),
                count_as_failure: true,
                keep_lock: true,
                ..Default::default()
            },
            JobSpec::default(),
        )
        .await
        .unwrap();

    let Some(JobOutcome::Rescheduled {
        failure: Some(failure),
    }) = worker.process_next_job().await.unwrap()
    else {
        panic!("expected a counted retry");
    };
    assert_eq!(failure.attempts(), 1);
    assert!(!failure.permanently());

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*stored.attempts(), 1);
    assert!(stored.is_locked_by("worker-a"));
    assert!(stored.failed_at().is_none());

    let Some(JobOutcome::Rescheduled {
        failure: Some(failure),
    }) = worker.process_next_job().await.unwrap()
    else {
        panic!("own lock should be reclaimed for the second attempt");
    };
    assert_eq!(failure.attempts(), 2);
    assert!(failure.permanently());

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*stored.attempts(), 2);
    assert_eq!(*stored.failed_at(), Some(clock.now()));
    assert!(stored.error().is_some());
    assert!(stored.is_locked_by("worker-a"));

    let status = worker.create_utils().status("default").await.unwrap();
    assert_eq!(status.total(), 1);
    assert_eq!(status.locked(), 1);
    assert_eq!(status.failed(), 1);
    assert_eq!(status.outstanding(), 0);

    assert_eq!(worker.process_next_job().await.unwrap(), None);
    clock.advance(chrono::Duration::hours(5));
    assert_eq!(worker.process_next_job().await.unwrap(), None);
    let other = claim_job(&store, "default", "worker-b", &ClaimOptions::default())
        .await
        .unwrap();
    assert!(other.is_none());

    let stored = store.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*stored.attempts(), 2);
}
