//! Processing loop integration tests
//!
//! Drives the loop against the in-memory queue and checks fault routing,
//! the process-health ceiling and environment lifecycle.


use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{candidates, processing_loop};
use workqueue_runner::error::RunnerError;
use workqueue_runner::fault::FaultKind;
use workqueue_runner::notify::FaultAlerts;
use workqueue_runner::processing::{ProcessingConfig, ProcessingLoop};
use workqueue_runner::queue::ItemStatus;
use workqueue_runner::testing::{
    EnvEvent, MockEnvironment, MockItemProcessor, MockNotifier, MockWorkQueue, Outcome,
};

fn business(msg: &str) -> Outcome {
    Outcome::Business(msg.to_string())
}

fn fail(msg: &str) -> Outcome {
    Outcome::Fail(msg.to_string())
}

#[tokio::test]
async fn test_health_ceiling_scenario() {
    // Faults B, P, B, P, B with a ceiling of 2
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(5)));
    let env = MockEnvironment::new();
    let notifier = Arc::new(MockNotifier::new());
    let processor = MockItemProcessor::scripted(vec![
        business("needs review 1"),
        fail("crash 1"),
        business("needs review 2"),
        fail("crash 2"),
        business("needs review 3"),
    ]);

    let err = processing_loop(queue.clone(), processor.clone(), env.clone(), notifier.clone(), 2)
        .run()
        .await
        .unwrap_err();

    match &err {
        RunnerError::HealthBudgetExhausted { faults, last } => {
            assert_eq!(*faults, 2);
            assert_eq!(last.kind, FaultKind::Process);
            assert_eq!(last.message, "crash 2");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.escalation_detail().message, "crash 2");
    assert!(!err.already_notified());

    let resolutions = queue.resolutions().await;
    let count = |status| resolutions.iter().filter(|r| r.status == status).count();
    assert_eq!(count(ItemStatus::PendingUser), 3);
    assert_eq!(count(ItemStatus::Failed), 2);
    assert_eq!(count(ItemStatus::Completed), 0);

    // startup, two resets, one final close
    assert_eq!(
        env.events(),
        vec![
            EnvEvent::Startup,
            EnvEvent::SoftShutdown,
            EnvEvent::Startup,
            EnvEvent::SoftShutdown,
            EnvEvent::Startup,
            EnvEvent::SoftShutdown,
        ]
    );
    assert_eq!(processor.calls().len(), 5);
    assert_eq!(notifier.notifications().len(), 2);
}

#[tokio::test]
async fn test_every_item_resolved_exactly_once() {
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(9)));
    let processor = MockItemProcessor::scripted(vec![
        Outcome::Succeed,
        fail("x"),
        business("y"),
        Outcome::Succeed,
        fail("z"),
        Outcome::Succeed,
        business("w"),
        Outcome::Succeed,
        Outcome::Succeed,
    ]);

    let report = processing_loop(
        queue.clone(),
        processor,
        MockEnvironment::new(),
        Arc::new(MockNotifier::new()),
        10,
    )
    .run()
    .await
    .unwrap();

    let resolutions = queue.resolutions().await;
    assert_eq!(resolutions.len(), 9);
    let ids: HashSet<u64> = resolutions.iter().map(|r| r.item_id).collect();
    assert_eq!(ids.len(), 9);
    assert_eq!(report.completed + report.pending_user + report.failed, 9);
    assert_eq!(report.failed, 2);
    assert_eq!(report.resets, 2);
    assert_eq!(queue.pending_count().await, 0);
}

#[tokio::test]
async fn test_ceiling_checked_only_between_passes() {
    // Three process faults in one pass with a ceiling of 1: the pass still
    // drains the queue before the run stops.
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(3)));
    let processor = MockItemProcessor::scripted(vec![fail("a"), fail("b"), fail("c")]);

    let err = processing_loop(
        queue.clone(),
        processor.clone(),
        MockEnvironment::new(),
        Arc::new(MockNotifier::new()),
        1,
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, RunnerError::HealthBudgetExhausted { faults: 3, .. }));
    assert_eq!(processor.calls().len(), 3);
}

#[tokio::test]
async fn test_below_ceiling_rescans_and_finishes() {
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(2)));
    let processor = MockItemProcessor::scripted(vec![fail("flaky"), Outcome::Succeed]);

    let report = processing_loop(
        queue,
        processor,
        MockEnvironment::new(),
        Arc::new(MockNotifier::new()),
        3,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.passes, 2);
    assert_eq!(report.process_faults, 1);
    assert_eq!(report.completed, 1);
}

#[tokio::test]
async fn test_reset_failure_is_fatal_and_closes_once() {
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(3)));
    let env = MockEnvironment::new().failing_restart();
    let processor = MockItemProcessor::scripted(vec![fail("crash")]);

    let err = processing_loop(queue.clone(), processor.clone(), env.clone(), Arc::new(MockNotifier::new()), 5)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::EnvironmentFailed { .. }));
    assert_eq!(err.escalation_detail().kind, FaultKind::Process);
    // Remaining items are left untouched for the next run
    assert_eq!(processor.calls().len(), 1);
    assert_eq!(queue.pending_count().await, 2);
    assert_eq!(
        env.events(),
        vec![
            EnvEvent::Startup,
            EnvEvent::SoftShutdown,
            EnvEvent::Startup,
            EnvEvent::SoftShutdown,
        ]
    );
}

#[tokio::test]
async fn test_soft_close_failure_falls_back_to_hard() {
    let queue = Arc::new(MockWorkQueue::new());
    let env = MockEnvironment::new().failing_soft_shutdown();

    processing_loop(queue, MockItemProcessor::succeeding(), env.clone(), Arc::new(MockNotifier::new()), 3)
        .run()
        .await
        .unwrap();

    assert_eq!(
        env.events(),
        vec![EnvEvent::Startup, EnvEvent::SoftShutdown, EnvEvent::HardShutdown]
    );
}

#[tokio::test]
async fn test_failed_completion_becomes_process_fault() {
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(1)).failing_status(ItemStatus::Completed));
    let env = MockEnvironment::new();

    let report = processing_loop(queue.clone(), MockItemProcessor::succeeding(), env, Arc::new(MockNotifier::new()), 3)
        .run()
        .await
        .unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.resets, 1);
    assert_eq!(queue.resolutions().await[0].status, ItemStatus::Failed);
}

#[tokio::test]
async fn test_process_fault_notification_can_be_disabled() {
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(1)));
    let notifier = Arc::new(MockNotifier::new());

    let report = ProcessingLoop::new(
        queue,
        Arc::new(MockItemProcessor::scripted(vec![fail("quiet")])),
        MockEnvironment::new(),
        FaultAlerts::new(notifier.clone(), "quiet-process"),
        ProcessingConfig {
            max_retry: 3,
            item_timeout: None,
            notify_on_process_fault: false,
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(notifier.attempts(), 0);
}

#[tokio::test]
async fn test_notifier_failure_does_not_stop_processing() {
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(2)));
    let notifier = Arc::new(MockNotifier::failing());
    let processor = MockItemProcessor::scripted(vec![fail("first"), Outcome::Succeed]);

    let report = processing_loop(queue, processor, MockEnvironment::new(), notifier.clone(), 3)
        .run()
        .await
        .unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(notifier.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_item_times_out() {
    let queue = Arc::new(MockWorkQueue::with_pending(candidates(2)));
    let processor = MockItemProcessor::scripted(vec![Outcome::Hang, Outcome::Succeed]);

    let report = ProcessingLoop::new(
        queue.clone(),
        Arc::new(processor),
        MockEnvironment::new(),
        FaultAlerts::new(Arc::new(MockNotifier::new()), "timeouts"),
        ProcessingConfig {
            max_retry: 3,
            item_timeout: Some(Duration::from_secs(5)),
            notify_on_process_fault: true,
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);
    let failed = queue
        .resolutions()
        .await
        .into_iter()
        .find(|r| r.status == ItemStatus::Failed)
        .unwrap();
    assert!(failed.message.contains("item processing timed out after 5s"));
}

#[tokio::test]
async fn test_rejected_fail_is_counted_as_release_failure() {
    let queue = Arc::new(
        MockWorkQueue::with_pending(candidates(1)).failing_status(ItemStatus::Failed),
    );
    let env = MockEnvironment::new();
    let notifier = Arc::new(MockNotifier::new());
    let processor = MockItemProcessor::scripted(vec![fail("crash")]);

    let report = processing_loop(queue.clone(), processor, env, notifier.clone(), 2)
        .run()
        .await
        .unwrap();

    assert_eq!(report.failed, 0);
    assert_eq!(report.release_failures, 1);
    assert_eq!(report.process_faults, 1);
    assert_eq!(report.resets, 1);
    assert!(queue.resolutions().await.is_empty());
    assert_eq!(notifier.notifications().len(), 1);

    // The dropped handle retries the release on a spawned task
    let mut attempts = Vec::new();
    for _ in 0..50 {
        attempts = queue.status_attempts().await;
        if attempts.len() >= 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(attempts.len(), 2);
    assert!(attempts
        .iter()
        .all(|(id, status)| *id == 1 && *status == ItemStatus::Failed));
}
