//! End-to-end runs of the code load pipeline against a temporary database

mod helpers;

use codecheck_common::events::{CodecheckEvent, EventBus};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use codecheck_jit::db::{jobs, jurisdiction_status, rules};
use codecheck_jit::error::Degradation;
use codecheck_jit::agents::source_discovery::default_code_set;
use codecheck_jit::models::{CodeSource, JobStatus, LoadStatus, LoadSummary, SourceType};
use codecheck_jit::services::{LoadOutcome, LoadRequest, ProgressSink};
use helpers::*;

fn summary_of(job: &codecheck_jit::models::AgentJob) -> &LoadSummary {
    job.result.as_ref().expect("completed job has a result")
}

async fn start(coordinator: &Arc<codecheck_jit::services::Coordinator>, refresh: bool) -> uuid::Uuid {
    let ticket = coordinator
        .load_codes(LoadRequest::new(boulder()).refresh(refresh))
        .await
        .unwrap();
    assert_eq!(ticket.outcome, LoadOutcome::Initiated);
    ticket.job_id.unwrap()
}

#[tokio::test]
async fn test_default_code_set_without_ai_completes() {
    let (_dir, pool) = test_db().await;
    let sink = Arc::new(RecordingSink::default());
    let coordinator = CoordinatorBuilder::new(&pool)
        .sink(sink.clone() as Arc<dyn ProgressSink>)
        .build_arc();

    let job_id = start(&coordinator, false).await;
    let job = wait_for_terminal(&pool, job_id).await;

    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error_message);
    assert_eq!(job.progress_percentage, 100);

    let summary = summary_of(&job);
    assert_eq!(summary.sources_found, 2);
    assert_eq!(summary.sources_used, 2);
    assert!(summary.rules_count > 0);
    assert_eq!(summary.sections_ai, 0);
    assert!(summary.sections_pattern > 0);
    assert!(summary
        .degradations
        .iter()
        .any(|d| matches!(d, Degradation::ConfigurationDegraded { .. })));

    let status = jurisdiction_status::get_status(&pool, BOULDER).await.unwrap().unwrap();
    assert_eq!(status.status, LoadStatus::Complete);
    assert_eq!(status.rules_count as usize, summary.rules_count);

    // At least one rule from each fetched document
    let stored = rules::list_rules(&pool, BOULDER, None).await.unwrap();
    let families: HashSet<&str> = stored.iter().map(|r| r.rule.code_family.as_str()).collect();
    assert!(families.contains("IRC"));
    assert!(families.contains("IBC"));
    assert!(stored.iter().all(|r| r.rule.confidence >= 0.5));
}

#[tokio::test]
async fn test_progress_never_decreases_and_ends_at_100() {
    let (_dir, pool) = test_db().await;
    let sink = Arc::new(RecordingSink::default());
    let coordinator = CoordinatorBuilder::new(&pool)
        .sink(sink.clone() as Arc<dyn ProgressSink>)
        .build_arc();

    let job_id = start(&coordinator, false).await;
    wait_for_terminal(&pool, job_id).await;
    wait_for_idle(&coordinator).await;

    let percentages = sink.percentages(job_id);
    assert!(percentages.len() > 5);
    assert!(percentages.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", percentages);
    assert_eq!(percentages.last().copied(), Some(100));
}

#[tokio::test]
async fn test_partial_fetch_failure_uses_remaining_sources() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool)
        .fetcher(StubFetcher::failing(&["IBC"]))
        .build_arc();

    let job = wait_for_terminal(&pool, start(&coordinator, false).await).await;
    assert_eq!(job.status, JobStatus::Completed);

    let summary = summary_of(&job);
    assert_eq!(summary.sources_found, 2);
    assert_eq!(summary.sources_used, 1);
    let fetch_failures: Vec<_> = summary
        .degradations
        .iter()
        .filter_map(|d| match d {
            Degradation::FetchFailed { source, reason } => Some((source.clone(), reason.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(fetch_failures.len(), 1);
    assert!(fetch_failures[0].0.contains("IBC"));
    assert!(fetch_failures[0].1.contains("503"));

    let stored = rules::list_rules(&pool, BOULDER, None).await.unwrap();
    assert!(!stored.is_empty());
    assert!(stored.iter().all(|r| r.rule.code_family == "IRC"));
}

#[tokio::test]
async fn test_local_source_without_remote_text_is_not_substituted() {
    let (_dir, pool) = test_db().await;
    let amendment = CodeSource::new("Colorado amendments", "IRC", "2018", "co-amendments", SourceType::Amendment)
        .with_applicability("CO");
    let mut sources = vec![amendment];
    sources.extend(default_code_set());
    let coordinator = CoordinatorBuilder::new(&pool)
        .discoverer(FixedDiscoverer::Sources(sources))
        .build_arc();

    let job = wait_for_terminal(&pool, start(&coordinator, false).await).await;
    assert_eq!(job.status, JobStatus::Completed);

    let summary = summary_of(&job);
    assert_eq!(summary.sources_found, 3);
    assert_eq!(summary.sources_used, 2);
    assert!(summary.degradations.iter().any(|d| matches!(
        d,
        Degradation::FetchFailed { source, reason } if source == "IRC 2018" && reason.contains("No retrievable text")
    )));

    let stored = rules::list_rules(&pool, BOULDER, None).await.unwrap();
    assert!(!stored.is_empty());
    assert!(stored.iter().all(|r| r.rule.edition == "2021"));
}

#[tokio::test]
async fn test_all_sources_failing_fails_the_load() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool)
        .fetcher(StubFetcher::failing(&["IRC", "IBC"]))
        .build_arc();

    let job = wait_for_terminal(&pool, start(&coordinator, false).await).await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error_message.unwrap();
    assert!(error.contains("No usable code sources"), "{}", error);

    let status = jurisdiction_status::get_status(&pool, BOULDER).await.unwrap().unwrap();
    assert_eq!(status.status, LoadStatus::Failed);
    assert_eq!(status.rules_count, 0);
    assert!(!status.error_message.unwrap_or_default().is_empty());
    assert_eq!(rules::count_rules(&pool, BOULDER).await.unwrap(), 0);
}

#[tokio::test]
async fn test_fetch_timeout_counts_as_failure() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool)
        .fetcher(StubFetcher::slow(Duration::from_secs(2)))
        .fetch_timeout(Duration::from_millis(50))
        .build_arc();

    let job = wait_for_terminal(&pool, start(&coordinator, false).await).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("all 2 sources"));
}

#[tokio::test]
async fn test_ai_failure_falls_back_to_patterns() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool).failing_ai().build_arc();
    assert!(coordinator.ai_enabled());

    let job = wait_for_terminal(&pool, start(&coordinator, false).await).await;
    assert_eq!(job.status, JobStatus::Completed);

    let summary = summary_of(&job);
    assert_eq!(summary.sections_ai, 0);
    assert!(summary.sections_pattern > 0);
    assert!(summary.rules_count > 0);
    assert!(summary
        .degradations
        .iter()
        .any(|d| matches!(d, Degradation::ExtractionDegraded { .. })));
    assert!(!summary
        .degradations
        .iter()
        .any(|d| matches!(d, Degradation::ConfigurationDegraded { .. })));
}

#[tokio::test]
async fn test_discovery_failure_uses_default_code_set() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool)
        .discoverer(FixedDiscoverer::Fails)
        .build_arc();

    let job = wait_for_terminal(&pool, start(&coordinator, false).await).await;
    assert_eq!(job.status, JobStatus::Completed);

    let summary = summary_of(&job);
    assert_eq!(summary.sources_found, 2);
    assert!(summary.degradations.iter().any(|d| matches!(
        d,
        Degradation::DiscoveryDegraded { reason } if reason.contains("catalog offline")
    )));
}

#[tokio::test]
async fn test_empty_discovery_uses_default_code_set() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool)
        .discoverer(FixedDiscoverer::Sources(Vec::new()))
        .build_arc();

    let job = wait_for_terminal(&pool, start(&coordinator, false).await).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(summary_of(&job).sources_used, 2);
}

#[tokio::test]
async fn test_failed_persistence_keeps_cached_rules() {
    let (_dir, pool) = test_db().await;

    let first = CoordinatorBuilder::new(&pool).build_arc();
    let job = wait_for_terminal(&pool, start(&first, false).await).await;
    assert_eq!(job.status, JobStatus::Completed);
    wait_for_idle(&first).await;
    let before = rules::list_rules(&pool, BOULDER, None).await.unwrap();
    assert!(!before.is_empty());

    let broken = CoordinatorBuilder::new(&pool).writer(FailingWriter).build_arc();
    let job = wait_for_terminal(&pool, start(&broken, true).await).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("Failed to save rules"));

    let after = rules::list_rules(&pool, BOULDER, None).await.unwrap();
    let before_ids: Vec<_> = before.iter().map(|r| r.id).collect();
    let after_ids: Vec<_> = after.iter().map(|r| r.id).collect();
    assert_eq!(before_ids, after_ids);

    // The cached set is still what the jurisdiction serves
    let status = jurisdiction_status::get_status(&pool, BOULDER).await.unwrap().unwrap();
    assert_eq!(status.status, LoadStatus::Complete);
    assert_eq!(status.rules_count as usize, after.len());
    assert!(status.error_message.unwrap().contains("Failed to save rules"));
}

#[tokio::test]
async fn test_trigger_while_loading_returns_existing_job() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool)
        .fetcher(StubFetcher::slow(Duration::from_millis(300)))
        .build_arc();

    let job_id = start(&coordinator, false).await;

    let second = coordinator.load_codes(LoadRequest::new(boulder())).await.unwrap();
    assert_eq!(second.outcome, LoadOutcome::Loading);
    assert_eq!(second.job_id, Some(job_id));

    // A refresh does not override a running load either
    let refresh = coordinator
        .load_codes(LoadRequest::new(boulder()).refresh(true))
        .await
        .unwrap();
    assert_eq!(refresh.outcome, LoadOutcome::Loading);

    wait_for_terminal(&pool, job_id).await;
    assert_eq!(jobs::list_jobs(&pool, BOULDER, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_triggers_start_one_job() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool)
        .fetcher(StubFetcher::slow(Duration::from_millis(200)))
        .build_arc();

    let tickets = join_all((0..8).map(|_| coordinator.load_codes(LoadRequest::new(boulder())))).await;
    let tickets: Vec<_> = tickets.into_iter().map(|t| t.unwrap()).collect();

    let initiated: Vec<_> = tickets
        .iter()
        .filter(|t| t.outcome == LoadOutcome::Initiated)
        .collect();
    assert_eq!(initiated.len(), 1);
    let job_id = initiated[0].job_id.unwrap();
    assert!(tickets.iter().all(|t| t.job_id == Some(job_id)));

    wait_for_terminal(&pool, job_id).await;
    assert_eq!(jobs::list_jobs(&pool, BOULDER, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_loaded_jurisdiction_needs_explicit_refresh() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool).build_arc();

    let first = start(&coordinator, false).await;
    wait_for_terminal(&pool, first).await;
    wait_for_idle(&coordinator).await;

    let again = coordinator.load_codes(LoadRequest::new(boulder())).await.unwrap();
    assert_eq!(again.outcome, LoadOutcome::AlreadyLoaded);
    assert_eq!(again.job_id, Some(first));

    let refreshed = start(&coordinator, true).await;
    assert_ne!(refreshed, first);
    let job = wait_for_terminal(&pool, refreshed).await;
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_failed_jurisdiction_is_retriable() {
    let (_dir, pool) = test_db().await;

    let broken = CoordinatorBuilder::new(&pool)
        .fetcher(StubFetcher::failing(&["IRC", "IBC"]))
        .build_arc();
    let failed = wait_for_terminal(&pool, start(&broken, false).await).await;
    assert_eq!(failed.status, JobStatus::Failed);
    wait_for_idle(&broken).await;

    let working = CoordinatorBuilder::new(&pool).build_arc();
    let job = wait_for_terminal(&pool, start(&working, false).await).await;
    assert_eq!(job.status, JobStatus::Completed);

    let status = jurisdiction_status::get_status(&pool, BOULDER).await.unwrap().unwrap();
    assert_eq!(status.status, LoadStatus::Complete);
    assert!(status.error_message.is_none());
}

#[tokio::test]
async fn test_cancel_fails_job_and_releases_jurisdiction() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool)
        .fetcher(StubFetcher::slow(Duration::from_secs(2)))
        .build_arc();

    let job_id = start(&coordinator, false).await;
    assert!(coordinator.cancel(job_id).await.unwrap());

    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("Load cancelled by administrator"));

    wait_for_idle(&coordinator).await;

    // The background run stopped without touching the terminal job
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let status = jurisdiction_status::get_status(&pool, BOULDER).await.unwrap().unwrap();
    assert_eq!(status.status, LoadStatus::Failed);
    assert_eq!(rules::count_rules(&pool, BOULDER).await.unwrap(), 0);

    assert!(!coordinator.cancel(job_id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_unknown_job_is_not_found() {
    let (_dir, pool) = test_db().await;
    let coordinator = CoordinatorBuilder::new(&pool).build_arc();
    let err = coordinator.cancel(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, codecheck_common::Error::NotFound(_)));
}

#[tokio::test]
async fn test_lifecycle_events_are_broadcast() {
    let (_dir, pool) = test_db().await;
    let bus = EventBus::new(1024);
    let mut rx = bus.subscribe();
    let coordinator = CoordinatorBuilder::new(&pool).event_bus(bus).build_arc();

    let job_id = start(&coordinator, false).await;

    let mut seen = Vec::new();
    let completed = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            let event = rx.recv().await.unwrap();
            let done = matches!(event, CodecheckEvent::LoadCompleted { .. });
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    assert!(completed.is_ok(), "no LoadCompleted event");

    assert!(matches!(seen.first(), Some(CodecheckEvent::LoadStarted { .. })));
    assert!(seen.iter().all(|e| e.job_id() == job_id));
    assert!(seen
        .iter()
        .any(|e| matches!(e, CodecheckEvent::LoadProgress { stage, .. } if stage == "extraction")));
    match seen.last() {
        Some(CodecheckEvent::LoadCompleted { rules_count, .. }) => assert!(*rules_count > 0),
        other => panic!("unexpected final event {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_event_carries_message() {
    let (_dir, pool) = test_db().await;
    let bus = EventBus::new(1024);
    let mut rx = bus.subscribe();
    let coordinator = CoordinatorBuilder::new(&pool)
        .event_bus(bus)
        .fetcher(StubFetcher::failing(&["IRC", "IBC"]))
        .build_arc();

    start(&coordinator, false).await;

    let message = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if let CodecheckEvent::LoadFailed { error_message, .. } = rx.recv().await.unwrap() {
                return error_message;
            }
        }
    })
    .await
    .expect("no LoadFailed event");
    assert!(message.contains("No usable code sources"));
}
