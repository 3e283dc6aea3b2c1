//! End-to-end coordination tests.
//!
//! Each test drives the public API the way the CLI does: documents in a
//! SQLite file, one or more `ConversionService` + worker pool pairs on top,
//! and a fake converter standing in for the PDF download.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use papertext::converter::{ConversionError, Converter};
use papertext::models::{ConversionStatus, DocumentSource};
use papertext::repository::{ClaimPolicy, ConversionRepository, DbContext, DocumentRepository};
use papertext::{ConversionService, ConversionWorker, CoordinationError, DispatchQueue};
use tempfile::{tempdir, TempDir};

/// Plays back scripted results, then converts successfully.
struct FakeConverter {
    script: Mutex<VecDeque<Result<String, ConversionError>>>,
    calls: AtomicUsize,
    latency: Duration,
}

impl FakeConverter {
    fn new(script: Vec<Result<String, ConversionError>>) -> Arc<Self> {
        Self::slow(script, Duration::ZERO)
    }

    fn slow(script: Vec<Result<String, ConversionError>>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            latency,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Converter for FakeConverter {
    fn convert(&self, external_ref: &str) -> Result<String, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("Full text of arXiv:{external_ref}")))
    }
}

/// One process worth of coordination sharing the test database.
struct Node {
    service: ConversionService,
    queue: Arc<DispatchQueue>,
    worker: Arc<ConversionWorker>,
}

impl Node {
    fn new(
        ctx: &DbContext,
        policy: ClaimPolicy,
        converter: Arc<FakeConverter>,
        retry_base_delay: Duration,
    ) -> Self {
        let conversions = ctx.conversions(policy);
        let queue = Arc::new(DispatchQueue::new());
        let service = ConversionService::new(
            Arc::new(ctx.documents()),
            conversions.clone(),
            queue.clone(),
            Duration::from_secs(10),
        );
        let worker = Arc::new(ConversionWorker::new(
            conversions,
            converter,
            retry_base_delay,
        ));
        Self {
            service,
            queue,
            worker,
        }
    }

    async fn start(&self, workers: usize) {
        let started = self
            .queue
            .start_workers(workers, self.worker.clone())
            .await
            .unwrap();
        assert_eq!(started, workers);
    }

    async fn stop(&self) -> bool {
        self.queue.stop_workers(Duration::from_secs(5)).await
    }
}

async fn database() -> (DbContext, DocumentRepository, TempDir) {
    let dir = tempdir().unwrap();
    let ctx = DbContext::new(&dir.path().join("papertext.db"));
    ctx.init_schema().await.unwrap();
    let documents = ctx.documents();
    (ctx, documents, dir)
}

/// Poll the store until `check` holds or five seconds pass.
async fn eventually<F>(conversions: &ConversionRepository, document_id: i64, check: F)
where
    F: Fn(Option<&papertext::models::ConversionRecord>) -> bool,
{
    for _ in 0..250 {
        let record = conversions.get(document_id).await.unwrap();
        if check(record.as_ref()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition on document {document_id} never held");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_from_two_nodes_convert_once() {
    let (ctx, documents, _dir) = database().await;
    let doc = documents
        .add(DocumentSource::Arxiv, "2403.01234", Some("Shared paper"))
        .await
        .unwrap();

    let converter = FakeConverter::slow(vec![], Duration::from_millis(200));
    let a = Node::new(&ctx, ClaimPolicy::default(), converter.clone(), Duration::from_millis(10));
    let b = Node::new(&ctx, ClaimPolicy::default(), converter.clone(), Duration::from_millis(10));
    a.start(2).await;
    b.start(2).await;

    let (text_a, text_b) = tokio::join!(
        a.service.get_or_wait_for_text(doc.id),
        b.service.get_or_wait_for_text(doc.id),
    );

    assert_eq!(text_a.unwrap(), "Full text of arXiv:2403.01234");
    assert_eq!(text_b.unwrap(), "Full text of arXiv:2403.01234");
    assert_eq!(converter.calls(), 1);

    let record = ctx
        .conversions(ClaimPolicy::default())
        .get(doc.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ConversionStatus::Succeeded);
    assert_eq!(record.retry_count, 0);
    assert!(record.owner_token.is_none());

    assert!(a.stop().await);
    assert!(b.stop().await);
}

#[tokio::test]
async fn flaky_download_is_retried_until_it_succeeds() {
    let (ctx, documents, _dir) = database().await;
    let doc = documents
        .add(DocumentSource::Arxiv, "2401.00001", None)
        .await
        .unwrap();

    let converter = FakeConverter::new(vec![
        Err(ConversionError::Retryable("HTTP 503".to_string())),
        Err(ConversionError::Retryable("connection reset".to_string())),
    ]);
    let node = Node::new(&ctx, ClaimPolicy::default(), converter.clone(), Duration::from_millis(20));
    node.start(1).await;

    let text = node
        .service
        .get_or_wait_for_text_within(doc.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(text, "Full text of arXiv:2401.00001");
    assert_eq!(converter.calls(), 3);

    let record = ctx
        .conversions(ClaimPolicy::default())
        .get(doc.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.status, ConversionStatus::Succeeded);
    assert!(record.error_message.is_none());

    assert!(node.stop().await);
}

#[tokio::test]
async fn retries_run_out_and_callers_see_exhaustion() {
    let (ctx, documents, _dir) = database().await;
    let doc = documents
        .add(DocumentSource::Arxiv, "2401.99999", None)
        .await
        .unwrap();

    let policy = ClaimPolicy {
        max_retries: 2,
        ..ClaimPolicy::default()
    };
    let converter = FakeConverter::new(vec![
        Err(ConversionError::Retryable("timeout".to_string())),
        Err(ConversionError::Retryable("timeout again".to_string())),
    ]);
    let node = Node::new(&ctx, policy, converter.clone(), Duration::from_millis(10));
    node.start(1).await;

    let err = node
        .service
        .get_or_wait_for_text_within(doc.id, Duration::from_secs(10))
        .await
        .unwrap_err();
    match err {
        CoordinationError::Exhausted {
            document_id,
            message,
        } => {
            assert_eq!(document_id, doc.id);
            assert_eq!(message, "timeout again");
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(converter.calls(), 2);

    // A terminal failure is reported straight away and never re-queued
    assert!(!node.service.trigger_conversion(doc.id).await.unwrap());
    assert!(node.stop().await);
    assert_eq!(converter.calls(), 2);
}

#[tokio::test]
async fn three_retryable_failures_exhaust_the_default_budget() {
    let (ctx, documents, _dir) = database().await;
    let doc = documents
        .add(DocumentSource::Arxiv, "2406.00003", None)
        .await
        .unwrap();

    let policy = ClaimPolicy {
        max_retries: 3,
        ..ClaimPolicy::default()
    };
    let converter = FakeConverter::new(vec![
        Err(ConversionError::Retryable("HTTP 500".to_string())),
        Err(ConversionError::Retryable("HTTP 502".to_string())),
        Err(ConversionError::Retryable("HTTP 504".to_string())),
    ]);
    let node = Node::new(&ctx, policy, converter.clone(), Duration::from_millis(10));
    node.start(1).await;

    assert!(node.service.trigger_conversion(doc.id).await.unwrap());
    let status = node
        .service
        .wait_for_completion(doc.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(status, ConversionStatus::Failed);
    assert!(node.stop().await);
    assert_eq!(converter.calls(), 3);

    let record = ctx.conversions(policy).get(doc.id).await.unwrap().unwrap();
    assert_eq!(record.status, ConversionStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert!(record.owner_token.is_none());
    assert_eq!(record.error_message.as_deref(), Some("HTTP 504"));

    assert!(!node.service.trigger_conversion(doc.id).await.unwrap());
    match node.service.get_or_wait_for_text(doc.id).await {
        Err(CoordinationError::Exhausted { message, .. }) => assert_eq!(message, "HTTP 504"),
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(node.queue.queue_size(), 0);
}

#[tokio::test]
async fn abandoned_claim_is_taken_over_after_stale_window() {
    let (ctx, documents, _dir) = database().await;
    let doc = documents
        .add(DocumentSource::Arxiv, "2402.04242", None)
        .await
        .unwrap();

    let policy = ClaimPolicy {
        stale_window: Duration::from_millis(300),
        ..ClaimPolicy::default()
    };
    let conversions = ctx.conversions(policy);

    // A worker in a process that has since died
    conversions.get_or_create_pending(doc.id).await.unwrap();
    assert!(conversions.try_claim(doc.id, "gone@elsewhere:1").await.unwrap().claimed);

    let converter = FakeConverter::new(vec![]);
    let node = Node::new(&ctx, policy, converter.clone(), Duration::from_millis(10));
    node.start(1).await;

    // Fresh claim: nothing to do yet
    assert!(!node.service.trigger_conversion(doc.id).await.unwrap());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let text = node
        .service
        .get_or_wait_for_text_within(doc.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(text, "Full text of arXiv:2402.04242");
    assert_eq!(converter.calls(), 1);

    // The original owner can no longer finalize
    assert!(!conversions
        .mark_succeeded(doc.id, "gone@elsewhere:1", "late text")
        .await
        .unwrap());
    assert_eq!(
        conversions.get(doc.id).await.unwrap().unwrap().text.as_deref(),
        Some("Full text of arXiv:2402.04242")
    );

    assert!(node.stop().await);
}

#[tokio::test]
async fn retry_waiting_at_shutdown_resumes_after_restart() {
    let (ctx, documents, _dir) = database().await;
    let doc = documents
        .add(DocumentSource::Arxiv, "2405.11111", None)
        .await
        .unwrap();
    let conversions = ctx.conversions(ClaimPolicy::default());

    let converter = FakeConverter::new(vec![Err(ConversionError::Retryable(
        "HTTP 502".to_string(),
    ))]);

    // First run: the retry is scheduled far in the future
    let first = Node::new(&ctx, ClaimPolicy::default(), converter.clone(), Duration::from_secs(60));
    first.start(1).await;
    assert!(first.service.trigger_conversion(doc.id).await.unwrap());

    eventually(&conversions, doc.id, |r| r.is_some_and(|r| r.retry_count == 1)).await;
    // Give the worker time to pick the delayed descriptor back up
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(first.stop().await);
    assert_eq!(first.queue.queue_size(), 1);
    assert_eq!(first.queue.in_flight(), 0);

    let record = conversions.get(doc.id).await.unwrap().unwrap();
    assert_eq!(record.status, ConversionStatus::Pending);
    assert_eq!(record.error_message.as_deref(), Some("HTTP 502"));
    assert_eq!(converter.calls(), 1);

    // Second run: a new process recovers the record from the store
    let second = Node::new(&ctx, ClaimPolicy::default(), converter.clone(), Duration::from_secs(60));
    second.start(1).await;
    assert_eq!(second.service.recover_pending(100).await.unwrap(), 1);

    eventually(&conversions, doc.id, |r| {
        r.is_some_and(|r| r.status == ConversionStatus::Succeeded)
    })
    .await;
    assert_eq!(converter.calls(), 2);
    assert_eq!(
        second.service.get_or_wait_for_text(doc.id).await.unwrap(),
        "Full text of arXiv:2405.11111"
    );

    assert!(second.stop().await);
}

#[tokio::test]
async fn unsupported_documents_are_refused_without_side_effects() {
    let (ctx, documents, _dir) = database().await;
    let upload = documents
        .add(DocumentSource::Upload, "scan-0001.pdf", None)
        .await
        .unwrap();

    let converter = FakeConverter::new(vec![]);
    let node = Node::new(&ctx, ClaimPolicy::default(), converter.clone(), Duration::from_millis(10));

    assert!(matches!(
        node.service.get_or_wait_for_text(upload.id).await,
        Err(CoordinationError::UnsupportedSource { .. })
    ));
    assert!(matches!(
        node.service.trigger_conversion(upload.id + 1000).await,
        Err(CoordinationError::NotFound(_))
    ));

    let counts = ctx
        .conversions(ClaimPolicy::default())
        .count_by_status()
        .await
        .unwrap();
    assert!(counts.values().all(|&n| n == 0));
    assert_eq!(node.queue.queue_size(), 0);
    assert_eq!(converter.calls(), 0);
}
