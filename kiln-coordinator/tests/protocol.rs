//! End-to-end runner protocol tests over a real socket

use std::sync::Arc;

use kiln_client::{ArtifactDownload, ClientError, CoordinatorClient, PollResponse, PollState};
use kiln_coordinator::repository::FsBlobStore;
use kiln_coordinator::{AppState, Config, Stores, create_router};
use kiln_core::domain::job::JobState;
use kiln_core::domain::token::RunnerToken;
use kiln_core::dto::error::ReasonCode;
use kiln_core::dto::job::{JobDescriptor, TraceSnippet};
use tokio::net::TcpListener;

const RUNNER_A: &str = "runner-token-a";
const RUNNER_B: &str = "runner-token-b";

struct Coordinator {
    state: AppState,
    client: CoordinatorClient,
}

async fn spawn_with(stores: Stores, config: Config) -> Coordinator {
    let state = AppState::new(stores, &config);
    for token in [RUNNER_A, RUNNER_B] {
        state
            .runners
            .provision(RunnerToken::parse(token).unwrap(), token)
            .await
            .unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Coordinator {
        state,
        client: CoordinatorClient::new(format!("http://{}", addr)),
    }
}

async fn spawn() -> Coordinator {
    spawn_with(Stores::in_memory(), Config::default()).await
}

async fn assigned(coordinator: &Coordinator, token: &str) -> JobDescriptor {
    let mut poll = PollState::default();
    match coordinator
        .client
        .request_job(token, &mut poll, None)
        .await
        .unwrap()
    {
        PollResponse::Assigned(job) => job,
        other => panic!("expected a job, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_poll_then_echo_is_not_modified() {
    let coordinator = spawn().await;
    let mut poll = PollState::default();

    let first = coordinator
        .client
        .request_job(RUNNER_A, &mut poll, None)
        .await
        .unwrap();
    let PollResponse::NoWork { marker } = first else {
        panic!("expected no work, got {:?}", first);
    };
    assert_eq!(poll.last_update(), Some(marker.as_str()));

    let second = coordinator
        .client
        .request_job(RUNNER_A, &mut poll, None)
        .await
        .unwrap();
    assert!(matches!(second, PollResponse::NotModified));

    // New work invalidates the echoed marker
    coordinator
        .state
        .dispatcher
        .enqueue(serde_json::json!({ "script": "make" }))
        .await
        .unwrap();
    let third = coordinator
        .client
        .request_job(RUNNER_A, &mut poll, None)
        .await
        .unwrap();
    assert!(matches!(third, PollResponse::Assigned(_)));
    assert_eq!(poll.last_update(), None);
}

#[tokio::test]
async fn test_concurrent_runners_never_share_a_job() {
    let coordinator = spawn().await;
    coordinator
        .state
        .dispatcher
        .enqueue(serde_json::Value::Null)
        .await
        .unwrap();

    let mut poll_a = PollState::default();
    let mut poll_b = PollState::default();
    let (a, b) = tokio::join!(
        coordinator.client.request_job(RUNNER_A, &mut poll_a, None),
        coordinator.client.request_job(RUNNER_B, &mut poll_b, None),
    );

    let assigned = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(|poll| matches!(poll, PollResponse::Assigned(_)))
        .count();
    assert_eq!(assigned, 1);
}

#[tokio::test]
async fn test_unknown_runner_is_rejected() {
    let coordinator = spawn().await;

    let err = coordinator
        .client
        .verify_runner("not-provisioned", None)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some(ReasonCode::Unauthorized));

    let runner = coordinator.client.verify_runner(RUNNER_A, None).await.unwrap();
    assert_eq!(runner.description, RUNNER_A);
}

#[tokio::test]
async fn test_trace_offsets_are_enforced() {
    let coordinator = spawn().await;
    coordinator
        .state
        .dispatcher
        .enqueue(serde_json::Value::Null)
        .await
        .unwrap();
    let job = assigned(&coordinator, RUNNER_A).await;
    let token = job.token.as_str();

    let receipt = coordinator
        .client
        .append_trace(job.id, token, 0, &[b'a'; 100])
        .await
        .unwrap();
    assert_eq!(receipt.length, 100);
    assert_eq!(receipt.job_status, JobState::Running);

    let err = coordinator
        .client
        .append_trace(job.id, token, 50, &[b'b'; 50])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RangeConflict { current_length: 100 }));

    let receipt = coordinator
        .client
        .append_trace(job.id, token, 100, &[b'c'; 50])
        .await
        .unwrap();
    assert_eq!(receipt.length, 150);

    let trace = coordinator.client.get_trace(job.id, token).await.unwrap();
    assert_eq!(trace.len(), 150);
    assert!(trace[..100].iter().all(|b| *b == b'a'));
    assert!(trace[100..].iter().all(|b| *b == b'c'));
}

#[tokio::test]
async fn test_trace_resync_after_conflict() {
    let coordinator = spawn().await;
    coordinator
        .state
        .dispatcher
        .enqueue(serde_json::Value::Null)
        .await
        .unwrap();
    let job = assigned(&coordinator, RUNNER_A).await;
    let token = job.token.as_str();

    let local = b"line one\nline two\nline three\n".to_vec();
    coordinator
        .client
        .append_trace(job.id, token, 0, &local[..9])
        .await
        .unwrap();

    // Runner believes nothing was sent yet
    let receipt = coordinator
        .client
        .append_trace_resync(job.id, token, &local, 0)
        .await
        .unwrap();
    assert_eq!(receipt.length, local.len() as u64);

    let status = coordinator.client.trace_status(job.id, token).await.unwrap();
    assert_eq!(status.length, local.len() as u64);
    assert_eq!(
        coordinator.client.get_trace(job.id, token).await.unwrap(),
        local
    );
}

#[tokio::test]
async fn test_completion_closes_the_trace() {
    let coordinator = spawn().await;
    coordinator
        .state
        .dispatcher
        .enqueue(serde_json::Value::Null)
        .await
        .unwrap();
    let job = assigned(&coordinator, RUNNER_A).await;
    let token = job.token.as_str();

    let updated = coordinator
        .client
        .update_job(job.id, RUNNER_A, JobState::Running, None)
        .await
        .unwrap();
    assert_eq!(updated.state, JobState::Running);

    let updated = coordinator
        .client
        .update_job(
            job.id,
            RUNNER_A,
            JobState::Success,
            Some(TraceSnippet {
                offset: 0,
                content: "ok\n".to_string(),
            }),
        )
        .await
        .unwrap();
    assert_eq!(updated.state, JobState::Success);
    assert_eq!(updated.trace_length, 3);

    let err = coordinator
        .client
        .append_trace(job.id, token, 3, b"late")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some(ReasonCode::NotRunning));

    // Another runner cannot report on this job
    let err = coordinator
        .client
        .update_job(job.id, RUNNER_B, JobState::Failed, None)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some(ReasonCode::Conflict));
}

#[tokio::test]
async fn test_artifact_size_ceiling() {
    let config = Config {
        max_artifact_size: 5000,
        ..Config::default()
    };
    let coordinator = spawn_with(Stores::in_memory(), config).await;
    coordinator
        .state
        .dispatcher
        .enqueue(serde_json::Value::Null)
        .await
        .unwrap();
    let job = assigned(&coordinator, RUNNER_A).await;
    assert_eq!(job.artifacts_max_size, Some(5000));
    let token = job.token.as_str();

    let permit = coordinator
        .client
        .authorize_artifacts(job.id, token, Some(1000))
        .await
        .unwrap();
    assert_eq!(permit.max_size, 5000);
    assert_eq!(permit.declared_size, Some(1000));

    let err = coordinator
        .client
        .upload_artifacts(
            job.id,
            token,
            "artifacts.zip",
            vec![0u8; 6000],
            b"meta".to_vec(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some(ReasonCode::PayloadTooLarge));
}

#[tokio::test]
async fn test_artifact_lifecycle() {
    let coordinator = spawn().await;
    coordinator
        .state
        .dispatcher
        .enqueue(serde_json::Value::Null)
        .await
        .unwrap();
    let job = assigned(&coordinator, RUNNER_A).await;
    let token = job.token.as_str();

    let archive = b"PK fake archive".to_vec();
    let descriptor = coordinator
        .client
        .upload_artifacts(
            job.id,
            token,
            "artifacts.zip",
            archive.clone(),
            b"meta".to_vec(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(descriptor.file_name, "artifacts.zip");
    assert_eq!(descriptor.size, archive.len() as u64);
    assert!(descriptor.expire_at.is_some());

    let download = coordinator
        .client
        .download_artifacts(job.id, token)
        .await
        .unwrap();
    assert_eq!(download, ArtifactDownload::Inline(archive));

    coordinator.client.erase_artifacts(job.id, token).await.unwrap();
    coordinator.client.erase_artifacts(job.id, token).await.unwrap();

    let err = coordinator
        .client
        .download_artifacts(job.id, token)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = coordinator
        .client
        .append_trace(job.id, token, 0, b"after erase")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some(ReasonCode::Erased));
}

#[tokio::test]
async fn test_public_store_redirects_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = FsBlobStore::new(dir.path()).with_public_url("https://cdn.example.com/");
    let stores = Stores::in_memory().with_blobs(Arc::new(blobs));
    let coordinator = spawn_with(stores, Config::default()).await;
    coordinator
        .state
        .dispatcher
        .enqueue(serde_json::Value::Null)
        .await
        .unwrap();
    let job = assigned(&coordinator, RUNNER_A).await;
    let token = job.token.as_str();

    coordinator
        .client
        .upload_artifacts(
            job.id,
            token,
            "out.tar.gz",
            b"tarball".to_vec(),
            b"meta".to_vec(),
            None,
        )
        .await
        .unwrap();

    let download = coordinator
        .client
        .download_artifacts(job.id, token)
        .await
        .unwrap();
    let ArtifactDownload::Redirect(url) = download else {
        panic!("expected a redirect, got {:?}", download);
    };
    assert!(url.starts_with(&format!("https://cdn.example.com/{}/", job.id)));
    assert!(url.ends_with("/archive"));
}

#[tokio::test]
async fn test_job_token_is_scoped_to_its_job() {
    let coordinator = spawn().await;
    for _ in 0..2 {
        coordinator
            .state
            .dispatcher
            .enqueue(serde_json::Value::Null)
            .await
            .unwrap();
    }
    let first = assigned(&coordinator, RUNNER_A).await;
    let second = assigned(&coordinator, RUNNER_B).await;

    let err = coordinator
        .client
        .append_trace(first.id, second.token.as_str(), 0, b"x")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some(ReasonCode::Unauthorized));

    let err = coordinator
        .client
        .append_trace(first.id, RUNNER_A, 0, b"x")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some(ReasonCode::Unauthorized));
}
