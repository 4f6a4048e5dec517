//! End-to-end runs of the worker loop against in-process collaborators.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::Rgb;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use anon_media::{Frame, FrameDecoder, MediaResult, PatternClassifier};
use anon_models::WorkItem;
use anon_queue::{LeaseQueue, MemoryQueue};
use anon_storage::{ObjectStore, StorageError, StorageResult};
use anon_worker::{
    Cipher, CipherKey, CompletionContext, Fetcher, LoopSettings, Processor, Publisher, WorkerLoop,
};

const NONCE: [u8; 12] = *b"pipelinenonc";

struct FiveFrames;

#[async_trait]
impl FrameDecoder for FiveFrames {
    async fn decode(&self, _path: &Path) -> MediaResult<Vec<Frame>> {
        Ok((0..5u8)
            .map(|i| Frame::from_pixel(640, 480, Rgb([i * 40, 128, 255])))
            .collect())
    }
}

struct Classifier(bool);

#[async_trait]
impl PatternClassifier for Classifier {
    async fn is_target_pattern(&self, _path: &Path) -> MediaResult<bool> {
        Ok(self.0)
    }
}

#[derive(Default)]
struct RecordingStore {
    uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
    delay: Duration,
    /// Uploads wait here until released
    gate: Option<Arc<tokio::sync::Notify>>,
    started: AtomicUsize,
    reject: bool,
}

impl RecordingStore {
    fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn create_public_container(&self, _name: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn put_object(&self, container: &str, key: &str, body: Vec<u8>) -> StorageResult<String> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        tokio::time::sleep(self.delay).await;
        if self.reject {
            return Err(StorageError::upload_failed(format!("{}/{}: 507 Insufficient Storage", container, key)));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((container.to_string(), key.to_string(), body));
        Ok(format!("https://objects.example/{}/{}", container, key))
    }
}

struct Harness {
    queue: Arc<MemoryQueue>,
    store: Arc<RecordingStore>,
    input: tempfile::TempDir,
    output: tempfile::TempDir,
}

impl Harness {
    fn new(items: Vec<WorkItem>, store: RecordingStore) -> Self {
        Self {
            queue: Arc::new(MemoryQueue::with_items("job", items)),
            store: Arc::new(store),
            input: tempfile::tempdir().unwrap(),
            output: tempfile::tempdir().unwrap(),
        }
    }

    fn worker(&self, cipher: Cipher, matches: bool, lease: Duration, max_inflight: usize) -> WorkerLoop {
        let output_dir: PathBuf = self.output.path().to_path_buf();
        let completion = Arc::new(CompletionContext {
            publisher: Publisher::new(self.store.clone()),
            queue: self.queue.clone(),
            output_dir: output_dir.clone(),
            results_container: "anon-results".to_string(),
            report_rejected: false,
        });

        WorkerLoop::new(
            self.queue.clone(),
            Fetcher::new(cipher, self.input.path()).unwrap(),
            Processor::new(Arc::new(FiveFrames), Arc::new(Classifier(matches))),
            completion,
            LoopSettings {
                lease_duration: lease,
                poll_timeout: Duration::from_millis(100),
                output_dir,
                max_inflight_completions: max_inflight,
            },
        )
    }
}

fn cipher() -> Cipher {
    Cipher::new(&CipherKey::from_bytes(vec![42u8; 32]).unwrap()).unwrap()
}

async fn serve_video(server: &MockServer, route: &str) -> WorkItem {
    let payload = cipher().seal(&NONCE, b"\x00\x00\x00\x18ftypmp42").unwrap();
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload))
        .mount(server)
        .await;
    WorkItem::from(format!("{}{}", server.uri(), route))
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn zip_entries(bundle: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bundle)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            assert!(data.starts_with(b"\x89PNG"));
            file.name().to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_target_video_is_published_and_cleaned_up() {
    let server = MockServer::start().await;
    let item = serve_video(&server, "/videos/a.bin").await;
    let harness = Harness::new(vec![item.clone()], RecordingStore::default());

    let summary = harness
        .worker(cipher(), true, Duration::from_secs(15), 4)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.drain.published, 1);

    let uploads = harness.store.uploads();
    assert_eq!(uploads.len(), 1);
    let (container, key, body) = &uploads[0];
    assert_eq!(container, "anon-results");
    assert!(key.ends_with(".zip"));
    assert_eq!(key.len(), 32 + ".zip".len());
    assert_eq!(
        zip_entries(body),
        vec!["00000.png", "00001.png", "00002.png", "00003.png", "00004.png"]
    );

    assert_eq!(harness.queue.completed().await, vec![item]);
    assert!(harness.queue.side_queue("job:errors").await.is_empty());
    assert_eq!(dir_entries(harness.output.path()), 0);
    assert_eq!(dir_entries(harness.input.path()), 0);
}

#[tokio::test]
async fn test_non_target_video_publishes_nothing() {
    let server = MockServer::start().await;
    let item = serve_video(&server, "/videos/b.bin").await;
    let harness = Harness::new(vec![item.clone()], RecordingStore::default());

    let summary = harness
        .worker(cipher(), false, Duration::from_secs(15), 4)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.drain.rejected, 1);
    assert!(harness.store.uploads().is_empty());
    assert_eq!(harness.queue.completed().await, vec![item]);
    assert!(harness.queue.side_queue("job:errors").await.is_empty());
    assert_eq!(dir_entries(harness.output.path()), 0);
    assert_eq!(dir_entries(harness.input.path()), 0);
}

#[tokio::test]
async fn test_run_returns_only_after_every_publish() {
    let server = MockServer::start().await;
    let mut items = Vec::new();
    for i in 0..6 {
        items.push(serve_video(&server, &format!("/videos/{}.bin", i)).await);
    }
    let store = RecordingStore {
        delay: Duration::from_millis(150),
        ..RecordingStore::default()
    };
    let harness = Harness::new(items, store);

    let summary = harness
        .worker(cipher(), true, Duration::from_secs(15), 2)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.processed, 6);
    assert_eq!(summary.drain.published, 6);
    assert_eq!(harness.store.uploads().len(), 6);
    assert_eq!(harness.queue.completed().await.len(), 6);
    assert_eq!(dir_entries(harness.output.path()), 0);
}

#[tokio::test]
async fn test_failed_fetch_is_redelivered_after_lease_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos/flaky.bin"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    let item = serve_video(&server, "/videos/flaky.bin").await;
    let harness = Harness::new(vec![item.clone()], RecordingStore::default());

    let summary = harness
        .worker(cipher(), true, Duration::from_secs(1), 4)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.drain.published, 1);
    assert_eq!(harness.queue.completed().await, vec![item]);
    assert_eq!(harness.store.uploads().len(), 1);
}

#[tokio::test]
async fn test_payload_under_wrong_key_is_never_acknowledged() {
    let server = MockServer::start().await;
    let item = serve_video(&server, "/videos/c.bin").await;
    let harness = Harness::new(vec![item], RecordingStore::default());

    let other_key = Cipher::new(&CipherKey::from_bytes(vec![7u8; 32]).unwrap()).unwrap();
    let worker = harness.worker(other_key, true, Duration::from_secs(15), 4);

    // The item stays leased, so the loop would wait for expiry; stop it early.
    let (tx, rx) = tokio::sync::watch::channel(false);
    let worker = worker.with_shutdown(rx);
    let run = tokio::spawn(async move { worker.run().await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    tx.send(true).unwrap();

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.processed, 1);
    assert!(harness.queue.completed().await.is_empty());
    assert_eq!(harness.queue.pending_len().await, 0);
    assert!(!harness.queue.empty().await.unwrap());
    assert!(harness.store.uploads().is_empty());
    assert_eq!(dir_entries(harness.input.path()), 0);
}

#[tokio::test]
async fn test_item_is_acknowledged_before_upload_finishes() {
    let server = MockServer::start().await;
    let item = serve_video(&server, "/videos/slow.bin").await;
    let gate = Arc::new(tokio::sync::Notify::new());
    let store = RecordingStore {
        gate: Some(gate.clone()),
        ..RecordingStore::default()
    };
    let harness = Harness::new(vec![item.clone()], store);

    let worker = harness.worker(cipher(), true, Duration::from_secs(15), 4);
    let run = tokio::spawn(async move { worker.run().await });

    let mut waited = 0;
    while harness.store.started.load(Ordering::SeqCst) == 0 {
        assert!(waited < 200, "upload never started");
        tokio::time::sleep(Duration::from_millis(25)).await;
        waited += 1;
    }

    assert_eq!(harness.queue.completed().await, vec![item]);
    assert!(harness.store.uploads().is_empty());
    assert!(!run.is_finished());

    gate.notify_one();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.drain.published, 1);
    assert_eq!(harness.store.uploads().len(), 1);
    assert_eq!(dir_entries(harness.output.path()), 0);
}

#[tokio::test]
async fn test_failed_upload_is_not_redelivered() {
    let server = MockServer::start().await;
    let item = serve_video(&server, "/videos/lost.bin").await;
    let store = RecordingStore {
        reject: true,
        ..RecordingStore::default()
    };
    let harness = Harness::new(vec![item.clone()], store);

    let summary = harness
        .worker(cipher(), true, Duration::from_secs(1), 4)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.drain.failed, 1);
    assert_eq!(harness.store.started.load(Ordering::SeqCst), 1);
    assert_eq!(harness.queue.completed().await, vec![item]);
    assert!(harness.queue.empty().await.unwrap());

    // Both the bundle and the frame directory stay behind for recovery.
    let mut names: Vec<String> = std::fs::read_dir(harness.output.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert_eq!(names[1], format!("{}.zip", names[0]));
    assert_eq!(names[0].len(), 32);
}
