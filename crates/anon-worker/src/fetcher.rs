//! Item fetching: download, decrypt, persist locally.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::cipher::Cipher;
use crate::error::{WorkerError, WorkerResult};

/// Decrypted video on local disk.
///
/// The file is removed when the artifact is closed or dropped.
#[derive(Debug)]
pub struct LocalArtifact {
    file: NamedTempFile,
}

impl LocalArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file, reporting failures.
    pub fn close(self) -> WorkerResult<()> {
        self.file.close().map_err(WorkerError::DiskWrite)
    }
}

/// Downloads encrypted payloads and turns them into local artifacts.
#[derive(Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    cipher: Cipher,
    input_dir: PathBuf,
}

impl Fetcher {
    pub fn new(cipher: Cipher, input_dir: impl Into<PathBuf>) -> WorkerResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            cipher,
            input_dir: input_dir.into(),
        })
    }

    /// GET `url`, decrypt the body and write the plaintext to a fresh
    /// `.mp4` file in the input directory.
    pub async fn fetch(&self, url: &Url) -> WorkerResult<LocalArtifact> {
        let body = self
            .http
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        debug!(%url, bytes = body.len(), "Downloaded payload");

        let cipher = self.cipher.clone();
        let input_dir = self.input_dir.clone();
        tokio::task::spawn_blocking(move || {
            let plaintext = cipher.open(&body)?;
            write_artifact(&input_dir, &plaintext)
        })
        .await
        .map_err(|e| WorkerError::task_failed(format!("decrypt task: {}", e)))?
    }
}

fn write_artifact(dir: &Path, plaintext: &[u8]) -> WorkerResult<LocalArtifact> {
    let mut file = tempfile::Builder::new()
        .prefix("item-")
        .suffix(".mp4")
        .tempfile_in(dir)
        .map_err(WorkerError::DiskWrite)?;

    file.write_all(plaintext).map_err(WorkerError::DiskWrite)?;
    file.flush().map_err(WorkerError::DiskWrite)?;

    debug!(path = %file.path().display(), bytes = plaintext.len(), "Wrote local artifact");
    Ok(LocalArtifact { file })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{CipherError, CipherKey};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NONCE: [u8; 12] = [3u8; 12];

    fn cipher() -> Cipher {
        Cipher::new(&CipherKey::from_bytes(vec![1u8; 32]).unwrap()).unwrap()
    }

    async fn serve(server: &MockServer, route: &str, response: ResponseTemplate) -> Url {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
        Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_writes_plaintext() {
        let server = MockServer::start().await;
        let payload = cipher().seal(&NONCE, b"video bytes").unwrap();
        let url = serve(&server, "/v.bin", ResponseTemplate::new(200).set_body_bytes(payload)).await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cipher(), dir.path()).unwrap();
        let artifact = fetcher.fetch(&url).await.unwrap();

        let name = artifact.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("item-"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(std::fs::read(artifact.path()).unwrap(), b"video bytes");

        let path = artifact.path().to_path_buf();
        artifact.close().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_dropped_artifact_is_removed() {
        let server = MockServer::start().await;
        let payload = cipher().seal(&NONCE, b"x").unwrap();
        let url = serve(&server, "/v.bin", ResponseTemplate::new(200).set_body_bytes(payload)).await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cipher(), dir.path()).unwrap();
        let path = fetcher.fetch(&url).await.unwrap().path().to_path_buf();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_http_error_is_network_error() {
        let server = MockServer::start().await;
        let url = serve(&server, "/missing.bin", ResponseTemplate::new(404)).await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cipher(), dir.path()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();

        assert_eq!(err.stage(), "network");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_tampered_payload_writes_nothing() {
        let server = MockServer::start().await;
        let mut payload = cipher().seal(&NONCE, b"secret").unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xff;
        let url = serve(&server, "/v.bin", ResponseTemplate::new(200).set_body_bytes(payload)).await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cipher(), dir.path()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();

        assert!(matches!(err, WorkerError::Payload(CipherError::Authentication)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_short_body_is_malformed() {
        let server = MockServer::start().await;
        let url = serve(
            &server,
            "/short.bin",
            ResponseTemplate::new(200).set_body_bytes(vec![0u8; 20]),
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cipher(), dir.path()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();

        assert!(matches!(err, WorkerError::Payload(CipherError::MalformedPayload(20))));
    }

    #[tokio::test]
    async fn test_missing_input_dir_is_disk_write_error() {
        let server = MockServer::start().await;
        let payload = cipher().seal(&NONCE, b"x").unwrap();
        let url = serve(&server, "/v.bin", ResponseTemplate::new(200).set_body_bytes(payload)).await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cipher(), dir.path().join("missing")).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();

        assert_eq!(err.stage(), "disk_write");
    }
}
