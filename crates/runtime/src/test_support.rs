//! Test doubles: a one-shot HTTP server for the reqwest adapters and fakes
//! for every collaborator trait.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use vigil_core::Status;

use crate::notifier::{AlertMessage, AlertNotifier, AlertTransport, NotificationError};
use crate::portal::{PortalError, SensorPortal};
use crate::transfer::{FileTransfer, TransferError};

pub(crate) struct CannedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl CannedResponse {
    pub(crate) fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string(),
        }
    }

    pub(crate) fn empty(status: u16) -> Self {
        Self {
            status,
            headers: vec![],
            body: String::new(),
        }
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn render(&self) -> String {
        let reason = StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let mut out = format!(
            "HTTP/1.1 {} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.body.len()
        );
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

pub(crate) struct TestServer {
    pub(crate) base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    /// Raw requests received so far (request line, headers and body).
    pub(crate) async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

/// Answer one connection per canned response, in order.
pub(crate) async fn serve(responses: Vec<CannedResponse>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));

    let seen = requests.clone();
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let request = read_request(&mut stream).await;
            seen.lock().await.push(request);
            let _ = stream.write_all(response.render().as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    TestServer { base_url, requests }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).into_owned(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ── Fake collaborators ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingTransport {
    sent: Arc<std::sync::Mutex<Vec<(AlertMessage, Vec<String>)>>>,
}

impl RecordingTransport {
    pub(crate) async fn sent(&self) -> Vec<(AlertMessage, Vec<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertTransport for RecordingTransport {
    async fn send(&self, message: &AlertMessage, recipients: &[String]) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap()
            .push((message.clone(), recipients.to_vec()));
        Ok(())
    }
}

pub(crate) struct FailingTransport;

#[async_trait]
impl AlertTransport for FailingTransport {
    async fn send(&self, _: &AlertMessage, _: &[String]) -> Result<(), NotificationError> {
        Err(NotificationError::Delivery("connection refused".to_string()))
    }
}

/// Records every `notify` call; optionally reports failure after recording.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    calls: std::sync::Mutex<Vec<(String, u32)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn notify(&self, resident_id: &str, mismatch_count: u32) -> Result<(), NotificationError> {
        self.calls
            .lock()
            .unwrap()
            .push((resident_id.to_string(), mismatch_count));
        if self.fail {
            Err(NotificationError::Delivery("smtp down".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-memory WebDAV share: downloads return whatever was last uploaded.
#[derive(Debug, Default)]
pub(crate) struct FakeTransfer {
    remote: std::sync::Mutex<Option<Vec<u8>>>,
    pub(crate) fail_uploads: bool,
    pub(crate) drop_uploads: bool,
    uploads: AtomicUsize,
}

impl FakeTransfer {
    pub(crate) fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileTransfer for FakeTransfer {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), TransferError> {
        if self.fail_uploads {
            return Err(TransferError::Status {
                path: remote_path.to_string(),
                status: 507,
            });
        }
        let bytes = std::fs::read(local_path).map_err(|source| TransferError::Io {
            path: local_path.to_path_buf(),
            source,
        })?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if !self.drop_uploads {
            *self.remote.lock().unwrap() = Some(bytes);
        }
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), TransferError> {
        let bytes = self
            .remote
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TransferError::NotFound(remote_path.to_string()))?;
        std::fs::write(local_path, bytes).map_err(|source| TransferError::Io {
            path: local_path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PortalReply {
    Status(Status),
    Payload(Value),
    Unauthenticated,
}

/// Portal answering for a single resident with a switchable reply.
#[derive(Debug)]
pub(crate) struct FakePortal {
    resident_id: String,
    reply: std::sync::Mutex<PortalReply>,
    calls: AtomicUsize,
}

impl FakePortal {
    pub(crate) fn new(resident_id: &str, reply: PortalReply) -> Self {
        Self {
            resident_id: resident_id.to_string(),
            reply: std::sync::Mutex::new(reply),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn reporting(resident_id: &str, status: Status) -> Self {
        Self::new(resident_id, PortalReply::Status(status))
    }

    pub(crate) fn set(&self, reply: PortalReply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn payload_for(resident_id: &str, status: Status) -> Value {
    let notification = json!({ "Resident": { "Status": status.label() } }).to_string();
    json!({ resident_id: { "notification": notification } })
}

#[async_trait]
impl SensorPortal for FakePortal {
    async fn fetch_sensor_payload(&self) -> Result<Value, PortalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.reply.lock().unwrap().clone();
        match reply {
            PortalReply::Status(status) => Ok(payload_for(&self.resident_id, status)),
            PortalReply::Payload(payload) => Ok(payload),
            PortalReply::Unauthenticated => {
                Err(PortalError::Unauthenticated("session expired".to_string()))
            }
        }
    }
}

/// Write a notification file carrying `status`.
pub(crate) fn write_snapshot(path: &Path, status: Status) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let doc = json!({
        "Resident": { "Status": status.label(), "Timestamp": "2024-01-01T00:00:00.000Z" },
        "Timestamp": "2024-01-01T00:00:00.000Z"
    });
    std::fs::write(path, doc.to_string()).unwrap();
}
