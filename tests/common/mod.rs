//! Shared helpers for the integration suite.
//!
//! [`FixtureServer`] is a minimal HTTP/1.1 server on a loopback port. It serves registered
//! bodies with their ETags, answers `304 Not Modified` when `If-None-Match` matches, and
//! records every request so tests can assert on conditional behaviour.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How a registered path is answered.
#[derive(Debug, Clone, Default)]
struct Resource {
    body: Vec<u8>,
    etag: Option<String>,
    status: Option<u16>,
    stall_after: Option<usize>,
}

/// One request as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedRequest {
    /// Request path
    pub path: String,
    /// `If-None-Match` header, if sent
    pub if_none_match: Option<String>,
    /// Status code answered
    pub status: u16,
}

#[derive(Debug, Default)]
struct ServerState {
    resources: HashMap<String, Resource>,
    requests: Vec<ServedRequest>,
}

/// Loopback HTTP server for download tests.
pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    task: JoinHandle<()>,
}

impl FixtureServer {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, state).await;
                });
            }
        });

        Self {
            addr,
            state,
            task,
        }
    }

    /// Base URL with a trailing slash.
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path.trim_start_matches('/'))
    }

    /// Serve `body` at `path`, with an ETag when given.
    pub fn serve(&self, path: &str, body: impl Into<Vec<u8>>, etag: Option<&str>) {
        self.insert(path, Resource {
            body: body.into(),
            etag: etag.map(str::to_string),
            ..Resource::default()
        });
    }

    /// Answer every request for `path` with a bare status code.
    pub fn respond_with(&self, path: &str, status: u16) {
        self.insert(path, Resource {
            status: Some(status),
            ..Resource::default()
        });
    }

    /// Send the headers and the first `bytes` of `body`, then stop sending without closing.
    pub fn stall(&self, path: &str, body: impl Into<Vec<u8>>, bytes: usize) {
        self.insert(path, Resource {
            body: body.into(),
            stall_after: Some(bytes),
            ..Resource::default()
        });
    }

    /// Forget `path`; later requests get 404.
    pub fn remove(&self, path: &str) {
        self.state.lock().unwrap().resources.remove(&normalize(path));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ServedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests answered with a body.
    pub fn bodies_served(&self) -> usize {
        self.requests().iter().filter(|r| r.status == 200).count()
    }

    /// Clear the request log.
    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    fn insert(&self, path: &str, resource: Resource) {
        self.state.lock().unwrap().resources.insert(normalize(path), resource);
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

async fn handle(stream: TcpStream, state: Arc<Mutex<ServerState>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();

    let mut if_none_match = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("if-none-match")
        {
            if_none_match = Some(value.trim().to_string());
        }
    }

    let resource = state.lock().unwrap().resources.get(&path).cloned();
    let status = match &resource {
        None => 404,
        Some(resource) => match resource.status {
            Some(status) => status,
            None if resource.etag.is_some() && resource.etag == if_none_match => 304,
            None => 200,
        },
    };
    state.lock().unwrap().requests.push(ServedRequest {
        path,
        if_none_match,
        status,
    });

    let stream = reader.get_mut();
    let Some(resource) = resource.filter(|_| status == 200) else {
        let head = format!(
            "HTTP/1.1 {status} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            reason(status)
        );
        stream.write_all(head.as_bytes()).await?;
        return stream.shutdown().await;
    };

    let mut head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n",
        resource.body.len()
    );
    if let Some(etag) = &resource.etag {
        head.push_str(&format!("ETag: {etag}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;

    match resource.stall_after {
        Some(bytes) => {
            stream.write_all(&resource.body[..bytes.min(resource.body.len())]).await?;
            stream.flush().await?;
            std::future::pending::<()>().await;
            Ok(())
        }
        None => {
            stream.write_all(&resource.body).await?;
            stream.shutdown().await
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        304 => "Not Modified",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Write a launcher configuration for an installation at `root`.
pub fn write_config(dir: &Path, root: &Path, server: &FixtureServer) -> PathBuf {
    let path = dir.join("config.toml");
    let content = format!(
        "install_root = {root:?}\nmanifest_url = \"{}\"\nversion_url = \"{}\"\n\n[download]\nretry_attempts = 2\nretry_delay_secs = 0\n",
        server.url("package.xml"),
        server.url("version.txt"),
        root = root.display().to_string(),
    );
    std::fs::write(&path, content).unwrap();
    path
}
