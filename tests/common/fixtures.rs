//! HTTP fixtures: request builders and a slow body server

use http_dl::DownloadRequest;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Deterministic body of `len` bytes
pub fn body_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Request for `<base>/<id>.bin` saved as `<dir>/downloads/<id>.bin`
pub fn request_for(base: &str, dir: &Path, id: &str) -> DownloadRequest {
    let url = url::Url::parse(&format!("{}/{}.bin", base, id)).expect("valid test url");
    DownloadRequest::in_directory(id, url, dir.join("downloads"), &format!("{}.bin", id))
}

/// Server that answers every request with `total` bytes, sent `chunk` bytes at a time
/// with `interval` between writes
///
/// wiremock delays whole responses; this one holds the body open so transfers stay in
/// progress for a controllable time.
pub struct SlowServer {
    addr: SocketAddr,
}

impl SlowServer {
    /// Bind to an ephemeral port and serve until the test runtime ends
    pub async fn start(total: usize, chunk: usize, interval: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind slow server");
        let addr = listener.local_addr().expect("Failed to read local addr");

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, total, chunk, interval));
            }
        });

        Self { addr }
    }

    /// Base URL without a trailing slash
    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn serve(mut stream: TcpStream, total: usize, chunk: usize, interval: Duration) {
    // Read the request head; the body is irrelevant for GET
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        total
    );
    if stream.write_all(header.as_bytes()).await.is_err() {
        return;
    }

    let body = body_of(total);
    for piece in body.chunks(chunk.max(1)) {
        if stream.write_all(piece).await.is_err() || stream.flush().await.is_err() {
            // Client went away (cancelled)
            return;
        }
        tokio::time::sleep(interval).await;
    }
}
