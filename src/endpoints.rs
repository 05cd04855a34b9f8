//! Endpoint server for exposing metrics and health checks

use crate::metrics::metrics;
use anyhow::Result;
use prometheus::{Encoder, TextEncoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Bind `0.0.0.0:port` and serve until cancelled
pub async fn serve_metrics(port: u16, cancel: CancellationToken) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Metrics endpoint listening on {}", addr);
    serve(listener, cancel).await;
    Ok(())
}

pub async fn serve(listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, _)) => {
                tokio::spawn(async move {
                    if let Err(e) = respond(socket).await {
                        tracing::debug!("Metrics request failed: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
    tracing::debug!("Metrics endpoint stopped");
}

async fn respond(mut socket: TcpStream) -> Result<()> {
    let mut buf = [0; 1024];
    let n = socket.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request.split_whitespace().nth(1).unwrap_or("/");

    let (status, content_type, body) = match path {
        "/metrics" => {
            let mut body = Vec::new();
            let encoder = TextEncoder::new();
            encoder.encode(&metrics().registry().gather(), &mut body)?;
            ("200 OK", encoder.format_type().to_string(), body)
        }
        "/health" => ("200 OK", "text/plain".to_string(), b"ok".to_vec()),
        _ => ("404 Not Found", "text/plain".to_string(), b"not found".to_vec()),
    };

    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(&body).await?;
    socket.shutdown().await?;
    Ok(())
}
