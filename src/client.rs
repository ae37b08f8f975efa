//! The timed transfer primitive.
//!
//! [`TransferClient`] performs one HTTP exchange per call and reports the
//! wall-clock time it took, measured immediately before dispatch and
//! immediately after the full response body (download) or acknowledgment
//! (upload) arrived. Every call is a single deterministic attempt; retry
//! and abort decisions belong to the caller.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use log::debug;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::time::Instant;
use url::Url;

use crate::errors::{MeasureError, Result};

/// Timing of one zero-payload latency probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTiming {
    /// Round-trip wall-clock time in milliseconds.
    pub elapsed_ms: f64,
    /// Server-reported base latency (`X-Base-Latency`), 0 when absent.
    pub base_latency_ms: f64,
    /// Server-reported jitter (`X-Jitter`), 0 when absent.
    pub jitter_ms: f64,
}

/// Outcome of one timed download.
#[derive(Debug, Clone, Copy)]
pub struct Transfer {
    /// Bytes received.
    pub bytes: u64,
    /// Wall-clock time from dispatch to the final body byte.
    pub elapsed: Duration,
}

impl Transfer {
    /// Throughput of this transfer in Mbps.
    pub fn speed_mbps(&self) -> f64 {
        (self.bytes as f64 * 8.0) / self.elapsed.as_secs_f64() / 1e6
    }
}

/// The upload endpoint's JSON echo.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UploadEcho {
    /// Whether the server processed the upload.
    pub success: bool,
    /// Server-computed speed in Mbps.
    pub speed: f64,
    /// Bytes the server received.
    pub size: u64,
    /// Server-side duration in seconds.
    pub duration: f64,
}

/// HTTP client bound to one test server.
#[derive(Debug, Clone)]
pub struct TransferClient {
    http: Client,
    base_url: Url,
}

impl TransferClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: Url) -> Self {
        TransferClient { http: Client::new(), base_url }
    }

    /// The underlying reqwest client, for collaborators that issue their
    /// own untimed requests (identity lookup).
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// The server this client measures against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|error| {
            MeasureError::config(format!("invalid endpoint {}", path))
                .with_source(error)
        })
    }

    /// `HEAD /probe`: one zero-payload latency probe.
    pub async fn probe(&self) -> Result<ProbeTiming> {
        let url = self.endpoint("probe")?;

        let start = Instant::now();
        let response = self
            .http
            .head(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|error| {
                MeasureError::transfer("latency probe failed")
                    .with_source(error)
            })?;
        let elapsed = start.elapsed();

        let timing = ProbeTiming {
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            base_latency_ms: header_f64(&response, "X-Base-Latency"),
            jitter_ms: header_f64(&response, "X-Jitter"),
        };

        debug!(
            "probe: {:.2} ms (server base {:.2} ms, jitter {:.2} ms)",
            timing.elapsed_ms, timing.base_latency_ms, timing.jitter_ms
        );

        Ok(timing)
    }

    /// `GET /probe`: one fixed-size timed download, streaming the body
    /// while counting bytes.
    pub async fn download(&self) -> Result<Transfer> {
        let url = self.endpoint("probe")?;

        let start = Instant::now();
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|error| {
                MeasureError::transfer("download request failed")
                    .with_source(error)
            })?;

        let mut stream = response.bytes_stream();
        let mut bytes: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| {
                MeasureError::transfer("download stream interrupted")
                    .with_source(error)
            })?;
            bytes += chunk.len() as u64;
        }

        let transfer = Transfer { bytes, elapsed: start.elapsed() };
        debug!(
            "download: {} bytes in {:.3} s ({:.2} Mbps)",
            transfer.bytes,
            transfer.elapsed.as_secs_f64(),
            transfer.speed_mbps()
        );

        Ok(transfer)
    }

    /// `GET /payload/{mb}`: fetch a static test payload. Not timed;
    /// failure here means the asset is unavailable, not that the network
    /// measurement failed.
    pub async fn fetch_payload(&self, megabytes: u64) -> Result<Bytes> {
        let url = self.endpoint(&format!("payload/{}", megabytes))?;

        let payload = self
            .http
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|error| {
                MeasureError::payload_fetch(format!(
                    "{} MiB test payload unavailable",
                    megabytes
                ))
                .with_source(error)
            })?
            .bytes()
            .await
            .map_err(|error| {
                MeasureError::payload_fetch(format!(
                    "{} MiB test payload truncated",
                    megabytes
                ))
                .with_source(error)
            })?;

        debug!("fetched {} byte payload", payload.len());

        Ok(payload)
    }

    /// `POST /upload`: one timed upload of `body`, returning the server's
    /// JSON echo plus the measured wall-clock time to full acknowledgment.
    pub async fn upload(&self, body: Bytes) -> Result<(UploadEcho, Duration)> {
        let url = self.endpoint("upload")?;
        let size = body.len();

        let start = Instant::now();
        let echo = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|error| {
                MeasureError::transfer("upload request failed")
                    .with_source(error)
            })?
            .json::<UploadEcho>()
            .await
            .map_err(|error| {
                MeasureError::transfer("upload acknowledgment unreadable")
                    .with_source(error)
            })?;
        let elapsed = start.elapsed();

        if !echo.success {
            return Err(MeasureError::transfer(
                "server rejected the uploaded payload",
            ));
        }

        debug!(
            "upload: {} bytes acknowledged in {:.3} s (server speed {:.2} Mbps)",
            size,
            elapsed.as_secs_f64(),
            echo.speed
        );

        Ok((echo, elapsed))
    }
}

fn header_f64(response: &Response, name: &str) -> f64 {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_speed_mbps() {
        // 2 MiB in exactly the time a 50 Mbps link would need.
        let bytes = 2 * 1024 * 1024u64;
        let seconds = bytes as f64 * 8.0 / 50e6;
        let transfer =
            Transfer { bytes, elapsed: Duration::from_secs_f64(seconds) };

        assert!((transfer.speed_mbps() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_upload_echo_parses_server_json() {
        let echo: UploadEcho = serde_json::from_str(
            r#"{"success":true,"size":1048576,"duration":1.05,"speed":7.99,"latency":61.2}"#,
        )
        .expect("parse");

        assert!(echo.success);
        assert_eq!(echo.size, 1_048_576);
        assert!((echo.speed - 7.99).abs() < 1e-9);
    }

    #[test]
    fn test_endpoint_join() {
        let client = TransferClient::new(
            Url::parse("http://127.0.0.1:3000/").expect("url"),
        );

        let url = client.endpoint("payload/10").expect("join");
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/payload/10");
    }
}
