//! # gpsd Position Source
//!
//! Single-shot fix from a local `gpsd` daemon over its JSON socket protocol.
//!
//! Flow:
//! 1. connect to gpsd (default `127.0.0.1:2947`)
//! 2. send `?WATCH={"enable":true,"json":true};`
//! 3. read report lines until a `TPV` report with a 2D or 3D fix arrives
//! 4. send `?WATCH={"enable":false};` and close

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Position, PositionSource};
use crate::error::{Result, TrackerError};

/// Default gpsd address
pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

const WATCH_ON: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const WATCH_OFF: &[u8] = b"?WATCH={\"enable\":false};\n";

/// Minimum TPV mode carrying a usable fix (2 = 2D, 3 = 3D)
const MIN_FIX_MODE: u8 = 2;

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Parse one gpsd report line, returning the position if it is a TPV
/// report with a fix.
pub fn parse_fix(line: &str) -> Option<Position> {
    let report: Report = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < MIN_FIX_MODE {
        return None;
    }
    Some(Position {
        latitude: report.lat?,
        longitude: report.lon?,
    })
}

/// Position source backed by gpsd.
#[derive(Debug, Clone)]
pub struct GpsdPosition {
    addr: String,
}

impl GpsdPosition {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
        }
    }
}

#[async_trait]
impl PositionSource for GpsdPosition {
    async fn current_position(&self, cancel: CancellationToken) -> Result<Position> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            TrackerError::Acquisition(format!("Failed to connect to gpsd at {}: {}", self.addr, e))
        })?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(WATCH_ON).await?;

        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(TrackerError::Acquisition("request cancelled".to_string()));
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                return Err(TrackerError::Acquisition(
                    "gpsd closed the connection before a fix".to_string(),
                ));
            };

            if let Some(position) = parse_fix(&line) {
                // Best effort; the socket is dropped right after
                let _ = writer.write_all(WATCH_OFF).await;
                return Ok(position);
            }
            debug!("gpsd report skipped: {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_tpv_fix() {
        let line = concat!(
            r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"#,
            r#""lat":37.7749,"lon":-122.4194,"alt":12.0}"#,
        );
        assert_eq!(
            parse_fix(line),
            Some(Position {
                latitude: 37.7749,
                longitude: -122.4194
            })
        );
    }

    #[test]
    fn test_parse_ignores_no_fix_and_other_classes() {
        assert_eq!(parse_fix(r#"{"class":"TPV","mode":1}"#), None);
        assert_eq!(parse_fix(r#"{"class":"VERSION","release":"3.25"}"#), None);
        assert_eq!(parse_fix(r#"{"class":"TPV","mode":2,"lat":1.0}"#), None);
        assert_eq!(parse_fix("not json"), None);
    }

    async fn fake_gpsd(reports: &'static [&'static str]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for report in reports {
                socket.write_all(report.as_bytes()).await.unwrap();
                socket.write_all(b"\n").await.unwrap();
            }
            // Keep the connection open until the client hangs up
            let mut buf = [0u8; 256];
            use tokio::io::AsyncReadExt;
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_reads_until_fix() {
        let addr = fake_gpsd(&[
            r#"{"class":"VERSION","release":"3.25"}"#,
            r#"{"class":"TPV","mode":1}"#,
            r#"{"class":"TPV","mode":2,"lat":12.5,"lon":77.25}"#,
        ])
        .await;

        let position = GpsdPosition::new(&addr)
            .current_position(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(position.latitude, 12.5);
        assert_eq!(position.longitude, 77.25);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_fix() {
        let addr = fake_gpsd(&[r#"{"class":"VERSION","release":"3.25"}"#]).await;
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = GpsdPosition::new(&addr).current_position(token).await;
        assert!(matches!(result, Err(TrackerError::Acquisition(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_acquisition_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = GpsdPosition::new(&addr)
            .current_position(CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TrackerError::Acquisition(_))));
    }
}
