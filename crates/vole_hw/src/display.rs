//! Seam to the visual-stimulus workflow engine.
//!
//! The engine itself is an external vendor dependency; the rig only sends it
//! small fire-and-forget datagrams: show/stop/center commands during trials,
//! and gabor parameters during passive replay.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::UdpSocket;

/// Gabor patch parameters for one replayed stimulus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimInfo {
    pub index: usize,
    /// Azimuth, visual degrees.
    pub position: f64,
    pub contrast: f64,
    pub phase: f64,
    pub freq: f64,
    pub angle: f64,
    pub gain: f64,
    pub sigma: f64,
}

impl StimInfo {
    pub fn new(index: usize, position: f64, contrast: f64, phase: f64) -> Self {
        Self {
            index,
            position,
            contrast,
            phase,
            freq: 0.10,
            angle: 0.0,
            gain: 4.0,
            sigma: 7.0,
        }
    }
}

#[async_trait]
pub trait StimulusDisplay: Send + Sync {
    async fn show(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn center(&self) -> Result<()>;
    async fn send_stim_info(&self, info: &StimInfo) -> Result<()>;
    fn name(&self) -> &str;
}

/// Datagram client for the workflow engine host.
pub struct UdpDisplay {
    socket: UdpSocket,
}

impl UdpDisplay {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("Failed to bind UDP socket")?;
        socket
            .connect((host, port))
            .await
            .with_context(|| format!("Failed to connect display socket to {host}:{port}"))?;
        Ok(Self { socket })
    }

    async fn command(&self, code: u8) -> Result<()> {
        let msg = format!("/re {code}");
        self.socket
            .send(msg.as_bytes())
            .await
            .context("Failed to send display command")?;
        Ok(())
    }
}

#[async_trait]
impl StimulusDisplay for UdpDisplay {
    async fn show(&self) -> Result<()> {
        self.command(2).await
    }

    async fn stop(&self) -> Result<()> {
        self.command(1).await
    }

    async fn center(&self) -> Result<()> {
        self.command(3).await
    }

    async fn send_stim_info(&self, info: &StimInfo) -> Result<()> {
        let msg = format!(
            "/pcs {} {} {} {} {} {} {} {}",
            info.index,
            info.position,
            info.contrast,
            info.phase,
            info.freq,
            info.angle,
            info.gain,
            info.sigma
        );
        self.socket
            .send(msg.as_bytes())
            .await
            .context("Failed to send stimulus parameters")?;
        Ok(())
    }

    fn name(&self) -> &str {
        "UdpDisplay"
    }
}

/// Headless display: counts calls, sends nothing. Used when the visual
/// stimulus is disabled and in tests.
#[derive(Debug, Default)]
pub struct NullDisplay {
    shows: AtomicUsize,
    stops: AtomicUsize,
    centers: AtomicUsize,
    infos: AtomicUsize,
}

impl NullDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// (shows, stops, centers, stim infos) sent so far.
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.shows.load(Ordering::Relaxed),
            self.stops.load(Ordering::Relaxed),
            self.centers.load(Ordering::Relaxed),
            self.infos.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl StimulusDisplay for NullDisplay {
    async fn show(&self) -> Result<()> {
        self.shows.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn center(&self) -> Result<()> {
        self.centers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn send_stim_info(&self, _info: &StimInfo) -> Result<()> {
        self.infos.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "NullDisplay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn udp_display_sends_expected_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let display = UdpDisplay::connect("127.0.0.1", port).await.unwrap();

        display.show().await.unwrap();
        let mut buf = [0u8; 128];
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"/re 2");

        display.stop().await.unwrap();
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"/re 1");

        display
            .send_stim_info(&StimInfo::new(0, 35.0, 0.5, 0.25))
            .await
            .unwrap();
        let n = server.recv(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("/pcs 0 35 0.5 0.25"));
    }

    #[tokio::test]
    async fn null_display_counts_calls() {
        let display = NullDisplay::new();
        display.show().await.unwrap();
        display.show().await.unwrap();
        display.stop().await.unwrap();
        display
            .send_stim_info(&StimInfo::new(1, -35.0, 1.0, 0.0))
            .await
            .unwrap();
        assert_eq!(display.counts(), (2, 1, 0, 1));
    }
}
