//! [`VirtualTrack`]: a media track whose capture and rendering are simulated.
//!
//! Used by both the loopback and relay engines. State changes are logged so
//! a terminal session shows what a real renderer would be doing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::application::ports::MediaTrack;
use crate::domain::media::MediaKind;

pub struct VirtualTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    closed: AtomicBool,
    /// Where the track is rendered; `Some(None)` for target-less audio playback.
    playing: Mutex<Option<Option<String>>>,
}

impl VirtualTrack {
    pub fn new(kind: MediaKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            playing: Mutex::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.playing
            .lock()
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    /// Render target passed to the last `play`, if any.
    pub fn render_target(&self) -> Option<String> {
        self.playing.lock().ok().and_then(|p| p.clone().flatten())
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("{} track {} is closed", self.kind, self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTrack for VirtualTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn play(&self, target: Option<&str>) -> anyhow::Result<()> {
        self.ensure_open()?;
        if self.kind == MediaKind::Video && target.is_none() {
            anyhow::bail!("video track {} needs a render target", self.id);
        }
        let mut playing = self
            .playing
            .lock()
            .map_err(|_| anyhow::anyhow!("track state poisoned"))?;
        *playing = Some(target.map(str::to_owned));
        debug!(track = %self.id, kind = %self.kind, render_target = ?target, "Playing track");
        Ok(())
    }

    async fn set_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.enabled.store(enabled, Ordering::Release);
        trace!(track = %self.id, enabled, "Track enabled flag changed");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            anyhow::bail!("{} track {} already closed", self.kind, self.id);
        }
        if let Ok(mut playing) = self.playing.lock() {
            *playing = None;
        }
        debug!(track = %self.id, kind = %self.kind, "Closed track");
        Ok(())
    }
}
