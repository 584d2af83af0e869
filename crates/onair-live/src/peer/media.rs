//! Local capture. Stage participants acquire media; if acquisition fails
//! or times out they carry on receive-only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onair_common::{new_id, LiveError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A captured local stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub stream_id: String,
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaState {
    /// Acquisition in progress.
    Pending,
    Ready(LocalMedia),
    /// Not acquired (not on stage, denied or timed out). Links run
    /// receive-only.
    Unavailable,
}

impl MediaState {
    pub fn local_media(&self) -> Option<&LocalMedia> {
        match self {
            MediaState::Ready(media) => Some(media),
            _ => None,
        }
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia, LiveError>;

    /// Stop capture. Default does nothing.
    async fn release(&self, _media: &LocalMedia) {}
}

/// Always succeeds with synthetic tracks.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticMedia {
    pub audio: bool,
    pub video: bool,
}

impl Default for SyntheticMedia {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[async_trait]
impl MediaSource for SyntheticMedia {
    async fn acquire(&self) -> Result<LocalMedia, LiveError> {
        Ok(LocalMedia {
            stream_id: new_id(),
            audio: self.audio,
            video: self.video,
        })
    }
}

/// Always fails, like a user who denied camera and microphone access.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedMedia;

#[async_trait]
impl MediaSource for DeniedMedia {
    async fn acquire(&self) -> Result<LocalMedia, LiveError> {
        Err(LiveError::Negotiation("media permission denied".into()))
    }
}

/// Owns acquisition and publishes the current [`MediaState`].
pub struct MediaController {
    source: Arc<dyn MediaSource>,
    timeout: Duration,
    state: Arc<watch::Sender<MediaState>>,
    task: Option<JoinHandle<()>>,
}

impl MediaController {
    pub fn new(source: Arc<dyn MediaSource>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(MediaState::Unavailable);
        Self {
            source,
            timeout,
            state: Arc::new(state),
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> MediaState {
        self.state.borrow().clone()
    }

    /// Begin acquiring. No-op while pending or ready.
    pub fn start(&mut self) {
        if !matches!(*self.state.borrow(), MediaState::Unavailable) {
            return;
        }
        self.state.send_replace(MediaState::Pending);

        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let timeout = self.timeout;
        self.task = Some(tokio::spawn(async move {
            let next = match tokio::time::timeout(timeout, source.acquire()).await {
                Ok(Ok(media)) => {
                    info!(stream_id = %media.stream_id, "Local media ready");
                    MediaState::Ready(media)
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Local media unavailable, continuing receive-only");
                    MediaState::Unavailable
                }
                Err(_) => {
                    warn!(
                        timeout_secs = timeout.as_secs(),
                        "Local media timed out, continuing receive-only"
                    );
                    MediaState::Unavailable
                }
            };
            state.send_replace(next);
        }));
    }

    /// Stop capture and release the stream.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let previous = self.state.send_replace(MediaState::Unavailable);
        if let MediaState::Ready(media) = previous {
            self.source.release(&media).await;
            info!(stream_id = %media.stream_id, "Local media released");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    async fn settle(rx: &mut watch::Receiver<MediaState>) -> MediaState {
        while matches!(*rx.borrow_and_update(), MediaState::Pending) {
            rx.changed().await.unwrap();
        }
        rx.borrow().clone()
    }

    #[tokio::test]
    async fn acquires_and_releases() {
        struct Counting(AtomicUsize);

        #[async_trait]
        impl MediaSource for Counting {
            async fn acquire(&self) -> Result<LocalMedia, LiveError> {
                SyntheticMedia::default().acquire().await
            }
            async fn release(&self, _media: &LocalMedia) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let source = Arc::new(Counting(AtomicUsize::new(0)));
        let mut media = MediaController::new(source.clone(), Duration::from_secs(1));
        let mut rx = media.subscribe();
        assert_eq!(media.state(), MediaState::Unavailable);

        media.start();
        let state = settle(&mut rx).await;
        assert!(state.local_media().is_some());

        media.stop().await;
        assert_eq!(media.state(), MediaState::Unavailable);
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_media_degrades() {
        let mut media = MediaController::new(Arc::new(DeniedMedia), Duration::from_secs(1));
        let mut rx = media.subscribe();
        media.start();
        assert_eq!(settle(&mut rx).await, MediaState::Unavailable);
    }

    #[tokio::test]
    async fn slow_media_times_out() {
        struct Never;

        #[async_trait]
        impl MediaSource for Never {
            async fn acquire(&self) -> Result<LocalMedia, LiveError> {
                std::future::pending().await
            }
        }

        let mut media = MediaController::new(Arc::new(Never), Duration::from_millis(50));
        let mut rx = media.subscribe();
        media.start();
        assert_eq!(settle(&mut rx).await, MediaState::Unavailable);
    }
}
