//! Media/device collaborator boundary.
//!
//! The coordinator never touches audio or video itself. It drives an opaque
//! [`MediaDevice`] through four capabilities and treats every failure as a
//! warning, not as a reason to undo a call-state transition.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::protocol::MediaKind;

// ============================================================================
// MediaDevice
// ============================================================================

/// Capabilities of the media pipeline the coordinator relies on.
#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Mutes or unmutes the microphone.
    async fn apply_mute(&self, muted: bool) -> Result<()>;

    /// Routes audio to the loudspeaker or back to the earpiece.
    async fn apply_speaker(&self, speaker_on: bool) -> Result<()>;

    /// Starts capturing and playing media for an answered call.
    async fn start_media(&self, kind: MediaKind) -> Result<()>;

    /// Stops all media for the call.
    async fn stop_media(&self) -> Result<()>;
}

// ============================================================================
// MediaAction
// ============================================================================

/// One request to the media device, produced by a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAction {
    /// `start_media`
    Start(MediaKind),
    /// `stop_media`
    Stop,
    /// `apply_mute`
    Mute(bool),
    /// `apply_speaker`
    Speaker(bool),
}

impl MediaAction {
    /// Name of the device operation, for warnings and logs.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Start(_) => "start_media",
            Self::Stop => "stop_media",
            Self::Mute(_) => "apply_mute",
            Self::Speaker(_) => "apply_speaker",
        }
    }

    /// Performs the action on a device.
    ///
    /// # Errors
    ///
    /// Propagates the device's error unchanged.
    pub async fn apply(self, device: &dyn MediaDevice) -> Result<()> {
        match self {
            Self::Start(kind) => device.start_media(kind).await,
            Self::Stop => device.stop_media().await,
            Self::Mute(muted) => device.apply_mute(muted).await,
            Self::Speaker(on) => device.apply_speaker(on).await,
        }
    }
}

// ============================================================================
// NullMedia
// ============================================================================

/// Device that accepts every request and does nothing.
///
/// For headless clients that only need signaling.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMedia;

#[async_trait]
impl MediaDevice for NullMedia {
    async fn apply_mute(&self, muted: bool) -> Result<()> {
        debug!(muted, "NullMedia: apply_mute");
        Ok(())
    }

    async fn apply_speaker(&self, speaker_on: bool) -> Result<()> {
        debug!(speaker_on, "NullMedia: apply_speaker");
        Ok(())
    }

    async fn start_media(&self, kind: MediaKind) -> Result<()> {
        debug!(%kind, "NullMedia: start_media");
        Ok(())
    }

    async fn stop_media(&self) -> Result<()> {
        debug!("NullMedia: stop_media");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::error::Error;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl MediaDevice for Recorder {
        async fn apply_mute(&self, _muted: bool) -> Result<()> {
            self.calls.lock().push("mute");
            Ok(())
        }

        async fn apply_speaker(&self, _speaker_on: bool) -> Result<()> {
            Err(Error::device("apply_speaker", "no route"))
        }

        async fn start_media(&self, _kind: MediaKind) -> Result<()> {
            self.calls.lock().push("start");
            Ok(())
        }

        async fn stop_media(&self) -> Result<()> {
            self.calls.lock().push("stop");
            Ok(())
        }
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(MediaAction::Start(MediaKind::Video).operation(), "start_media");
        assert_eq!(MediaAction::Speaker(true).operation(), "apply_speaker");
    }

    #[tokio::test]
    async fn test_apply_dispatches_to_device() {
        let device = Recorder::default();
        MediaAction::Start(MediaKind::Audio).apply(&device).await.unwrap();
        MediaAction::Mute(true).apply(&device).await.unwrap();
        MediaAction::Stop.apply(&device).await.unwrap();

        assert_eq!(*device.calls.lock(), vec!["start", "mute", "stop"]);
    }

    #[tokio::test]
    async fn test_apply_propagates_device_error() {
        let device = Recorder::default();
        let err = MediaAction::Speaker(true).apply(&device).await.unwrap_err();
        assert!(matches!(err, Error::Device { operation: "apply_speaker", .. }));
    }

    #[tokio::test]
    async fn test_null_media_accepts_everything() {
        let device = NullMedia;
        assert!(MediaAction::Start(MediaKind::Video).apply(&device).await.is_ok());
        assert!(MediaAction::Stop.apply(&device).await.is_ok());
    }
}
