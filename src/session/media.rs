//! Local media boundary
//!
//! Capture itself is external; sessions only need a read-only handle that
//! yields the local outbound tracks. The orchestrator owns one source and
//! attaches the same tracks to every session it creates.

use std::sync::Arc;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Shared capture handle. Must be callable (possibly returning no tracks)
/// before any session attaches tracks; an empty result is a valid
/// receive-only configuration, not an error.
pub trait MediaSource: Send + Sync + 'static {
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>>;
}

/// Receive-only: no local capture at all.
pub struct NoMedia;

impl MediaSource for NoMedia {
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        Vec::new()
    }
}

/// A single pre-built VP8 video track, shared across all sessions. Useful
/// for headless senders and tests; a real capture pipeline writes samples
/// into the track it hands out here.
pub struct StaticVideoSource {
    track: Arc<TrackLocalStaticSample>,
}

impl StaticVideoSource {
    pub fn new() -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "vidmesh".to_owned(),
        ));
        Self { track }
    }

    /// The underlying track, for feeding samples from a capture pipeline.
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }
}

impl Default for StaticVideoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for StaticVideoSource {
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        vec![self.track.clone()]
    }
}
