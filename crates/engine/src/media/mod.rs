//! Local media capture and outbound tracks
//!
//! Capture devices are opened through an ordered ladder of constraint
//! profiles. The first profile the device accepts wins; a device that
//! rejects every profile degrades the call instead of ending it.

mod capture;
pub mod synthetic;
mod tracks;

pub use capture::{acquire_with_fallback, CaptureOutcome};
pub use tracks::{AudioLevelMeter, OutboundTrack};

use async_trait::async_trait;

/// What an outbound track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackRole {
    /// Voice microphone
    Microphone,
    /// Camera video
    Camera,
    /// Screen-share video
    Screen,
    /// Screen-share system audio
    ScreenAudio,
}

impl TrackRole {
    /// Whether this role carries audio
    pub fn is_audio(&self) -> bool {
        matches!(self, TrackRole::Microphone | TrackRole::ScreenAudio)
    }

    /// Stable name used in track ids and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackRole::Microphone => "mic",
            TrackRole::Camera => "camera",
            TrackRole::Screen => "screen",
            TrackRole::ScreenAudio => "screen-audio",
        }
    }
}

/// One rung of a capture constraint ladder.
///
/// Audio roles use the sample fields, video roles the frame fields; the
/// other set stays zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    /// Stable profile name
    pub label: &'static str,
    /// Audio sample rate in Hz
    pub sample_rate: u32,
    /// Audio channel count
    pub channels: u16,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame rate in fps
    pub framerate_fps: u32,
}

/// Microphone constraint ladder, best first
pub const MICROPHONE_PROFILES: &[CaptureProfile] = &[
    CaptureProfile {
        label: "mic-48k-stereo",
        sample_rate: 48000,
        channels: 2,
        width: 0,
        height: 0,
        framerate_fps: 0,
    },
    CaptureProfile {
        label: "mic-48k-mono",
        sample_rate: 48000,
        channels: 1,
        width: 0,
        height: 0,
        framerate_fps: 0,
    },
    CaptureProfile {
        label: "mic-16k-mono",
        sample_rate: 16000,
        channels: 1,
        width: 0,
        height: 0,
        framerate_fps: 0,
    },
];

/// Camera constraint ladder, best first
pub const CAMERA_PROFILES: &[CaptureProfile] = &[
    CaptureProfile {
        label: "camera-720p30",
        sample_rate: 0,
        channels: 0,
        width: 1280,
        height: 720,
        framerate_fps: 30,
    },
    CaptureProfile {
        label: "camera-480p24",
        sample_rate: 0,
        channels: 0,
        width: 854,
        height: 480,
        framerate_fps: 24,
    },
    CaptureProfile {
        label: "camera-360p15",
        sample_rate: 0,
        channels: 0,
        width: 640,
        height: 360,
        framerate_fps: 15,
    },
];

/// Screen capture constraint ladder, best first
pub const SCREEN_PROFILES: &[CaptureProfile] = &[
    CaptureProfile {
        label: "screen-1080p30",
        sample_rate: 0,
        channels: 0,
        width: 1920,
        height: 1080,
        framerate_fps: 30,
    },
    CaptureProfile {
        label: "screen-720p30",
        sample_rate: 0,
        channels: 0,
        width: 1280,
        height: 720,
        framerate_fps: 30,
    },
    CaptureProfile {
        label: "screen-720p5",
        sample_rate: 0,
        channels: 0,
        width: 1280,
        height: 720,
        framerate_fps: 5,
    },
];

/// Screen system-audio ladder
pub const SCREEN_AUDIO_PROFILES: &[CaptureProfile] = &[CaptureProfile {
    label: "screen-audio-48k-stereo",
    sample_rate: 48000,
    channels: 2,
    width: 0,
    height: 0,
    framerate_fps: 0,
}];

/// Constraint ladder for a role, best profile first
pub fn ladder_for(role: TrackRole) -> &'static [CaptureProfile] {
    match role {
        TrackRole::Microphone => MICROPHONE_PROFILES,
        TrackRole::Camera => CAMERA_PROFILES,
        TrackRole::Screen => SCREEN_PROFILES,
        TrackRole::ScreenAudio => SCREEN_AUDIO_PROFILES,
    }
}

/// Why a single capture attempt failed
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// No device exists for this role
    #[error("no capture device for role")]
    Missing,

    /// Device exists but another process or session holds it
    #[error("device busy: {0}")]
    Busy(String),

    /// Device refused this constraint profile
    #[error("constraints rejected: {0}")]
    Rejected(String),

    /// Device opened but failed to start
    #[error("device failure: {0}")]
    Failed(String),
}

/// Source of local media tracks.
///
/// `acquire` is asked for one exact profile; ladder walking lives in
/// [`acquire_with_fallback`] so every device implementation shares the
/// same fallback behavior.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Open `role` with exactly `profile`
    async fn acquire(
        &self,
        role: TrackRole,
        profile: &CaptureProfile,
    ) -> Result<OutboundTrack, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladders_are_nonempty_and_best_first() {
        for role in [
            TrackRole::Microphone,
            TrackRole::Camera,
            TrackRole::Screen,
            TrackRole::ScreenAudio,
        ] {
            let ladder = ladder_for(role);
            assert!(!ladder.is_empty());
        }
        assert!(CAMERA_PROFILES[0].height > CAMERA_PROFILES[1].height);
        assert!(SCREEN_PROFILES[0].width >= SCREEN_PROFILES[1].width);
    }

    #[test]
    fn test_role_audio_split() {
        assert!(TrackRole::Microphone.is_audio());
        assert!(TrackRole::ScreenAudio.is_audio());
        assert!(!TrackRole::Camera.is_audio());
        assert!(!TrackRole::Screen.is_audio());
    }
}
