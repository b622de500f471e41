//! Ordered constraint fallback for capture devices

use tracing::{debug, warn};

use crate::media::{ladder_for, CaptureDevice, CaptureError, CaptureProfile, OutboundTrack, TrackRole};

/// Result of walking a role's constraint ladder
#[derive(Debug)]
pub enum CaptureOutcome {
    /// A profile was accepted; `profile` records which rung
    Acquired {
        track: OutboundTrack,
        profile: CaptureProfile,
    },
    /// A device exists but refused every profile
    Degraded { reason: String },
    /// No device for this role at all
    Unavailable,
}

impl CaptureOutcome {
    /// Whether a track was acquired
    pub fn is_acquired(&self) -> bool {
        matches!(self, CaptureOutcome::Acquired { .. })
    }
}

/// Try each profile in the role's ladder until one is accepted.
///
/// A missing device on the first attempt short-circuits to `Unavailable`;
/// refusals and busy devices fall through to the next rung. Exhausting the
/// ladder yields `Degraded` with the last refusal as the reason.
pub async fn acquire_with_fallback(device: &dyn CaptureDevice, role: TrackRole) -> CaptureOutcome {
    let mut last_error: Option<CaptureError> = None;

    for (rung, profile) in ladder_for(role).iter().enumerate() {
        match device.acquire(role, profile).await {
            Ok(track) => {
                if rung > 0 {
                    debug!(
                        role = role.as_str(),
                        profile = profile.label,
                        "capture fell back to a lower profile"
                    );
                }
                return CaptureOutcome::Acquired {
                    track,
                    profile: *profile,
                };
            }
            Err(CaptureError::Missing) if rung == 0 => {
                debug!(role = role.as_str(), "no capture device");
                return CaptureOutcome::Unavailable;
            }
            Err(err) => {
                warn!(
                    role = role.as_str(),
                    profile = profile.label,
                    error = %err,
                    "capture attempt refused"
                );
                last_error = Some(err);
            }
        }
    }

    CaptureOutcome::Degraded {
        reason: last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "empty constraint ladder".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::SyntheticCapture;
    use crate::media::CAMERA_PROFILES;

    #[tokio::test]
    async fn test_first_profile_wins_when_accepted() {
        let device = SyntheticCapture::new();
        match acquire_with_fallback(&device, TrackRole::Camera).await {
            CaptureOutcome::Acquired { profile, .. } => {
                assert_eq!(profile.label, CAMERA_PROFILES[0].label);
            }
            other => panic!("expected acquisition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refused_profiles_fall_through_in_order() {
        let device = SyntheticCapture::new();
        device.refuse_profile(CAMERA_PROFILES[0].label);
        device.refuse_profile(CAMERA_PROFILES[1].label);
        match acquire_with_fallback(&device, TrackRole::Camera).await {
            CaptureOutcome::Acquired { profile, .. } => {
                assert_eq!(profile.label, CAMERA_PROFILES[2].label);
            }
            other => panic!("expected fallback acquisition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exhausted_ladder_degrades_with_reason() {
        let device = SyntheticCapture::new();
        for profile in CAMERA_PROFILES {
            device.refuse_profile(profile.label);
        }
        match acquire_with_fallback(&device, TrackRole::Camera).await {
            CaptureOutcome::Degraded { reason } => {
                assert!(reason.contains("rejected"), "reason was {reason}");
            }
            other => panic!("expected degradation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_device_is_unavailable() {
        let device = SyntheticCapture::new();
        device.remove_role(TrackRole::Microphone);
        assert!(matches!(
            acquire_with_fallback(&device, TrackRole::Microphone).await,
            CaptureOutcome::Unavailable
        ));
    }

    #[tokio::test]
    async fn test_busy_device_degrades_instead_of_vanishing() {
        let device = SyntheticCapture::new();
        device.make_busy(TrackRole::Screen);
        match acquire_with_fallback(&device, TrackRole::Screen).await {
            CaptureOutcome::Degraded { reason } => {
                assert!(reason.contains("busy"), "reason was {reason}");
            }
            other => panic!("expected degradation, got {other:?}"),
        }
    }
}
