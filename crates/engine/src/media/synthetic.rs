//! Synthetic capture device for demos and tests
//!
//! Produces tone and pattern tracks without touching real hardware.
//! Failures are scriptable per role and per profile so degraded-call
//! paths can be exercised deterministically.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::media::{CaptureDevice, CaptureError, CaptureProfile, OutboundTrack, TrackRole};

/// Capture device backed by signal generators
#[derive(Debug, Default)]
pub struct SyntheticCapture {
    missing_roles: Mutex<HashSet<TrackRole>>,
    busy_roles: Mutex<HashSet<TrackRole>>,
    refused_labels: Mutex<HashSet<&'static str>>,
}

impl SyntheticCapture {
    /// Device with every role available at every profile
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend no device exists for `role`
    pub fn remove_role(&self, role: TrackRole) {
        if let Ok(mut roles) = self.missing_roles.lock() {
            roles.insert(role);
        }
    }

    /// Pretend another process holds the device for `role`
    pub fn make_busy(&self, role: TrackRole) {
        if let Ok(mut roles) = self.busy_roles.lock() {
            roles.insert(role);
        }
    }

    /// Refuse one constraint profile by label
    pub fn refuse_profile(&self, label: &'static str) {
        if let Ok(mut labels) = self.refused_labels.lock() {
            labels.insert(label);
        }
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn acquire(
        &self,
        role: TrackRole,
        profile: &CaptureProfile,
    ) -> Result<OutboundTrack, CaptureError> {
        if self
            .missing_roles
            .lock()
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
        {
            return Err(CaptureError::Missing);
        }
        if self
            .busy_roles
            .lock()
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
        {
            return Err(CaptureError::Busy("device held by another session".to_string()));
        }
        if self
            .refused_labels
            .lock()
            .map(|labels| labels.contains(profile.label))
            .unwrap_or(false)
        {
            return Err(CaptureError::Rejected(format!(
                "profile {} rejected",
                profile.label
            )));
        }

        if role.is_audio() {
            Ok(OutboundTrack::synthetic_tone(role, profile))
        } else {
            Ok(OutboundTrack::synthetic_video(role, profile))
        }
    }
}
