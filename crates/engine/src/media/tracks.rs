//! Outbound track wrappers and synthetic sample feeders

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::debug;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::media::{CaptureProfile, TrackRole, MICROPHONE_PROFILES};
use crate::quality::QualityProfile;

const FRAME_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Level meter
// ============================================================================

/// Lock-free RMS level readout for an audio track.
///
/// The feeder records the level of each 20ms frame; the session samples it
/// on its voice-activity interval. Stored as f32 bits in an atomic.
#[derive(Clone, Debug, Default)]
pub struct AudioLevelMeter {
    level_bits: Arc<AtomicU32>,
}

impl AudioLevelMeter {
    /// Record the RMS level of the latest frame, `0.0..=1.0`
    pub fn record(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Latest recorded level
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}

// ============================================================================
// Outbound track
// ============================================================================

/// A local track ready to attach to a peer link.
///
/// Owns the sample feeder for its source; dropping the track stops the
/// feeder. Muting keeps the frame cadence but replaces payloads with
/// silence so the counterpart's jitter buffer never starves.
pub struct OutboundTrack {
    role: TrackRole,
    rtc: Arc<TrackLocalStaticSample>,
    meter: AudioLevelMeter,
    muted: Arc<AtomicBool>,
    share_profile: Arc<Mutex<Option<QualityProfile>>>,
    stop: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl OutboundTrack {
    /// Synthetic test tone for an audio role
    pub fn synthetic_tone(role: TrackRole, profile: &CaptureProfile) -> Self {
        Self::new_audio(
            role,
            profile,
            AudioSource::Tone {
                freq_hz: 440.0,
                amplitude: 0.5,
            },
        )
    }

    /// Silent placeholder microphone for listen-only degraded calls
    pub fn silent_microphone() -> Self {
        Self::new_audio(
            TrackRole::Microphone,
            &MICROPHONE_PROFILES[0],
            AudioSource::Silence,
        )
    }

    /// Synthetic pattern frames for a video role
    pub fn synthetic_video(role: TrackRole, profile: &CaptureProfile) -> Self {
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("{}-{}", role.as_str(), uuid::Uuid::new_v4()),
            format!("peercall-{}", role.as_str()),
        ));
        let share_profile = Arc::new(Mutex::new(Some(starting_share_profile(profile))));
        let stop = Arc::new(AtomicBool::new(false));
        let feeder = spawn_video_feeder(Arc::clone(&rtc), Arc::clone(&share_profile), Arc::clone(&stop));
        Self {
            role,
            rtc,
            meter: AudioLevelMeter::default(),
            muted: Arc::new(AtomicBool::new(false)),
            share_profile,
            stop,
            feeder: Some(feeder),
        }
    }

    fn new_audio(role: TrackRole, profile: &CaptureProfile, source: AudioSource) -> Self {
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("{}-{}", role.as_str(), uuid::Uuid::new_v4()),
            format!("peercall-{}", role.as_str()),
        ));
        let meter = AudioLevelMeter::default();
        let muted = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let feeder = spawn_audio_feeder(
            Arc::clone(&rtc),
            meter.clone(),
            Arc::clone(&muted),
            Arc::clone(&stop),
            profile.sample_rate,
            profile.channels,
            source,
        );
        Self {
            role,
            rtc,
            meter,
            muted,
            share_profile: Arc::new(Mutex::new(None)),
            stop,
            feeder: Some(feeder),
        }
    }

    /// Role this track was captured for
    pub fn role(&self) -> TrackRole {
        self.role
    }

    /// Underlying sample track for attaching to a peer link
    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }

    /// Level meter handle
    pub fn meter(&self) -> AudioLevelMeter {
        self.meter.clone()
    }

    /// Replace payloads with silence without changing the frame cadence
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Whether payloads are currently silenced
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Apply a new share profile; the feeder picks it up on the next frame
    pub fn apply_profile(&self, profile: QualityProfile) {
        if let Ok(mut cell) = self.share_profile.lock() {
            *cell = Some(profile);
        }
    }

    /// Stop the feeder without waiting for it
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for OutboundTrack {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

impl std::fmt::Debug for OutboundTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundTrack")
            .field("role", &self.role)
            .field("muted", &self.is_muted())
            .finish()
    }
}

// The share profile cell starts from the capture resolution; the quality
// controller overwrites it once sharing begins.
fn starting_share_profile(profile: &CaptureProfile) -> QualityProfile {
    let mut base = QualityProfile::for_level(crate::quality::QualityLevel::Medium);
    base.width = profile.width;
    base.height = profile.height;
    base.framerate_fps = profile.framerate_fps.max(1);
    base
}

// ============================================================================
// Feeders
// ============================================================================

#[derive(Clone, Copy)]
enum AudioSource {
    Silence,
    Tone { freq_hz: f64, amplitude: f32 },
}

fn spawn_audio_feeder(
    track: Arc<TrackLocalStaticSample>,
    meter: AudioLevelMeter,
    muted: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
    source: AudioSource,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let samples_per_frame = (sample_rate as usize / 50).max(1);
        let mut phase: f64 = 0.0;
        let mut interval = tokio::time::interval(FRAME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !stop.load(Ordering::Acquire) {
            interval.tick().await;

            let silenced = muted.load(Ordering::Relaxed);
            let (payload, level) = match source {
                AudioSource::Silence => (vec![0u8; samples_per_frame * channels as usize * 2], 0.0),
                AudioSource::Tone { freq_hz, amplitude } => {
                    if silenced {
                        // Keep phase advancing so unmute resumes cleanly
                        phase += freq_hz * samples_per_frame as f64 / sample_rate as f64;
                        phase %= 1.0;
                        (vec![0u8; samples_per_frame * channels as usize * 2], 0.0)
                    } else {
                        tone_frame(
                            &mut phase,
                            freq_hz,
                            amplitude,
                            sample_rate,
                            channels,
                            samples_per_frame,
                        )
                    }
                }
            };
            meter.record(level);

            let sample = Sample {
                data: Bytes::from(payload),
                duration: FRAME_INTERVAL,
                timestamp: std::time::SystemTime::now(),
                ..Default::default()
            };
            if let Err(err) = track.write_sample(&sample).await {
                debug!(error = %err, "audio frame not written");
            }
        }
    })
}

fn tone_frame(
    phase: &mut f64,
    freq_hz: f64,
    amplitude: f32,
    sample_rate: u32,
    channels: u16,
    samples_per_frame: usize,
) -> (Vec<u8>, f32) {
    let mut payload = Vec::with_capacity(samples_per_frame * channels as usize * 2);
    let mut sum_squares: f64 = 0.0;
    let step = freq_hz / sample_rate as f64;
    for _ in 0..samples_per_frame {
        let value = (*phase * std::f64::consts::TAU).sin() * amplitude as f64;
        sum_squares += value * value;
        let pcm = (value * f64::from(i16::MAX)) as i16;
        for _ in 0..channels {
            payload.extend_from_slice(&pcm.to_le_bytes());
        }
        *phase = (*phase + step) % 1.0;
    }
    let rms = (sum_squares / samples_per_frame as f64).sqrt() as f32;
    (payload, rms)
}

fn spawn_video_feeder(
    track: Arc<TrackLocalStaticSample>,
    share_profile: Arc<Mutex<Option<QualityProfile>>>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut frame_index: u8 = 0;
        while !stop.load(Ordering::Acquire) {
            let profile = share_profile
                .lock()
                .ok()
                .and_then(|cell| *cell)
                .unwrap_or_else(|| QualityProfile::for_level(crate::quality::QualityLevel::Medium));
            let fps = profile.framerate_fps.max(1);

            // Payload size tracks the configured resolution so bitrate
            // shifts are visible end to end
            let payload_len = ((profile.width * profile.height) / 1024).max(16) as usize;
            let sample = Sample {
                data: Bytes::from(vec![frame_index; payload_len]),
                duration: Duration::from_secs_f64(1.0 / f64::from(fps)),
                timestamp: std::time::SystemTime::now(),
                ..Default::default()
            };
            if let Err(err) = track.write_sample(&sample).await {
                debug!(error = %err, "video frame not written");
            }
            frame_index = frame_index.wrapping_add(1);
            tokio::time::sleep(Duration::from_secs_f64(1.0 / f64::from(fps))).await;
        }
    })
}
