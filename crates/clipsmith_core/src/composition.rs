use crate::error::{CoreError, Result};
use crate::types::*;
use uuid::Uuid;

impl Composition {
    /// Create a new empty composition with the given name and canvas.
    pub fn new(name: impl Into<String>, canvas: Canvas) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            canvas,
            tracks: vec![],
            overlays: vec![],
            audio_layers: vec![],
        }
    }

    /// Append an empty track and return its id.
    pub fn add_track(&mut self) -> Uuid {
        let track = Track::new();
        let id = track.id;
        self.tracks.push(track);
        id
    }

    /// Add a clip to a track. The trim window must be non-empty, the speed
    /// positive, and the placement window must not overlap existing clips.
    /// Clips are kept sorted by timeline position.
    pub fn add_clip(&mut self, track_id: Uuid, clip: Clip) -> Result<()> {
        if clip.source_in >= clip.source_out {
            return Err(CoreError::InvalidTrim(format!(
                "source_in {} >= source_out {}",
                clip.source_in, clip.source_out
            )));
        }
        if clip.speed <= 0.0 || !clip.speed.is_finite() {
            return Err(CoreError::InvalidTrim(format!(
                "speed factor {} is not positive",
                clip.speed
            )));
        }

        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(CoreError::TrackNotFound(track_id))?;

        for existing in &track.clips {
            if windows_overlap(
                existing.timeline_start,
                existing.timeline_end(),
                clip.timeline_start,
                clip.timeline_end(),
            ) {
                return Err(CoreError::OverlapDetected);
            }
        }

        track.clips.push(clip);
        track.clips.sort_by_key(|c| c.timeline_start);
        Ok(())
    }

    /// Remove a clip by id, along with any transition anchored at the
    /// boundaries it participated in.
    pub fn remove_clip(&mut self, clip_id: Uuid) -> Result<Clip> {
        for track in &mut self.tracks {
            if let Some(pos) = track.clips.iter().position(|c| c.id == clip_id) {
                let clip = track.clips.remove(pos);
                track
                    .transitions
                    .retain(|t| t.after_clip != pos && t.after_clip + 1 != pos);
                // Boundary indices after the removed clip shift down by one.
                for t in &mut track.transitions {
                    if t.after_clip > pos {
                        t.after_clip -= 1;
                    }
                }
                return Ok(clip);
            }
        }
        Err(CoreError::ClipNotFound(clip_id))
    }

    /// Anchor a transition at the boundary after clip `after_clip`. At most
    /// one transition per boundary; its duration may not exceed either
    /// neighbor's display window.
    pub fn add_transition(&mut self, track_id: Uuid, transition: Transition) -> Result<()> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(CoreError::TrackNotFound(track_id))?;

        let boundary = transition.after_clip;
        if boundary + 1 >= track.clips.len() {
            return Err(CoreError::InvalidTransition(format!(
                "boundary {boundary} has no following clip"
            )));
        }
        if track.transitions.iter().any(|t| t.after_clip == boundary) {
            return Err(CoreError::InvalidTransition(format!(
                "boundary {boundary} already has a transition"
            )));
        }

        let left = track.clips[boundary].display_len();
        let right = track.clips[boundary + 1].display_len();
        if transition.consumed() > left.min(right) {
            return Err(CoreError::InvalidTransition(format!(
                "duration {} exceeds neighbor window {}",
                transition.duration,
                left.min(right)
            )));
        }
        if transition.kind != TransitionKind::Cut && transition.duration <= TimeUs::ZERO {
            return Err(CoreError::InvalidTransition(
                "duration must be positive".to_string(),
            ));
        }

        track.transitions.push(transition);
        track.transitions.sort_by_key(|t| t.after_clip);
        Ok(())
    }

    /// Attach a text overlay. Its window must lie inside the output timeline
    /// and any fade must fit inside the window.
    pub fn add_overlay(&mut self, overlay: TextOverlay) -> Result<()> {
        if overlay.duration <= TimeUs::ZERO {
            return Err(CoreError::InvalidOverlay(
                "duration must be positive".to_string(),
            ));
        }
        if overlay.start < TimeUs::ZERO || overlay.end() > self.total_duration() {
            return Err(CoreError::InvalidOverlay(format!(
                "window [{}, {}) outside timeline [00:00:00.000, {})",
                overlay.start,
                overlay.end(),
                self.total_duration()
            )));
        }
        if let Some(fade) = &overlay.fade {
            if fade.fade_in + fade.fade_out > overlay.duration {
                return Err(CoreError::InvalidOverlay(
                    "fade exceeds overlay window".to_string(),
                ));
            }
        }
        self.overlays.push(overlay);
        Ok(())
    }

    /// Attach an audio layer. Gain must be a sane non-negative factor and
    /// the layer must end inside the output timeline.
    pub fn add_audio_layer(&mut self, layer: AudioLayer) -> Result<()> {
        if !(0.0..=16.0).contains(&layer.gain) || !layer.gain.is_finite() {
            return Err(CoreError::InvalidLayer(format!(
                "gain {} out of range",
                layer.gain
            )));
        }
        if layer.duration <= TimeUs::ZERO {
            return Err(CoreError::InvalidLayer(
                "duration must be positive".to_string(),
            ));
        }
        if layer.offset < TimeUs::ZERO || layer.end() > self.total_duration() {
            return Err(CoreError::InvalidLayer(format!(
                "window [{}, {}) outside timeline",
                layer.offset,
                layer.end()
            )));
        }
        self.audio_layers.push(layer);
        Ok(())
    }

    /// Serialize for the job queue.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn windows_overlap(a_start: TimeUs, a_end: TimeUs, b_start: TimeUs, b_end: TimeUs) -> bool {
    a_start < b_end && b_start < a_end
}

/// 1920x1080 at 30fps, 48kHz audio.
pub fn canvas_1080p() -> Canvas {
    Canvas {
        width: 1920,
        height: 1080,
        fps: 30.0,
        sample_rate: 48000,
    }
}

/// 1280x720 at 30fps, 48kHz audio.
pub fn canvas_720p() -> Canvas {
    Canvas {
        width: 1280,
        height: 720,
        fps: 30.0,
        sample_rate: 48000,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
