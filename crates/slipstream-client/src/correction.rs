use glam::Vec3;

use crate::prediction::{CorrectionMode, CorrectionSnapshot};

/// Render-only offset that hides soft corrections.
///
/// The predicted state jumps immediately; the drawn car starts where it was
/// and eases onto the predicted position over `duration_ms`.
#[derive(Debug, Clone)]
pub struct CorrectionBlend {
    duration_ms: f32,
    initial_offset: Vec3,
    elapsed_ms: f32,
}

impl CorrectionBlend {
    pub fn new(duration_ms: f32) -> Self {
        Self {
            duration_ms: duration_ms.max(1.0),
            initial_offset: Vec3::ZERO,
            elapsed_ms: 0.0,
        }
    }

    /// Fold a reconciliation into the blend.
    pub fn on_correction(&mut self, correction: &CorrectionSnapshot) {
        match correction.mode {
            CorrectionMode::None => {},
            CorrectionMode::Soft => {
                // Keep whatever offset is still showing so chained
                // corrections do not pop.
                self.initial_offset = self.offset() - correction.applied_position_delta;
                self.elapsed_ms = 0.0;
            },
            CorrectionMode::Hard => self.clear(),
        }
    }

    pub fn update(&mut self, frame_dt_ms: f32) {
        self.elapsed_ms = (self.elapsed_ms + frame_dt_ms).min(self.duration_ms);
    }

    /// Offset to add to the predicted position when drawing.
    pub fn offset(&self) -> Vec3 {
        let t = (self.elapsed_ms / self.duration_ms).clamp(0.0, 1.0);
        self.initial_offset * (1.0 - ease_out_cubic(t))
    }

    pub fn is_settled(&self) -> bool {
        self.elapsed_ms >= self.duration_ms || self.initial_offset == Vec3::ZERO
    }

    pub fn clear(&mut self) {
        self.initial_offset = Vec3::ZERO;
        self.elapsed_ms = self.duration_ms;
    }
}

fn ease_out_cubic(t: f32) -> f32 {
    1.0 - (1.0 - t).powi(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correction(mode: CorrectionMode, dx: f32) -> CorrectionSnapshot {
        CorrectionSnapshot {
            sequence: 1,
            position_error: dx.abs(),
            yaw_error: 0.0,
            input_lead: 2,
            applied_position_delta: Vec3::new(dx, 0.0, 0.0),
            mode,
        }
    }

    #[test]
    fn soft_correction_starts_at_old_position_and_settles() {
        let mut blend = CorrectionBlend::new(150.0);
        blend.on_correction(&correction(CorrectionMode::Soft, 1.0));
        assert_eq!(blend.offset(), Vec3::new(-1.0, 0.0, 0.0));

        blend.update(16.0);
        let early = blend.offset().x;
        assert!(early > -1.0 && early < 0.0);

        for _ in 0..20 {
            blend.update(16.0);
        }
        assert!(blend.is_settled());
        assert_eq!(blend.offset(), Vec3::ZERO);
    }

    #[test]
    fn hard_correction_clears_offset() {
        let mut blend = CorrectionBlend::new(150.0);
        blend.on_correction(&correction(CorrectionMode::Soft, 2.0));
        blend.on_correction(&correction(CorrectionMode::Hard, 10.0));
        assert_eq!(blend.offset(), Vec3::ZERO);
        assert!(blend.is_settled());
    }

    #[test]
    fn exact_prediction_leaves_blend_alone() {
        let mut blend = CorrectionBlend::new(150.0);
        blend.on_correction(&correction(CorrectionMode::None, 0.0));
        assert!(blend.is_settled());
    }
}
