/// Estimate of the server clock in local terms.
///
/// Snapshot times are smoothed into an offset so that interpolation render
/// time and ability cooldowns live in the server time domain.
#[derive(Debug, Clone)]
pub struct ServerClock {
    offset_ms: Option<f64>,
    smoothing: f64,
}

impl ServerClock {
    pub fn new(smoothing: f64) -> Self {
        Self {
            offset_ms: None,
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    /// Feed a server timestamp observed at `local_now_ms`.
    pub fn observe(&mut self, server_time_ms: u64, local_now_ms: f64) {
        let sample = server_time_ms as f64 - local_now_ms;
        self.offset_ms = Some(match self.offset_ms {
            None => sample,
            // Jumps (server restart, big stall) resync immediately.
            Some(prev) if (sample - prev).abs() > 1000.0 => sample,
            Some(prev) => prev + (sample - prev) * self.smoothing,
        });
    }

    pub fn is_synced(&self) -> bool {
        self.offset_ms.is_some()
    }

    /// Estimated server time, in ms.
    pub fn server_now_ms(&self, local_now_ms: f64) -> f64 {
        local_now_ms + self.offset_ms.unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.offset_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_offset() {
        let mut clock = ServerClock::new(0.1);
        assert!(!clock.is_synced());
        clock.observe(10_000, 400.0);
        assert_eq!(clock.server_now_ms(500.0), 10_100.0);
    }

    #[test]
    fn jitter_is_smoothed() {
        let mut clock = ServerClock::new(0.1);
        clock.observe(10_000, 0.0);
        clock.observe(10_100, 0.0);
        assert!((clock.server_now_ms(0.0) - 10_010.0).abs() < 1e-9);
    }

    #[test]
    fn large_jump_resyncs() {
        let mut clock = ServerClock::new(0.1);
        clock.observe(10_000, 0.0);
        clock.observe(50_000, 0.0);
        assert_eq!(clock.server_now_ms(0.0), 50_000.0);
    }
}
