use std::collections::VecDeque;

use slipstream_core::motion::{MotionState, lerp_angle};

/// States that can be blended between two snapshots.
pub trait Interpolate: Clone {
    /// Blend `self -> to` at fraction `t` in `[0, 1]`.
    fn interpolate(&self, to: &Self, t: f32) -> Self;
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

impl Interpolate for MotionState {
    fn interpolate(&self, to: &Self, t: f32) -> Self {
        MotionState {
            x: lerp(self.x, to.x, t),
            y: lerp(self.y, to.y, t),
            z: lerp(self.z, to.z, t),
            yaw: lerp_angle(self.yaw, to.yaw, t),
            speed: lerp(self.speed, to.speed, t),
            slip: lerp(self.slip, to.slip, t),
            suspension_offset: lerp(self.suspension_offset, to.suspension_offset, t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Sample<T> {
    timestamp_ms: f64,
    state: T,
}

/// Time-ordered history of one remote entity's authoritative states.
#[derive(Debug, Clone)]
pub struct InterpolationBuffer<T> {
    samples: VecDeque<Sample<T>>,
    retention_ms: f64,
    capacity: usize,
}

impl<T: Interpolate> InterpolationBuffer<T> {
    pub fn new(retention_ms: f64, capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            retention_ms,
            capacity: capacity.max(2),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&T> {
        self.samples.back().map(|s| &s.state)
    }

    pub fn newest_timestamp(&self) -> Option<f64> {
        self.samples.back().map(|s| s.timestamp_ms)
    }

    /// Insert a sample in time order. A sample with an existing timestamp
    /// replaces it. The oldest sample is evicted past capacity.
    pub fn push(&mut self, timestamp_ms: f64, state: T) {
        let idx = self
            .samples
            .partition_point(|s| s.timestamp_ms < timestamp_ms);
        if let Some(existing) = self.samples.get_mut(idx)
            && existing.timestamp_ms == timestamp_ms
        {
            existing.state = state;
            return;
        }
        self.samples.insert(idx, Sample {
            timestamp_ms,
            state,
        });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Evict samples older than the retention window, keeping the newest
    /// one at or before the cutoff so a render time there stays bracketed.
    pub fn prune(&mut self, now_ms: f64) {
        let cutoff = now_ms - self.retention_ms;
        while self.samples.len() > 1
            && self
                .samples
                .get(1)
                .is_some_and(|next| next.timestamp_ms <= cutoff)
        {
            self.samples.pop_front();
        }
    }

    /// Smoothed state at `render_ms`.
    ///
    /// Clamps to the oldest sample before the buffer and holds the newest
    /// after it; never extrapolates. `None` when nothing has arrived yet.
    pub fn sample_at(&self, render_ms: f64) -> Option<T> {
        let first = self.samples.front()?;
        let last = self.samples.back()?;
        if self.samples.len() == 1 || render_ms >= last.timestamp_ms {
            return Some(last.state.clone());
        }
        if render_ms <= first.timestamp_ms {
            return Some(first.state.clone());
        }
        let upper = self
            .samples
            .partition_point(|s| s.timestamp_ms <= render_ms);
        let (a, b) = (&self.samples[upper - 1], &self.samples[upper]);
        let span = b.timestamp_ms - a.timestamp_ms;
        let t = if span > 0.0 {
            ((render_ms - a.timestamp_ms) / span) as f32
        } else {
            1.0
        };
        Some(a.state.interpolate(&b.state, t))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_x(x: f32) -> MotionState {
        MotionState {
            x,
            ..MotionState::default()
        }
    }

    fn two_sample_buffer() -> InterpolationBuffer<MotionState> {
        let mut buffer = InterpolationBuffer::new(1000.0, 64);
        buffer.push(0.0, at_x(0.0));
        buffer.push(100.0, at_x(10.0));
        buffer
    }

    #[test]
    fn midpoint_is_linear() {
        let buffer = two_sample_buffer();
        let mid = buffer.sample_at(50.0).expect("sample");
        assert!((mid.x - 5.0).abs() < 1e-5);
    }

    #[test]
    fn before_oldest_clamps() {
        let buffer = two_sample_buffer();
        assert_eq!(buffer.sample_at(-40.0).map(|s| s.x), Some(0.0));
        assert_eq!(buffer.sample_at(0.0).map(|s| s.x), Some(0.0));
    }

    #[test]
    fn after_newest_holds() {
        let buffer = two_sample_buffer();
        assert_eq!(buffer.sample_at(100.0).map(|s| s.x), Some(10.0));
        assert_eq!(buffer.sample_at(250.0).map(|s| s.x), Some(10.0));
    }

    #[test]
    fn empty_buffer_renders_nothing() {
        let buffer: InterpolationBuffer<MotionState> = InterpolationBuffer::new(1000.0, 8);
        assert!(buffer.sample_at(10.0).is_none());
    }

    #[test]
    fn single_sample_returns_it() {
        let mut buffer = InterpolationBuffer::new(1000.0, 8);
        buffer.push(500.0, at_x(3.0));
        assert_eq!(buffer.sample_at(0.0).map(|s| s.x), Some(3.0));
        assert_eq!(buffer.sample_at(900.0).map(|s| s.x), Some(3.0));
    }

    #[test]
    fn out_of_order_push_is_sorted() {
        let mut buffer = InterpolationBuffer::new(1000.0, 8);
        buffer.push(100.0, at_x(10.0));
        buffer.push(0.0, at_x(0.0));
        buffer.push(100.0, at_x(20.0));
        assert_eq!(buffer.len(), 2);
        let mid = buffer.sample_at(50.0).expect("sample");
        assert!((mid.x - 10.0).abs() < 1e-5);
    }

    #[test]
    fn heading_takes_short_way_round() {
        let mut buffer = InterpolationBuffer::new(1000.0, 8);
        let mut a = at_x(0.0);
        a.yaw = 3.0;
        let mut b = at_x(0.0);
        b.yaw = -3.0;
        buffer.push(0.0, a);
        buffer.push(100.0, b);
        let mid = buffer.sample_at(50.0).expect("sample");
        assert!(mid.yaw.abs() > 3.0, "yaw {}", mid.yaw);
    }

    #[test]
    fn capacity_and_retention_bound_memory() {
        let mut buffer = InterpolationBuffer::new(200.0, 4);
        for i in 0..10 {
            buffer.push(f64::from(i) * 50.0, at_x(i as f32));
        }
        assert_eq!(buffer.len(), 4);

        buffer.prune(600.0);
        // Cutoff 400: keep 400 as the lower bracket, then 450.
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.sample_at(0.0).map(|s| s.x), Some(8.0));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sample_stays_within_bracket(
                x0 in -1000.0f32..1000.0,
                x1 in -1000.0f32..1000.0,
                render in -50.0f64..150.0,
            ) {
                let mut buffer = InterpolationBuffer::new(1000.0, 8);
                buffer.push(0.0, at_x(x0));
                buffer.push(100.0, at_x(x1));
                let sample = buffer.sample_at(render).expect("non-empty");
                let (lo, hi) = (x0.min(x1), x0.max(x1));
                prop_assert!(sample.x >= lo - 1e-3 && sample.x <= hi + 1e-3);
            }
        }
    }
}
