use crate::error::{ensure_positive, ImuError, Result};
use crate::types::Vector3;
use log::debug;

/// Exponential low-pass filter on a Vector3 stream
///
/// The first sample passes through unfiltered so the output never ramps up from zero.
#[derive(Clone, Debug)]
pub struct LowPassFilter {
    alpha: f32,
    output: Vector3,
    initialized: bool,
}

impl LowPassFilter {
    /// Create a filter from a cutoff and a sample rate.
    ///
    /// Both frequencies must be > 0; this is not checked here (see [`Self::try_new`]).
    /// alpha = dt / (rc + dt), rc = 1 / (2π·cutoff), dt = 1 / sample_rate
    pub fn new(cutoff_hz: f32, sample_hz: f32) -> Self {
        let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
        let dt = 1.0 / sample_hz;
        let alpha = dt / (rc + dt);
        debug!(
            "[LPF] alpha = {:.3} (cutoff={:.1} Hz, sample={:.1} Hz)",
            alpha, cutoff_hz, sample_hz
        );
        Self::with_alpha(alpha)
    }

    /// Checked variant of [`Self::new`]
    pub fn try_new(cutoff_hz: f32, sample_hz: f32) -> Result<Self> {
        ensure_positive("cutoff_hz", cutoff_hz)?;
        ensure_positive("sample_hz", sample_hz)?;
        Ok(Self::new(cutoff_hz, sample_hz))
    }

    /// Create a filter with an explicit smoothing coefficient in (0, 1]
    pub fn with_alpha(alpha: f32) -> Self {
        LowPassFilter {
            alpha,
            output: Vector3::zero(),
            initialized: false,
        }
    }

    pub fn update(&mut self, input: Vector3) -> Vector3 {
        if !self.initialized {
            self.output = input;
            self.initialized = true;
        } else {
            self.output = input * self.alpha + self.output * (1.0 - self.alpha);
        }
        self.output
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Last output, `None` before the first sample
    pub fn output(&self) -> Option<Vector3> {
        self.initialized.then_some(self.output)
    }

    pub fn reset(&mut self) {
        self.output = Vector3::zero();
        self.initialized = false;
    }
}

/// Fixed-window arithmetic mean with a running sum, O(1) per update
#[derive(Clone, Debug)]
pub struct MovingAverageFilter {
    buffer: Vec<Vector3>,
    index: usize,
    count: usize,
    sum: Vector3,
}

impl MovingAverageFilter {
    /// Create a filter over the last `window` samples (a window of 0 is treated as 1)
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        MovingAverageFilter {
            buffer: vec![Vector3::zero(); window],
            index: 0,
            count: 0,
            sum: Vector3::zero(),
        }
    }

    pub fn try_new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(ImuError::InvalidParameter(
                "moving average window must be >= 1".to_string(),
            ));
        }
        Ok(Self::new(window))
    }

    /// Push a sample and return the mean of the filled part of the window.
    /// During warm-up this divides by the number of samples seen, not the window.
    pub fn update(&mut self, input: Vector3) -> Vector3 {
        let window = self.buffer.len();

        if self.count == window {
            self.sum -= self.buffer[self.index];
        }

        self.buffer[self.index] = input;
        self.sum += input;

        self.index = (self.index + 1) % window;
        if self.count < window {
            self.count += 1;
        }

        self.sum / self.count as f32
    }

    pub fn window(&self) -> usize {
        self.buffer.len()
    }

    /// Number of samples currently in the window
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.buffer.len()
    }
}

pub const DEFAULT_MEDIAN_WINDOW: usize = 5;

/// Per-axis median over the last `window` samples, for spike removal
#[derive(Clone, Debug)]
pub struct MedianFilter {
    buffer: Vec<Vector3>,
    scratch: Vec<f32>,
    index: usize,
    count: usize,
}

impl MedianFilter {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        MedianFilter {
            buffer: vec![Vector3::zero(); window],
            scratch: Vec::with_capacity(window),
            index: 0,
            count: 0,
        }
    }

    pub fn update(&mut self, input: Vector3) -> Vector3 {
        let window = self.buffer.len();
        self.buffer[self.index] = input;
        self.index = (self.index + 1) % window;
        if self.count < window {
            self.count += 1;
        }

        Vector3::new(
            self.axis_median(|v| v.x),
            self.axis_median(|v| v.y),
            self.axis_median(|v| v.z),
        )
    }

    // Upper median for even counts
    fn axis_median(&mut self, axis: fn(&Vector3) -> f32) -> f32 {
        self.scratch.clear();
        self.scratch
            .extend(self.buffer[..self.count].iter().map(axis));
        self.scratch.sort_by(|a, b| a.total_cmp(b));
        self.scratch[self.count / 2]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for MedianFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIAN_WINDOW)
    }
}
