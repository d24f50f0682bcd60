//! Single-pole IIR smoothing for the display trace

/// Smoothing coefficient tuned for the pulse waveform at typical device rates
pub const DEFAULT_SMOOTHING_ALPHA: f32 = 0.18;

/// First-order low-pass filter: `y[n] = y[n-1] + alpha * (x[n] - y[n-1])`.
///
/// State is a single value. Higher `alpha` tracks the input faster; lower
/// `alpha` smooths harder. A constant input converges to that constant in
/// on the order of `1/alpha` steps.
#[derive(Debug, Clone)]
pub struct SinglePoleFilter {
    alpha: f32,
    state: f32,
}

impl SinglePoleFilter {
    /// Create a filter with the given coefficient, clamped to (0, 1]
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            state: 0.0,
        }
    }

    /// Advance the filter by one sample and return the new output
    #[inline]
    pub fn step(&mut self, sample: f32) -> f32 {
        self.state += self.alpha * (sample - self.state);
        self.state
    }

    /// Current output without advancing
    pub fn value(&self) -> f32 {
        self.state
    }

    /// Set the state directly, as if `value` had been the last output.
    ///
    /// Lets a caller start the filter at the signal level instead of
    /// climbing from zero.
    pub fn seed(&mut self, value: f32) {
        self.state = value;
    }

    /// Return the state to zero
    pub fn reset(&mut self) {
        self.state = 0.0;
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

impl Default for SinglePoleFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_ALPHA)
    }
}
