//! Stimulus waveforms.
//!
//! Pure functions of elapsed time (seconds on the electrometer's relative clock)
//! returning the voltage to command next. No state, no I/O, no error cases.

use std::f64::consts::PI;

/// `amplitude * sin(2π f t) + slope * t + offset`.
pub fn sine(elapsed: f64, frequency: f64, amplitude: f64, slope: f64, offset: f64) -> f64 {
    amplitude * (2.0 * PI * frequency * elapsed).sin() + slope * elapsed + offset
}

/// 50% duty square wave switching between `0` and `amplitude` on the zero
/// crossings of a unit sine of the same frequency.
///
/// The unit sine is rounded to 3 decimals before the sign test, so
/// floating-point noise right at a crossing reads as `0` instead of flipping the
/// output.
pub fn square(elapsed: f64, frequency: f64, amplitude: f64) -> f64 {
    if round_to(sine(elapsed, frequency, 1.0, 0.0, 0.0), 3) <= 0.0 {
        0.0
    } else {
        amplitude
    }
}

/// A stimulus waveform evaluated once per loop iteration.
pub trait Stimulus: Send + Sync {
    /// Target voltage at `elapsed` seconds on the relative clock.
    fn voltage_at(&self, elapsed: f64) -> f64;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// [`square`] with fixed frequency and amplitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareWave {
    /// Frequency in hertz
    pub frequency: f64,
    /// High level in volts
    pub amplitude: f64,
}

impl Stimulus for SquareWave {
    fn voltage_at(&self, elapsed: f64) -> f64 {
        square(elapsed, self.frequency, self.amplitude)
    }

    fn describe(&self) -> String {
        format!("square {} Hz, 0/{} V", self.frequency, self.amplitude)
    }
}

/// [`sine`] with fixed parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineWave {
    /// Frequency in hertz
    pub frequency: f64,
    /// Peak amplitude in volts
    pub amplitude: f64,
    /// Linear ramp in volts per second
    pub slope: f64,
    /// DC offset in volts
    pub offset: f64,
}

impl Stimulus for SineWave {
    fn voltage_at(&self, elapsed: f64) -> f64 {
        sine(elapsed, self.frequency, self.amplitude, self.slope, self.offset)
    }

    fn describe(&self) -> String {
        format!(
            "sine {} Hz, {} V peak, {} V/s ramp, {} V offset",
            self.frequency, self.amplitude, self.slope, self.offset
        )
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
