//! Call-site configuration
//!
//! Everything a pass needs is handed over explicitly: the simulation timing
//! window, the in-flight window of batched exchanges and the reload report
//! locations. Nothing is looked up from ambient state.

use std::path::PathBuf;
use tracing::debug;

/// Timing of the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationContext {
    /// Machine time step in microseconds
    pub machine_time_step_us: u32,
    /// Slow-down factor applied to real time
    pub time_scale_factor: u32,
    /// First tick of the active execution window
    pub first_tick: u32,
    /// End of the active window (exclusive), if the run is bounded
    pub last_tick: Option<u32>,
}

impl SimulationContext {
    /// Context for an unbounded run starting at tick 0
    ///
    /// A zero time step is raised to 1 µs.
    pub fn new(machine_time_step_us: u32, time_scale_factor: u32) -> Self {
        Self {
            machine_time_step_us: machine_time_step_us.max(1),
            time_scale_factor: time_scale_factor.max(1),
            first_tick: 0,
            last_tick: None,
        }
    }

    /// Restrict the run to `[first_tick, last_tick)`
    #[must_use]
    pub fn with_window(mut self, first_tick: u32, last_tick: Option<u32>) -> Self {
        debug!("Simulation window: [{first_tick}, {last_tick:?})");
        self.first_tick = first_tick;
        self.last_tick = last_tick;
        self
    }

    /// True if `tick` lies inside the active window
    #[must_use]
    pub fn in_window(&self, tick: u32) -> bool {
        tick >= self.first_tick && self.last_tick.map_or(true, |last| tick < last)
    }

    /// Convert a timestamp in milliseconds to a machine tick
    ///
    /// `tick = ceil(floor(ms * 1000) / machine_time_step_us)`. Negative or
    /// non-finite timestamps, and ticks beyond `u32::MAX`, have no tick.
    #[must_use]
    pub fn timestamp_to_tick(&self, timestamp_ms: f64) -> Option<u32> {
        if !timestamp_ms.is_finite() || timestamp_ms < 0.0 {
            return None;
        }
        let micros = (timestamp_ms * 1000.0).floor();
        let tick = (micros / f64::from(self.machine_time_step_us)).ceil();
        if tick > f64::from(u32::MAX) {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(tick as u32)
    }
}

impl Default for SimulationContext {
    fn default() -> Self {
        Self::new(1000, 1)
    }
}

/// Batched exchange settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Requests in flight at once (at least 1)
    pub window: usize,
}

impl ExchangeConfig {
    /// Default in-flight window
    pub const DEFAULT_WINDOW: usize = 8;

    /// Configuration with a given window (clamped to at least 1)
    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self::with_window(Self::DEFAULT_WINDOW)
    }
}

/// Where a reload pass writes its host-side artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadConfig {
    /// Parent directory for regenerated region images
    pub application_data_dir: PathBuf,
    /// Parent directory for human-readable renderings
    pub report_dir: PathBuf,
    /// Write a text rendering of every executed specification
    pub write_text_specs: bool,
    /// Machine name used in artifact file names
    pub hostname: String,
}

impl ReloadConfig {
    /// Configuration writing images and reports under the given parents
    pub fn new(
        application_data_dir: impl Into<PathBuf>,
        report_dir: impl Into<PathBuf>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            application_data_dir: application_data_dir.into(),
            report_dir: report_dir.into(),
            write_text_specs: false,
            hostname: hostname.into(),
        }
    }

    /// Enable or disable text renderings
    #[must_use]
    pub fn with_text_specs(mut self, write_text_specs: bool) -> Self {
        self.write_text_specs = write_text_specs;
        self
    }
}
