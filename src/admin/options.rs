/// Parameters of an operator mode change.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SetModeOptions {
    /// Baseline execution time; the current average is used when unset or `<= 0`.
    pub ref_exec_time_ms: Option<f64>,
    /// Baseline I/O cost; the current average is used when unset or `<= 0`.
    pub ref_io_cost: Option<f64>,
    /// Lock the mode against automatic reconsideration.
    pub fixed: bool,
}

impl SetModeOptions {
    /// Options that lock the mode with explicit baselines.
    pub fn fixed_with(ref_exec_time_ms: f64, ref_io_cost: f64) -> Self {
        Self {
            ref_exec_time_ms: Some(ref_exec_time_ms),
            ref_io_cost: Some(ref_io_cost),
            fixed: true,
        }
    }
}
