use tracing::info;

use crate::admin::options::SetModeOptions;
use crate::config::MentorSettings;
use crate::context::MentorContext;
use crate::policy::ReconsiderReport;
use crate::types::{Fingerprint, PlanMode, Result};

/// Forces the plan mode of `fp`. `Ok(false)` means the entry was busy and
/// nothing changed; retry later.
pub fn set_mode(
    ctx: &MentorContext,
    fp: Fingerprint,
    mode: PlanMode,
    opts: &SetModeOptions,
) -> Result<bool> {
    ctx.policy()
        .set_mode(fp, mode, opts.ref_exec_time_ms, opts.ref_io_cost, opts.fixed)
}

/// Returns every entry to `AUTO` and clears its statistics. Returns the
/// number of entries touched.
pub fn reset(ctx: &MentorContext) -> usize {
    ctx.policy().reset()
}

/// Runs one reconsideration pass.
pub fn reconsider(ctx: &MentorContext) -> ReconsiderReport {
    ctx.policy().reconsider()
}

/// Re-reads the settings file (if the context has one) and forces every
/// session to resync on its next plan.
pub fn reload_config(ctx: &MentorContext) -> Result<bool> {
    if let Some(path) = ctx.config_path() {
        let settings = MentorSettings::load(path)?;
        ctx.settings().replace(settings)?;
    }
    let generation = ctx.clock().bump();
    info!(generation, "configuration reloaded");
    Ok(true)
}
