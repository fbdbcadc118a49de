//! Binary entry point for the planmentor replay CLI.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use planmentor::{
    admin::{self, EntryRow, ReconsiderReport, SetModeOptions},
    drift::DriftVerdict,
    hooks::MemoryPlanSources,
    logging::init_logging,
    Deallocate, ExecSample, Fingerprint, MentorContext, MentorSettings, PlanMode, Session,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(
    name = "planmentor",
    version,
    about = "Replay plan-cache events through planmentor and inspect its decisions",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "PLANMENTOR_LOG",
        default_value = "warn",
        help = "tracing filter, e.g. planmentor=debug"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Drive a JSON-lines event trace through a fresh context")]
    Replay(ReplayCmd),

    #[command(about = "Print the default settings")]
    Defaults,
}

#[derive(Args, Debug)]
struct ReplayCmd {
    #[arg(value_name = "TRACE", help = "JSON-lines trace, one event per line")]
    trace: PathBuf,

    #[arg(long, value_name = "FILE", help = "TOML settings file")]
    config: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TraceEvent {
    Prepare {
        session: u32,
        name: String,
        fingerprint: u64,
    },
    Deallocate {
        session: u32,
        #[serde(default)]
        name: Option<String>,
    },
    Plan {
        session: u32,
        name: String,
        duration_ms: f64,
        #[serde(default)]
        custom_cost: Option<f64>,
        #[serde(default)]
        generic_cost: Option<f64>,
    },
    Execute {
        session: u32,
        name: String,
        io_cost: i64,
        exec_time_ms: f64,
        generic: bool,
    },
    Close {
        session: u32,
    },
    Reconsider,
    SetMode {
        fingerprint: u64,
        mode: PlanMode,
        #[serde(default)]
        ref_exec_time_ms: Option<f64>,
        #[serde(default)]
        ref_io_cost: Option<f64>,
        #[serde(default)]
        fixed: bool,
    },
    Reset,
    Reload,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    events: usize,
    generation: u64,
    drift_resets: usize,
    reconsiderations: Vec<ReconsiderReport>,
    entries: Vec<EntryRow>,
}

struct ReplayState {
    ctx: Arc<MentorContext>,
    sessions: BTreeMap<u32, (Session, MemoryPlanSources)>,
    drift_resets: usize,
    reconsiderations: Vec<ReconsiderReport>,
}

impl ReplayState {
    fn new(ctx: Arc<MentorContext>) -> Self {
        Self {
            ctx,
            sessions: BTreeMap::new(),
            drift_resets: 0,
            reconsiderations: Vec::new(),
        }
    }

    fn session(&mut self, id: u32) -> &mut (Session, MemoryPlanSources) {
        let ctx = &self.ctx;
        self.sessions
            .entry(id)
            .or_insert_with(|| (ctx.open_session(), MemoryPlanSources::new()))
    }

    fn apply(&mut self, event: TraceEvent) -> Result<(), Box<dyn Error>> {
        match event {
            TraceEvent::Prepare {
                session,
                name,
                fingerprint,
            } => {
                let (session, sources) = self.session(session);
                let fp = Fingerprint(fingerprint);
                let (handle, replaced) = sources.prepare(name, fp);
                if let Some((old, old_fp)) = replaced {
                    session.on_deallocate(Deallocate::One {
                        fingerprint: old_fp,
                        handle: old,
                    });
                }
                if let Err(err) = session.on_prepare(fp, handle) {
                    warn!(error = %err, "prepare event not tracked");
                }
            }
            TraceEvent::Deallocate { session, name } => {
                let (session, sources) = self.session(session);
                match name {
                    Some(name) => {
                        let (handle, fingerprint) = sources
                            .deallocate(&name)
                            .ok_or_else(|| format!("unknown statement '{name}'"))?;
                        session.on_deallocate(Deallocate::One {
                            fingerprint,
                            handle,
                        });
                    }
                    None => {
                        sources.deallocate_all();
                        session.on_deallocate(Deallocate::All);
                    }
                }
            }
            TraceEvent::Plan {
                session,
                name,
                duration_ms,
                custom_cost,
                generic_cost,
            } => {
                let (session, sources) = self.session(session);
                let (handle, fp) = sources
                    .lookup(&name)
                    .ok_or_else(|| format!("unknown statement '{name}'"))?;
                let resets = match session.on_plan_start(fp, sources) {
                    Some(DriftVerdict::CostsReset { handles }) => handles.len(),
                    _ => 0,
                };
                if let Some(cost) = custom_cost {
                    sources.note_custom_plan(handle, cost);
                }
                if let Some(cost) = generic_cost {
                    sources.note_generic_plan(handle, cost);
                }
                session.on_plan_end(fp, duration_ms);
                self.drift_resets += resets;
            }
            TraceEvent::Execute {
                session,
                name,
                io_cost,
                exec_time_ms,
                generic,
            } => {
                let (session, sources) = self.session(session);
                let (_, fp) = sources
                    .lookup(&name)
                    .ok_or_else(|| format!("unknown statement '{name}'"))?;
                session.on_execute_end(fp, ExecSample::new(io_cost, exec_time_ms), generic);
            }
            TraceEvent::Close { session } => {
                if let Some((mut session, _)) = self.sessions.remove(&session) {
                    let released = session.close();
                    debug!(released, "session closed");
                }
            }
            TraceEvent::Reconsider => {
                self.reconsiderations.push(admin::reconsider(&self.ctx));
            }
            TraceEvent::SetMode {
                fingerprint,
                mode,
                ref_exec_time_ms,
                ref_io_cost,
                fixed,
            } => {
                let opts = SetModeOptions {
                    ref_exec_time_ms,
                    ref_io_cost,
                    fixed,
                };
                match admin::set_mode(&self.ctx, Fingerprint(fingerprint), mode, &opts) {
                    Ok(true) => {}
                    Ok(false) => warn!(fingerprint, "entry busy, mode not set"),
                    Err(err) => warn!(fingerprint, error = %err, "mode change rejected"),
                }
            }
            TraceEvent::Reset => {
                admin::reset(&self.ctx);
            }
            TraceEvent::Reload => {
                admin::reload_config(&self.ctx)?;
            }
        }
        Ok(())
    }
}

fn run_replay(cmd: &ReplayCmd) -> Result<ReplayReport, Box<dyn Error>> {
    let ctx = match &cmd.config {
        Some(path) => MentorContext::from_config_file(path)?,
        None => MentorContext::default(),
    };
    let ctx = Arc::new(ctx);
    let trace = fs::read_to_string(&cmd.trace)
        .map_err(|e| format!("failed to read trace {}: {e}", cmd.trace.display()))?;

    let mut state = ReplayState::new(Arc::clone(&ctx));
    let mut events = 0;
    for (idx, line) in trace.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: TraceEvent =
            serde_json::from_str(line).map_err(|e| format!("line {}: {e}", idx + 1))?;
        state
            .apply(event)
            .map_err(|e| format!("line {}: {e}", idx + 1))?;
        events += 1;
    }

    let report = ReplayReport {
        events,
        generation: ctx.clock().current(),
        drift_resets: state.drift_resets,
        reconsiderations: std::mem::take(&mut state.reconsiderations),
        entries: admin::show_entries(&ctx, None),
    };
    drop(state);
    Ok(report)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    match cli.command {
        Command::Defaults => {
            let settings = MentorSettings::default();
            let toml = settings.to_toml_string()?;
            emit(&cli.format, &settings, |_| print!("{toml}"))?;
        }
        Command::Replay(cmd) => {
            let report = run_replay(&cmd)?;
            emit(&cli.format, &report, |_| print_replay_text(&report))?;
        }
    }
    Ok(())
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_replay_text(report: &ReplayReport) {
    println!(
        "Replayed {} events (generation={} drift_resets={})",
        report.events, report.generation, report.drift_resets
    );
    for (idx, pass) in report.reconsiderations.iter().enumerate() {
        println!(
            "Reconsider #{}: promoted_generic={} promoted_custom={} unchanged={}",
            idx + 1,
            pass.promoted_generic,
            pass.promoted_custom,
            pass.unchanged
        );
    }
    if report.entries.is_empty() {
        println!("No shared entries.");
        return;
    }
    println!();
    println!(
        "{:>20}  {:<13}  {:>5}  {:>8}  {:>7}  {:>10}  {:>11}  {:>10}  {:>12}",
        "FINGERPRINT", "MODE", "FIXED", "REFCOUNT", "SAMPLES", "AVG_IO", "AVG_EXEC_MS", "REF_IO", "LAST_PLAN_MS"
    );
    for row in &report.entries {
        println!(
            "{:>20}  {:<13}  {:>5}  {:>8}  {:>7}  {:>10.2}  {:>11.3}  {:>10}  {:>12}",
            row.fingerprint.0,
            row.mode.to_string(),
            row.fixed,
            row.refcount,
            row.sample_count,
            row.avg_io_cost,
            row.avg_exec_time_ms,
            optional(row.ref_io_cost),
            optional(row.last_plan_time_ms),
        );
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}
