//! planmentor: adaptive generic/custom plan-cache advisor.
//!
//! Per-session drift correction of the planner's cost estimates, plus a
//! shared policy engine that learns a plan-cache mode per query fingerprint
//! and propagates it to every session through a generation clock.
//!
//! Start with a [`MentorContext`], open one [`Session`] per client
//! connection, and feed it the engine's prepare/plan/execute/deallocate
//! events. Operators steer decisions through [`admin`].

#![warn(missing_docs)]

pub mod admin;
pub mod config;
pub mod context;
pub mod drift;
pub mod hooks;
pub mod logging;
pub mod policy;
pub mod primitives;
pub mod session;
pub mod store;
pub mod types;

pub use config::{MentorSettings, PolicyThresholds, SettingsHandle};
pub use context::MentorContext;
pub use session::{Deallocate, Session};
pub use types::{ExecSample, Fingerprint, MentorError, PlanMode, Result, StatementHandle};
