//! Process-wide planmentor state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::{MentorSettings, SettingsHandle};
use crate::policy::PolicyEngine;
use crate::primitives::concurrency::GenerationClock;
use crate::session::Session;
use crate::store::SharedStore;
use crate::types::Result;

/// Everything sessions of one database share: the statistics store, the
/// generation clock and the live settings.
///
/// Built once at startup and handed to every session as an `Arc`.
#[derive(Debug)]
pub struct MentorContext {
    store: SharedStore,
    clock: GenerationClock,
    settings: SettingsHandle,
    config_path: Option<PathBuf>,
}

impl MentorContext {
    /// Creates a context from validated settings.
    pub fn new(settings: MentorSettings) -> Result<Self> {
        Ok(Self {
            store: SharedStore::new(),
            clock: GenerationClock::new(),
            settings: SettingsHandle::new(settings)?,
            config_path: None,
        })
    }

    /// Creates a context from a TOML settings file that
    /// [`reload_config`](crate::admin::reload_config) re-reads later.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = MentorSettings::load(path)?;
        let mut ctx = Self::new(settings)?;
        ctx.config_path = Some(path.to_path_buf());
        info!(path = %path.display(), "planmentor context created");
        Ok(ctx)
    }

    /// Shared statistics store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Generation clock.
    pub fn clock(&self) -> &GenerationClock {
        &self.clock
    }

    /// Live settings.
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Settings file the context was built from, if any.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Policy engine over this context.
    pub fn policy(&self) -> PolicyEngine<'_> {
        PolicyEngine::new(&self.store, &self.clock, &self.settings)
    }

    /// Opens a session bound to this context.
    pub fn open_session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }
}

impl Default for MentorContext {
    fn default() -> Self {
        Self {
            store: SharedStore::new(),
            clock: GenerationClock::new(),
            settings: SettingsHandle::default(),
            config_path: None,
        }
    }
}
