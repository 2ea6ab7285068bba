//! Template registry — tracks template lifecycle per hash.
//!
//! A template advances `initializing → finalized` and is removed on
//! discard; a discarded hash may be registered again from scratch. Every
//! entry carries a `watch` channel so any number of consumers can block
//! until the template becomes usable, and a re-registered hash gets a
//! fresh channel rather than a reused one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use nest_core::DatabaseConfig;

use crate::error::{TemplateError, TemplateResult};

/// Lifecycle state of a template database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateState {
    /// Registered; migrations and seed are still being applied.
    Initializing,
    /// Usable as a clone source.
    Finalized,
    /// Torn down; the hash is free for re-registration.
    Discarded,
}

/// A registered template.
#[derive(Debug, Clone)]
pub struct Template {
    pub hash: String,
    /// Connection parameters of the template database.
    pub config: DatabaseConfig,
    pub created_at: Instant,
}

struct TemplateEntry {
    config: DatabaseConfig,
    created_at: Instant,
    state: watch::Sender<TemplateState>,
}

impl TemplateEntry {
    fn to_template(&self, hash: &str) -> Template {
        Template {
            hash: hash.to_string(),
            config: self.config.clone(),
            created_at: self.created_at,
        }
    }
}

/// Mapping from template hash to template entry. All transitions happen
/// under a single registry lock, which is never held across I/O or waits.
pub struct TemplateRegistry {
    templates: Mutex<HashMap<String, TemplateEntry>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: Mutex::new(HashMap::new()),
        }
    }

    /// Register `hash`, creating it in `initializing` if absent.
    ///
    /// Returns the template plus whether it already existed; concurrent
    /// initializers of the same hash observe a consistent flag, and the
    /// caller uses it to skip the expensive schema setup.
    pub fn initialize(&self, hash: &str, config: DatabaseConfig) -> (Template, bool) {
        let mut templates = self.templates.lock().unwrap();
        if let Some(entry) = templates.get(hash) {
            return (entry.to_template(hash), true);
        }

        let (state, _) = watch::channel(TemplateState::Initializing);
        let entry = TemplateEntry {
            config,
            created_at: Instant::now(),
            state,
        };
        let template = entry.to_template(hash);
        templates.insert(hash.to_string(), entry);
        debug!(%hash, "template registered");
        (template, false)
    }

    /// Transition `initializing → finalized` and wake every waiter.
    /// Idempotent on an already finalized template.
    pub fn finalize(&self, hash: &str) -> TemplateResult<Template> {
        let templates = self.templates.lock().unwrap();
        let entry = templates.get(hash).ok_or(TemplateError::NotFound)?;
        entry.state.send_replace(TemplateState::Finalized);
        debug!(%hash, "template finalized");
        Ok(entry.to_template(hash))
    }

    /// Remove the entry for `hash`, broadcasting `discarded` to waiters.
    pub fn discard(&self, hash: &str) -> TemplateResult<()> {
        let mut templates = self.templates.lock().unwrap();
        let entry = templates.remove(hash).ok_or(TemplateError::NotFound)?;
        // Broadcast before the sender drops so waiters observe the state
        // instead of a closed channel.
        entry.state.send_replace(TemplateState::Discarded);
        debug!(%hash, "template discarded");
        Ok(())
    }

    /// Current state of `hash`, if registered.
    pub fn state(&self, hash: &str) -> Option<TemplateState> {
        let templates = self.templates.lock().unwrap();
        templates.get(hash).map(|entry| *entry.state.borrow())
    }

    /// The template registered for `hash`, in whatever state.
    pub fn get(&self, hash: &str) -> Option<Template> {
        let templates = self.templates.lock().unwrap();
        templates.get(hash).map(|entry| entry.to_template(hash))
    }

    /// Block until `hash` is finalized, failing after `timeout`.
    ///
    /// Wakeups are broadcast; any number of consumers may wait on the same
    /// hash. Cancelling the returned future has no effect on the template.
    pub async fn wait_until_finalized(
        &self,
        hash: &str,
        timeout: Duration,
    ) -> TemplateResult<Template> {
        let (template, mut state_rx) = {
            let templates = self.templates.lock().unwrap();
            let entry = templates.get(hash).ok_or(TemplateError::NotFound)?;
            (entry.to_template(hash), entry.state.subscribe())
        };

        let wait = state_rx.wait_for(|state| *state != TemplateState::Initializing);
        let outcome = match tokio::time::timeout(timeout, wait).await {
            Err(_) => Err(TemplateError::FinalizeTimeout),
            // Sender dropped: the entry was discarded while we waited.
            Ok(Err(_)) => Err(TemplateError::Discarded),
            Ok(Ok(state)) => Ok(*state),
        };
        match outcome {
            Err(e) => Err(e),
            Ok(state) => {
                if state == TemplateState::Finalized {
                    Ok(template)
                } else {
                    Err(TemplateError::Discarded)
                }
            }
        }
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
