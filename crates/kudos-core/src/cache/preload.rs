//! Preloading
//!
//! Fire-and-forget fetches that fill the mirror ahead of navigation. Failures
//! are logged and published, never returned.

use super::{EntryOrigin, KudosCache, Pending};
use crate::event::CacheEvent;
use kudos_types::Category;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

impl KudosCache {
    /// Fetch the configured preload categories in the background.
    ///
    /// Categories already being preloaded are skipped.
    pub fn preload_initial_data(self: &Arc<Self>) -> Pending {
        let handles = self
            .config
            .preload
            .iter()
            .filter(|c| !c.is_parameterized())
            .filter_map(|&category| self.spawn_preload(category, None))
            .collect();
        Pending::new(handles)
    }

    /// Fetch a parameter-dependent category (history for a user id).
    ///
    /// Returns `None` without fetching when no parameter is known, when the
    /// category is already populated for this parameter, or when the same
    /// fetch is already running. An entry held for a different parameter is
    /// dropped first so it is never served for this one.
    pub fn preload_parameterized(
        self: &Arc<Self>,
        category: Category,
        param: Option<&str>,
    ) -> Option<Pending> {
        let Some(param) = param.filter(|p| !p.is_empty()) else {
            debug!(%category, "No parameter known yet, preload skipped");
            return None;
        };
        let scope = category.is_parameterized().then(|| param.to_string());
        let key = (category, scope.clone());

        // Check, supersede and claim under one lock so a losing caller
        // never touches the slot the winner is about to fill
        let generation = {
            let mut in_flight = self.in_flight.lock();
            if self
                .mirror
                .get(category)
                .is_some_and(|entry| entry.is_for(scope.as_deref()))
            {
                debug!(%category, "Already populated, preload skipped");
                return None;
            }
            if !in_flight.insert(key.clone()) {
                debug!(%category, "Preload already in flight");
                return None;
            }

            // Supersedes whatever is held or still being fetched for another parameter
            if self.mirror.clear(category).is_some() {
                debug!(%category, "Populated for another parameter, dropped");
                self.events.publish(CacheEvent::Invalidated(category));
            }
            self.mirror.generation(category)
        };

        Some(Pending::new(vec![self.spawn_fetch(key, generation)]))
    }

    fn spawn_preload(
        self: &Arc<Self>,
        category: Category,
        scope: Option<String>,
    ) -> Option<JoinHandle<()>> {
        let key = (category, scope);
        let generation = {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(key.clone()) {
                debug!(%category, "Preload already in flight");
                return None;
            }
            self.mirror.generation(category)
        };
        Some(self.spawn_fetch(key, generation))
    }

    /// Fetch and install a claimed `in_flight` key, releasing it afterwards
    fn spawn_fetch(
        self: &Arc<Self>,
        key: (Category, Option<String>),
        generation: u64,
    ) -> JoinHandle<()> {
        let (category, scope) = key.clone();
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            match cache.fetch(category, scope.as_deref()).await {
                Ok(value) => {
                    let installed = if category.is_parameterized() {
                        // A reset or user switch while fetching wins
                        cache
                            .install_guarded(category, generation, scope, value, EntryOrigin::Preload)
                            .is_some()
                    } else {
                        cache.install(category, scope, value, EntryOrigin::Preload);
                        true
                    };

                    if installed {
                        debug!(%category, "Preloaded");
                        cache.events.publish(CacheEvent::Refreshed(category));
                    } else {
                        debug!(%category, "Session changed during preload, result discarded");
                    }
                }
                Err(e) => {
                    warn!(%category, error = %e, "Preload failed");
                    cache.events.publish(CacheEvent::FetchFailed {
                        category,
                        message: e.to_string(),
                    });
                }
            }
            cache.in_flight.lock().remove(&key);
        })
    }
}
