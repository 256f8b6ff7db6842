//! Generation lifecycle
//!
//! Drives the response store through `Installing -> Installed ->
//! Activating -> Active` at process start. Installation populates a new
//! generation from the manifest and is all-or-nothing; activation swaps
//! the active pointer and sweeps every other generation.

use crate::error::CacheError;
use crate::models::{GenerationHandle, HttpMethod, InterceptedRequest, RequestIdentity, RequestMode};
use crate::network::Fetcher;
use crate::storage::ResponseStore;
use futures::future::try_join_all;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing attempted yet in this process
    Idle,
    Installing,
    Installed,
    Activating,
    Active,
    /// The last install aborted; the previous generation keeps serving
    InstallFailed,
}

pub struct LifecycleManager {
    generation: String,
    manifest: Vec<Url>,
    responses: Arc<ResponseStore>,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<LifecycleState>,
    transition: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        generation: impl Into<String>,
        manifest: Vec<Url>,
        responses: Arc<ResponseStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            generation: generation.into(),
            manifest,
            responses,
            fetcher,
            state: RwLock::new(LifecycleState::Idle),
            transition: Mutex::new(()),
        }
    }

    pub fn generation_name(&self) -> &str {
        &self.generation
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::debug!("Lifecycle {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Process start hook: resume if this generation is already active,
    /// otherwise install and activate it.
    pub async fn start(&self) -> Result<(), CacheError> {
        if let Some(active) = self.responses.active().await {
            if active.name() == self.generation {
                tracing::info!("Generation {} already active; resuming", self.generation);
                self.set_state(LifecycleState::Active);
                return Ok(());
            }
        }
        self.install().await?;
        self.activate().await
    }

    /// `Installing -> Installed`: fetch every manifest URL into a fresh
    /// generation. Any failure discards the generation and leaves the
    /// previously active one serving.
    pub async fn install(&self) -> Result<GenerationHandle, CacheError> {
        let _guard = self.transition.lock().await;
        let from = self.state();
        if !matches!(from, LifecycleState::Idle | LifecycleState::InstallFailed) {
            return Err(CacheError::InvalidTransition {
                from,
                action: "install",
            });
        }
        if self
            .responses
            .active()
            .await
            .is_some_and(|active| active.name() == self.generation)
        {
            return Err(CacheError::InvalidTransition {
                from: LifecycleState::Active,
                action: "install",
            });
        }

        self.set_state(LifecycleState::Installing);
        tracing::info!(
            "Installing generation {} ({} manifest entries)",
            self.generation,
            self.manifest.len()
        );

        match self.populate().await {
            Ok(handle) => {
                self.set_state(LifecycleState::Installed);
                tracing::info!("Installed generation {}", self.generation);
                Ok(handle)
            }
            Err(err) => {
                tracing::error!("{}", err);
                if let Err(e) = self.responses.delete_generation(&self.generation).await {
                    tracing::warn!("Failed to discard partial generation {}: {:#}", self.generation, e);
                }
                self.set_state(LifecycleState::InstallFailed);
                Err(err)
            }
        }
    }

    async fn populate(&self) -> Result<GenerationHandle, CacheError> {
        // A leftover from an interrupted install must not leak into this one.
        if self
            .responses
            .generation_exists(&self.generation)
            .await
            .map_err(CacheError::StoreRead)?
        {
            self.responses
                .delete_generation(&self.generation)
                .await
                .map_err(CacheError::StoreWriteFailure)?;
        }
        let handle = self
            .responses
            .open_generation(&self.generation)
            .await
            .map_err(CacheError::StoreWriteFailure)?;

        let fetches = self.manifest.iter().map(|url| async move {
            let request =
                InterceptedRequest::new(HttpMethod::Get, url.clone(), RequestMode::Subresource);
            let response = self.fetcher.fetch(&request).await.map_err(|e| {
                CacheError::InstallAbort {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if !response.is_success() {
                return Err(CacheError::InstallAbort {
                    url: url.to_string(),
                    reason: CacheError::NonSuccessStatus {
                        status: response.status(),
                    }
                    .to_string(),
                });
            }
            Ok((RequestIdentity::get(url), response))
        });
        let fetched = try_join_all(fetches).await?;

        for (identity, response) in &fetched {
            self.responses
                .put(&handle, identity, response)
                .await
                .map_err(|e| CacheError::InstallAbort {
                    url: identity.url.clone(),
                    reason: CacheError::StoreWriteFailure(e).to_string(),
                })?;
        }
        Ok(handle)
    }

    /// `Installed -> Activating -> Active`. Refused unless the install in
    /// this process succeeded.
    pub async fn activate(&self) -> Result<(), CacheError> {
        let _guard = self.transition.lock().await;
        let from = self.state();
        if from != LifecycleState::Installed {
            return Err(CacheError::InvalidTransition {
                from,
                action: "activate",
            });
        }

        self.set_state(LifecycleState::Activating);
        match self.responses.activate(&self.generation).await {
            Ok(removed) => {
                self.set_state(LifecycleState::Active);
                tracing::info!(
                    "Activated generation {} (removed {} stale)",
                    self.generation,
                    removed.len()
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Installed);
                Err(CacheError::StoreWriteFailure(e))
            }
        }
    }
}
