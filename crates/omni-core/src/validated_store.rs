/*
 * Omni - fleet management control plane
 * Copyright (C) 2025 Omni contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Validated store wrapper (spec §4.8): runs ordered validation hooks
//! before delegating to the underlying `TypedStore<T>`. Hooks are
//! type-dispatched at registration (spec §9 design note) simply by being
//! generic over the same `T` as the store they're attached to, rather
//! than any runtime type reflection. A debug-build-only
//! `disable-validation` annotation bypasses every hook.

use omni_resources::well_known::DISABLE_VALIDATION;
use omni_resources::{Metadata, StoreError, TypedStore};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// A single validation hook for resource kind `T`. Hooks accept the full
/// pre-existing resource where relevant (`Update`, `Destroy`), per spec
/// §4.8.
pub trait ValidationHook<T>: Send + Sync {
    /// Validates a `Create`. `metadata`/`spec` are the proposed resource.
    fn validate_create(&self, _metadata: &Metadata, _spec: &T) -> Result<(), String> {
        Ok(())
    }

    /// Validates an `Update`. `before` is the pre-existing resource,
    /// `after` is the proposed one.
    fn validate_update(&self, _before: &(Metadata, T), _after_spec: &T) -> Result<(), String> {
        Ok(())
    }

    /// Validates a `Destroy` of the given pre-existing resource.
    fn validate_destroy(&self, _existing: &(Metadata, T)) -> Result<(), String> {
        Ok(())
    }
}

/// Wraps a `TypedStore<T>`, running every registered hook (in
/// registration order) before each mutating call. Multiple hook failures
/// are aggregated into one `Error::Validation` message.
pub struct ValidatedStore<T> {
    inner: TypedStore<T>,
    hooks: Vec<Box<dyn ValidationHook<T>>>,
}

impl<T> ValidatedStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    #[must_use]
    pub fn new(inner: TypedStore<T>) -> Self {
        Self { inner, hooks: Vec::new() }
    }

    /// Registers an additional hook, run after any already registered.
    #[must_use]
    pub fn with_hook(mut self, hook: Box<dyn ValidationHook<T>>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn get(&self, name: &str) -> Result<(Metadata, T)> {
        Ok(self.inner.get(name)?)
    }

    pub fn list(&self) -> Result<Vec<(Metadata, T)>> {
        Ok(self.inner.list()?)
    }

    pub fn create(&self, metadata: Metadata, spec: T) -> Result<(Metadata, T)> {
        if !bypasses_validation(&metadata) {
            self.run(self.hooks.iter().map(|h| h.validate_create(&metadata, &spec)))?;
        }
        Ok(self.inner.create(metadata, spec)?)
    }

    pub fn update(&self, name: &str, expected_version: u64, spec: T, mutate_meta: impl FnOnce(&mut Metadata)) -> Result<(Metadata, T)> {
        let before = self.inner.get(name)?;
        if !bypasses_validation(&before.0) {
            self.run(self.hooks.iter().map(|h| h.validate_update(&before, &spec)))?;
        }
        Ok(self.inner.update(name, expected_version, spec, mutate_meta)?)
    }

    pub fn destroy(&self, name: &str, expected_version: u64) -> Result<Metadata> {
        let existing = self.inner.get(name)?;
        if !bypasses_validation(&existing.0) {
            self.run(self.hooks.iter().map(|h| h.validate_destroy(&existing)))?;
        }
        Ok(self.inner.destroy(name, expected_version)?)
    }

    pub fn finalize_destroy(&self, name: &str) -> Result<()> {
        Ok(self.inner.finalize_destroy(name)?)
    }

    #[must_use]
    pub fn watch_kind(&self) -> tokio::sync::broadcast::Receiver<omni_resources::WatchEvent<serde_json::Value>> {
        self.inner.watch_kind()
    }

    fn run(&self, results: impl Iterator<Item = Result<(), String>>) -> Result<()> {
        let errors: Vec<String> = results.filter_map(std::result::Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(format!("failed to validate: {}", errors.join("; "))))
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Store(e)
    }
}

/// The `disable-validation` annotation bypasses all hooks, but only in
/// debug builds (spec §4.8: "debug only").
fn bypasses_validation(metadata: &Metadata) -> bool {
    cfg!(debug_assertions) && metadata.annotation(DISABLE_VALIDATION).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_resources::{ClusterMachineConfigSpec, InMemoryStore};

    struct RejectEmptyBytes;
    impl ValidationHook<ClusterMachineConfigSpec> for RejectEmptyBytes {
        fn validate_create(&self, _metadata: &Metadata, spec: &ClusterMachineConfigSpec) -> Result<(), String> {
            if spec.config_bytes.is_empty() {
                Err("config_bytes must not be empty".to_string())
            } else {
                Ok(())
            }
        }
    }

    struct RejectSecondHook;
    impl ValidationHook<ClusterMachineConfigSpec> for RejectSecondHook {
        fn validate_create(&self, _metadata: &Metadata, _spec: &ClusterMachineConfigSpec) -> Result<(), String> {
            Err("second hook always rejects".to_string())
        }
    }

    fn store() -> ValidatedStore<ClusterMachineConfigSpec> {
        let typed = TypedStore::new(InMemoryStore::new(), "default", "ClusterMachineConfig");
        ValidatedStore::new(typed).with_hook(Box::new(RejectEmptyBytes))
    }

    #[test]
    fn rejects_create_failing_a_hook() {
        let store = store();
        let err = store
            .create(Metadata::new("default", "ClusterMachineConfig", "m1"), ClusterMachineConfigSpec::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(msg) if msg.starts_with("failed to validate: ")));
    }

    #[test]
    fn allows_create_passing_all_hooks() {
        let store = store();
        let spec = ClusterMachineConfigSpec { config_bytes: vec![1], generation_error: None };
        store.create(Metadata::new("default", "ClusterMachineConfig", "m1"), spec).unwrap();
    }

    #[test]
    fn aggregates_multiple_hook_failures() {
        let typed = TypedStore::new(InMemoryStore::new(), "default", "ClusterMachineConfig");
        let store = ValidatedStore::new(typed)
            .with_hook(Box::new(RejectEmptyBytes))
            .with_hook(Box::new(RejectSecondHook));
        let err = store
            .create(Metadata::new("default", "ClusterMachineConfig", "m1"), ClusterMachineConfigSpec::default())
            .unwrap_err();
        let Error::Validation(msg) = err else { panic!("expected validation error") };
        assert!(msg.contains("config_bytes must not be empty"));
        assert!(msg.contains("second hook always rejects"));
    }

    #[test]
    fn debug_annotation_bypasses_hooks() {
        let store = store();
        let mut metadata = Metadata::new("default", "ClusterMachineConfig", "m1");
        metadata.annotations.insert(DISABLE_VALIDATION.to_string(), "true".to_string());
        let result = store.create(metadata, ClusterMachineConfigSpec::default());
        assert!(result.is_ok());
    }
}
