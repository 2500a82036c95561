/// Handler-version registry: a process holds a `version_name -> HandlerVersion`
/// mapping, with insertion order remembered only to pick the default entry
/// (§3, §4.2 "Handler-version registry — initialization").
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::types::{Block, BlockInfo};

/// A deterministic, replay-safe state mutation triggered by a matching
/// action. May request a handler-version switch by returning
/// `Some(new_version_name)`.
#[async_trait]
pub trait Updater<State, Context, Payload>: Send + Sync {
    fn action_type(&self) -> &str;

    async fn apply(
        &self,
        state: &mut State,
        payload: &Payload,
        block_info: &BlockInfo,
        context: &Context,
    ) -> Result<Option<String>, HandlerError>;
}

/// A non-deterministic side effect triggered by a matching action. Skipped
/// entirely during replay. Errors are the effect's own responsibility —
/// `run` is fire-and-forget from the handler's perspective.
#[async_trait]
pub trait Effect<Context, Payload>: Send + Sync {
    fn action_type(&self) -> &str;

    async fn run(&self, payload: &Payload, block: &Block<Payload>, context: &Context);
}

/// A named bundle of updaters and effects defining the active processing
/// rules for one version of the handler.
pub struct HandlerVersion<State, Context, Payload> {
    pub version_name: String,
    pub updaters: Vec<Box<dyn Updater<State, Context, Payload>>>,
    pub effects: Vec<Box<dyn Effect<Context, Payload>>>,
}

impl<State, Context, Payload> HandlerVersion<State, Context, Payload> {
    pub fn new(
        version_name: impl Into<String>,
        updaters: Vec<Box<dyn Updater<State, Context, Payload>>>,
        effects: Vec<Box<dyn Effect<Context, Payload>>>,
    ) -> Self {
        Self {
            version_name: version_name.into(),
            updaters,
            effects,
        }
    }
}

/// Holds every registered `HandlerVersion` and knows which one to start
/// from, per the initialization rules in §4.2. Cheap to clone: versions are
/// stored behind `Arc`, so a snapshot can be taken into a transactional
/// closure without re-touching the registry's owner.
pub struct VersionRegistry<State, Context, Payload> {
    map: HashMap<String, Arc<HandlerVersion<State, Context, Payload>>>,
    starting_version: String,
}

impl<State, Context, Payload> Clone for VersionRegistry<State, Context, Payload> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
            starting_version: self.starting_version.clone(),
        }
    }
}

impl<State, Context, Payload> VersionRegistry<State, Context, Payload> {
    /// `versions` is the process's ordered list of handler versions, as
    /// supplied at startup (insertion order matters only to pick the
    /// default entry).
    pub fn new(versions: Vec<HandlerVersion<State, Context, Payload>>) -> Result<Self, HandlerError> {
        if versions.is_empty() {
            return Err(HandlerError::NoHandlerVersions);
        }

        let first_name = versions[0].version_name.clone();
        let mut map = HashMap::with_capacity(versions.len());
        for version in versions {
            if map.contains_key(&version.version_name) {
                return Err(HandlerError::DuplicateVersion(version.version_name));
            }
            map.insert(version.version_name.clone(), Arc::new(version));
        }

        let starting_version = if map.contains_key("v1") {
            if first_name != "v1" {
                tracing::warn!(
                    first = %first_name,
                    "handler version \"v1\" exists but is not first in the supplied list; keeping \"v1\" as the start anyway"
                );
            }
            "v1".to_string()
        } else {
            tracing::warn!(
                adopted = %first_name,
                "no handler version named \"v1\" registered; starting from the first supplied version"
            );
            first_name
        };

        Ok(Self { map, starting_version })
    }

    pub fn starting_version(&self) -> &str {
        &self.starting_version
    }

    pub fn contains(&self, version_name: &str) -> bool {
        self.map.contains_key(version_name)
    }

    pub fn get(&self, version_name: &str) -> Option<Arc<HandlerVersion<State, Context, Payload>>> {
        self.map.get(version_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopUpdater;
    #[async_trait]
    impl Updater<(), (), ()> for NoopUpdater {
        fn action_type(&self) -> &str {
            "noop"
        }
        async fn apply(
            &self,
            _state: &mut (),
            _payload: &(),
            _block_info: &BlockInfo,
            _context: &(),
        ) -> Result<Option<String>, HandlerError> {
            Ok(None)
        }
    }

    fn version(name: &str) -> HandlerVersion<(), (), ()> {
        HandlerVersion::new(name, vec![Box::new(NoopUpdater)], vec![])
    }

    #[test]
    fn empty_registry_is_fatal() {
        let err = VersionRegistry::<(), (), ()>::new(vec![]).unwrap_err();
        assert!(matches!(err, HandlerError::NoHandlerVersions));
    }

    #[test]
    fn duplicate_version_is_fatal() {
        let err = VersionRegistry::new(vec![version("v1"), version("v1")]).unwrap_err();
        assert!(matches!(err, HandlerError::DuplicateVersion(name) if name == "v1"));
    }

    #[test]
    fn missing_v1_adopts_first() {
        let reg = VersionRegistry::new(vec![version("legacy"), version("v2")]).unwrap();
        assert_eq!(reg.starting_version(), "legacy");
    }

    #[test]
    fn v1_not_first_still_wins() {
        let reg = VersionRegistry::new(vec![version("v0"), version("v1")]).unwrap();
        assert_eq!(reg.starting_version(), "v1");
    }

    #[test]
    fn v1_first_is_the_common_case() {
        let reg = VersionRegistry::new(vec![version("v1"), version("v2")]).unwrap();
        assert_eq!(reg.starting_version(), "v1");
    }
}
