// ============================================================================
// COMPOSITE RESOURCE VIEWS & STATUS RESOLUTION
// ============================================================================
// A composite resource is carried as an unstructured JSON object. Two views
// exist per request: what the cluster observed and what earlier pipeline
// steps desire. Status is read from whichever view is authoritative and is
// always written back to the desired one.
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::tree::Tree;

const API_VERSION_KEY: &str = "apiVersion";
const KIND_KEY: &str = "kind";
const METADATA_KEY: &str = "metadata";
const NAME_KEY: &str = "name";
const STATUS_KEY: &str = "status";

// ----------------------------------------------------------------------------
// Composite Resource
// ----------------------------------------------------------------------------

/// An unstructured composite resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Composite {
    object: Tree,
}

impl Composite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_version(&self) -> &str {
        self.str_field(API_VERSION_KEY)
    }

    pub fn kind(&self) -> &str {
        self.str_field(KIND_KEY)
    }

    pub fn name(&self) -> &str {
        self.object
            .get(METADATA_KEY)
            .and_then(|m| m.get(NAME_KEY))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn set_api_version(&mut self, api_version: &str) {
        self.object
            .insert(API_VERSION_KEY.into(), Value::String(api_version.into()));
    }

    pub fn set_kind(&mut self, kind: &str) {
        self.object.insert(KIND_KEY.into(), Value::String(kind.into()));
    }

    /// Set `metadata.name`, replacing a `metadata` field that is not a map.
    pub fn set_name(&mut self, name: &str) {
        let metadata = self
            .object
            .entry(METADATA_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        if let Value::Object(map) = metadata {
            map.insert(NAME_KEY.into(), Value::String(name.into()));
        }
    }

    /// A composite without a kind has never been initialised by the pipeline.
    pub fn has_identity(&self) -> bool {
        !self.kind().is_empty()
    }

    /// The status map, if present and actually a map.
    pub fn status(&self) -> Option<&Tree> {
        self.object.get(STATUS_KEY).and_then(Value::as_object)
    }

    pub fn set_status(&mut self, status: Tree) {
        self.object.insert(STATUS_KEY.into(), Value::Object(status));
    }

    fn str_field(&self, key: &str) -> &str {
        self.object
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Identity Adoption
// ----------------------------------------------------------------------------

/// Copy apiVersion, kind and name from `observed` when `desired` has no
/// identity yet. Returns true if anything was copied.
pub fn adopt_identity(desired: &mut Composite, observed: &Composite) -> bool {
    if desired.has_identity() {
        return false;
    }
    desired.set_api_version(observed.api_version());
    desired.set_kind(observed.kind());
    desired.set_name(observed.name());
    true
}

// ----------------------------------------------------------------------------
// Status Source Resolution
// ----------------------------------------------------------------------------

/// Pick the authoritative status tree.
///
/// A non-empty desired status wins when the desired composite has identity,
/// since earlier pipeline steps may already have written to it. Otherwise the
/// observed status is used. Missing statuses resolve to an empty tree.
pub fn resolve_status(
    observed_status: Option<&Tree>,
    desired_status: Option<&Tree>,
    desired_has_identity: bool,
) -> Tree {
    if desired_has_identity {
        match desired_status {
            Some(status) if !status.is_empty() => return status.clone(),
            _ => debug!(
                target: "rds_metrics::resource",
                "Cannot get status from desired composite or it is empty"
            ),
        }
    }

    match observed_status {
        Some(status) => status.clone(),
        None => {
            debug!(
                target: "rds_metrics::resource",
                "Cannot get status from observed composite"
            );
            Tree::new()
        }
    }
}

/// Initialise the desired identity if needed and return the status to mutate.
pub fn current_status(observed: &Composite, desired: &mut Composite) -> Tree {
    if adopt_identity(desired, observed) {
        debug!(
            target: "rds_metrics::resource",
            kind = %desired.kind(),
            name = %desired.name(),
            "Initialised desired composite identity from observed"
        );
    }
    resolve_status(observed.status(), desired.status(), desired.has_identity())
}
