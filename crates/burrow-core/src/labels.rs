//! Label schema persisted on every backend object.
//!
//! Labels are the only mechanism burrow has for recovering its objects
//! from a backend after the process restarts, so the key and sentinel
//! value strings below are frozen. A guard test pins them.

use std::collections::BTreeMap;

use crate::types::{ContainerKind, EnclaveId, ServiceGuid};

/// Label key identifying objects created by burrow.
pub const APP_ID_LABEL_KEY: &str = "dev.burrow.app-id";

/// Sentinel value for [`APP_ID_LABEL_KEY`]. Immutable.
pub const APP_ID_LABEL_VALUE: &str = "burrow";

/// Label key carrying the owning enclave's ID.
pub const ENCLAVE_ID_LABEL_KEY: &str = "dev.burrow.enclave-id";

/// Label key carrying the container's role (see [`ContainerKind`]).
pub const CONTAINER_KIND_LABEL_KEY: &str = "dev.burrow.kind";

/// Label key carrying the service (or engine) GUID.
pub const GUID_LABEL_KEY: &str = "dev.burrow.guid";

/// Build the full label set for a backend object.
pub fn object_labels(
    enclave_id: &EnclaveId,
    kind: ContainerKind,
    guid: &ServiceGuid,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_ID_LABEL_KEY.to_string(), APP_ID_LABEL_VALUE.to_string()),
        (ENCLAVE_ID_LABEL_KEY.to_string(), enclave_id.to_string()),
        (CONTAINER_KIND_LABEL_KEY.to_string(), kind.label_value().to_string()),
        (GUID_LABEL_KEY.to_string(), guid.to_string()),
    ])
}

/// Selector matching every object owned by one enclave.
pub fn enclave_selector(enclave_id: &EnclaveId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_ID_LABEL_KEY.to_string(), APP_ID_LABEL_VALUE.to_string()),
        (ENCLAVE_ID_LABEL_KEY.to_string(), enclave_id.to_string()),
    ])
}
