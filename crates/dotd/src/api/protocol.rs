//! Wire types of the docker volume plugin protocol.
//!
//! The docker daemon POSTs small JSON records to well-known
//! `/VolumeDriver.*` endpoints on the plugin socket; field names are
//! PascalCase on the wire. A response with a non-empty `Err` field is an
//! error regardless of the HTTP status.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Content type of plugin protocol responses.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.1+json";

/// Response to the `/Plugin.Activate` handshake.
#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    /// The plugin subsystems implemented; always `["VolumeDriver"]`.
    #[serde(rename = "Implements")]
    pub implements: Vec<&'static str>,
}

/// Error reply for any operation. An empty `Err` means success.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message, surfaced by the docker CLI.
    #[serde(rename = "Err")]
    pub err: String,
}

impl ErrorResponse {
    /// The success reply for operations that return nothing else.
    #[must_use]
    pub fn ok() -> Self {
        Self { err: String::new() }
    }
}

/// `/VolumeDriver.Create` request body.
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Driver-specific options (`base`, `volatile`).
    #[serde(rename = "Opts", default)]
    pub opts: Option<HashMap<String, String>>,
}

/// A volume descriptor in list/get replies.
#[derive(Debug, Serialize)]
pub struct VolumeInfo {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,
}

/// `/VolumeDriver.List` reply.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    /// Every volume under the data root.
    #[serde(rename = "Volumes")]
    pub volumes: Vec<VolumeInfo>,
}

/// `/VolumeDriver.Get` request body.
#[derive(Debug, Deserialize)]
pub struct GetRequest {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,
}

/// `/VolumeDriver.Get` reply.
#[derive(Debug, Serialize)]
pub struct GetResponse {
    /// The found volume.
    #[serde(rename = "Volume")]
    pub volume: VolumeInfo,
}

/// `/VolumeDriver.Remove` request body.
#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,
}

/// `/VolumeDriver.Path` request body.
#[derive(Debug, Deserialize)]
pub struct PathRequest {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,
}

/// `/VolumeDriver.Path` reply.
#[derive(Debug, Serialize)]
pub struct PathResponse {
    /// Where the volume is (or will be) mounted.
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
}

/// `/VolumeDriver.Mount` request body.
#[derive(Debug, Deserialize)]
pub struct MountRequest {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Opaque caller-chosen mount request identifier.
    #[serde(rename = "ID")]
    pub id: String,
}

/// `/VolumeDriver.Mount` reply.
#[derive(Debug, Serialize)]
pub struct MountResponse {
    /// Where the volume has been mounted.
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
}

/// `/VolumeDriver.Unmount` request body.
#[derive(Debug, Deserialize)]
pub struct UnmountRequest {
    /// The volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// The identifier the matching mount request carried.
    #[serde(rename = "ID")]
    pub id: String,
}

/// `/VolumeDriver.Capabilities` reply.
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    /// The driver's capability descriptor.
    #[serde(rename = "Capabilities")]
    pub capabilities: CapabilityInfo,
}

/// The capability descriptor.
#[derive(Debug, Serialize)]
pub struct CapabilityInfo {
    /// Volume scope: `"volume"` (state is local to the host).
    #[serde(rename = "Scope")]
    pub scope: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_shapes() {
        let request: CreateRequest = serde_json::from_str(
            r#"{"Name":"v1","Opts":{"base":"/srv/base","volatile":"yes"}}"#,
        )
        .unwrap();
        assert_eq!(request.name, "v1");
        let opts = request.opts.unwrap();
        assert_eq!(opts["base"], "/srv/base");
        assert_eq!(opts["volatile"], "yes");

        // The daemon may omit or null out the options
        let request: CreateRequest = serde_json::from_str(r#"{"Name":"v1"}"#).unwrap();
        assert!(request.opts.is_none());
        let request: CreateRequest =
            serde_json::from_str(r#"{"Name":"v1","Opts":null}"#).unwrap();
        assert!(request.opts.is_none());
    }

    #[test]
    fn mount_request_carries_the_id() {
        let request: MountRequest =
            serde_json::from_str(r#"{"Name":"v1","ID":"8a2e6d0c"}"#).unwrap();
        assert_eq!(request.name, "v1");
        assert_eq!(request.id, "8a2e6d0c");
    }

    #[test]
    fn responses_serialize_pascal_case() {
        let reply = serde_json::to_string(&MountResponse {
            mountpoint: "/var/lib/docker-on-top/v1/mountpoint".to_string(),
        })
        .unwrap();
        assert_eq!(
            reply,
            r#"{"Mountpoint":"/var/lib/docker-on-top/v1/mountpoint"}"#
        );

        let reply = serde_json::to_string(&CapabilitiesResponse {
            capabilities: CapabilityInfo { scope: "volume" },
        })
        .unwrap();
        assert_eq!(reply, r#"{"Capabilities":{"Scope":"volume"}}"#);

        let reply = serde_json::to_string(&ErrorResponse::ok()).unwrap();
        assert_eq!(reply, r#"{"Err":""}"#);
    }

    #[test]
    fn activate_handshake() {
        let reply = serde_json::to_string(&ActivateResponse {
            implements: vec!["VolumeDriver"],
        })
        .unwrap();
        assert_eq!(reply, r#"{"Implements":["VolumeDriver"]}"#);
    }
}
