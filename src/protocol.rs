//! Wire types exchanged with the Cog controller.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Execution backend a bundle runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleKind {
    Native,
    Container,
}

/// A command carried by a bundle. The core only routes on `name`; the
/// executable path and docs are consumed by the engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    pub executable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

/// Immutable descriptor of a deployable command set. Replaced wholesale on
/// refresh, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    pub version: String,
    pub kind: BundleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
}

impl Bundle {
    pub fn is_container(&self) -> bool {
        self.kind == BundleKind::Container
    }
}

/// Decoded execution request. Invocation metadata beyond the routed fields is
/// carried opaquely and handed to the engine untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub bundle_name: String,
    pub command: String,
    pub reply_to: String,
    pub pipeline_id: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ExecutionRequest {
    /// A request is routable iff it names a bundle and a reply address.
    pub fn validate(&self) -> bool {
        !self.bundle_name.is_empty() && !self.reply_to.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Response published on the request's `reply_to` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub is_json: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ExecutionResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            status_msg: None,
            template: None,
            is_json: false,
            body: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            status_msg: Some(message.into()),
            template: None,
            is_json: false,
            body: None,
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = ResponseStatus::Error;
        self.status_msg = Some(message.into());
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }
}

/// Bundle-list request published on `bot/relays/info` for each refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBundlesEnvelope {
    pub list_bundles: ListBundlesMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBundlesMessage {
    pub relay_id: String,
    pub reply_to: String,
}

/// Directive reply carrying the relay's current bundle assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleListResponse {
    pub bundles: Vec<Bundle>,
}

impl BundleListResponse {
    pub fn into_map(self) -> HashMap<String, Bundle> {
        self.bundles
            .into_iter()
            .map(|bundle| (bundle.name.clone(), bundle))
            .collect()
    }
}

/// Announcement published on the discovery topic after a catalog change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleAnnouncementEnvelope {
    pub announce: BundleAnnouncement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleAnnouncement {
    pub relay_id: String,
    pub bundles: Vec<String>,
    pub snapshot: bool,
}

impl BundleAnnouncementEnvelope {
    pub fn new(relay_id: impl Into<String>, mut bundles: Vec<String>) -> Self {
        bundles.sort();
        Self {
            announce: BundleAnnouncement {
                relay_id: relay_id.into(),
                bundles,
                snapshot: true,
            },
        }
    }
}
