use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(rename = "creationTimestamp", default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// UrlCheckSpec defines the desired state: the URL to check.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UrlCheckSpec {
    pub url: String,
}

/// UrlCheckStatus is the observed state, written only by the controller.
///
/// Both fields are absent until a check completes. A transport failure
/// leaves them exactly as they were; only a response with a status code
/// updates them, and always together.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct UrlCheckStatus {
    #[serde(rename = "lastCheckTime", default)]
    pub last_check_time: Option<DateTime<Utc>>,
    #[serde(rename = "lastCheckResult", default)]
    pub last_check_result: Option<u16>,
}

/// UrlCheck declares a URL that must be checked on a fixed cadence.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UrlCheck {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: UrlCheckSpec,
    #[serde(default)]
    pub status: UrlCheckStatus,
}

impl UrlCheck {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "UrlCheck".to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: default_namespace(),
                ..Default::default()
            },
            spec: UrlCheckSpec {
                url: url.to_string(),
            },
            status: Default::default(),
        }
    }
}
