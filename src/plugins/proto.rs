//! Wire types for the plugin RPC.
//!
//! Plugins speak newline-delimited JSON over a unix socket: one request
//! line, one response line, no streaming and no pipelining.

use serde::{Deserialize, Serialize};

use crate::domain::DomainEntry;
use crate::plugins::value::ValueMap;

/// Environment variable naming the socket the plugin must listen on
pub const PLUGIN_SOCKET_ENV: &str = "DEHYDRATED_API_PLUGIN_SOCKET";

/// Host-side configuration forwarded verbatim to every plugin so it can
/// find dehydrated's files without guessing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedConfig {
    pub base_dir: String,
    pub config_file: String,
    pub domains_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum PluginRequest {
    Initialize {
        config: ValueMap,
        dehydrated: DehydratedConfig,
    },
    GetMetadata {
        entry: DomainEntry,
        dehydrated: DehydratedConfig,
    },
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PluginResponse {
    Ok {
        #[serde(default)]
        metadata: Option<ValueMap>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::value::Value;

    #[test]
    fn test_request_wire_shape() {
        let req = PluginRequest::Initialize {
            config: ValueMap::from([("ttl".to_string(), Value::Integer(300))]),
            dehydrated: DehydratedConfig {
                base_dir: "/srv/dehydrated".to_string(),
                config_file: "/srv/dehydrated/config".to_string(),
                domains_file: "/srv/dehydrated/domains.txt".to_string(),
            },
        };
        let wire = serde_json::to_value(&req).expect("failed to serialize");
        assert_eq!(wire["method"], "initialize");
        assert_eq!(wire["params"]["config"]["ttl"], 300);
        assert_eq!(wire["params"]["dehydrated"]["baseDir"], "/srv/dehydrated");
    }

    #[test]
    fn test_close_has_no_params() {
        let wire = serde_json::to_value(PluginRequest::Close).expect("failed to serialize");
        assert_eq!(wire, serde_json::json!({"method": "close"}));
    }

    #[test]
    fn test_response_ok_with_metadata() {
        let parsed: PluginResponse =
            serde_json::from_str(r#"{"status":"ok","metadata":{"issuer":"internal-ca"}}"#)
                .expect("failed to parse");
        let PluginResponse::Ok { metadata } = parsed else {
            panic!("expected ok");
        };
        let metadata = metadata.expect("metadata should be present");
        assert_eq!(metadata.get("issuer"), Some(&Value::from("internal-ca")));
    }

    #[test]
    fn test_response_ok_without_metadata() {
        let parsed: PluginResponse =
            serde_json::from_str(r#"{"status":"ok"}"#).expect("failed to parse");
        assert_eq!(parsed, PluginResponse::Ok { metadata: None });
    }

    #[test]
    fn test_response_error() {
        let parsed: PluginResponse =
            serde_json::from_str(r#"{"status":"error","message":"nope"}"#).expect("failed to parse");
        assert_eq!(
            parsed,
            PluginResponse::Error {
                message: "nope".to_string()
            }
        );
    }
}
