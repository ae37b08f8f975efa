//! Network identity lookup.
//!
//! The engine does not discover who the client is; it takes the ISP, IP,
//! and server label as inputs. This module is the default collaborator
//! that fills them in from the test server's `GET /info` endpoint, and
//! degrades to placeholder values instead of failing the run.

use log::warn;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

/// Identity fields attached to a completed test result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    /// Client IP address as seen by the server.
    pub ip: String,
    /// ISP or organization name.
    pub isp: String,
    /// Label of the serving data center.
    pub server: String,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    success: bool,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default, rename = "dataCenter")]
    data_center: Option<String>,
}

impl NetworkIdentity {
    /// Placeholder identity used when the lookup fails.
    pub fn unknown() -> Self {
        Self {
            ip: "Unknown".to_string(),
            isp: "Unknown ISP".to_string(),
            server: "Unknown".to_string(),
        }
    }

    /// Fetch the identity from `GET /info` on the test server.
    ///
    /// Any transport error, non-success status, or unsuccessful payload
    /// yields [`NetworkIdentity::unknown`] rather than an error.
    pub async fn fetch(http: &Client, base_url: &Url) -> Self {
        let url = match base_url.join("info") {
            Ok(url) => url,
            Err(error) => {
                warn!("invalid info URL: {}", error);
                return Self::unknown();
            }
        };

        let info = async {
            let response = http.get(url).send().await?.error_for_status()?;
            response.json::<InfoResponse>().await
        }
        .await;

        match info {
            Ok(info) if info.success => Self {
                ip: info.ip.unwrap_or_else(|| "Unknown".to_string()),
                isp: info.isp.unwrap_or_else(|| "Unknown ISP".to_string()),
                server: info
                    .data_center
                    .unwrap_or_else(|| "Unknown".to_string()),
            },
            Ok(_) => {
                warn!("network info lookup reported failure");
                Self::unknown()
            }
            Err(error) => {
                warn!("network info lookup failed: {}", error);
                Self::unknown()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_placeholders() {
        let identity = NetworkIdentity::unknown();
        assert_eq!(identity.ip, "Unknown");
        assert_eq!(identity.isp, "Unknown ISP");
        assert_eq!(identity.server, "Unknown");
    }

    #[test]
    fn test_info_response_parses_camel_case() {
        let info: InfoResponse = serde_json::from_str(
            r#"{"success":true,"ip":"10.0.0.1","isp":"Example","dataCenter":"Local"}"#,
        )
        .expect("parse");

        assert!(info.success);
        assert_eq!(info.data_center.as_deref(), Some("Local"));
    }
}
