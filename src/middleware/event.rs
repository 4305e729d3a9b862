//! API Gateway event contract
//!
//! Request events as delivered by Yandex API Gateway to a function integration,
//! and the response shape it expects back.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Treats an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// == Gateway Event ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub http_method: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    /// Raw request target including the query string, when the gateway sends it
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub query_string_parameters: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub multi_value_query_string_parameters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub request_context: RequestContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, deserialize_with = "null_as_default")]
    pub identity: Identity,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl GatewayEvent {
    /// Minimal event for `method` and `path`.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            http_method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_string_parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.request_context.identity.source_ip = Some(ip.into());
        self
    }
}

// == Gateway Response ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Headers that occur more than once, such as `set-cookie`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

impl GatewayResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_gateway_event_with_nulls() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "httpMethod": "POST",
            "path": "/api/login",
            "headers": {"Host": "example.com"},
            "multiValueHeaders": null,
            "queryStringParameters": null,
            "body": "e30=",
            "isBase64Encoded": true,
            "requestContext": {
                "identity": {"sourceIp": "10.0.0.1", "userAgent": "curl"},
                "httpMethod": "POST",
                "requestId": "req-1"
            }
        }))
        .unwrap();

        assert_eq!(event.http_method, "POST");
        assert!(event.multi_value_headers.is_empty());
        assert!(event.query_string_parameters.is_empty());
        assert!(event.is_base64_encoded);
        assert_eq!(
            event.request_context.identity.source_ip.as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn test_serialize_response_shape() {
        let response = GatewayResponse {
            status_code: 307,
            headers: BTreeMap::from([("location".to_string(), "/login".to_string())]),
            multi_value_headers: BTreeMap::new(),
            body: String::new(),
            is_base64_encoded: false,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["statusCode"], 307);
        assert_eq!(json["headers"]["location"], "/login");
        assert_eq!(json["isBase64Encoded"], false);
        assert!(json.get("multiValueHeaders").is_none());
        assert_eq!(response.header("Location"), Some("/login"));
    }
}
