use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::error::ProxyError;

pub const PROPERTY_VERSION: &str = "1.0";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub token: Option<String>,
    pub topic: Option<String>,
    pub data: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDataRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub device_name: Option<String>,
    pub device_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub data_name: Option<String>,
    pub data_value: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_id: Option<String>,
    pub device_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectCommand {
    pub token: String,
    pub topic: String,
    pub data: JsonValue,
}

#[derive(Debug, Clone)]
pub struct PublishCommand {
    pub product_id: String,
    pub device_name: String,
    pub device_key: String,
    pub data_name: String,
    pub data_value: JsonValue,
}

#[derive(Debug, Clone)]
pub struct TokenCommand {
    pub product_id: String,
    pub device_key: String,
}

impl ConnectRequest {
    pub fn validate(self) -> Result<ConnectCommand, ProxyError> {
        let mut missing = Vec::new();
        if !has_text(&self.token) {
            missing.push("token");
        }
        if !has_text(&self.topic) {
            missing.push("topic");
        }
        if !self.data.as_ref().is_some_and(has_content) {
            missing.push("data");
        }

        match (self.token, self.topic, self.data) {
            (Some(token), Some(topic), Some(data)) if missing.is_empty() => {
                Ok(ConnectCommand { token, topic, data })
            }
            _ => Err(ProxyError::missing(missing)),
        }
    }
}

impl SendDataRequest {
    pub fn validate(self) -> Result<PublishCommand, ProxyError> {
        let mut missing = Vec::new();
        if !has_text(&self.product_id) {
            missing.push("productId");
        }
        if !has_text(&self.device_name) {
            missing.push("deviceName");
        }
        if !has_text(&self.device_key) {
            missing.push("deviceKey");
        }
        if !has_text(&self.data_name) {
            missing.push("dataName");
        }
        // Only absence counts here: 0, false and "" are real values.
        if self.data_value.is_none() {
            missing.push("dataValue");
        }

        match (
            self.product_id,
            self.device_name,
            self.device_key,
            self.data_name,
            self.data_value,
        ) {
            (Some(product_id), Some(device_name), Some(device_key), Some(data_name), Some(data_value))
                if missing.is_empty() =>
            {
                Ok(PublishCommand {
                    product_id,
                    device_name,
                    device_key,
                    data_name,
                    data_value,
                })
            }
            _ => Err(ProxyError::missing(missing)),
        }
    }
}

impl TokenRequest {
    pub fn validate(self) -> Result<TokenCommand, ProxyError> {
        let mut missing = Vec::new();
        if !has_text(&self.product_id) {
            missing.push("productId");
        }
        if !has_text(&self.device_key) {
            missing.push("deviceKey");
        }

        match (self.product_id, self.device_key) {
            (Some(product_id), Some(device_key)) if missing.is_empty() => Ok(TokenCommand {
                product_id,
                device_key,
            }),
            _ => Err(ProxyError::missing(missing)),
        }
    }
}

impl PublishCommand {
    pub fn topic(&self) -> String {
        format!(
            "$sys/{}/{}/thing/property/post",
            self.product_id, self.device_name
        )
    }

    pub fn envelope(&self, id: String) -> PropertyEnvelope {
        PropertyEnvelope::new(id, &self.data_name, self.data_value.clone())
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

fn has_content(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(fields) => !fields.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => true,
    }
}

/// Accepts identifiers sent either as JSON strings or as bare numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s)),
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a string or number, found {}",
            other
        ))),
    }
}

/// Thing-model property post body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyEnvelope {
    pub id: String,
    pub version: String,
    pub params: Map<String, JsonValue>,
}

impl PropertyEnvelope {
    pub fn new(id: String, name: &str, value: JsonValue) -> Self {
        let mut params = Map::new();
        params.insert(name.to_string(), json!({ "value": value }));
        Self {
            id,
            version: PROPERTY_VERSION.to_string(),
            params,
        }
    }
}

/// Short message id: current unix millis modulo 10000.
pub fn message_id(now: DateTime<Utc>) -> String {
    now.timestamp_millis().rem_euclid(10_000).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpstreamBody {
    Json(JsonValue),
    Raw(String),
}

impl UpstreamBody {
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => UpstreamBody::Json(value),
            Err(_) => UpstreamBody::Raw(text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status_code: u16,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResult {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    pub upstream_body: UpstreamBody,
    pub details: ProxyDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDetails {
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PropertyEnvelope>,
}

impl ProxyResult {
    pub fn from_upstream(
        response: UpstreamResponse,
        messages: (&str, &str),
        details: ProxyDetails,
    ) -> Self {
        let success = response.is_success();
        let (ok, failed) = messages;
        Self {
            success,
            status_code: response.status_code,
            message: if success { ok } else { failed }.to_string(),
            upstream_body: response.body,
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEnvelope {
    pub success: bool,
    pub token: String,
    pub expires_in: i64,
    pub timestamp: DateTime<Utc>,
}
