use std::error::Error as StdError;

use chrono::Utc;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    config::Settings,
    error::{GatewayResult, ProxyError},
    token::{derive_token, strict_encode, TOKEN_TTL_SECS},
    types::{
        message_id, ConnectRequest, ProxyDetails, ProxyResult, SendDataRequest, TokenEnvelope,
        TokenRequest, UpstreamBody, UpstreamResponse,
    },
};

const CONNECT_MESSAGES: (&str, &str) = ("OneNET connection succeeded", "OneNET connection failed");
const SEND_DATA_MESSAGES: (&str, &str) = ("Data sent successfully", "Data send failed");

/// Forwards publish requests to the OneNET HTTP ingestion endpoint.
///
/// Cheap to clone; the underlying HTTP clients share their connection pools.
#[derive(Debug, Clone)]
pub struct Gateway {
    client: Client,
    insecure_client: Option<Client>,
    upstream_url: String,
}

struct UpstreamCall<'a, B: ?Sized> {
    query: &'a [(&'a str, &'a str)],
    headers: &'a [(&'a str, &'a str)],
    body: &'a B,
}

impl Gateway {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(settings.upstream_timeout)
            .build()?;

        let insecure_client = if settings.strict_tls {
            None
        } else {
            Some(
                Client::builder()
                    .timeout(settings.upstream_timeout)
                    .danger_accept_invalid_certs(true)
                    .build()?,
            )
        };

        Ok(Self {
            client,
            insecure_client,
            upstream_url: settings.upstream_url.clone(),
        })
    }

    /// Relay a caller-built token, topic and payload.
    pub async fn connect(&self, request: ConnectRequest) -> GatewayResult<ProxyResult> {
        let cmd = request.validate()?;

        info!(topic = %cmd.topic, token_len = cmd.token.len(), "forwarding connect request");

        let query = [("protocol", "MQTT"), ("topic", cmd.topic.as_str())];
        let headers = [("token", cmd.token.as_str())];
        let response = self
            .dispatch(UpstreamCall {
                query: &query,
                headers: &headers,
                body: &cmd.data,
            })
            .await?;

        info!(topic = %cmd.topic, status = response.status_code, "upstream responded");

        Ok(ProxyResult::from_upstream(
            response,
            CONNECT_MESSAGES,
            ProxyDetails {
                timestamp: Utc::now(),
                topic: cmd.topic,
                data: None,
            },
        ))
    }

    /// Derive a token from raw device credentials and publish one property value.
    pub async fn derive_and_publish(&self, request: SendDataRequest) -> GatewayResult<ProxyResult> {
        let cmd = request.validate()?;
        let token = derive_token(&cmd.product_id, &cmd.device_key)?;
        let topic = cmd.topic();
        let envelope = cmd.envelope(message_id(Utc::now()));
        let params = format!("protocol:MQTT;topic:{}", strict_encode(&topic));

        info!(
            product_id = %cmd.product_id,
            device_name = %cmd.device_name,
            data_name = %cmd.data_name,
            "publishing property"
        );

        let headers = [("token", token.as_str()), ("params", params.as_str())];
        let response = self
            .dispatch(UpstreamCall {
                query: &[],
                headers: &headers,
                body: &envelope,
            })
            .await?;

        info!(topic = %topic, status = response.status_code, "upstream responded");

        Ok(ProxyResult::from_upstream(
            response,
            SEND_DATA_MESSAGES,
            ProxyDetails {
                timestamp: Utc::now(),
                topic,
                data: Some(envelope),
            },
        ))
    }

    pub fn derive_token_only(&self, request: TokenRequest) -> GatewayResult<TokenEnvelope> {
        let cmd = request.validate()?;
        let token = derive_token(&cmd.product_id, &cmd.device_key)?;

        info!(product_id = %cmd.product_id, expires_at = token.expires_at(), "token derived");

        Ok(TokenEnvelope {
            success: true,
            token: token.into_string(),
            expires_in: TOKEN_TTL_SECS,
            timestamp: Utc::now(),
        })
    }

    async fn dispatch<B>(&self, call: UpstreamCall<'_, B>) -> GatewayResult<UpstreamResponse>
    where
        B: Serialize + ?Sized,
    {
        match self.send(&self.client, &call).await {
            Ok(response) => Ok(response),
            Err(err) => match &self.insecure_client {
                Some(insecure) if is_tls_failure(&err) => {
                    warn!(
                        error = %error_chain(&err),
                        "upstream TLS verification failed, retrying once without certificate checks"
                    );
                    self.send(insecure, &call).await.map_err(transport_error)
                }
                _ => Err(transport_error(err)),
            },
        }
    }

    async fn send<B>(
        &self,
        client: &Client,
        call: &UpstreamCall<'_, B>,
    ) -> Result<UpstreamResponse, reqwest::Error>
    where
        B: Serialize + ?Sized,
    {
        let mut req = client
            .post(&self.upstream_url)
            .header(CONTENT_TYPE, "application/json")
            .json(call.body);

        if !call.query.is_empty() {
            req = req.query(call.query);
        }
        for (name, value) in call.headers {
            req = req.header(*name, *value);
        }

        let resp = req.send().await?;
        let status_code = resp.status().as_u16();
        let text = resp.text().await?;

        Ok(UpstreamResponse {
            status_code,
            body: UpstreamBody::parse(text),
        })
    }
}

fn transport_error(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::UpstreamTimeout
    } else {
        error!(error = %error_chain(&err), "upstream request failed");
        ProxyError::UpstreamTransport(error_chain(&err))
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Handshake and certificate failures surface as connect errors. The
/// top-level reqwest message carries the request URL, so only the causes
/// below it are inspected.
fn is_tls_failure(err: &reqwest::Error) -> bool {
    err.is_connect() && !err.is_timeout() && has_tls_cause(err)
}

fn has_tls_cause(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string().to_ascii_lowercase();
        if ["certificate", "tls", "ssl", "handshake"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            return true;
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    const PATH: &str = "/fuse/http/device/thing/property/post";

    fn gateway(url: String) -> Gateway {
        Gateway::new(&Settings {
            upstream_url: url,
            ..Settings::default()
        })
        .unwrap()
    }

    fn plain_url(server: &MockServer) -> String {
        format!("http://{}{}", server.address(), PATH)
    }

    fn connect_request() -> ConnectRequest {
        ConnectRequest {
            token: Some("version=2018-10-31&res=products%2Fabc123".to_string()),
            topic: Some("$sys/abc123/dev-01/thing/property/post".to_string()),
            data: Some(json!({"id": "1", "params": {"temp": {"value": 21}}})),
        }
    }

    fn send_data_request(value: Option<serde_json::Value>) -> SendDataRequest {
        SendDataRequest {
            product_id: Some("abc123".to_string()),
            device_name: Some("dev-01".to_string()),
            device_key: Some("c2VjcmV0LWtleQ==".to_string()),
            data_name: Some("temp".to_string()),
            data_value: value,
        }
    }

    #[tokio::test]
    async fn test_connect_forwards_and_mirrors_created() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PATH)
                    .query_param("protocol", "MQTT")
                    .query_param("topic", "$sys/abc123/dev-01/thing/property/post")
                    .header("token", "version=2018-10-31&res=products%2Fabc123")
                    .json_body(json!({"id": "1", "params": {"temp": {"value": 21}}}));
                then.status(201).json_body(json!({"errno": 0, "error": "succ"}));
            })
            .await;

        let result = gateway(plain_url(&server))
            .connect(connect_request())
            .await
            .unwrap();

        mock.assert_calls_async(1).await;
        assert!(result.success);
        assert_eq!(result.status_code, 201);
        assert_eq!(result.message, "OneNET connection succeeded");
        assert_eq!(
            result.upstream_body,
            UpstreamBody::Json(json!({"errno": 0, "error": "succ"}))
        );
        assert_eq!(result.details.topic, "$sys/abc123/dev-01/thing/property/post");
        assert!(result.details.data.is_none());
    }

    #[tokio::test]
    async fn test_connect_mirrors_forbidden() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(403).json_body(json!({"errno": 1, "error": "auth failed"}));
            })
            .await;

        let result = gateway(plain_url(&server))
            .connect(connect_request())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status_code, 403);
        assert_eq!(result.message, "OneNET connection failed");
    }

    #[tokio::test]
    async fn test_connect_validation_skips_upstream() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200);
            })
            .await;
        let gateway = gateway(plain_url(&server));

        for request in [
            ConnectRequest {
                token: None,
                ..connect_request()
            },
            ConnectRequest {
                topic: None,
                ..connect_request()
            },
            ConnectRequest {
                data: None,
                ..connect_request()
            },
        ] {
            let err = gateway.connect(request).await.unwrap_err();
            assert!(err.is_validation());
        }

        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_connect_carries_raw_text_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(502).body("Bad Gateway");
            })
            .await;

        let result = gateway(plain_url(&server))
            .connect(connect_request())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status_code, 502);
        assert_eq!(result.upstream_body, UpstreamBody::Raw("Bad Gateway".to_string()));
    }

    #[tokio::test]
    async fn test_send_data_publishes_envelope() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PATH)
                    .header_exists("token")
                    .header(
                        "params",
                        "protocol:MQTT;topic:%24sys%2Fabc123%2Fdev-01%2Fthing%2Fproperty%2Fpost",
                    );
                then.status(200).json_body(json!({"errno": 0}));
            })
            .await;

        let result = gateway(plain_url(&server))
            .derive_and_publish(send_data_request(Some(json!(0))))
            .await
            .unwrap();

        mock.assert_calls_async(1).await;
        assert!(result.success);
        assert_eq!(result.status_code, 200);
        assert_eq!(result.message, "Data sent successfully");
        assert_eq!(result.details.topic, "$sys/abc123/dev-01/thing/property/post");

        let envelope = result.details.data.expect("envelope in details");
        assert_eq!(envelope.version, "1.0");
        assert_eq!(envelope.params["temp"], json!({"value": 0}));
        let id: u32 = envelope.id.parse().unwrap();
        assert!(id < 10_000);
    }

    #[tokio::test]
    async fn test_send_data_mirrors_forbidden() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(403).body("denied");
            })
            .await;

        let result = gateway(plain_url(&server))
            .derive_and_publish(send_data_request(Some(json!(21.5))))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status_code, 403);
        assert_eq!(result.message, "Data send failed");
        assert_eq!(result.upstream_body, UpstreamBody::Raw("denied".to_string()));
    }

    #[tokio::test]
    async fn test_send_data_without_value_is_rejected() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200);
            })
            .await;

        let err = gateway(plain_url(&server))
            .derive_and_publish(send_data_request(None))
            .await
            .unwrap_err();

        assert!(err.is_validation());
        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_send_data_bad_secret_is_signing_error() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200);
            })
            .await;

        let request = SendDataRequest {
            device_key: Some("%%%".to_string()),
            ..send_data_request(Some(json!(1)))
        };
        let err = gateway(plain_url(&server))
            .derive_and_publish(request)
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::Signing(_)));
        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200).delay(Duration::from_millis(500));
            })
            .await;

        let gateway = Gateway::new(&Settings {
            upstream_url: plain_url(&server),
            upstream_timeout: Duration::from_millis(100),
            strict_tls: false,
            ..Settings::default()
        })
        .unwrap();

        let err = gateway.connect(connect_request()).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamTimeout));
        assert!(mock.calls_async().await <= 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let err = gateway(format!("http://127.0.0.1:1{}", PATH))
            .connect(connect_request())
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::UpstreamTransport(_)));
    }

    #[derive(Debug)]
    struct Layered {
        message: &'static str,
        source: Option<Box<Layered>>,
    }

    impl std::fmt::Display for Layered {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl StdError for Layered {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.source.as_deref().map(|cause| cause as &(dyn StdError + 'static))
        }
    }

    fn layered(messages: &[&'static str]) -> Layered {
        let (first, rest) = messages.split_first().unwrap();
        Layered {
            message: *first,
            source: (!rest.is_empty()).then(|| Box::new(layered(rest))),
        }
    }

    #[test]
    fn test_tls_keywords_in_url_are_ignored() {
        let err = layered(&[
            "error sending request for url (http://ssl-gw.example/tls/handshake/certificate)",
            "client error (Connect)",
            "tcp connect error",
            "Connection refused (os error 111)",
        ]);
        assert!(!has_tls_cause(&err));
    }

    #[test]
    fn test_certificate_cause_is_tls_failure() {
        let err = layered(&[
            "error sending request for url (https://example.com/post)",
            "client error (Connect)",
            "invalid peer certificate: UnknownIssuer",
        ]);
        assert!(has_tls_cause(&err));
    }

    #[tokio::test]
    async fn test_lenient_refused_with_tls_words_in_path_is_transport_error() {
        let gateway = Gateway::new(&Settings {
            upstream_url: "http://127.0.0.1:1/ssl/tls/certificate/handshake".to_string(),
            strict_tls: false,
            ..Settings::default()
        })
        .unwrap();

        let err = gateway.connect(connect_request()).await.unwrap_err();
        match err {
            ProxyError::UpstreamTransport(message) => {
                assert!(message.to_ascii_lowercase().contains("connect"))
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_strict_tls_rejects_untrusted_certificate() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200);
            })
            .await;

        let url = format!("https://{}{}", server.address(), PATH);
        let err = gateway(url).connect(connect_request()).await.unwrap_err();

        assert!(matches!(err, ProxyError::UpstreamTransport(_)));
        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_lenient_tls_retries_once_without_verification() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200).json_body(json!({"errno": 0}));
            })
            .await;

        let gateway = Gateway::new(&Settings {
            upstream_url: format!("https://{}{}", server.address(), PATH),
            strict_tls: false,
            ..Settings::default()
        })
        .unwrap();

        let result = gateway.connect(connect_request()).await.unwrap();

        assert!(result.success);
        mock.assert_calls_async(1).await;
    }

    #[test]
    fn test_derive_token_only_envelope() {
        let gateway = gateway("http://127.0.0.1:1".to_string());
        let envelope = gateway
            .derive_token_only(TokenRequest {
                product_id: Some("abc123".to_string()),
                device_key: Some("c2VjcmV0LWtleQ==".to_string()),
            })
            .unwrap();

        assert!(envelope.success);
        assert_eq!(envelope.expires_in, 3600);
        assert!(envelope
            .token
            .starts_with("version=2018-10-31&res=products%2Fabc123&et="));
    }

    #[test]
    fn test_derive_token_only_requires_fields() {
        let gateway = gateway("http://127.0.0.1:1".to_string());
        let err = gateway
            .derive_token_only(TokenRequest::default())
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "missing required parameters: productId, deviceKey"
        );
    }
}
