use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use md5::Md5;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::ProxyError;

pub const TOKEN_VERSION: &str = "2018-10-31";
pub const SIGN_METHOD: &str = "md5";
pub const TOKEN_TTL_SECS: i64 = 3600;

/// Escapes every byte outside `A-Z a-z 0-9 - . _ ~`.
pub const STRICT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn strict_encode(input: &str) -> String {
    utf8_percent_encode(input, STRICT_ENCODE_SET).to_string()
}

/// Inputs of a single token computation. `expires_at` is always
/// `issued_at + TOKEN_TTL_SECS`.
pub struct SigningContext<'a> {
    product_id: &'a str,
    device_secret_b64: &'a str,
    issued_at: i64,
    expires_at: i64,
}

impl<'a> SigningContext<'a> {
    pub fn now(product_id: &'a str, device_secret_b64: &'a str) -> Self {
        Self::at(product_id, device_secret_b64, Utc::now().timestamp())
    }

    pub fn at(product_id: &'a str, device_secret_b64: &'a str, issued_at: i64) -> Self {
        Self {
            product_id,
            device_secret_b64,
            issued_at,
            expires_at: issued_at + TOKEN_TTL_SECS,
        }
    }

    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn resource_path(&self) -> String {
        format!("products/{}", self.product_id)
    }

    pub fn sign_string(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.expires_at,
            SIGN_METHOD,
            self.resource_path(),
            TOKEN_VERSION
        )
    }

    pub fn sign(&self) -> Result<Token, ProxyError> {
        let key = STANDARD
            .decode(self.device_secret_b64.trim())
            .map_err(|err| ProxyError::Signing(format!("device key is not valid base64: {err}")))?;

        let mut mac = Hmac::<Md5>::new_from_slice(&key)
            .map_err(|err| ProxyError::Signing(err.to_string()))?;
        mac.update(self.sign_string().as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let value = format!(
            "version={}&res={}&et={}&method={}&sign={}",
            TOKEN_VERSION,
            strict_encode(&self.resource_path()),
            self.expires_at,
            SIGN_METHOD,
            strict_encode(&signature),
        );

        Ok(Token {
            value,
            expires_at: self.expires_at,
        })
    }
}

/// Signed credential in the upstream's `key=value&...` format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: i64,
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Derive a fresh token valid for one hour from now. Nothing is cached.
pub fn derive_token(product_id: &str, device_secret_b64: &str) -> Result<Token, ProxyError> {
    SigningContext::now(product_id, device_secret_b64).sign()
}
