//! Client for the remote enrollment authority.
//!
//! One authenticated POST per enrollment run; the caller treats every error
//! as fatal, so there is no retry here.

use keygate_core::Credential;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::info;

/// Request tag the authority expects for keyless server certificates.
const REQUEST_TYPE: &str = "keyless-certificate";

/// Header carrying the bearer secret.
const AUTH_HEADER: &str = "X-Auth-Key";

#[derive(Debug, Serialize)]
struct EnrollRequest<'a> {
    request_type: &'static str,
    hostnames: Vec<&'a str>,
    csr: &'a str,
}

/// One error entry from the authority's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct EnrollResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    messages: Vec<String>,
    #[serde(default)]
    errors: Vec<ApiError>,
    #[serde(default)]
    result: HashMap<String, String>,
}

/// Every error entry returned by the authority, preserved in order.
#[derive(Debug, Clone)]
pub struct ErrorList(pub Vec<ApiError>);

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", e.code, e.message)?;
        }
        Ok(())
    }
}

/// Enrollment failure taxonomy. None of these are retried.
#[derive(Error, Debug)]
pub enum EnrollError {
    /// The authority could not be reached at all.
    #[error("enrollment endpoint unreachable: {0}")]
    Connectivity(#[source] reqwest::Error),

    /// The authority answered, but not with a decodable body.
    #[error("undecodable enrollment response: {0}")]
    Protocol(#[source] reqwest::Error),

    /// The authority explicitly refused the request.
    #[error("authority rejected enrollment: {0}")]
    Rejected(ErrorList),

    /// The authority reported success without an issued certificate.
    #[error("authority reported success but returned no certificate")]
    MalformedResponse,
}

/// HTTP client bound to one enrollment endpoint.
pub struct EnrollClient {
    endpoint: String,
    http: reqwest::Client,
}

impl EnrollClient {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::builder().build()?,
        })
    }

    /// Submit the signing request and extract the issued certificate.
    pub async fn enroll(
        &self,
        credential: &Credential,
        csr_pem: &str,
    ) -> Result<String, EnrollError> {
        let body = EnrollRequest {
            request_type: REQUEST_TYPE,
            hostnames: vec![credential.host.as_str()],
            csr: csr_pem,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTH_HEADER, &credential.token)
            .json(&body)
            .send()
            .await
            .map_err(EnrollError::Connectivity)?;

        let decoded: EnrollResponse = response.json().await.map_err(EnrollError::Protocol)?;

        for message in &decoded.messages {
            info!(%message, "authority message");
        }

        if !decoded.success {
            return Err(EnrollError::Rejected(ErrorList(decoded.errors)));
        }

        match decoded.result.get("certificate") {
            Some(certificate) => Ok(certificate.clone()),
            None => Err(EnrollError::MalformedResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_has_the_wire_shape() {
        let body = EnrollRequest {
            request_type: REQUEST_TYPE,
            hostnames: vec!["ks.example.com"],
            csr: "-----BEGIN CERTIFICATE REQUEST-----",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["request_type"], "keyless-certificate");
        assert_eq!(value["hostnames"], serde_json::json!(["ks.example.com"]));
        assert_eq!(value["csr"], "-----BEGIN CERTIFICATE REQUEST-----");
    }

    #[test]
    fn response_decodes_with_all_fields_absent() {
        let decoded: EnrollResponse = serde_json::from_str("{}").unwrap();
        assert!(!decoded.success);
        assert!(decoded.errors.is_empty());
        assert!(decoded.result.is_empty());
    }

    #[test]
    fn response_decodes_a_full_payload() {
        let decoded: EnrollResponse = serde_json::from_str(
            r#"{
                "success": true,
                "messages": ["queued"],
                "errors": [],
                "result": {"certificate": "PEM", "id": "42"}
            }"#,
        )
        .unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.messages, vec!["queued"]);
        assert_eq!(decoded.result.get("certificate").unwrap(), "PEM");
    }

    #[test]
    fn error_list_display_preserves_every_entry() {
        let list = ErrorList(vec![
            ApiError { code: 1000, message: "invalid token".into() },
            ApiError { code: 1001, message: "account disabled".into() },
        ]);
        let rendered = list.to_string();
        assert!(rendered.contains("invalid token"));
        assert!(rendered.contains("account disabled"));
        assert!(rendered.contains("1000"));
        assert!(rendered.contains("1001"));
    }

    #[test]
    fn rejected_error_message_carries_the_entries() {
        let err = EnrollError::Rejected(ErrorList(vec![ApiError {
            code: 1000,
            message: "invalid token".into(),
        }]));
        assert!(err.to_string().contains("invalid token"));
    }
}
