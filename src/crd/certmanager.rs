//! Typed views of the cert-manager Certificate and Issuer resources
//!
//! cert-manager owns these CRDs; the operator only creates and compares
//! instances, so the types cover the fields the operator manages. The CRDs
//! themselves are never installed from here.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Certificate requests TLS material from a cert-manager issuer
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// DNS names the certificate is valid for
    pub dns_names: Vec<String>,

    /// Issuer the certificate is requested from
    pub issuer_ref: IssuerRef,

    /// Secret the issued key pair is written to
    pub secret_name: String,
}

/// Reference to a cert-manager Issuer or ClusterIssuer
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    /// Name of the issuer
    pub name: String,

    /// Kind of the issuer (Issuer or ClusterIssuer)
    pub kind: String,
}

/// Issuer signs certificates within a single namespace
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Issuer",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    /// Self-signed issuer configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,
}

/// Marker for a self-signed issuer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SelfSignedIssuer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_serializes_camel_case() {
        let cert = Certificate::new(
            "gold-certificate",
            CertificateSpec {
                dns_names: vec!["gold-service.overcommit-system.svc".to_string()],
                issuer_ref: IssuerRef {
                    name: "overcommit-issuer".to_string(),
                    kind: "Issuer".to_string(),
                },
                secret_name: "gold-tls".to_string(),
            },
        );
        let value = serde_json::to_value(&cert).expect("serialize");
        assert!(value["spec"]["dnsNames"].is_array());
        assert_eq!(value["spec"]["secretName"], "gold-tls");
        assert_eq!(value["spec"]["issuerRef"]["kind"], "Issuer");
    }

    #[test]
    fn self_signed_issuer_serializes_empty_object() {
        let issuer = Issuer::new(
            "overcommit-issuer",
            IssuerSpec {
                self_signed: Some(SelfSignedIssuer {}),
            },
        );
        let value = serde_json::to_value(&issuer).expect("serialize");
        assert_eq!(value["spec"]["selfSigned"], serde_json::json!({}));
    }
}
