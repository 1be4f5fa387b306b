//! Issuer and certificate templates for managed webhook workloads

use crate::crd::{Certificate, CertificateSpec, Issuer, IssuerRef, IssuerSpec, SelfSignedIssuer};

use super::{certificate_name, service_name, tls_secret_name, ISSUER_NAME};

/// Desired shape of the operator's self-signed issuer
pub fn generate_issuer(namespace: &str) -> Issuer {
    let mut issuer = Issuer::new(
        ISSUER_NAME,
        IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
        },
    );
    issuer.metadata.namespace = Some(namespace.to_string());
    issuer
}

/// Desired certificate for a webhook workload, valid for its service DNS names
pub fn workload_certificate(workload: &str, namespace: &str) -> Certificate {
    let service = service_name(workload);
    let mut certificate = Certificate::new(
        &certificate_name(workload),
        CertificateSpec {
            dns_names: vec![
                format!("{service}.{namespace}.svc"),
                format!("{service}.{namespace}.svc.cluster.local"),
            ],
            issuer_ref: IssuerRef {
                name: ISSUER_NAME.to_string(),
                kind: "Issuer".to_string(),
            },
            secret_name: tls_secret_name(workload),
        },
    );
    certificate.metadata.namespace = Some(namespace.to_string());
    certificate
}
