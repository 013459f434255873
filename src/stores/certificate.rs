use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition, CertificateSigningRequestSpec,
    CertificateSigningRequestStatus,
};
use kube::{
    api::{Api, ObjectMeta, PostParams},
    client::Client,
};
use rcgen::{CertificateParams, DnType, KeyPair};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, WebhookError};
use crate::stores::CertificateIssuer;

/// How long to wait for the cluster signer before giving up.
const SIGNING_DEADLINE: Duration = Duration::from_secs(3600);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Issues TLS certificates through the cluster's certificate-signing
/// workflow: generate a keypair and CSR locally, submit a
/// CertificateSigningRequest, self-approve it, and poll for the signed
/// certificate under a bounded deadline.
pub struct ClusterCertificateIssuer {
    client: Client,
}

impl ClusterCertificateIssuer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn requests(&self) -> Api<CertificateSigningRequest> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl CertificateIssuer for ClusterCertificateIssuer {
    async fn issue(&self, common_name: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let key_pair = KeyPair::generate().map_err(WebhookError::collaborator)?;
        let mut params = CertificateParams::new(vec![common_name.to_string()])
            .map_err(WebhookError::collaborator)?;
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        let csr_pem = params
            .serialize_request(&key_pair)
            .and_then(|csr| csr.pem())
            .map_err(WebhookError::collaborator)?;

        let requests = self.requests();
        let request = CertificateSigningRequest {
            metadata: ObjectMeta {
                name: Some(common_name.to_string()),
                ..Default::default()
            },
            spec: CertificateSigningRequestSpec {
                request: ByteString(csr_pem.into_bytes()),
                signer_name: "kubernetes.io/legacy-unknown".to_string(),
                usages: Some(vec![
                    "digital signature".to_string(),
                    "key encipherment".to_string(),
                    "server auth".to_string(),
                ]),
                ..Default::default()
            },
            status: None,
        };
        requests.create(&PostParams::default(), &request).await?;

        // Approve our own request; the extension acts as the approver.
        let mut submitted = requests.get(common_name).await?;
        let status = submitted
            .status
            .get_or_insert_with(CertificateSigningRequestStatus::default);
        status
            .conditions
            .get_or_insert_with(Vec::new)
            .push(CertificateSigningRequestCondition {
                type_: "Approved".to_string(),
                status: "True".to_string(),
                reason: Some("AutoApproved".to_string()),
                message: Some("Approved by Tekton webhooks extension".to_string()),
                ..Default::default()
            });
        requests
            .replace_subresource(
                "approval",
                common_name,
                &PostParams::default(),
                serde_json::to_vec(&submitted).map_err(WebhookError::collaborator)?,
            )
            .await?;

        let certificate =
            tokio::time::timeout(SIGNING_DEADLINE, self.wait_for_certificate(common_name))
                .await
                .map_err(|_| {
                    WebhookError::Collaborator(format!(
                        "timed out waiting for certificate {} to be signed",
                        common_name
                    ))
                })??;

        Ok((certificate, key_pair.serialize_pem().into_bytes()))
    }
}

impl ClusterCertificateIssuer {
    async fn wait_for_certificate(&self, name: &str) -> Result<Vec<u8>> {
        let requests = self.requests();
        loop {
            let request = requests.get(name).await?;
            if let Some(certificate) = request.status.and_then(|s| s.certificate)
                && !certificate.0.is_empty()
            {
                debug!("certificate {} signed", name);
                return Ok(certificate.0);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
