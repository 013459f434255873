pub mod certificate;
pub mod cluster;
pub mod network;
pub mod provider;

use async_trait::async_trait;

use crate::error::Result;
use crate::git::GitRepoId;
use crate::models::{EventListener, Param, PipelineRun, Trigger, WebhookRegistration};

/// The shared trigger collection. Get-then-update semantics with no
/// server-side concurrency check; callers serialize mutation behind the
/// service lock.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// The collection, or `None` while it does not exist.
    async fn get(&self) -> Result<Option<EventListener>>;
    async fn create(&self, triggers: Vec<Trigger>) -> Result<EventListener>;
    async fn update(&self, listener: EventListener) -> Result<EventListener>;
    async fn delete(&self) -> Result<()>;

    /// Block until the listener's deployment reports ready, bounded.
    /// Best-effort: a timeout is not an error.
    async fn wait_until_ready(&self) {}
}

/// TriggerBinding storage. Creation names the binding server-side under a
/// `wext-{hint}-` prefix and returns the generated name.
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn create(&self, name_hint: &str, params: Vec<Param>) -> Result<String>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn get_params(&self, name: &str) -> Result<Vec<Param>>;
    async fn exists(&self, name: &str) -> Result<bool>;
}

/// Existence checks for trigger templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;
}

/// Ingress or platform Route provisioning for the eventlistener service.
#[async_trait]
pub trait NetworkProvisioner: Send + Sync {
    async fn create(&self) -> Result<()>;
    async fn delete(&self) -> Result<()>;
}

/// TLS certificate issuance for the ingress host. Returns PEM-encoded
/// (certificate, private key); issuance polls the cluster signing workflow
/// under a bounded deadline.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn issue(&self, common_name: &str) -> Result<(Vec<u8>, Vec<u8>)>;
}

/// Webhook lifecycle on the external Git provider.
#[async_trait]
pub trait GitProviderClient: Send + Sync {
    async fn register_webhook(
        &self,
        webhook: &WebhookRegistration,
        repo: &GitRepoId,
    ) -> Result<()>;
    async fn deregister_webhook(
        &self,
        webhook: &WebhookRegistration,
        repo: &GitRepoId,
    ) -> Result<()>;
}

/// PipelineRun access for the optional purge-on-delete step.
#[async_trait]
pub trait PipelineRunStore: Send + Sync {
    async fn list(&self, namespace: &str) -> Result<Vec<PipelineRun>>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Dashboard base-URL discovery for monitor binding parameters.
/// Infallible: lookup failures fall back to a local default.
#[async_trait]
pub trait DashboardLocator: Send + Sync {
    async fn dashboard_url(&self) -> String;
}

/// Access-token secret storage for the credentials endpoints.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create(&self, credential: &crate::models::Credential) -> Result<()>;
    async fn list(&self) -> Result<Vec<crate::models::Credential>>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
pub mod fake;
