use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tekton_webhooks::api;
use tekton_webhooks::config::{self, Defaults};
use tekton_webhooks::reconciler::Reconciler;
use tekton_webhooks::service::WebhookService;
use tekton_webhooks::stores::NetworkProvisioner;
use tekton_webhooks::stores::certificate::ClusterCertificateIssuer;
use tekton_webhooks::stores::cluster::ClusterClient;
use tekton_webhooks::stores::network::{IngressProvisioner, RouteProvisioner};
use tekton_webhooks::stores::provider::HttpGitProviderClient;
use tekton_webhooks::triggers::RandomNameGenerator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let defaults = Defaults::from_env();
    info!(
        "Starting webhooks extension in namespace {}",
        defaults.namespace
    );

    let client = kube::Client::try_default().await?;
    let cluster = Arc::new(ClusterClient::new(client.clone(), &defaults.namespace));

    let network: Arc<dyn NetworkProvisioner> = if config::platform_uses_routes() {
        info!("PLATFORM set, provisioning OpenShift Routes instead of Ingresses");
        Arc::new(RouteProvisioner::new(client.clone(), &defaults.namespace))
    } else {
        let issuer = Arc::new(ClusterCertificateIssuer::new(client.clone()));
        Arc::new(IngressProvisioner::new(
            client.clone(),
            &defaults.namespace,
            defaults.clone(),
            issuer,
        ))
    };

    let provider = Arc::new(HttpGitProviderClient::new(
        client.clone(),
        &defaults.namespace,
        &defaults.callback_url,
    )?);

    let reconciler = Reconciler::new(
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        Box::new(RandomNameGenerator),
        &defaults.namespace,
    );

    let service = Arc::new(WebhookService::new(
        defaults.clone(),
        reconciler,
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        network,
        provider,
        cluster.clone(),
        cluster.clone(),
    ));

    let router = api::router(service);
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;

    Ok(())
}
