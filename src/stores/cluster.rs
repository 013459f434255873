use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{
    ResourceExt,
    api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams},
    client::Client,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::Result;
use crate::models::{
    Credential, EVENT_LISTENER_NAME, EVENT_LISTENER_SERVICE, EventListener, EventListenerSpec,
    Param, PipelineRun, Trigger, TriggerBinding, TriggerBindingSpec, TriggerTemplate,
};
use crate::stores::{
    BindingStore, CredentialStore, DashboardLocator, PipelineRunStore, TemplateStore, TriggerStore,
};
use crate::triggers::EVENT_LISTENER_SA;

/// Kubernetes-backed store implementations, all operating in the install
/// namespace.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    namespace: String,
}

impl ClusterClient {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn listeners(&self) -> Api<EventListener> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn bindings(&self) -> Api<TriggerBinding> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn templates(&self) -> Api<TriggerTemplate> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl TriggerStore for ClusterClient {
    async fn get(&self) -> Result<Option<EventListener>> {
        Ok(self.listeners().get_opt(EVENT_LISTENER_NAME).await?)
    }

    async fn create(&self, triggers: Vec<Trigger>) -> Result<EventListener> {
        let listener = EventListener::new(
            EVENT_LISTENER_NAME,
            EventListenerSpec {
                service_account_name: EVENT_LISTENER_SA.to_string(),
                triggers,
            },
        );
        Ok(self
            .listeners()
            .create(&PostParams::default(), &listener)
            .await?)
    }

    async fn update(&self, listener: EventListener) -> Result<EventListener> {
        Ok(self
            .listeners()
            .replace(EVENT_LISTENER_NAME, &PostParams::default(), &listener)
            .await?)
    }

    async fn delete(&self) -> Result<()> {
        self.listeners()
            .delete(EVENT_LISTENER_NAME, &DeleteParams::default())
            .await?;
        Ok(())
    }

    // Give the eventlistener a chance to be up and running or the provider's
    // webhook ping will get a 503 (a resend still works, so best-effort).
    async fn wait_until_ready(&self) {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        for _ in 0..30 {
            let ready = deployments
                .get_opt(EVENT_LISTENER_SERVICE)
                .await
                .ok()
                .flatten()
                .and_then(|d| d.status)
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            if ready > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        debug!("eventlistener deployment not ready after 30s, continuing anyway");
    }
}

#[async_trait]
impl BindingStore for ClusterClient {
    async fn create(&self, name_hint: &str, params: Vec<Param>) -> Result<String> {
        let binding = TriggerBinding {
            metadata: ObjectMeta {
                generate_name: Some(format!("wext-{}-", name_hint)),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: TriggerBindingSpec { params },
        };
        let created = self
            .bindings()
            .create(&PostParams::default(), &binding)
            .await?;
        Ok(created.name_any())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.bindings().delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_params(&self, name: &str) -> Result<Vec<Param>> {
        let binding = self.bindings().get(name).await?;
        Ok(binding.spec.params)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.bindings().get_opt(name).await?.is_some())
    }
}

#[async_trait]
impl TemplateStore for ClusterClient {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.templates().get_opt(name).await?.is_some())
    }
}

#[async_trait]
impl PipelineRunStore for ClusterClient {
    async fn list(&self, namespace: &str) -> Result<Vec<PipelineRun>> {
        let runs: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        Ok(runs.list(&ListParams::default()).await?.items)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let runs: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        runs.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct DashboardEndpoint {
    #[allow(dead_code)]
    #[serde(rename = "type", default)]
    kind: String,
    url: String,
}

#[async_trait]
impl DashboardLocator for ClusterClient {
    async fn dashboard_url(&self) -> String {
        let fallback = "http://localhost:9097/".to_string();

        let label_lookup = "app.kubernetes.io/part-of=tekton-dashboard,\
             app.kubernetes.io/component=dashboard,app.kubernetes.io/name=dashboard";
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = match services
            .list(&ListParams::default().labels(label_lookup))
            .await
        {
            Ok(list) => list,
            Err(e) => {
                error!("could not find the dashboard's service - error: {}", e);
                return fallback;
            },
        };

        let Some(service) = list.items.first() else {
            error!("could not find the dashboard's service");
            return fallback;
        };

        let name = service.name_any();
        let Some(port) = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|p| p.first())
        else {
            return fallback;
        };
        let proto = port.name.clone().unwrap_or_else(|| "http".to_string());
        let url = format!(
            "{}://{}:{}/v1/namespaces/{}/endpoints",
            proto, name, port.port, self.namespace
        );
        debug!("using url: {}", url);

        let response = match reqwest::get(&url).await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                error!(
                    "return code was not 200 when hitting the endpoints REST endpoint, code returned was: {}",
                    r.status()
                );
                return url;
            },
            Err(e) => {
                error!("error occurred when hitting the endpoints REST endpoint: {}", e);
                return url;
            },
        };

        match response.json::<Vec<DashboardEndpoint>>().await {
            Ok(endpoints) if !endpoints.is_empty() => endpoints[0].url.clone(),
            _ => url,
        }
    }
}

#[async_trait]
impl CredentialStore for ClusterClient {
    async fn create(&self, credential: &Credential) -> Result<()> {
        let mut string_data = BTreeMap::new();
        string_data.insert("accessToken".to_string(), credential.access_token.clone());
        let secret_token = if credential.secret_token.is_empty() {
            // Shared secret used to sign provider payloads.
            rand::random::<u32>().to_string()
        } else {
            credential.secret_token.clone()
        };
        string_data.insert("secretToken".to_string(), secret_token);

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(credential.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            string_data: Some(string_data),
            ..Default::default()
        };
        self.secrets().create(&PostParams::default(), &secret).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Credential>> {
        let secrets = self.secrets().list(&ListParams::default()).await?;
        let credentials = secrets
            .items
            .into_iter()
            .filter(|s| {
                s.data
                    .as_ref()
                    .map(|d| d.contains_key("accessToken"))
                    .unwrap_or(false)
            })
            .map(|s| Credential {
                name: s.name_any(),
                // Token values are never echoed back.
                access_token: "********".to_string(),
                secret_token: "********".to_string(),
            })
            .collect();
        Ok(credentials)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.secrets().delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
