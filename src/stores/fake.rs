//! In-memory store implementations for exercising the reconciler and the
//! registration service without a cluster.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::{Result, WebhookError};
use crate::git::GitRepoId;
use crate::models::{
    Credential, EVENT_LISTENER_NAME, EventListener, EventListenerSpec, Param, PipelineRun,
    Trigger, WebhookRegistration,
};
use crate::stores::{
    BindingStore, CredentialStore, DashboardLocator, GitProviderClient, NetworkProvisioner,
    PipelineRunStore, TemplateStore, TriggerStore,
};
use crate::triggers::EVENT_LISTENER_SA;

pub struct FakeCluster {
    pub listener: Mutex<Option<EventListener>>,
    /// Generated bindings by name.
    pub bindings: Mutex<HashMap<String, Vec<Param>>>,
    binding_counter: AtomicU32,
    /// Pre-existing static bindings and templates.
    pub static_bindings: Mutex<HashSet<String>>,
    pub templates: Mutex<HashSet<String>>,
    /// Failure injection. `fail_binding_create_after` fails binding creation
    /// once that many creates have succeeded (`u32::MAX` disables it).
    pub fail_binding_create: AtomicBool,
    pub fail_binding_create_after: AtomicU32,
    pub fail_listener_update: AtomicBool,
    /// Network provisioning bookkeeping.
    pub ingress_exists: AtomicBool,
    /// Provider webhooks registered, keyed by normalized repository URL.
    pub provider_webhooks: Mutex<HashSet<String>>,
    pub provider_register_calls: AtomicU32,
    /// PipelineRuns by (namespace, name).
    pub pipeline_runs: Mutex<Vec<(String, PipelineRun)>>,
    pub credentials: Mutex<HashMap<String, Credential>>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            listener: Mutex::new(None),
            bindings: Mutex::new(HashMap::new()),
            binding_counter: AtomicU32::new(0),
            static_bindings: Mutex::new(HashSet::new()),
            templates: Mutex::new(HashSet::new()),
            fail_binding_create: AtomicBool::new(false),
            fail_binding_create_after: AtomicU32::new(u32::MAX),
            fail_listener_update: AtomicBool::new(false),
            ingress_exists: AtomicBool::new(false),
            provider_webhooks: Mutex::new(HashSet::new()),
            provider_register_calls: AtomicU32::new(0),
            pipeline_runs: Mutex::new(Vec::new()),
            credentials: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the static template and bindings a pipeline is expected to
    /// provide.
    pub fn with_pipeline(self, pipeline: &str) -> Self {
        self.templates
            .lock()
            .unwrap()
            .insert(format!("{}-template", pipeline));
        {
            let mut bindings = self.static_bindings.lock().unwrap();
            bindings.insert(format!("{}-push-binding", pipeline));
            bindings.insert(format!("{}-pullrequest-binding", pipeline));
        }
        self
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        self.listener
            .lock()
            .unwrap()
            .as_ref()
            .map(|el| el.spec.triggers.clone())
            .unwrap_or_default()
    }

    pub fn trigger_names(&self) -> Vec<String> {
        self.triggers().into_iter().map(|t| t.name).collect()
    }

    pub fn binding_names(&self) -> Vec<String> {
        self.bindings.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl TriggerStore for FakeCluster {
    async fn get(&self) -> Result<Option<EventListener>> {
        Ok(self.listener.lock().unwrap().clone())
    }

    async fn create(&self, triggers: Vec<Trigger>) -> Result<EventListener> {
        let created = EventListener::new(
            EVENT_LISTENER_NAME,
            EventListenerSpec {
                service_account_name: EVENT_LISTENER_SA.to_string(),
                triggers,
            },
        );
        *self.listener.lock().unwrap() = Some(created.clone());
        Ok(created)
    }

    async fn update(&self, updated: EventListener) -> Result<EventListener> {
        if self.fail_listener_update.load(Ordering::SeqCst) {
            return Err(WebhookError::Collaborator(
                "injected eventlistener update failure".to_string(),
            ));
        }
        let mut listener = self.listener.lock().unwrap();
        if listener.is_none() {
            return Err(WebhookError::Collaborator(
                "eventlistener does not exist".to_string(),
            ));
        }
        *listener = Some(updated.clone());
        Ok(updated)
    }

    async fn delete(&self) -> Result<()> {
        let mut listener = self.listener.lock().unwrap();
        if listener.take().is_none() {
            return Err(WebhookError::Collaborator(
                "eventlistener does not exist".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BindingStore for FakeCluster {
    async fn create(&self, name_hint: &str, params: Vec<Param>) -> Result<String> {
        if self.fail_binding_create.load(Ordering::SeqCst)
            || self.binding_counter.load(Ordering::SeqCst)
                >= self.fail_binding_create_after.load(Ordering::SeqCst)
        {
            return Err(WebhookError::Collaborator(
                "injected binding create failure".to_string(),
            ));
        }
        let n = self.binding_counter.fetch_add(1, Ordering::SeqCst);
        let name = format!("wext-{}-{:05}", name_hint, n);
        self.bindings.lock().unwrap().insert(name.clone(), params);
        Ok(name)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if self.bindings.lock().unwrap().remove(name).is_none() {
            return Err(WebhookError::Collaborator(format!(
                "binding {} does not exist",
                name
            )));
        }
        Ok(())
    }

    async fn get_params(&self, name: &str) -> Result<Vec<Param>> {
        if let Some(params) = self.bindings.lock().unwrap().get(name) {
            return Ok(params.clone());
        }
        // Static pipeline bindings exist but carry no parameters of interest.
        if self.static_bindings.lock().unwrap().contains(name) {
            return Ok(Vec::new());
        }
        Err(WebhookError::Collaborator(format!(
            "binding {} does not exist",
            name
        )))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.static_bindings.lock().unwrap().contains(name)
            || self.bindings.lock().unwrap().contains_key(name))
    }
}

#[async_trait]
impl TemplateStore for FakeCluster {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.templates.lock().unwrap().contains(name))
    }
}

#[async_trait]
impl NetworkProvisioner for FakeCluster {
    async fn create(&self) -> Result<()> {
        self.ingress_exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.ingress_exists.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl GitProviderClient for FakeCluster {
    async fn register_webhook(
        &self,
        _webhook: &WebhookRegistration,
        repo: &GitRepoId,
    ) -> Result<()> {
        self.provider_register_calls.fetch_add(1, Ordering::SeqCst);
        self.provider_webhooks.lock().unwrap().insert(repo.url());
        Ok(())
    }

    async fn deregister_webhook(
        &self,
        _webhook: &WebhookRegistration,
        repo: &GitRepoId,
    ) -> Result<()> {
        if !self.provider_webhooks.lock().unwrap().remove(&repo.url()) {
            return Err(WebhookError::Collaborator(format!(
                "no webhook registered for {}",
                repo.url()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineRunStore for FakeCluster {
    async fn list(&self, namespace: &str) -> Result<Vec<PipelineRun>> {
        Ok(self
            .pipeline_runs
            .lock()
            .unwrap()
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, run)| run.clone())
            .collect())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut runs = self.pipeline_runs.lock().unwrap();
        let before = runs.len();
        runs.retain(|(ns, run)| {
            !(ns == namespace && run.metadata.name.as_deref() == Some(name))
        });
        if runs.len() == before {
            return Err(WebhookError::Collaborator(format!(
                "pipelinerun {}/{} does not exist",
                namespace, name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DashboardLocator for FakeCluster {
    async fn dashboard_url(&self) -> String {
        "http://localhost:9097/".to_string()
    }
}

#[async_trait]
impl CredentialStore for FakeCluster {
    async fn create(&self, credential: &Credential) -> Result<()> {
        self.credentials
            .lock()
            .unwrap()
            .insert(credential.name.clone(), credential.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Credential>> {
        Ok(self.credentials.lock().unwrap().values().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if self.credentials.lock().unwrap().remove(name).is_none() {
            return Err(WebhookError::NotFound(format!(
                "no credential named {}",
                name
            )));
        }
        Ok(())
    }
}
