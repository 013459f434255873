use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::Defaults;
use crate::error::{Result, WebhookError};
use crate::git::GitRepoId;
use crate::metrics::{WEBHOOKS_CREATED, WEBHOOKS_DELETED};
use crate::models::{
    Credential, HEADER_REPOSITORY_URL, HEADER_SECRET_NAME, Trigger, TriggerKind,
    WebhookRegistration,
};
use crate::reconciler::{DeregisterOutcome, Reconciler, RegisterOutcome};
use crate::stores::{
    BindingStore, CredentialStore, GitProviderClient, NetworkProvisioner, PipelineRunStore,
    TemplateStore, TriggerStore,
};
use crate::triggers::DEFAULT_PULL_TASK;

const MAX_NAME_LENGTH: usize = 57;

/// End-to-end webhook registration workflows.
///
/// Every mutating operation holds `lock` for its full duration. The shared
/// collection is read-modify-written with no server-side concurrency check,
/// so two unserialized registrations racing on get-then-update would
/// silently lose one registration's triggers.
pub struct WebhookService {
    defaults: Defaults,
    lock: Mutex<()>,
    reconciler: Reconciler,
    triggers: Arc<dyn TriggerStore>,
    bindings: Arc<dyn BindingStore>,
    templates: Arc<dyn TemplateStore>,
    network: Arc<dyn NetworkProvisioner>,
    provider: Arc<dyn GitProviderClient>,
    pipeline_runs: Arc<dyn PipelineRunStore>,
    credentials: Arc<dyn CredentialStore>,
}

impl WebhookService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        defaults: Defaults,
        reconciler: Reconciler,
        triggers: Arc<dyn TriggerStore>,
        bindings: Arc<dyn BindingStore>,
        templates: Arc<dyn TemplateStore>,
        network: Arc<dyn NetworkProvisioner>,
        provider: Arc<dyn GitProviderClient>,
        pipeline_runs: Arc<dyn PipelineRunStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            defaults,
            lock: Mutex::new(()),
            reconciler,
            triggers,
            bindings,
            templates,
            network,
            provider,
            pipeline_runs,
            credentials,
        }
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Create a webhook registration: validate, reconcile the trigger
    /// collection, provision networking on first use, and register the
    /// webhook with the Git provider for the repository's first
    /// registration.
    pub async fn create(&self, mut webhook: WebhookRegistration) -> Result<()> {
        let _guard = self.lock.lock().await;
        info!("webhook creation request received for {}", webhook.name);

        webhook.git_repository_url = webhook
            .git_repository_url
            .strip_suffix(".git")
            .unwrap_or(&webhook.git_repository_url)
            .to_string();

        if webhook.pull_task.is_empty() {
            webhook.pull_task = DEFAULT_PULL_TASK.to_string();
        }

        if webhook.name.len() > MAX_NAME_LENGTH {
            return Err(WebhookError::Validation(format!(
                "requested webhook name ({}) must be less than 58 characters",
                webhook.name
            )));
        }

        webhook.docker_registry = webhook
            .docker_registry
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();
        if webhook.docker_registry.is_empty() {
            webhook.docker_registry = self.defaults.docker_registry.clone();
        }
        debug!("Docker registry location is: {}", webhook.docker_registry);

        if webhook.namespace.is_empty() {
            return Err(WebhookError::Validation(
                "a namespace for creating a webhook is required, but none was given".to_string(),
            ));
        }

        if !webhook.git_repository_url.starts_with("http") {
            return Err(WebhookError::Validation(
                "the supplied GitRepositoryURL does not specify the protocol http:// or https://"
                    .to_string(),
            ));
        }

        if webhook.git_repository_url.split('/').count() < 4 {
            return Err(WebhookError::Validation(
                "GitRepositoryURL format error".to_string(),
            ));
        }

        let repo = GitRepoId::parse(&webhook.git_repository_url)?;

        let hooks = self.hooks_for_repo(&webhook.git_repository_url).await?;
        for hook in &hooks {
            if hook.name == webhook.name {
                return Err(WebhookError::Conflict(
                    "Webhook already exists with the same name".to_string(),
                ));
            }
            if hook.pipeline == webhook.pipeline && hook.namespace == webhook.namespace {
                return Err(WebhookError::Conflict(
                    "Webhook already exists for the specified Git repository, running the same \
                     pipeline in the same namespace"
                        .to_string(),
                ));
            }
            if hook.pull_task != webhook.pull_task {
                return Err(WebhookError::Conflict(format!(
                    "PullTask mismatch. Webhooks on a repository must use the same PullTask, \
                     existing webhooks use {} not {}",
                    hook.pull_task, webhook.pull_task
                )));
            }
        }

        let template = format!("{}-template", webhook.pipeline);
        let push_binding = format!("{}-push-binding", webhook.pipeline);
        let pullrequest_binding = format!("{}-pullrequest-binding", webhook.pipeline);
        let all_present = self.templates.exists(&template).await?
            && self.bindings.exists(&push_binding).await?
            && self.bindings.exists(&pullrequest_binding).await?;
        if !all_present {
            return Err(WebhookError::Validation(format!(
                "Could not find the required trigger template or trigger bindings in namespace: \
                 {}. Expected to find: {}, {} and {}",
                self.defaults.namespace, template, push_binding, pullrequest_binding
            )));
        }

        let outcome = self.reconciler.register(&webhook).await?;

        if outcome == RegisterOutcome::CollectionCreated {
            if let Err(e) = self.network.create().await {
                let original = WebhookError::Collaborator(format!(
                    "error creating webhook due to error provisioning the eventlistener network \
                     route: {}",
                    e
                ));
                debug!("deleting eventlistener after failed network provisioning");
                return Err(match self.reconciler.delete_collection().await {
                    Ok(()) => original,
                    Err(cleanup) => original.with_cleanup_failure(cleanup),
                });
            }
            debug!("network provisioning succeeded");
        }

        if hooks.is_empty() {
            self.triggers.wait_until_ready().await;
            if let Err(e) = self.provider.register_webhook(&webhook, &repo).await {
                let rollback = self.reconciler.deregister(&webhook).await;
                return Err(match rollback {
                    Ok(DeregisterOutcome::CollectionDeleted) => {
                        if let Err(net_err) = self.network.delete().await {
                            e.with_cleanup_failure(net_err)
                        } else {
                            e
                        }
                    },
                    Ok(DeregisterOutcome::TriggersRemoved) => e,
                    Err(cleanup) => e.with_cleanup_failure(cleanup),
                });
            }
            debug!("webhook creation succeeded");
        } else {
            debug!(
                "webhook already exists for repository {} - not creating a new provider hook",
                repo.url()
            );
        }

        WEBHOOKS_CREATED.inc();
        Ok(())
    }

    /// Delete a webhook registration, deregistering the provider webhook
    /// when it is the repository's last one and optionally purging matching
    /// PipelineRuns.
    pub async fn delete(
        &self,
        name: &str,
        repository: &str,
        namespace: &str,
        delete_pipeline_runs: bool,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        debug!(
            "deleting webhook {} on repo {} in namespace {}, delete pipeline runs: {}",
            name, repository, namespace, delete_pipeline_runs
        );

        if namespace.is_empty() || repository.is_empty() {
            return Err(WebhookError::Validation(format!(
                "bad request information provided, a namespace and a repository must be \
                 specified as query parameters. Namespace: {}, repo: {}",
                namespace, repository
            )));
        }

        let webhooks = self.hooks_for_repo(repository).await?;
        debug!(
            "found {} webhooks/pipelines registered against repo {}",
            webhooks.len(),
            repository
        );

        let repo = GitRepoId::parse(repository)?;

        let Some(hook) = webhooks
            .iter()
            .find(|h| h.name == name && h.namespace == namespace)
        else {
            return Err(WebhookError::NotFound(format!(
                "no webhook found for repo {} with name {} associated with namespace {}",
                repository, name, namespace
            )));
        };

        if webhooks.len() == 1 {
            debug!("no other pipelines triggered by this webhook, deregistering provider hook");
            self.provider.deregister_webhook(hook, &repo).await?;
        }

        if delete_pipeline_runs {
            self.purge_pipeline_runs(repository, namespace, &hook.pipeline)
                .await?;
        }

        let outcome = self.reconciler.deregister(hook).await?;
        if outcome == DeregisterOutcome::CollectionDeleted {
            self.network.delete().await?;
        }

        WEBHOOKS_DELETED.inc();
        Ok(())
    }

    /// All current registrations, reconstructed from the collection's push
    /// and pull-request triggers and deduplicated by full record equality.
    pub async fn list(&self) -> Result<Vec<WebhookRegistration>> {
        let Some(el) = self.triggers.get().await? else {
            return Ok(Vec::new());
        };

        let mut hooks: Vec<WebhookRegistration> = Vec::new();
        for trigger in &el.spec.triggers {
            let suffix = match trigger.kind() {
                Some(TriggerKind::Push) => "-push-event",
                Some(TriggerKind::PullRequest) => "-pullrequest-event",
                _ => continue,
            };
            let hook = self.hook_from_trigger(trigger, suffix).await;
            if !hooks.contains(&hook) {
                hooks.push(hook);
            }
        }
        Ok(hooks)
    }

    async fn hooks_for_repo(&self, git_url: &str) -> Result<Vec<WebhookRegistration>> {
        let all = self.list().await?;
        let matching: Vec<WebhookRegistration> = all
            .into_iter()
            .filter(|hook| {
                GitRepoId::compare(&hook.git_repository_url, git_url)
                    .unwrap_or(hook.git_repository_url == git_url)
            })
            .collect();
        debug!("hooks for repo {}: {:?}", git_url, matching);
        Ok(matching)
    }

    /// Rebuild a registration record from one of its triggers. Parameters
    /// are read in a single pass keyed by exact name so reconstruction is
    /// deterministic; a missing binding yields a marker record rather than
    /// an error, leaving enough fields populated for a subsequent delete.
    async fn hook_from_trigger(&self, trigger: &Trigger, suffix: &str) -> WebhookRegistration {
        let mut hook = WebhookRegistration::default();
        let mut broken = false;

        for binding in &trigger.bindings {
            let params = match self.bindings.get_params(&binding.reference).await {
                Ok(params) => params,
                Err(_) => {
                    error!(
                        "error retrieving webhook information in full - could not find required \
                         TriggerBinding {}",
                        binding.reference
                    );
                    broken = true;
                    continue;
                },
            };
            for param in params {
                match param.name.as_str() {
                    "webhooks-tekton-release-name" => hook.release_name = param.value,
                    "webhooks-tekton-target-namespace" => hook.namespace = param.value,
                    "webhooks-tekton-service-account" => hook.service_account = param.value,
                    "webhooks-tekton-pull-task" => hook.pull_task = param.value,
                    "webhooks-tekton-docker-registry" => hook.docker_registry = param.value,
                    "webhooks-tekton-helm-secret" => hook.helm_secret = param.value,
                    _ => {},
                }
            }
        }

        if let Some(repo) = trigger.header(HEADER_REPOSITORY_URL) {
            hook.git_repository_url = repo.to_string();
        }
        if let Some(secret) = trigger.header(HEADER_SECRET_NAME) {
            hook.access_token_ref = secret.to_string();
        }

        if hook.namespace.is_empty() {
            // Broken webhook: namespace and repository URL are still needed
            // for a successful delete.
            hook.namespace = self.defaults.namespace.clone();
        }

        hook.pipeline = trigger
            .template
            .name
            .strip_suffix("-template")
            .unwrap_or(&trigger.template.name)
            .to_string();
        hook.name = if broken {
            "Broken webhook! Resources not found".to_string()
        } else {
            trigger
                .name
                .strip_suffix(&format!("-{}{}", hook.namespace, suffix))
                .unwrap_or(&trigger.name)
                .to_string()
        };

        hook
    }

    /// Delete PipelineRuns in the namespace whose pipeline and
    /// repository-identity labels match the registration being removed.
    async fn purge_pipeline_runs(
        &self,
        git_repo_url: &str,
        namespace: &str,
        pipeline: &str,
    ) -> Result<()> {
        debug!(
            "looking for PipelineRuns in namespace {} with repository URL {} for pipeline {}",
            namespace, git_repo_url, pipeline
        );
        let runs = self.pipeline_runs.list(namespace).await?;

        let mut found = false;
        for run in runs {
            let matches_pipeline = run
                .spec
                .pipeline_ref
                .as_ref()
                .map(|r| r.name == pipeline)
                .unwrap_or(false);
            if !matches_pipeline {
                continue;
            }

            let labels = run.metadata.labels.clone().unwrap_or_default();
            let server = labels.get("webhooks.tekton.dev/gitServer");
            let org = labels.get("webhooks.tekton.dev/gitOrg");
            let repo = labels.get("webhooks.tekton.dev/gitRepo");
            let (Some(server), Some(org), Some(repo)) = (server, org, repo) else {
                continue;
            };
            let labeled_url = format!("https://{}/{}/{}", server, org, repo);

            if GitRepoId::compare(&labeled_url, git_repo_url).unwrap_or(false) {
                found = true;
                let name = run.metadata.name.clone().unwrap_or_default();
                self.pipeline_runs.delete(namespace, &name).await?;
                info!("deleted PipelineRun {}", name);
            }
        }
        if !found {
            info!("no matching PipelineRuns found");
        }
        Ok(())
    }

    pub async fn create_credential(&self, credential: Credential) -> Result<()> {
        if credential.name.is_empty() {
            return Err(WebhookError::Validation(
                "a credential name must be specified".to_string(),
            ));
        }
        if credential.access_token.is_empty() {
            return Err(WebhookError::Validation(
                "an access token must be specified".to_string(),
            ));
        }
        self.credentials.create(&credential).await
    }

    pub async fn list_credentials(&self) -> Result<Vec<Credential>> {
        self.credentials.list().await
    }

    pub async fn delete_credential(&self, name: &str) -> Result<()> {
        self.credentials.delete(name).await
    }
}
