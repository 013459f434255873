use rand::RngExt;
use tracing::debug;

use crate::config::ssl_verification_enabled;
use crate::error::{Result, WebhookError};
use crate::git::{GitRepoId, provider_and_api_url};
use crate::models::{
    HEADER_INCOMING_ACTIONS, HEADER_INCOMING_EVENT, HEADER_REPOSITORY_URL, HEADER_SECRET_NAME,
    HEADER_TRIGGER_NAME, Interceptor, InterceptorObjectRef, Param, Trigger, TriggerKind,
    WebhookInterceptor, WebhookRegistration,
};
use crate::models::{BindingRef, TemplateRef};

/// Pull task assumed when a registration does not name one.
pub const DEFAULT_PULL_TASK: &str = "monitor-task";

/// Service account the eventlistener runs under.
pub const EVENT_LISTENER_SA: &str = "tekton-webhooks-extension-eventlistener";

/// Service the interceptor calls out to for payload validation.
const VALIDATOR_SERVICE: &str = "tekton-webhooks-extension-validator";

const PUSH_EVENTS: &str = "push, Push Hook, Tag Push Hook";
const PULL_REQUEST_EVENTS: &str = "pull_request, Merge Request Hook";
const PULL_REQUEST_ACTIONS: &str = "opened,reopened,synchronize";

/// Build a single trigger. Pure construction: two binding references (the
/// pipeline's static binding and the generated parameter binding), a template
/// reference, and exactly one interceptor carrying the four filter headers.
/// Pull-request and monitor triggers additionally restrict the accepted
/// pull-request actions.
pub fn build_trigger(
    kind: TriggerKind,
    name: &str,
    binding: &str,
    extra_binding: &str,
    template: &str,
    repo_url: &str,
    secret_name: &str,
    install_namespace: &str,
) -> Trigger {
    let events = match kind {
        TriggerKind::Push => PUSH_EVENTS,
        TriggerKind::PullRequest | TriggerKind::Monitor => PULL_REQUEST_EVENTS,
    };

    let mut header = vec![
        Param::new(HEADER_TRIGGER_NAME, name),
        Param::new(HEADER_REPOSITORY_URL, repo_url),
        Param::new(HEADER_INCOMING_EVENT, events),
        Param::new(HEADER_SECRET_NAME, secret_name),
    ];
    if kind != TriggerKind::Push {
        header.push(Param::new(HEADER_INCOMING_ACTIONS, PULL_REQUEST_ACTIONS));
    }

    Trigger {
        name: name.to_string(),
        kind: Some(kind),
        bindings: vec![BindingRef::new(binding), BindingRef::new(extra_binding)],
        template: TemplateRef::new(template),
        interceptors: vec![Interceptor {
            webhook: WebhookInterceptor {
                header,
                object_ref: InterceptorObjectRef {
                    api_version: "v1".to_string(),
                    kind: "Service".to_string(),
                    name: VALIDATOR_SERVICE.to_string(),
                    namespace: install_namespace.to_string(),
                },
            },
        }],
    }
}

/// Name of the static binding a repository's monitor trigger references.
/// The stock pull task gets a per-provider binding.
pub fn monitor_binding_name(repo_url: &str, pull_task: &str) -> Result<String> {
    let pull_task = if pull_task.is_empty() {
        debug!("no monitor task specified, assuming name is {}", DEFAULT_PULL_TASK);
        DEFAULT_PULL_TASK
    } else {
        pull_task
    };

    if pull_task == DEFAULT_PULL_TASK {
        let (provider, _) = provider_and_api_url(repo_url)?;
        Ok(format!("{}-{}-binding", pull_task, provider.as_str()))
    } else {
        Ok(format!("{}-binding", pull_task))
    }
}

/// Pipeline-facing parameters carried by a registration's generated hook
/// binding.
pub fn hook_params(webhook: &WebhookRegistration, repo: &GitRepoId) -> Vec<Param> {
    let release_name = if webhook.release_name.is_empty() {
        repo.repo.clone()
    } else {
        webhook.release_name.clone()
    };
    let ssl_verify = ssl_verification_enabled();

    let mut params = vec![
        Param::new("webhooks-tekton-release-name", release_name),
        Param::new("webhooks-tekton-target-namespace", &webhook.namespace),
        Param::new("webhooks-tekton-service-account", &webhook.service_account),
        Param::new("webhooks-tekton-git-server", repo.server_host()),
        Param::new("webhooks-tekton-git-org", &repo.owner),
        Param::new("webhooks-tekton-git-repo", &repo.repo),
        Param::new("webhooks-tekton-pull-task", &webhook.pull_task),
        Param::new("webhooks-tekton-ssl-verify", ssl_verify.to_string()),
        Param::new(
            "webhooks-tekton-insecure-skip-tls-verify",
            (!ssl_verify).to_string(),
        ),
    ];

    if !webhook.docker_registry.is_empty() {
        params.push(Param::new(
            "webhooks-tekton-docker-registry",
            &webhook.docker_registry,
        ));
    }
    if !webhook.helm_secret.is_empty() {
        params.push(Param::new("webhooks-tekton-helm-secret", &webhook.helm_secret));
    }
    params
}

/// Status-reporting parameters carried by a repository's shared monitor
/// binding. Comment templates fall back to fixed defaults.
pub fn monitor_params(
    webhook: &WebhookRegistration,
    dashboard_url: &str,
) -> Result<Vec<Param>> {
    let (provider, api_url) = provider_and_api_url(&webhook.git_repository_url)?;
    let ssl_verify = ssl_verification_enabled();

    let or_default = |value: &str, default: &str| {
        if value.is_empty() {
            default.to_string()
        } else {
            value.to_string()
        }
    };

    Ok(vec![
        Param::new("commentsuccess", or_default(&webhook.on_success_comment, "Success")),
        Param::new("commentfailure", or_default(&webhook.on_failure_comment, "Failed")),
        Param::new("commenttimeout", or_default(&webhook.on_timeout_comment, "Unknown")),
        Param::new("commentmissing", or_default(&webhook.on_missing_comment, "Missing")),
        Param::new("gitsecretname", &webhook.access_token_ref),
        Param::new("gitsecretkeyname", "accessToken"),
        Param::new("dashboardurl", dashboard_url),
        Param::new("insecure-skip-tls-verify", (!ssl_verify).to_string()),
        Param::new("provider", provider.as_str()),
        Param::new("apiurl", api_url),
    ])
}

/// Find the existing monitor trigger for a repository, if any.
///
/// Candidates are selected by the `{owner}.{repo}-` name prefix, then
/// confirmed by structurally comparing the repository-URL filter header
/// against the target. Triggers whose header fails to parse are skipped.
pub fn find_monitor<'a>(
    prefix: &str,
    repo_url: &str,
    triggers: &'a [Trigger],
) -> Option<&'a Trigger> {
    let found = triggers.iter().find(|trigger| {
        if !trigger.name.starts_with(prefix) {
            return false;
        }
        trigger
            .repository_url()
            .map(|url| GitRepoId::compare(url, repo_url).unwrap_or(false))
            .unwrap_or(false)
    });
    debug!(
        "does monitor exist for repo {}: {}",
        repo_url,
        found.is_some()
    );
    found
}

/// Generates collision-free monitor trigger names. Injected into the
/// reconciler so tests can pin the generated suffix.
pub trait MonitorNameGenerator: Send + Sync {
    fn generate(&self, prefix: &str, existing: &[Trigger]) -> Result<String>;
}

/// Production generator: random suffix in [0, 10000), retried until free.
/// A dense collection degrades random probing, so after a bounded number of
/// attempts the remaining suffixes are scanned in order; only a truly full
/// namespace yields `GenerationExhausted`.
pub struct RandomNameGenerator;

impl MonitorNameGenerator for RandomNameGenerator {
    fn generate(&self, prefix: &str, existing: &[Trigger]) -> Result<String> {
        let taken = |candidate: &str| existing.iter().any(|t| t.name == candidate);

        let mut rng = rand::rng();
        for _ in 0..100 {
            let candidate = format!("{}{}", prefix, rng.random_range(0..10_000));
            if !taken(&candidate) {
                return Ok(candidate);
            }
        }
        for suffix in 0..10_000 {
            let candidate = format!("{}{}", prefix, suffix);
            if !taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(WebhookError::GenerationExhausted)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Deterministic generator for tests: always `{prefix}{suffix}`.
    pub struct FixedNameGenerator(pub u32);

    impl MonitorNameGenerator for FixedNameGenerator {
        fn generate(&self, prefix: &str, existing: &[Trigger]) -> Result<String> {
            let candidate = format!("{}{}", prefix, self.0);
            if existing.iter().any(|t| t.name == candidate) {
                return Err(WebhookError::GenerationExhausted);
            }
            Ok(candidate)
        }
    }
}
