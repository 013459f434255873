use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{Result, WebhookError};
use crate::git::GitRepoId;
use crate::metrics::{EVENTLISTENER_TRIGGERS, RECONCILE_DURATION};
use crate::models::{Trigger, TriggerKind, WebhookRegistration};
use crate::stores::{BindingStore, DashboardLocator, TriggerStore};
use crate::triggers::{
    DEFAULT_PULL_TASK, MonitorNameGenerator, build_trigger, find_monitor, hook_params,
    monitor_binding_name, monitor_params,
};

/// What a successful registration did to the shared collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The collection did not exist and was created.
    CollectionCreated,
    /// Triggers were appended to the existing collection.
    TriggersAppended,
}

/// What a successful deregistration did to the shared collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregisterOutcome {
    /// The last trigger was removed and the collection deleted.
    CollectionDeleted,
    /// The collection shrank but still holds triggers.
    TriggersRemoved,
}

/// Owns all mutation of the shared trigger collection.
///
/// Callers serialize invocations behind the service-wide lock; the
/// reconciler itself assumes it runs alone. Within one operation the
/// collection mutation always precedes binding deletions, so a crash in
/// between leaves only unreferenced bindings behind.
pub struct Reconciler {
    triggers: Arc<dyn TriggerStore>,
    bindings: Arc<dyn BindingStore>,
    dashboard: Arc<dyn DashboardLocator>,
    name_generator: Box<dyn MonitorNameGenerator>,
    install_namespace: String,
}

impl Reconciler {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        bindings: Arc<dyn BindingStore>,
        dashboard: Arc<dyn DashboardLocator>,
        name_generator: Box<dyn MonitorNameGenerator>,
        install_namespace: impl Into<String>,
    ) -> Self {
        Self {
            triggers,
            bindings,
            dashboard,
            name_generator,
            install_namespace: install_namespace.into(),
        }
    }

    /// Insert the registration's triggers into the collection, creating the
    /// collection and the repository's monitor trigger as needed.
    pub async fn register(&self, webhook: &WebhookRegistration) -> Result<RegisterOutcome> {
        let _timer = RECONCILE_DURATION.start_timer();

        let repo = GitRepoId::parse(&webhook.git_repository_url)?;
        let monitor_prefix = repo.monitor_prefix();
        let pull_task = if webhook.pull_task.is_empty() {
            DEFAULT_PULL_TASK
        } else {
            webhook.pull_task.as_str()
        };
        let monitor_binding =
            monitor_binding_name(&webhook.git_repository_url, pull_task)?;

        let listener = self.triggers.get().await?;
        let existing_monitor = listener.as_ref().and_then(|el| {
            find_monitor(&monitor_prefix, &webhook.git_repository_url, &el.spec.triggers)
                .map(|t| t.name.clone())
        });

        // Bindings first; triggers must never reference a binding that does
        // not exist yet.
        let hook_ext_binding = self
            .bindings
            .create(&webhook.name, hook_params(webhook, &repo))
            .await?;

        let monitor_ext_binding = if existing_monitor.is_none() {
            let dashboard_url = self.dashboard.dashboard_url().await;
            let params = monitor_params(webhook, &dashboard_url)?;
            match self.bindings.create(&monitor_binding, params).await {
                Ok(name) => Some(name),
                Err(e) => {
                    return Err(self.rollback_bindings(e, &[hook_ext_binding.clone()]).await);
                },
            }
        } else {
            None
        };

        let prefix = webhook.trigger_prefix();
        let push_trigger = build_trigger(
            TriggerKind::Push,
            &format!("{}-push-event", prefix),
            &format!("{}-push-binding", webhook.pipeline),
            &hook_ext_binding,
            &format!("{}-template", webhook.pipeline),
            &webhook.git_repository_url,
            &webhook.access_token_ref,
            &self.install_namespace,
        );
        let pull_request_trigger = build_trigger(
            TriggerKind::PullRequest,
            &format!("{}-pullrequest-event", prefix),
            &format!("{}-pullrequest-binding", webhook.pipeline),
            &hook_ext_binding,
            &format!("{}-template", webhook.pipeline),
            &webhook.git_repository_url,
            &webhook.access_token_ref,
            &self.install_namespace,
        );

        let created_bindings: Vec<String> = std::iter::once(hook_ext_binding.clone())
            .chain(monitor_ext_binding.clone())
            .collect();

        match listener {
            None => {
                // No collection means no monitor can have matched, so the
                // monitor binding was created above.
                let Some(monitor_ext) = monitor_ext_binding.as_deref() else {
                    return Err(WebhookError::Collaborator(
                        "monitor binding missing for new eventlistener".to_string(),
                    ));
                };
                let monitor_name = self.name_generator.generate(&monitor_prefix, &[])?;
                let monitor_trigger = self.build_monitor(
                    webhook,
                    pull_task,
                    &monitor_name,
                    &monitor_binding,
                    monitor_ext,
                );

                let triggers = vec![push_trigger, pull_request_trigger, monitor_trigger];
                if let Err(e) = self.triggers.create(triggers).await {
                    return Err(self.rollback_bindings(e, &created_bindings).await);
                }
                EVENTLISTENER_TRIGGERS.set(3);
                info!("eventlistener created for first webhook registration");
                Ok(RegisterOutcome::CollectionCreated)
            },
            Some(mut el) => {
                el.spec.triggers.push(push_trigger);
                el.spec.triggers.push(pull_request_trigger);

                if let Some(monitor_ext) = monitor_ext_binding.as_deref() {
                    let monitor_name = self
                        .name_generator
                        .generate(&monitor_prefix, &el.spec.triggers)?;
                    let monitor_trigger = self.build_monitor(
                        webhook,
                        pull_task,
                        &monitor_name,
                        &monitor_binding,
                        monitor_ext,
                    );
                    el.spec.triggers.push(monitor_trigger);
                } else {
                    debug!(
                        "monitor {} already covers repository {}",
                        existing_monitor.as_deref().unwrap_or_default(),
                        webhook.git_repository_url
                    );
                }

                let trigger_count = el.spec.triggers.len();
                if let Err(e) = self.triggers.update(el).await {
                    return Err(self.rollback_bindings(e, &created_bindings).await);
                }
                EVENTLISTENER_TRIGGERS.set(trigger_count as i64);
                Ok(RegisterOutcome::TriggersAppended)
            },
        }
    }

    /// Remove the registration's push/pull-request triggers, keeping the
    /// repository's monitor trigger only while other registrations still
    /// reference the repository. Deletes the collection when it empties.
    pub async fn deregister(&self, webhook: &WebhookRegistration) -> Result<DeregisterOutcome> {
        let _timer = RECONCILE_DURATION.start_timer();

        let prefix = webhook.trigger_prefix();
        debug!("deleting triggers for {} from the eventlistener", prefix);

        let Some(el) = self.triggers.get().await? else {
            return Err(WebhookError::Collaborator(
                "eventlistener does not exist".to_string(),
            ));
        };

        let repo = GitRepoId::parse(&webhook.git_repository_url)?;
        let monitor_binding =
            monitor_binding_name(&webhook.git_repository_url, &webhook.pull_task)?;
        let to_remove = [
            format!("{}-push-event", prefix),
            format!("{}-pullrequest-event", prefix),
        ];

        let monitor_name = find_monitor(
            &repo.monitor_prefix(),
            &webhook.git_repository_url,
            &el.spec.triggers,
        )
        .map(|t| t.name.clone());

        let mut kept: Vec<Trigger> = Vec::new();
        let mut monitor_trigger: Option<Trigger> = None;
        let mut monitor_ext_binding: Option<String> = None;
        let mut bindings_to_remove: HashSet<String> = HashSet::new();
        let mut triggers_on_repo = 0usize;
        let mut triggers_deleted = 0usize;

        for trigger in el.spec.triggers.iter() {
            if monitor_name.as_deref() == Some(trigger.name.as_str()) {
                for binding in &trigger.bindings {
                    if binding
                        .reference
                        .starts_with(&format!("wext-{}-", monitor_binding))
                    {
                        monitor_ext_binding = Some(binding.reference.clone());
                    }
                }
                monitor_trigger = Some(trigger.clone());
                continue;
            }

            if let Some(url) = trigger.repository_url()
                && GitRepoId::compare(url, &webhook.git_repository_url).unwrap_or(false)
            {
                triggers_on_repo += 1;
            }

            if to_remove.contains(&trigger.name) {
                triggers_deleted += 1;
                for binding in &trigger.bindings {
                    if binding
                        .reference
                        .starts_with(&format!("wext-{}-", webhook.name))
                    {
                        bindings_to_remove.insert(binding.reference.clone());
                    }
                }
            } else {
                kept.push(trigger.clone());
            }
        }

        if triggers_on_repo > triggers_deleted {
            // Other registrations still reference this repository.
            if let Some(monitor) = monitor_trigger {
                kept.push(monitor);
            }
        } else if let Some(binding) = monitor_ext_binding {
            bindings_to_remove.insert(binding);
        }

        let outcome = if kept.is_empty() {
            self.triggers.delete().await?;
            EVENTLISTENER_TRIGGERS.set(0);
            info!("last trigger removed, eventlistener deleted");
            DeregisterOutcome::CollectionDeleted
        } else {
            let mut updated = el;
            updated.spec.triggers = kept;
            let trigger_count = updated.spec.triggers.len();
            self.triggers.update(updated).await?;
            EVENTLISTENER_TRIGGERS.set(trigger_count as i64);
            DeregisterOutcome::TriggersRemoved
        };

        // The collection no longer references these bindings; failures here
        // leave unreferenced bindings behind and are surfaced so the caller
        // can retry.
        let mut failures = Vec::new();
        for binding in &bindings_to_remove {
            if let Err(e) = self.bindings.delete(binding).await {
                error!("error deleting triggerbinding {}: {}", binding, e);
                failures.push(format!("{}: {}", binding, e));
            }
        }
        if !failures.is_empty() {
            return Err(WebhookError::Collaborator(format!(
                "triggers removed but binding cleanup failed for {}",
                failures.join(", ")
            )));
        }

        Ok(outcome)
    }

    /// Roll back the collection itself; used by the service when a step
    /// after collection creation fails (network provisioning, provider
    /// registration on the very first webhook).
    pub async fn delete_collection(&self) -> Result<()> {
        self.triggers.delete().await?;
        EVENTLISTENER_TRIGGERS.set(0);
        Ok(())
    }

    fn build_monitor(
        &self,
        webhook: &WebhookRegistration,
        pull_task: &str,
        name: &str,
        monitor_binding: &str,
        monitor_ext_binding: &str,
    ) -> Trigger {
        build_trigger(
            TriggerKind::Monitor,
            name,
            monitor_binding,
            monitor_ext_binding,
            &format!("{}-template", pull_task),
            &webhook.git_repository_url,
            &webhook.access_token_ref,
            &self.install_namespace,
        )
    }

    /// Best-effort compensating deletes for bindings created in this call,
    /// folding any cleanup failure into the original error.
    async fn rollback_bindings(&self, original: WebhookError, created: &[String]) -> WebhookError {
        let mut cleanup_failures = Vec::new();
        for binding in created {
            if let Err(e) = self.bindings.delete(binding).await {
                error!("failed to roll back binding {}: {}", binding, e);
                cleanup_failures.push(format!("{}: {}", binding, e));
            }
        }
        if cleanup_failures.is_empty() {
            original
        } else {
            original.with_cleanup_failure(cleanup_failures.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::fake::FakeCluster;
    use crate::triggers::test_support::FixedNameGenerator;
    use std::sync::atomic::Ordering;

    fn registration(name: &str, namespace: &str, pipeline: &str, url: &str) -> WebhookRegistration {
        WebhookRegistration {
            name: name.to_string(),
            namespace: namespace.to_string(),
            git_repository_url: url.to_string(),
            access_token_ref: "github-secret".to_string(),
            pipeline: pipeline.to_string(),
            pull_task: DEFAULT_PULL_TASK.to_string(),
            ..Default::default()
        }
    }

    fn reconciler(cluster: &Arc<FakeCluster>, suffix: u32) -> Reconciler {
        Reconciler::new(
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            Box::new(FixedNameGenerator(suffix)),
            "tekton-pipelines",
        )
    }

    #[tokio::test]
    async fn test_first_registration_creates_collection_with_three_triggers() {
        let cluster = Arc::new(FakeCluster::new());
        let reconciler = reconciler(&cluster, 1234);
        let webhook = registration(
            "go-hello-world",
            "green",
            "simple-pipeline",
            "https://github.com/ncskier/go-hello-world",
        );

        let outcome = reconciler.register(&webhook).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::CollectionCreated);

        let names = cluster.trigger_names();
        assert_eq!(
            names,
            vec![
                "go-hello-world-green-push-event",
                "go-hello-world-green-pullrequest-event",
                "ncskier.go-hello-world-1234",
            ]
        );
        // One hook binding plus one monitor binding.
        assert_eq!(cluster.binding_names().len(), 2);
    }

    #[tokio::test]
    async fn test_second_registration_reuses_monitor() {
        let cluster = Arc::new(FakeCluster::new());
        let url = "https://github.com/ncskier/go-hello-world";
        let first = registration("go-hello-world", "green", "simple-pipeline", url);
        let second = registration("other-hook", "blue", "other-pipeline", url);

        reconciler(&cluster, 1234).register(&first).await.unwrap();
        let outcome = reconciler(&cluster, 5678).register(&second).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::TriggersAppended);

        let names = cluster.trigger_names();
        assert_eq!(names.len(), 5);
        assert!(names.contains(&"other-hook-blue-push-event".to_string()));
        assert!(names.contains(&"other-hook-blue-pullrequest-event".to_string()));

        let monitors: Vec<_> = names
            .iter()
            .filter(|n| n.starts_with("ncskier.go-hello-world-"))
            .collect();
        assert_eq!(monitors, vec!["ncskier.go-hello-world-1234"]);

        // Second registration created only its hook binding.
        assert_eq!(cluster.binding_names().len(), 3);
    }

    #[tokio::test]
    async fn test_exactly_one_monitor_after_many_registrations() {
        let cluster = Arc::new(FakeCluster::new());
        let url = "https://github.com/Owner/Repo";
        for i in 0u32..5 {
            let webhook = registration(
                &format!("hook-{}", i),
                "ns",
                &format!("pipeline-{}", i),
                url,
            );
            reconciler(&cluster, 1000 + i).register(&webhook).await.unwrap();
        }

        let monitors: Vec<_> = cluster
            .trigger_names()
            .into_iter()
            .filter(|n| n.starts_with("owner.repo-"))
            .collect();
        assert_eq!(monitors.len(), 1);
        assert_eq!(cluster.trigger_names().len(), 11);
    }

    #[tokio::test]
    async fn test_distinct_repositories_get_distinct_monitors() {
        let cluster = Arc::new(FakeCluster::new());
        let first = registration(
            "hook-a",
            "ns",
            "pipeline-a",
            "https://github.com/owner/repo-a",
        );
        let second = registration(
            "hook-b",
            "ns",
            "pipeline-b",
            "https://github.com/owner/repo-b",
        );

        reconciler(&cluster, 1).register(&first).await.unwrap();
        reconciler(&cluster, 2).register(&second).await.unwrap();

        let names = cluster.trigger_names();
        assert!(names.contains(&"owner.repo-a-1".to_string()));
        assert!(names.contains(&"owner.repo-b-2".to_string()));
        assert_eq!(names.len(), 6);
    }

    #[tokio::test]
    async fn test_deregister_removes_exactly_own_triggers_and_keeps_monitor() {
        let cluster = Arc::new(FakeCluster::new());
        let url = "https://github.com/ncskier/go-hello-world";
        let first = registration("go-hello-world", "green", "simple-pipeline", url);
        let second = registration("other-hook", "blue", "other-pipeline", url);
        reconciler(&cluster, 1234).register(&first).await.unwrap();
        reconciler(&cluster, 5678).register(&second).await.unwrap();

        let outcome = reconciler(&cluster, 0).deregister(&first).await.unwrap();
        assert_eq!(outcome, DeregisterOutcome::TriggersRemoved);

        let names = cluster.trigger_names();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"other-hook-blue-push-event".to_string()));
        assert!(names.contains(&"other-hook-blue-pullrequest-event".to_string()));
        assert!(names.contains(&"ncskier.go-hello-world-1234".to_string()));

        // The removed registration's hook binding is gone; the monitor
        // binding and the other registration's binding remain.
        let bindings = cluster.binding_names();
        assert_eq!(bindings.len(), 2);
        assert!(!bindings.iter().any(|b| b.starts_with("wext-go-hello-world-")));
    }

    #[tokio::test]
    async fn test_deregister_last_registration_deletes_collection() {
        let cluster = Arc::new(FakeCluster::new());
        let webhook = registration(
            "go-hello-world",
            "green",
            "simple-pipeline",
            "https://github.com/ncskier/go-hello-world",
        );
        reconciler(&cluster, 1234).register(&webhook).await.unwrap();

        let outcome = reconciler(&cluster, 0).deregister(&webhook).await.unwrap();
        assert_eq!(outcome, DeregisterOutcome::CollectionDeleted);
        assert!(cluster.listener.lock().unwrap().is_none());
        assert!(cluster.binding_names().is_empty());
    }

    #[tokio::test]
    async fn test_deregister_respects_case_insensitive_repo_identity() {
        let cluster = Arc::new(FakeCluster::new());
        let first = registration(
            "hook-a",
            "ns",
            "pipeline-a",
            "https://github.com/Owner/Repo",
        );
        let second = registration(
            "hook-b",
            "ns",
            "pipeline-b",
            "https://GITHUB.com/owner/repo",
        );
        reconciler(&cluster, 1).register(&first).await.unwrap();
        reconciler(&cluster, 2).register(&second).await.unwrap();

        // Deleting one keeps the shared monitor despite URL case differing.
        reconciler(&cluster, 0).deregister(&first).await.unwrap();
        let names = cluster.trigger_names();
        assert!(names.iter().any(|n| n.starts_with("owner.repo-")));

        reconciler(&cluster, 0).deregister(&second).await.unwrap();
        assert!(cluster.listener.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_monitor_binding_create_failure_rolls_back_hook_binding() {
        let cluster = Arc::new(FakeCluster::new());
        let webhook = registration(
            "go-hello-world",
            "green",
            "simple-pipeline",
            "https://github.com/ncskier/go-hello-world",
        );

        // The hook binding create succeeds, the monitor binding create
        // fails, and the hook binding is rolled back.
        cluster.fail_binding_create_after.store(1, Ordering::SeqCst);
        let err = reconciler(&cluster, 1).register(&webhook).await.unwrap_err();
        assert!(matches!(err, WebhookError::Collaborator(_)));
        assert!(cluster.binding_names().is_empty());
        assert!(cluster.listener.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listener_update_failure_rolls_back_created_bindings() {
        let cluster = Arc::new(FakeCluster::new());
        let url = "https://github.com/ncskier/go-hello-world";
        let first = registration("go-hello-world", "green", "simple-pipeline", url);
        reconciler(&cluster, 1234).register(&first).await.unwrap();
        let bindings_before = cluster.binding_names().len();

        cluster.fail_listener_update.store(true, Ordering::SeqCst);
        let second = registration("other-hook", "blue", "other-pipeline", url);
        let err = reconciler(&cluster, 5678)
            .register(&second)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Collaborator(_)));

        // The failed registration's hook binding was rolled back.
        assert_eq!(cluster.binding_names().len(), bindings_before);
        assert_eq!(cluster.trigger_names().len(), 3);
    }
}
