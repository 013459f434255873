use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, client::Client};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::ssl_verification_enabled;
use crate::error::{Result, WebhookError};
use crate::git::{GitProvider, GitRepoId, provider_and_api_url};
use crate::models::WebhookRegistration;
use crate::stores::GitProviderClient;

/// Registers and deregisters webhooks against the GitHub/GitLab REST APIs,
/// authenticating with the access token named by the registration.
pub struct HttpGitProviderClient {
    client: Client,
    namespace: String,
    http: reqwest::Client,
    callback_url: String,
}

struct ProviderToken {
    access_token: String,
    secret_token: String,
}

#[derive(Deserialize)]
struct GitHubHook {
    id: u64,
    config: GitHubHookConfig,
}

#[derive(Deserialize)]
struct GitHubHookConfig {
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct GitLabHook {
    id: u64,
    #[serde(default)]
    url: String,
}

impl HttpGitProviderClient {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tekton-webhooks")
            .danger_accept_invalid_certs(!ssl_verification_enabled())
            .build()
            .map_err(WebhookError::collaborator)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            http,
            callback_url: callback_url.into(),
        })
    }

    async fn token(&self, secret_ref: &str) -> Result<ProviderToken> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let secret = secrets.get(secret_ref).await.map_err(|e| {
            WebhookError::Collaborator(format!(
                "could not read access token secret {}: {}",
                secret_ref, e
            ))
        })?;
        let data = secret.data.unwrap_or_default();

        let read = |key: &str| {
            data.get(key)
                .map(|v| String::from_utf8_lossy(&v.0).to_string())
        };
        let access_token = read("accessToken").ok_or_else(|| {
            WebhookError::Collaborator(format!(
                "secret {} does not contain an accessToken entry",
                secret_ref
            ))
        })?;
        Ok(ProviderToken {
            access_token,
            secret_token: read("secretToken").unwrap_or_default(),
        })
    }

    fn gitlab_project_path(repo: &GitRepoId) -> String {
        format!("{}/{}", repo.owner, repo.repo).replace('/', "%2F")
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(WebhookError::Collaborator(format!(
            "{} failed with status {}: {}",
            action, status, body
        )))
    }
}

#[async_trait]
impl GitProviderClient for HttpGitProviderClient {
    async fn register_webhook(
        &self,
        webhook: &WebhookRegistration,
        repo: &GitRepoId,
    ) -> Result<()> {
        let (provider, api_url) = provider_and_api_url(&webhook.git_repository_url)?;
        let token = self.token(&webhook.access_token_ref).await?;

        match provider {
            GitProvider::GitHub => {
                let url = format!("{}repos/{}/{}/hooks", api_url, repo.owner, repo.repo);
                debug!("registering GitHub webhook via {}", url);
                let response = self
                    .http
                    .post(&url)
                    .header("Authorization", format!("token {}", token.access_token))
                    .json(&json!({
                        "name": "web",
                        "active": true,
                        "events": ["push", "pull_request"],
                        "config": {
                            "url": self.callback_url,
                            "content_type": "json",
                            "secret": token.secret_token,
                            "insecure_ssl": if ssl_verification_enabled() { "0" } else { "1" },
                        },
                    }))
                    .send()
                    .await
                    .map_err(WebhookError::collaborator)?;
                Self::check(response, "GitHub webhook creation").await?;
            },
            GitProvider::GitLab => {
                let url = format!(
                    "{}projects/{}/hooks",
                    api_url,
                    Self::gitlab_project_path(repo)
                );
                debug!("registering GitLab webhook via {}", url);
                let response = self
                    .http
                    .post(&url)
                    .header("PRIVATE-TOKEN", &token.access_token)
                    .json(&json!({
                        "url": self.callback_url,
                        "push_events": true,
                        "merge_requests_events": true,
                        "token": token.secret_token,
                        "enable_ssl_verification": ssl_verification_enabled(),
                    }))
                    .send()
                    .await
                    .map_err(WebhookError::collaborator)?;
                Self::check(response, "GitLab webhook creation").await?;
            },
        }

        info!(
            "webhook registered with provider for repository {}",
            repo.url()
        );
        Ok(())
    }

    async fn deregister_webhook(
        &self,
        webhook: &WebhookRegistration,
        repo: &GitRepoId,
    ) -> Result<()> {
        let (provider, api_url) = provider_and_api_url(&webhook.git_repository_url)?;
        let token = self.token(&webhook.access_token_ref).await?;

        match provider {
            GitProvider::GitHub => {
                let list_url = format!("{}repos/{}/{}/hooks", api_url, repo.owner, repo.repo);
                let hooks: Vec<GitHubHook> = self
                    .http
                    .get(&list_url)
                    .header("Authorization", format!("token {}", token.access_token))
                    .send()
                    .await
                    .map_err(WebhookError::collaborator)?
                    .json()
                    .await
                    .map_err(WebhookError::collaborator)?;

                let hook = hooks
                    .into_iter()
                    .find(|h| h.config.url == self.callback_url)
                    .ok_or_else(|| {
                        WebhookError::Collaborator(format!(
                            "no webhook pointing at {} found on {}",
                            self.callback_url,
                            repo.url()
                        ))
                    })?;

                let response = self
                    .http
                    .delete(format!("{}/{}", list_url, hook.id))
                    .header("Authorization", format!("token {}", token.access_token))
                    .send()
                    .await
                    .map_err(WebhookError::collaborator)?;
                Self::check(response, "GitHub webhook deletion").await?;
            },
            GitProvider::GitLab => {
                let list_url = format!(
                    "{}projects/{}/hooks",
                    api_url,
                    Self::gitlab_project_path(repo)
                );
                let hooks: Vec<GitLabHook> = self
                    .http
                    .get(&list_url)
                    .header("PRIVATE-TOKEN", &token.access_token)
                    .send()
                    .await
                    .map_err(WebhookError::collaborator)?
                    .json()
                    .await
                    .map_err(WebhookError::collaborator)?;

                let hook = hooks
                    .into_iter()
                    .find(|h| h.url == self.callback_url)
                    .ok_or_else(|| {
                        WebhookError::Collaborator(format!(
                            "no webhook pointing at {} found on {}",
                            self.callback_url,
                            repo.url()
                        ))
                    })?;

                let response = self
                    .http
                    .delete(format!("{}/{}", list_url, hook.id))
                    .header("PRIVATE-TOKEN", &token.access_token)
                    .send()
                    .await
                    .map_err(WebhookError::collaborator)?;
                Self::check(response, "GitLab webhook deletion").await?;
            },
        }

        info!(
            "webhook deregistered from provider for repository {}",
            repo.url()
        );
        Ok(())
    }
}
