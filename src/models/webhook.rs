use serde::{Deserialize, Serialize};

/// A user-requested binding of a Git repository to a pipeline.
///
/// Registrations are created and deleted, never mutated; "update" is
/// delete-and-recreate. Field names follow the JSON contract of the
/// registration API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "gitrepositoryurl")]
    pub git_repository_url: String,
    #[serde(rename = "accesstoken")]
    pub access_token_ref: String,
    pub pipeline: String,
    #[serde(rename = "serviceaccount", default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    #[serde(rename = "dockerregistry", default, skip_serializing_if = "String::is_empty")]
    pub docker_registry: String,
    #[serde(rename = "helmsecret", default, skip_serializing_if = "String::is_empty")]
    pub helm_secret: String,
    #[serde(rename = "releasename", default, skip_serializing_if = "String::is_empty")]
    pub release_name: String,
    #[serde(rename = "pulltask", default, skip_serializing_if = "String::is_empty")]
    pub pull_task: String,
    #[serde(rename = "onsuccesscomment", default, skip_serializing_if = "String::is_empty")]
    pub on_success_comment: String,
    #[serde(rename = "onfailurecomment", default, skip_serializing_if = "String::is_empty")]
    pub on_failure_comment: String,
    #[serde(rename = "ontimeoutcomment", default, skip_serializing_if = "String::is_empty")]
    pub on_timeout_comment: String,
    #[serde(rename = "onmissingcomment", default, skip_serializing_if = "String::is_empty")]
    pub on_missing_comment: String,
}

impl WebhookRegistration {
    /// Name prefix of the push/pull-request triggers derived from this
    /// registration.
    pub fn trigger_prefix(&self) -> String {
        format!("{}-{}", self.name, self.namespace)
    }
}

/// A stored Git access token, managed via the credentials endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    #[serde(rename = "accesstoken")]
    pub access_token: String,
    #[serde(rename = "secrettoken", default, skip_serializing_if = "String::is_empty")]
    pub secret_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_json_field_names() {
        let json = serde_json::json!({
            "name": "go-hello-world",
            "namespace": "green",
            "gitrepositoryurl": "https://github.com/ncskier/go-hello-world",
            "accesstoken": "github-secret",
            "pipeline": "simple-pipeline",
        });
        let reg: WebhookRegistration = serde_json::from_value(json).unwrap();
        assert_eq!(reg.name, "go-hello-world");
        assert_eq!(reg.access_token_ref, "github-secret");
        assert_eq!(reg.pull_task, "");
        assert_eq!(reg.trigger_prefix(), "go-hello-world-green");
    }

    #[test]
    fn test_registration_optional_fields_omitted_from_output() {
        let reg = WebhookRegistration {
            name: "hook".to_string(),
            namespace: "ns".to_string(),
            git_repository_url: "https://github.com/a/b".to_string(),
            access_token_ref: "token".to_string(),
            pipeline: "pipeline".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&reg).unwrap();
        assert!(value.get("dockerregistry").is_none());
        assert!(value.get("helmsecret").is_none());
    }
}
