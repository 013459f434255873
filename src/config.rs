use serde::{Deserialize, Serialize};

/// Server-side defaults surfaced on `GET /webhooks/defaults` and used to
/// fill in unset registration fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "dockerregistry")]
    pub docker_registry: String,
    #[serde(rename = "endpointurl")]
    pub callback_url: String,
}

impl Defaults {
    /// Load defaults from the environment. The install namespace falls back
    /// to `default` so a local run still comes up.
    pub fn from_env() -> Self {
        Self {
            namespace: std::env::var("INSTALLED_NAMESPACE").unwrap_or_else(|_| "default".to_string()),
            docker_registry: std::env::var("DOCKER_REGISTRY").unwrap_or_default(),
            callback_url: std::env::var("WEBHOOK_CALLBACK_URL").unwrap_or_default(),
        }
    }

    /// The ingress host is the callback URL without its scheme.
    pub fn callback_host(&self) -> String {
        self.callback_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string()
    }

    pub fn callback_uses_tls(&self) -> bool {
        self.callback_url.starts_with("https://")
    }
}

/// SSL verification for provider calls and pipeline parameters, disabled via
/// `SSL_VERIFICATION_ENABLED=false`.
pub fn ssl_verification_enabled() -> bool {
    !std::env::var("SSL_VERIFICATION_ENABLED")
        .map(|v| v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// `PLATFORM` being set selects OpenShift Route provisioning over Ingress.
pub fn platform_uses_routes() -> bool {
    std::env::var("PLATFORM").is_ok()
}
