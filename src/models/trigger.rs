use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the single shared eventlistener holding every trigger.
pub const EVENT_LISTENER_NAME: &str = "tekton-webhooks-eventlistener";

/// Service (and Route/Ingress) fronting the eventlistener.
pub const EVENT_LISTENER_SERVICE: &str = "el-tekton-webhooks-eventlistener";

/// Interceptor header carrying the registered repository URL.
pub const HEADER_REPOSITORY_URL: &str = "Wext-Repository-Url";
pub const HEADER_TRIGGER_NAME: &str = "Wext-Trigger-Name";
pub const HEADER_INCOMING_EVENT: &str = "Wext-Incoming-Event";
pub const HEADER_SECRET_NAME: &str = "Wext-Secret-Name";
pub const HEADER_INCOMING_ACTIONS: &str = "Wext-Incoming-Actions";

/// The shared trigger collection, persisted as a Tekton EventListener.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "triggers.tekton.dev",
    version = "v1alpha1",
    kind = "EventListener",
    namespaced
)]
pub struct EventListenerSpec {
    #[serde(rename = "serviceAccountName")]
    pub service_account_name: String,
    pub triggers: Vec<Trigger>,
}

/// A named parameter set referenced by one or more triggers.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "triggers.tekton.dev",
    version = "v1alpha1",
    kind = "TriggerBinding",
    namespaced
)]
pub struct TriggerBindingSpec {
    pub params: Vec<Param>,
}

/// Payload template referenced by triggers; its contents are opaque here.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "triggers.tekton.dev",
    version = "v1alpha1",
    kind = "TriggerTemplate",
    namespaced
)]
pub struct TriggerTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resourcetemplates: Option<serde_json::Value>,
}

/// A pipeline execution, listed and deleted during the optional purge step.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tekton.dev",
    version = "v1alpha1",
    kind = "PipelineRun",
    namespaced
)]
pub struct PipelineRunSpec {
    #[serde(rename = "pipelineRef", default, skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<PipelineRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineRef {
    pub name: String,
}

/// What a trigger routes: repository push events, pull-request events, or
/// the per-repository status-reporting monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Monitor,
}

/// One named event-route entry in the shared collection.
///
/// Triggers are constructed with exactly one interceptor; state read back
/// from the cluster is assumed to uphold this, and the accessor treats a
/// missing interceptor as malformed rather than indexing blindly.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Trigger {
    pub name: String,
    /// Explicit routing kind. Absent on state persisted by older releases,
    /// where it is recovered from the trigger name suffix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TriggerKind>,
    pub bindings: Vec<BindingRef>,
    pub template: TemplateRef,
    pub interceptors: Vec<Interceptor>,
}

impl Trigger {
    /// Routing kind, falling back to the wire naming convention
    /// (`-push-event` / `-pullrequest-event`) for pre-existing state.
    pub fn kind(&self) -> Option<TriggerKind> {
        if self.kind.is_some() {
            return self.kind;
        }
        if self.name.ends_with("-push-event") {
            Some(TriggerKind::Push)
        } else if self.name.ends_with("-pullrequest-event") {
            Some(TriggerKind::PullRequest)
        } else {
            // Monitors carry no reserved suffix; anything else in the
            // collection is one.
            Some(TriggerKind::Monitor)
        }
    }

    /// The trigger's sole interceptor, or `None` for malformed state.
    pub fn interceptor(&self) -> Option<&Interceptor> {
        self.interceptors.first()
    }

    /// Value of a filter header on the sole interceptor.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.interceptor()?
            .webhook
            .header
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Repository URL this trigger was registered for.
    pub fn repository_url(&self) -> Option<&str> {
        self.header(HEADER_REPOSITORY_URL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BindingRef {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(rename = "apiversion")]
    pub api_version: String,
}

impl BindingRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            reference: name.into(),
            api_version: "v1alpha1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TemplateRef {
    pub name: String,
    #[serde(rename = "apiversion")]
    pub api_version: String,
}

impl TemplateRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_version: "v1alpha1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Interceptor {
    pub webhook: WebhookInterceptor,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebhookInterceptor {
    pub header: Vec<Param>,
    #[serde(rename = "objectRef")]
    pub object_ref: InterceptorObjectRef,
}

/// Reference to the validator service invoked by the interceptor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InterceptorObjectRef {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
