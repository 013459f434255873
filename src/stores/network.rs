use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ObjectMeta, PostParams,
};
use kube::client::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::Defaults;
use crate::error::Result;
use crate::models::EVENT_LISTENER_SERVICE;
use crate::stores::{CertificateIssuer, NetworkProvisioner};

/// Provisions a `networking.k8s.io/v1` Ingress for the eventlistener
/// service, enabling TLS when the callback URL is https.
pub struct IngressProvisioner {
    client: Client,
    namespace: String,
    defaults: Defaults,
    issuer: Arc<dyn CertificateIssuer>,
}

impl IngressProvisioner {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        defaults: Defaults,
        issuer: Arc<dyn CertificateIssuer>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            defaults,
            issuer,
        }
    }

    fn ingresses(&self) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Certificate secret for the ingress host, creating it through the
    /// issuer when absent. Returns `None` when TLS cannot be enabled.
    async fn ensure_tls_secret(&self, host: &str) -> Option<String> {
        let secret_name = std::env::var("WEBHOOK_TLS_CERTIFICATE")
            .unwrap_or_else(|_| "cert-tekton-webhooks-eventlistener".to_string());

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        match secrets.get_opt(&secret_name).await {
            Ok(Some(_)) => return Some(secret_name),
            Ok(None) => {},
            Err(e) => {
                error!("failed checking for TLS secret {}: {}", secret_name, e);
                return None;
            },
        }

        let (cert, key) = match self.issuer.issue(host).await {
            Ok(pair) => pair,
            Err(e) => {
                error!("failed creating certificate for {}: {}", host, e);
                return None;
            },
        };

        let mut data = BTreeMap::new();
        data.insert("tls.crt".to_string(), ByteString(cert));
        data.insert("tls.key".to_string(), ByteString(key));
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(data),
            ..Default::default()
        };
        match secrets.create(&PostParams::default(), &secret).await {
            Ok(_) => Some(secret_name),
            Err(e) => {
                error!("failed creating TLS secret: {}", e);
                None
            },
        }
    }
}

#[async_trait]
impl NetworkProvisioner for IngressProvisioner {
    async fn create(&self) -> Result<()> {
        // Unlike webhook creation, the ingress host carries no protocol.
        let host = self.defaults.callback_host();

        let mut ingress = Ingress {
            metadata: ObjectMeta {
                name: Some(EVENT_LISTENER_SERVICE.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(host.clone()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: None,
                            path_type: "ImplementationSpecific".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: EVENT_LISTENER_SERVICE.to_string(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(8080),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        if self.defaults.callback_uses_tls() {
            match self.ensure_tls_secret(&host).await {
                Some(secret_name) => {
                    let spec = ingress.spec.get_or_insert_with(Default::default);
                    spec.tls = Some(vec![IngressTLS {
                        hosts: Some(vec![host]),
                        secret_name: Some(secret_name),
                    }]);
                },
                None => error!("Failed enabling TLS"),
            }
        }

        self.ingresses()
            .create(&PostParams::default(), &ingress)
            .await?;
        debug!("Ingress has been created");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.ingresses()
            .delete(EVENT_LISTENER_SERVICE, &DeleteParams::default())
            .await?;
        debug!("Ingress has been deleted");
        Ok(())
    }
}

/// Provisions an OpenShift Route on the eventlistener service when running
/// on that platform. Routes are not a resource this crate owns a type for,
/// so the dynamic API is used.
pub struct RouteProvisioner {
    client: Client,
    namespace: String,
}

impl RouteProvisioner {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn routes(&self) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("route.openshift.io", "v1", "Route");
        let resource = ApiResource::from_gvk(&gvk);
        Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
    }
}

#[async_trait]
impl NetworkProvisioner for RouteProvisioner {
    async fn create(&self) -> Result<()> {
        let gvk = GroupVersionKind::gvk("route.openshift.io", "v1", "Route");
        let resource = ApiResource::from_gvk(&gvk);

        let mut route = DynamicObject::new(EVENT_LISTENER_SERVICE, &resource);
        route.metadata.annotations = Some(BTreeMap::from([(
            "haproxy.router.openshift.io/timeout".to_string(),
            "2m".to_string(),
        )]));
        route.data = json!({
            "spec": {
                "to": {
                    "kind": "Service",
                    "name": EVENT_LISTENER_SERVICE,
                },
                "tls": {
                    "termination": "edge",
                    "insecureEdgeTerminationPolicy": "Redirect",
                },
            }
        });

        self.routes().create(&PostParams::default(), &route).await?;
        debug!("Route has been created");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.routes()
            .delete(EVENT_LISTENER_SERVICE, &DeleteParams::default())
            .await?;
        debug!("Route has been deleted");
        Ok(())
    }
}
