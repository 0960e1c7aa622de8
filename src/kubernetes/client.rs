use anyhow::{Context, anyhow};
use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::Request;
use kube::discovery::{Discovery, Scope, verbs};
use kube::{Api, Client, Config, Resource};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::discovery::ResourceKind;
use super::openapi;
use super::source::{ListRequest, Page, ResourceSource, SchemaDocument};
use crate::config::ConnectorConfig;
use crate::error::{Error, Result, SourceError};

/// [`ResourceSource`] backed by a live Kubernetes API server
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl KubeSource {
    /// Connect using the kubeconfig context named in the configuration
    /// (or the kubeconfig's current context)
    pub async fn connect(config: &ConnectorConfig) -> Result<Self> {
        // Already installed is fine
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let client = build_client(config)
            .await
            .map_err(|e| Error::SourceUnavailable(format!("{:#}", e)))?;

        Ok(Self::from_client(client, config))
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, config: &ConnectorConfig) -> Self {
        Self {
            client,
            max_retries: config.max_retries.max(1),
            retry_base_delay: config.retry_base_delay(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Collection URL of a kind, namespaced when the kind and request allow it
    fn collection_url(kind: &ResourceKind, namespace: Option<&str>) -> String {
        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &kind.plural);
        let namespace = namespace.filter(|_| kind.namespaced);
        DynamicObject::url_path(&ar, namespace)
    }

    /// Fetch a single page as raw JSON, retrying transient failures with
    /// exponential backoff
    ///
    /// Items are not decoded into typed objects here, so one malformed object
    /// does not fail the whole page.
    async fn list_page_with_retry(
        &self,
        url: &str,
        params: &ListParams,
        table: &str,
    ) -> std::result::Result<serde_json::Value, SourceError> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            let request = Request::new(url)
                .list(params)
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;

            match self.client.request::<serde_json::Value>(request).await {
                Ok(list) => return Ok(list),
                Err(e) => {
                    if is_retryable_error(&e) {
                        let delay = backoff_delay(self.retry_base_delay, attempt);
                        warn!(
                            table = %table,
                            attempt = attempt + 1,
                            max_attempts = self.max_retries,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Retryable error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        last_error = Some(e);
                    } else {
                        debug!(table = %table, error = %e, "Non-retryable error");
                        return Err(to_source_error(e));
                    }
                }
            }
        }

        Err(SourceError::Unavailable(format!(
            "failed after {} attempts: {}",
            self.max_retries,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Schema published through the aggregated OpenAPI v3 document of the
    /// kind's group/version
    async fn openapi_schema(
        &self,
        kind: &ResourceKind,
    ) -> std::result::Result<Option<SchemaDocument>, SourceError> {
        let path = if kind.group.is_empty() {
            format!("/openapi/v3/api/{}", kind.version)
        } else {
            format!("/openapi/v3/apis/{}/{}", kind.group, kind.version)
        };

        let request = http::Request::get(&path)
            .body(Vec::new())
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        let document: serde_json::Value = match self.client.request(request).await {
            Ok(doc) => doc,
            Err(kube::Error::Api(ref err)) if err.code == 404 => {
                debug!(path = %path, "No OpenAPI v3 document published");
                return Ok(None);
            }
            Err(e) => return Err(to_source_error(e)),
        };

        Ok(openapi::extract_kind_schema(
            &document,
            &kind.group,
            &kind.version,
            &kind.kind,
        ))
    }

    /// Schema from the CustomResourceDefinition object, if the kind is a CRD
    async fn crd_schema(
        &self,
        kind: &ResourceKind,
    ) -> std::result::Result<Option<SchemaDocument>, SourceError> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let name = format!("{}.{}", kind.plural, kind.group);

        let crd = match crds.get_opt(&name).await {
            Ok(Some(crd)) => crd,
            Ok(None) => return Ok(None),
            // Not allowed to read CRDs is treated like an unpublished schema
            Err(kube::Error::Api(ref err)) if err.code == 403 => {
                debug!(crd = %name, "Not permitted to read CRD");
                return Ok(None);
            }
            Err(e) => return Err(to_source_error(e)),
        };

        let schema = crd
            .spec
            .versions
            .iter()
            .find(|v| v.name == kind.version)
            .and_then(|v| v.schema.as_ref())
            .and_then(|s| s.open_api_v3_schema.as_ref());

        match schema {
            Some(props) => {
                let root = serde_json::to_value(props)
                    .map_err(|e| SourceError::Malformed(e.to_string()))?;
                Ok(Some(SchemaDocument::new(root)))
            }
            None => Ok(None),
        }
    }
}

async fn build_client(config: &ConnectorConfig) -> anyhow::Result<Client> {
    let kubeconfig = Kubeconfig::read().context("Failed to read kubeconfig")?;

    let context_name = config
        .context
        .clone()
        .or_else(|| kubeconfig.current_context.clone())
        .ok_or_else(|| anyhow!("No context specified and no current context in kubeconfig"))?;

    if !kubeconfig.contexts.iter().any(|c| c.name == context_name) {
        return Err(anyhow!("Context '{}' not found in kubeconfig", context_name));
    }

    let mut kube_config = Config::from_custom_kubeconfig(
        kubeconfig,
        &KubeConfigOptions {
            context: Some(context_name.clone()),
            ..Default::default()
        },
    )
    .await
    .with_context(|| format!("Failed to load kubeconfig for context '{}'", context_name))?;

    kube_config.connect_timeout = Some(config.connect_timeout());
    kube_config.read_timeout = Some(config.read_timeout());

    let client = Client::try_from(kube_config)
        .with_context(|| format!("Failed to create client for context '{}'", context_name))?;

    info!(context = %context_name, "Connected to cluster");
    Ok(client)
}

#[async_trait]
impl ResourceSource for KubeSource {
    async fn list_resource_kinds(&self) -> std::result::Result<Vec<ResourceKind>, SourceError> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(to_source_error)?;

        let mut kinds = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                // Skip subresources (e.g., pods/log, pods/exec)
                if ar.plural.contains('/') {
                    continue;
                }
                if !caps.supports_operation(verbs::LIST) {
                    trace!(plural = %ar.plural, group = %ar.group, "Skipping unlistable resource");
                    continue;
                }
                kinds.push(ResourceKind::new(
                    ar.group.clone(),
                    ar.version.clone(),
                    ar.kind.clone(),
                    ar.plural.clone(),
                    matches!(caps.scope, Scope::Namespaced),
                ));
            }
        }

        Ok(kinds)
    }

    async fn schema_document(
        &self,
        kind: &ResourceKind,
    ) -> std::result::Result<Option<SchemaDocument>, SourceError> {
        if let Some(document) = self.openapi_schema(kind).await? {
            return Ok(Some(document));
        }
        if kind.group.is_empty() {
            return Ok(None);
        }
        self.crd_schema(kind).await
    }

    async fn list(&self, request: &ListRequest) -> std::result::Result<Page, SourceError> {
        let kind = &request.kind;
        let url = Self::collection_url(kind, request.namespace.as_deref());

        let mut params = ListParams::default();
        if let Some(limit) = request.limit {
            params = params.limit(limit);
        }
        if let Some(ref token) = request.continue_token {
            params = params.continue_token(token);
        }
        if let Some(ref label_sel) = request.filters.label_selector {
            params = params.labels(label_sel);
        }
        if let Some(ref field_sel) = request.filters.field_selector {
            params = params.fields(field_sel);
        }

        trace!(
            plural = %kind.plural,
            namespace = ?request.namespace,
            label_selector = ?request.filters.label_selector,
            field_selector = ?request.filters.field_selector,
            "Listing page"
        );

        let list = self
            .list_page_with_retry(&url, &params, &kind.plural)
            .await?;

        parse_list_response(list, kind)
    }
}

/// Split a raw list response into items and the next continuation token
///
/// List responses omit apiVersion and kind per item; they are filled in for
/// items that are objects. Other items are passed through for the record
/// stream to skip.
fn parse_list_response(
    list: serde_json::Value,
    kind: &ResourceKind,
) -> std::result::Result<Page, SourceError> {
    let serde_json::Value::Object(mut list) = list else {
        return Err(SourceError::Malformed("list response is not an object".to_string()));
    };

    let continue_token = list
        .get("metadata")
        .and_then(|m| m.get("continue"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(String::from);

    let items = match list.remove("items") {
        Some(serde_json::Value::Array(items)) => items,
        // An empty list is serialized with "items": null
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(_) => {
            return Err(SourceError::Malformed("list items are not an array".to_string()));
        }
    };

    let api_version = kind.api_version();
    let items = items
        .into_iter()
        .map(|mut item| {
            if let serde_json::Value::Object(ref mut map) = item {
                map.entry("apiVersion")
                    .or_insert_with(|| serde_json::Value::String(api_version.clone()));
                map.entry("kind")
                    .or_insert_with(|| serde_json::Value::String(kind.kind.clone()));
            }
            item
        })
        .collect();

    Ok(Page {
        items,
        continue_token,
    })
}

/// Exponential backoff: `base * 2^attempt`, saturating
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Check if an error is retryable (transient failures)
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::HyperError(_) => true,
        // 429 (rate limit), 503 (unavailable), 504 (timeout)
        kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
        _ => false,
    }
}

fn to_source_error(err: kube::Error) -> SourceError {
    match err {
        kube::Error::Api(ref api_err) if api_err.code == 410 => {
            SourceError::Expired(api_err.message.clone())
        }
        kube::Error::Api(ref api_err) if api_err.code == 404 => {
            SourceError::NotFound(api_err.message.clone())
        }
        kube::Error::SerdeError(e) => SourceError::Malformed(e.to_string()),
        other => SourceError::Unavailable(other.to_string()),
    }
}
