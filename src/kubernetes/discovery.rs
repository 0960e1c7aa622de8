// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Schema catalog: resource kinds exposed as (schema, table) pairs.
//!
//! Every discovered kind becomes one table. The schema is the API group
//! (`core` for the legacy core group) and the table is the lowercase plural,
//! e.g. `apps.deployments` or `core.pods`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::source::ResourceSource;
use crate::error::{Error, Result};

/// Schema name used for the core ("") API group
pub const CORE_SCHEMA: &str = "core";

/// A category of cluster object, backing one table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKind {
    /// API group (empty string for core v1)
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name used in API paths (e.g. "deployments")
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        plural: impl Into<String>,
        namespaced: bool,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            plural: plural.into(),
            namespaced,
        }
    }

    /// The core/v1 Namespace kind, used by the split planner
    pub fn namespaces() -> Self {
        Self::new("", "v1", "Namespace", "namespaces", false)
    }

    /// Get the full API group/version string
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Schema this kind's table lives in
    pub fn schema_name(&self) -> String {
        if self.group.is_empty() {
            CORE_SCHEMA.to_string()
        } else {
            self.group.to_lowercase()
        }
    }

    pub fn table_identity(&self) -> TableIdentity {
        TableIdentity::new(self.schema_name(), self.plural.to_lowercase())
    }
}

/// (schema, table) pair exposed to the engine
///
/// Equality and hashing only consider the two names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableIdentity {
    pub schema: String,
    pub table: String,
}

impl TableIdentity {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Registry of all discovered resource kinds
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    /// Resources indexed by table identity
    by_identity: BTreeMap<TableIdentity, ResourceKind>,
    /// (schema, alias) to table identity mapping
    alias_map: HashMap<(String, String), TableIdentity>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from kinds in the order the source reported them
    pub fn from_kinds(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        let mut registry = Self::new();
        for kind in kinds {
            registry.add(kind);
        }
        registry
    }

    /// Add a resource kind to the registry
    ///
    /// The first kind registered under a table identity wins; later ones
    /// (other versions of the same group/plural) are dropped. Returns whether
    /// the kind was added.
    pub fn add(&mut self, kind: ResourceKind) -> bool {
        let identity = kind.table_identity();
        if let Some(existing) = self.by_identity.get(&identity) {
            debug!(
                table = %identity,
                kept = %existing.api_version(),
                dropped = %kind.api_version(),
                "Duplicate table identity, keeping first discovered version"
            );
            return false;
        }

        // Lowercase kind name works as an alias unless it names another table
        let alias = kind.kind.to_lowercase();
        self.alias_map
            .entry((identity.schema.clone(), alias))
            .or_insert_with(|| identity.clone());
        // The table name itself always wins over an alias
        self.alias_map.insert(
            (identity.schema.clone(), identity.table.clone()),
            identity.clone(),
        );
        self.by_identity.insert(identity, kind);
        true
    }

    /// Look up a resource by schema and table name or alias (case-insensitive)
    pub fn get(&self, schema: &str, name: &str) -> Option<&ResourceKind> {
        let key = (schema.to_lowercase(), name.to_lowercase());
        let identity = self.alias_map.get(&key)?;
        self.by_identity.get(identity)
    }

    pub fn schemas(&self) -> BTreeSet<String> {
        self.by_identity.keys().map(|id| id.schema.clone()).collect()
    }

    /// Tables of one schema, sorted by name
    pub fn tables(&self, schema: &str) -> Vec<TableIdentity> {
        let schema = schema.to_lowercase();
        self.by_identity
            .keys()
            .filter(|id| id.schema == schema)
            .cloned()
            .collect()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ResourceKind> {
        self.by_identity.values()
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

/// Cached registry with timestamp
struct CachedRegistry {
    registry: Arc<ResourceRegistry>,
    discovered_at: Instant,
}

impl CachedRegistry {
    fn new(registry: ResourceRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            discovered_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.discovered_at.elapsed() > ttl
    }
}

/// Discovers resource kinds and answers catalog queries
///
/// The discovered registry is the only process-wide shared state of the
/// pipeline. It is read-mostly, refreshed when the TTL expires or after
/// [`invalidate`](Self::invalidate).
pub struct SchemaCatalog {
    source: Arc<dyn ResourceSource>,
    ttl: Duration,
    cached: RwLock<Option<CachedRegistry>>,
}

impl SchemaCatalog {
    pub fn new(source: Arc<dyn ResourceSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: RwLock::new(None),
        }
    }

    pub fn source(&self) -> &Arc<dyn ResourceSource> {
        &self.source
    }

    /// Current registry, discovering it if missing or expired
    pub async fn registry(&self) -> Result<Arc<ResourceRegistry>> {
        {
            let cached = self.cached.read().await;
            if let Some(cached) = cached.as_ref()
                && !cached.is_expired(self.ttl)
            {
                return Ok(Arc::clone(&cached.registry));
            }
        }
        self.discover(false).await
    }

    /// Rediscover unconditionally
    pub async fn refresh(&self) -> Result<Arc<ResourceRegistry>> {
        self.discover(true).await
    }

    async fn discover(&self, force: bool) -> Result<Arc<ResourceRegistry>> {
        let mut cached = self.cached.write().await;

        // Another caller may have refreshed while we waited for the lock
        if !force
            && let Some(existing) = cached.as_ref()
            && !existing.is_expired(self.ttl)
        {
            return Ok(Arc::clone(&existing.registry));
        }

        let start = Instant::now();
        let kinds = self.source.list_resource_kinds().await.map_err(|e| {
            warn!(error = %e, "Resource discovery failed");
            Error::SourceUnavailable(e.to_string())
        })?;
        let registry = ResourceRegistry::from_kinds(kinds);

        info!(
            tables = registry.len(),
            schemas = registry.schemas().len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Discovered resource kinds"
        );

        let entry = CachedRegistry::new(registry);
        let registry = Arc::clone(&entry.registry);
        *cached = Some(entry);
        Ok(registry)
    }

    /// Drop the cached registry; the next lookup rediscovers
    pub async fn invalidate(&self) {
        debug!("Invalidating discovered resource kinds");
        *self.cached.write().await = None;
    }

    pub async fn list_schemas(&self) -> Result<BTreeSet<String>> {
        Ok(self.registry().await?.schemas())
    }

    pub async fn list_tables(&self, schema: &str) -> Result<Vec<TableIdentity>> {
        Ok(self.registry().await?.tables(schema))
    }

    /// Resolve a table to its resource kind
    ///
    /// A miss against a cached registry triggers one rediscovery, so kinds
    /// installed after the last discovery are found.
    pub async fn get_table(&self, schema: &str, table: &str) -> Result<ResourceKind> {
        let registry = self.registry().await?;
        if let Some(kind) = registry.get(schema, table) {
            return Ok(kind.clone());
        }

        let registry = self.refresh().await?;
        registry
            .get(schema, table)
            .cloned()
            .ok_or_else(|| Error::SchemaNotFound {
                schema: schema.to_string(),
                table: table.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::memory::MemorySource;

    fn deployments_v1() -> ResourceKind {
        ResourceKind::new("apps", "v1", "Deployment", "deployments", true)
    }

    #[test]
    fn test_table_identity_core_group() {
        let pods = ResourceKind::new("", "v1", "Pod", "pods", true);
        assert_eq!(pods.table_identity(), TableIdentity::new("core", "pods"));
        assert_eq!(pods.api_version(), "v1");
    }

    #[test]
    fn test_table_identity_named_group() {
        let kind = deployments_v1();
        assert_eq!(kind.table_identity(), TableIdentity::new("apps", "deployments"));
        assert_eq!(kind.api_version(), "apps/v1");
        assert_eq!(kind.table_identity().to_string(), "apps.deployments");
    }

    #[test]
    fn test_table_identity_equality_by_value() {
        let a = deployments_v1().table_identity();
        let b = TableIdentity::new("apps".to_string(), "deployments".to_string());
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_registry_first_version_wins() {
        let mut registry = ResourceRegistry::new();
        assert!(registry.add(deployments_v1()));
        assert!(!registry.add(ResourceKind::new(
            "apps",
            "v1beta1",
            "Deployment",
            "deployments",
            true
        )));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("apps", "deployments").unwrap().version, "v1");
    }

    #[test]
    fn test_registry_kind_alias_and_case() {
        let registry = ResourceRegistry::from_kinds([deployments_v1()]);
        assert!(registry.get("apps", "deployment").is_some());
        assert!(registry.get("APPS", "Deployments").is_some());
        assert!(registry.get("core", "deployments").is_none());
    }

    #[test]
    fn test_registry_schemas_and_tables() {
        let registry = ResourceRegistry::from_kinds([
            ResourceKind::new("", "v1", "Pod", "pods", true),
            ResourceKind::new("", "v1", "Node", "nodes", false),
            deployments_v1(),
        ]);

        let schemas: Vec<_> = registry.schemas().into_iter().collect();
        assert_eq!(schemas, vec!["apps", "core"]);

        let tables = registry.tables("core");
        assert_eq!(
            tables,
            vec![
                TableIdentity::new("core", "nodes"),
                TableIdentity::new("core", "pods")
            ]
        );
    }

    #[tokio::test]
    async fn test_catalog_lists_schemas_and_tables() {
        let source = Arc::new(MemorySource::new().with_kind(deployments_v1()));
        let catalog = SchemaCatalog::new(source, Duration::from_secs(300));

        let schemas = catalog.list_schemas().await.unwrap();
        assert!(schemas.contains("apps"));
        assert!(schemas.contains("core"));

        let tables = catalog.list_tables("apps").await.unwrap();
        assert_eq!(tables, vec![TableIdentity::new("apps", "deployments")]);
    }

    #[tokio::test]
    async fn test_catalog_get_table_not_found() {
        let source = Arc::new(MemorySource::new());
        let catalog = SchemaCatalog::new(source, Duration::from_secs(300));

        let err = catalog.get_table("apps", "widgets").await.unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { .. }));
    }

    #[tokio::test]
    async fn test_catalog_discovery_failure_is_source_unavailable() {
        let source = Arc::new(MemorySource::new().failing_discovery());
        let catalog = SchemaCatalog::new(source, Duration::from_secs(300));

        let err = catalog.list_schemas().await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_catalog_caches_registry() {
        let source = Arc::new(MemorySource::new().with_kind(deployments_v1()));
        let catalog = SchemaCatalog::new(source.clone(), Duration::from_secs(300));

        catalog.list_schemas().await.unwrap();
        catalog.list_tables("apps").await.unwrap();
        assert_eq!(source.discovery_calls(), 1);

        catalog.invalidate().await;
        catalog.list_schemas().await.unwrap();
        assert_eq!(source.discovery_calls(), 2);
    }

    #[tokio::test]
    async fn test_catalog_miss_triggers_rediscovery() {
        let source = Arc::new(MemorySource::new());
        let catalog = SchemaCatalog::new(source.clone(), Duration::from_secs(300));
        catalog.list_schemas().await.unwrap();

        // Kind installed after the first discovery
        source.add_kind(deployments_v1());
        let kind = catalog.get_table("apps", "deployments").await.unwrap();
        assert_eq!(kind, deployments_v1());
        assert_eq!(source.discovery_calls(), 2);
    }
}
