//! The dynamic provider: discovery, configuration and dispatch.
//!
//! A [`DynamicProvider`] is built from the resource types a Skiff server
//! reports at startup. Each discovered type is translated exactly once,
//! eagerly, before any concurrent dispatch begins; types whose descriptors
//! conflict are excluded wholesale and their diagnostics surfaced with the
//! schema response. CRUD calls are routed to per-type
//! [`InstanceController`]s, which exist only once a store has been attached
//! by `configure`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::resource::InstanceController;
use crate::schema::{
    translate, Attribute, AttributeFlags, AttributeType, Diagnostic, ProviderSchema,
    ResourceSchema, TranslatedSchema,
};
use crate::server::ProviderService;
use crate::store::{HttpStore, InstanceStore, ResourceMeta};
use crate::types::{AttributeChange, ImportedResource, PlanResult};
use crate::validation;

/// Default Skiff API endpoint when neither configuration nor environment
/// supplies one.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8090/api";

/// Environment variable overriding the API endpoint.
pub const ENDPOINT_ENV: &str = "SKIFF_ENDPOINT";

/// Environment variable supplying the API key.
pub const API_KEY_ENV: &str = "SKIFF_API_KEY";

/// The name of the data source listing discovered resource types.
pub const RESOURCES_DATA_SOURCE: &str = "resources";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolved connection settings for the Skiff server.
///
/// Resolution precedence is configuration value, then environment variable,
/// then default. The value is threaded explicitly into store construction;
/// there is no process-wide singleton.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the Skiff server API.
    pub endpoint: String,
    /// Bearer token, if any.
    pub api_key: Option<String>,
    /// Per-request deadline.
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Resolve from the environment alone (used at discovery time, before
    /// any configuration has been received).
    pub fn from_env() -> Self {
        Self::resolve(&Value::Null)
    }

    /// Resolve from a configuration record, falling back to the environment
    /// and then the default endpoint.
    pub fn resolve(config: &Value) -> Self {
        let endpoint = config
            .get("endpoint")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .or_else(|| std::env::var(ENDPOINT_ENV).ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let api_key = config
            .get("api_key")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|s| !s.is_empty()));
        Self {
            endpoint,
            api_key,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Open an HTTP store for these settings.
    pub fn open_store(&self) -> Result<HttpStore, ProviderError> {
        HttpStore::new(&self.endpoint, self.api_key.clone(), self.request_timeout)
    }
}

/// A provider whose resource schemas are discovered at runtime.
pub struct DynamicProvider {
    version: String,
    schemas: HashMap<String, Arc<TranslatedSchema>>,
    schema_diagnostics: Vec<Diagnostic>,
    // None until a store is attached at configure time.
    controllers: RwLock<Option<HashMap<String, Arc<InstanceController>>>>,
}

impl std::fmt::Debug for DynamicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicProvider")
            .field("version", &self.version)
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("schema_diagnostics", &self.schema_diagnostics)
            .field("configured", &self.controllers.read().is_ok())
            .finish()
    }
}

impl DynamicProvider {
    /// Build a provider from discovered resource metadata. Every type is
    /// translated here, once; a type with naming conflicts is excluded
    /// entirely and its diagnostics retained for the schema response.
    pub fn new(version: impl Into<String>, metas: Vec<ResourceMeta>) -> Self {
        let mut schemas = HashMap::new();
        let mut schema_diagnostics = Vec::new();
        for meta in metas {
            match translate(&meta.name, &meta.attributes) {
                Ok(translated) => {
                    schemas.insert(meta.name.clone(), Arc::new(translated));
                }
                Err(ProviderError::SchemaConflict {
                    resource_type,
                    diagnostics,
                }) => {
                    tracing::warn!(
                        resource_type = %resource_type,
                        conflicts = diagnostics.len(),
                        "resource type disabled: schema translation failed"
                    );
                    schema_diagnostics.extend(diagnostics);
                }
                Err(err) => {
                    schema_diagnostics.push(Diagnostic::error(err.to_string()));
                }
            }
        }
        Self {
            version: version.into(),
            schemas,
            schema_diagnostics,
            controllers: RwLock::new(None),
        }
    }

    /// Discover resource types from the server and build the provider.
    pub async fn discover(
        version: impl Into<String>,
        store: &dyn InstanceStore,
    ) -> Result<Self, ProviderError> {
        let metas = store.list_resource_types().await?;
        tracing::info!(resource_types = metas.len(), "discovered resource types");
        Ok(Self::new(version, metas))
    }

    /// The provider version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Attach an instance store, building one controller per available
    /// resource type. Called by `configure`; tests attach a
    /// [`crate::testing::MemoryStore`] directly.
    pub fn attach_store(&self, store: Arc<dyn InstanceStore>) {
        let mut controllers = HashMap::with_capacity(self.schemas.len());
        for (name, translated) in &self.schemas {
            controllers.insert(
                name.clone(),
                Arc::new(InstanceController::new(
                    name.clone(),
                    Arc::clone(translated),
                    Arc::clone(&store),
                )),
            );
        }
        *self
            .controllers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(controllers);
    }

    fn controller(&self, resource_type: &str) -> Result<Arc<InstanceController>, ProviderError> {
        let controllers = self
            .controllers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(controllers) = controllers.as_ref() else {
            return Err(ProviderError::NotConfigured(
                "no instance store is attached; ensure the provider block is present and valid"
                    .to_string(),
            ));
        };
        controllers
            .get(resource_type)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn config_schema() -> ResourceSchema {
        ResourceSchema::new()
            .with_description("Manage resource instances on a running Skiff server.")
            .with_attribute(
                "endpoint",
                Attribute::optional_string().with_description(format!(
                    "Base URL of the Skiff server API (e.g. {}). \
                     Can also be set via the {} environment variable.",
                    DEFAULT_ENDPOINT, ENDPOINT_ENV
                )),
            )
            .with_attribute(
                "api_key",
                Attribute::optional_string().sensitive().with_description(format!(
                    "API key (bearer token) for authenticating with the Skiff server. \
                     Can also be set via the {} environment variable.",
                    API_KEY_ENV
                )),
            )
    }

    fn resources_data_source_schema() -> ResourceSchema {
        ResourceSchema::new()
            .with_description("Lists the resource types exposed by the Skiff server.")
            .with_attribute(
                "names",
                Attribute::new(
                    AttributeType::list(AttributeType::String),
                    AttributeFlags::computed(),
                )
                .with_description("Resource type names, sorted."),
            )
    }
}

/// Field-level diff between two records, honouring the schema's computed and
/// force-new markers.
fn diff_records(
    schema: &ResourceSchema,
    prior: &Value,
    proposed: &Value,
) -> (Vec<AttributeChange>, bool) {
    let empty = serde_json::Map::new();
    let prior_map = prior.as_object().unwrap_or(&empty);
    let proposed_map = proposed.as_object().unwrap_or(&empty);

    let mut changes = Vec::new();
    let mut requires_replace = false;
    let paths: BTreeSet<&String> = prior_map.keys().chain(proposed_map.keys()).collect();
    for path in paths {
        let before = prior_map.get(path.as_str());
        let after = proposed_map.get(path.as_str());
        if before == after {
            continue;
        }
        if let Some(attr) = schema.attributes.get(path.as_str()) {
            // Computed-only attributes change server-side; they are not part
            // of the plannable diff.
            if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
                continue;
            }
            if attr.force_new {
                requires_replace = true;
            }
        }
        changes.push(AttributeChange::new(
            path.as_str(),
            before.cloned().filter(|v| !v.is_null()),
            after.cloned().filter(|v| !v.is_null()),
        ));
    }
    (changes, requires_replace)
}

#[async_trait::async_trait]
impl ProviderService for DynamicProvider {
    fn schema(&self) -> ProviderSchema {
        let mut provider_schema =
            ProviderSchema::new().with_provider_config(Self::config_schema());
        for (name, translated) in &self.schemas {
            provider_schema = provider_schema.with_resource(name.clone(), translated.schema.clone());
        }
        provider_schema
            .with_data_source(RESOURCES_DATA_SOURCE, Self::resources_data_source_schema())
    }

    fn schema_diagnostics(&self) -> Vec<Diagnostic> {
        self.schema_diagnostics.clone()
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validation::validate(&Self::config_schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let resolved = ProviderConfig::resolve(&config);
        let store = resolved.open_store()?;
        tracing::info!(
            version = %self.version,
            endpoint = %resolved.endpoint,
            "provider configured"
        );
        self.attach_store(Arc::new(store));
        Ok(vec![])
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match self.schemas.get(resource_type) {
            Some(translated) => Ok(validation::validate(&translated.schema, &config)),
            None => Err(ProviderError::UnknownResource(resource_type.to_string())),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let translated = self
            .schemas
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))?;

        if proposed_state.is_null() {
            // Destroy plan.
            return Ok(PlanResult::no_change(Value::Null));
        }

        let prior = prior_state.unwrap_or(Value::Null);
        let is_update = !prior.is_null();
        let (changes, replace) = diff_records(&translated.schema, &prior, &proposed_state);
        Ok(PlanResult::with_changes(
            proposed_state,
            changes,
            replace && is_update,
        ))
    }

    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        Ok(self.controller(resource_type)?.create(&planned_state).await?)
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.controller(resource_type)?.read(&current_state).await
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.controller(resource_type)?
            .update(&prior_state, &planned_state)
            .await
    }

    async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.controller(resource_type)?.delete(&current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let record = self.controller(resource_type)?.import(id)?;
        Ok(vec![ImportedResource::new(resource_type, record)])
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        _config: Value,
    ) -> Result<Value, ProviderError> {
        if data_source_type != RESOURCES_DATA_SOURCE {
            return Err(ProviderError::UnknownResource(data_source_type.to_string()));
        }
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        Ok(json!({ "names": names }))
    }
}
