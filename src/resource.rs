//! Per-resource-type instance lifecycle.
//!
//! An [`InstanceController`] owns the translated schema for one resource
//! type and orchestrates create/read/update/delete/import against the
//! remote instance store. On every operation it extracts configured values
//! for transmission and reconciles observed state back into the record
//! through the descriptor lookup table, so attributes the provider submitted
//! never appear to drift just because the server has not echoed them back
//! yet.
//!
//! Operations never mutate a record in place: each returns a freshly-built
//! record, so a cancelled call cannot leave partial local state behind.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::coerce::decode;
use crate::error::{CleanupError, CreateError, ProviderError};
use crate::schema::{AttrInfo, ResourceSchema, TranslatedSchema};
use crate::store::{InstanceStore, InstanceState};

/// Prefix for generated instance labels, marking instances this provider
/// created.
pub const LABEL_PREFIX: &str = "skf_";

/// Generate a collision-resistant instance label: the fixed prefix followed
/// by eight lowercase-hex characters of random entropy.
pub fn generate_label() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", LABEL_PREFIX, &hex[..8])
}

/// Read the fully-qualified identity out of a state record.
fn record_identity(record: &Value) -> Result<String, ProviderError> {
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            ProviderError::InvalidRequest("state record carries no id attribute".to_string())
        })
}

/// Controls all instances of one resource type.
pub struct InstanceController {
    resource_type: String,
    translated: Arc<TranslatedSchema>,
    store: Arc<dyn InstanceStore>,
}

impl InstanceController {
    /// Create a controller. The translated schema is built once, before any
    /// concurrent dispatch, and shared; the store handle is injected, not
    /// owned.
    pub fn new(
        resource_type: impl Into<String>,
        translated: Arc<TranslatedSchema>,
        store: Arc<dyn InstanceStore>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            translated,
            store,
        }
    }

    /// The resource type this controller is bound to.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The host-facing schema for this resource type.
    pub fn schema(&self) -> &ResourceSchema {
        &self.translated.schema
    }

    fn identity(&self, label: &str) -> String {
        format!("{}.{}", self.resource_type, label)
    }

    /// Create a new instance from a planned record.
    ///
    /// A fresh label is generated, the instance is created empty, and the
    /// configured attributes are submitted as an apply-now update. If
    /// extraction or the update fails after the instance exists, a
    /// best-effort destroy runs; when that destroy also fails the returned
    /// [`CreateError`] carries a separate [`CleanupError`] naming the
    /// orphaned instance.
    pub async fn create(&self, planned: &Value) -> Result<Value, CreateError> {
        let label = generate_label();
        let identity = self.identity(&label);

        self.store
            .create_instance(&identity)
            .await
            .map_err(CreateError::new)?;
        tracing::info!(resource_type = %self.resource_type, %identity, "created instance");

        let attributes = match self.extract_attributes(planned) {
            Ok(attributes) => attributes,
            Err(err) => return Err(self.destroy_after_failure(identity, err).await),
        };

        if !attributes.is_empty() {
            if let Err(err) = self
                .store
                .update_instance(&identity, attributes.clone(), true)
                .await
            {
                return Err(self.destroy_after_failure(identity, err).await);
            }
        }

        self.write_record(&identity, planned, Some(&attributes))
            .await
            .map_err(CreateError::new)
    }

    /// Best-effort destroy of a partially-created instance.
    async fn destroy_after_failure(&self, identity: String, error: ProviderError) -> CreateError {
        match self.store.destroy_instance(&identity, false).await {
            Ok(()) => {
                tracing::warn!(%identity, "destroyed instance after failed create");
                CreateError::new(error)
            }
            Err(cause) => CreateError {
                error: Box::new(error),
                cleanup: Some(CleanupError {
                    identity,
                    cause: Box::new(cause),
                }),
            },
        }
    }

    /// Refresh a record from the server. The fallback map is empty: only
    /// observed state is written back.
    pub async fn read(&self, prior: &Value) -> Result<Value, ProviderError> {
        let identity = record_identity(prior)?;
        self.write_record(&identity, prior, None).await
    }

    /// Apply a planned record to an existing instance, then re-read with the
    /// submitted values as reconciliation fallback.
    pub async fn update(&self, prior: &Value, planned: &Value) -> Result<Value, ProviderError> {
        let identity = record_identity(prior)?;
        let attributes = self.extract_attributes(planned)?;
        self.store
            .update_instance(&identity, attributes.clone(), true)
            .await?;
        tracing::info!(resource_type = %self.resource_type, %identity, "updated instance");
        self.write_record(&identity, planned, Some(&attributes)).await
    }

    /// Destroy an instance (non-forced). Any error is fatal and the caller's
    /// record is left untouched.
    pub async fn delete(&self, prior: &Value) -> Result<(), ProviderError> {
        let identity = record_identity(prior)?;
        self.store.destroy_instance(&identity, false).await?;
        tracing::info!(resource_type = %self.resource_type, %identity, "destroyed instance");
        Ok(())
    }

    /// Parse an import ID and seed a minimal record.
    ///
    /// Only `id` and `name` are seeded; full attribute population happens on
    /// the next read. IDs that are not of the form `"resource_type.label"`
    /// or that name a different resource type are rejected.
    pub fn import(&self, raw_id: &str) -> Result<Value, ProviderError> {
        let (resource_type, label) = raw_id
            .split_once('.')
            .filter(|(resource_type, label)| !resource_type.is_empty() && !label.is_empty())
            .ok_or_else(|| ProviderError::ImportFormat(raw_id.to_string()))?;

        if resource_type != self.resource_type {
            return Err(ProviderError::ResourceTypeMismatch {
                id: raw_id.to_string(),
                expected: self.resource_type.clone(),
                actual: resource_type.to_string(),
            });
        }

        Ok(json!({ "id": raw_id, "name": label }))
    }

    /// Merge freshly observed server state with locally-submitted values.
    ///
    /// The server wins for every key it reports. A non-read-only attribute
    /// absent from the server state takes its value from the fallback map
    /// when present there; read-only attributes are never backfilled, so
    /// their absence stays a typed null.
    pub fn reconcile(
        &self,
        server_state: InstanceState,
        fallback: Option<&InstanceState>,
    ) -> InstanceState {
        let mut merged = server_state;
        if let Some(fallback) = fallback {
            for info in &self.translated.infos {
                if info.read_only() || merged.contains_key(&info.remote_name) {
                    continue;
                }
                if let Some(value) = fallback.get(&info.remote_name) {
                    merged.insert(info.remote_name.clone(), value.clone());
                }
            }
        }
        merged
    }

    /// Fetch, reconcile and render the full record for an instance. The
    /// result starts from `base` (the planned or prior record) so fields the
    /// provider does not own, notably `name`, survive unchanged.
    async fn write_record(
        &self,
        identity: &str,
        base: &Value,
        fallback: Option<&InstanceState>,
    ) -> Result<Value, ProviderError> {
        let server_state = self.store.get_instance(identity).await?;
        let merged = self.reconcile(server_state, fallback);

        let mut record = base.as_object().cloned().unwrap_or_default();
        record.insert("id".to_string(), Value::String(identity.to_string()));

        // Top-level attributes.
        for info in &self.translated.infos {
            if info.block.is_some() {
                continue;
            }
            let value = merged.get(&info.remote_name).unwrap_or(&Value::Null);
            record.insert(info.field.clone(), decode(value, &info.tag).to_json());
        }

        // Blocks render as an object when any member has a value, and null
        // otherwise.
        for (block_name, members) in self.block_groups() {
            let mut fields = serde_json::Map::new();
            let mut has_value = false;
            for info in members {
                match merged.get(&info.remote_name).filter(|v| !v.is_null()) {
                    Some(value) => {
                        has_value = true;
                        fields.insert(info.field.clone(), decode(value, &info.tag).to_json());
                    }
                    None => {
                        fields.insert(info.field.clone(), Value::Null);
                    }
                }
            }
            record.insert(
                block_name.to_string(),
                if has_value { Value::Object(fields) } else { Value::Null },
            );
        }

        Ok(Value::Object(record))
    }

    /// Extract all non-read-only attributes from a planned record into the
    /// server's dotted-name representation. Extraction is total per
    /// attribute (shape mismatches degrade through the coercer), but a
    /// planned record that is not an object is an error.
    fn extract_attributes(&self, planned: &Value) -> Result<InstanceState, ProviderError> {
        let record = planned.as_object().ok_or_else(|| {
            ProviderError::InvalidRequest(format!(
                "planned state for {} is not an object",
                self.resource_type
            ))
        })?;

        let mut attributes = InstanceState::new();
        for info in &self.translated.infos {
            if info.read_only() {
                continue;
            }
            let raw = match &info.block {
                None => record.get(&info.field),
                Some(block) => record
                    .get(block)
                    .and_then(Value::as_object)
                    .and_then(|fields| fields.get(&info.field)),
            };
            let Some(raw) = raw else { continue };
            if raw.is_null() {
                continue;
            }
            let structured = decode(raw, &info.tag);
            if let Some(encoded) = crate::coerce::encode(&structured, &info.tag) {
                attributes.insert(info.remote_name.clone(), encoded);
            }
        }
        Ok(attributes)
    }

    fn block_groups(&self) -> HashMap<&str, Vec<&AttrInfo>> {
        let mut groups: HashMap<&str, Vec<&AttrInfo>> = HashMap::new();
        for info in &self.translated.infos {
            if let Some(block) = &info.block {
                groups.entry(block.as_str()).or_default().push(info);
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{translate, AttributeDescriptor};
    use crate::testing::MemoryStore;

    fn descriptor(name: &str, type_tag: &str) -> AttributeDescriptor {
        AttributeDescriptor {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            description: String::new(),
            required: false,
            readonly: false,
            sensitive: false,
            reference: false,
        }
    }

    fn readonly(name: &str, type_tag: &str) -> AttributeDescriptor {
        AttributeDescriptor {
            readonly: true,
            ..descriptor(name, type_tag)
        }
    }

    fn controller(store: Arc<MemoryStore>) -> InstanceController {
        let descriptors = vec![
            descriptor("listen", "string"),
            descriptor("count", "int"),
            descriptor("tls.cert", "string"),
            descriptor("tls.key", "string"),
            readonly("status", "string"),
        ];
        let translated = Arc::new(translate("httpserver", &descriptors).unwrap());
        InstanceController::new("httpserver", translated, store)
    }

    #[test]
    fn test_generate_label_format() {
        let label = generate_label();
        assert!(label.starts_with(LABEL_PREFIX));
        let suffix = &label[LABEL_PREFIX.len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(generate_label(), generate_label());
    }

    #[test]
    fn test_import_parses_well_formed_ids() {
        let ctl = controller(Arc::new(MemoryStore::new()));
        let record = ctl.import("httpserver.docs").unwrap();
        assert_eq!(record["id"], "httpserver.docs");
        assert_eq!(record["name"], "docs");
    }

    #[test]
    fn test_import_rejects_malformed_ids() {
        let ctl = controller(Arc::new(MemoryStore::new()));
        for bad in ["badid", ".docs", "httpserver.", ""] {
            assert!(matches!(
                ctl.import(bad),
                Err(ProviderError::ImportFormat(_))
            ), "expected format error for {:?}", bad);
        }
    }

    #[test]
    fn test_import_rejects_mismatched_resource_type() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(store.clone());
        let err = ctl.import("httpstatic.docs").unwrap_err();
        let ProviderError::ResourceTypeMismatch { expected, actual, .. } = err else {
            panic!("expected a type mismatch");
        };
        assert_eq!(expected, "httpserver");
        assert_eq!(actual, "httpstatic");
        // Nothing was touched on the store.
        assert!(store.identities().is_empty());
    }

    #[test]
    fn test_reconcile_backfills_writable_attributes_only() {
        let ctl = controller(Arc::new(MemoryStore::new()));

        let server = InstanceState::from([("listen".to_string(), json!(":8080"))]);
        let fallback = InstanceState::from([
            ("listen".to_string(), json!(":9999")),
            ("count".to_string(), json!(2)),
            ("status".to_string(), json!("running")),
        ]);

        let merged = ctl.reconcile(server, Some(&fallback));
        // Server wins when present.
        assert_eq!(merged["listen"], json!(":8080"));
        // Writable attributes absent server-side take the submitted value.
        assert_eq!(merged["count"], json!(2));
        // Read-only attributes are never backfilled.
        assert!(!merged.contains_key("status"));
    }

    #[test]
    fn test_reconcile_without_fallback_is_observed_state() {
        let ctl = controller(Arc::new(MemoryStore::new()));
        let server = InstanceState::from([("listen".to_string(), json!(":8080"))]);
        let merged = ctl.reconcile(server.clone(), None);
        assert_eq!(merged, server);
    }

    #[tokio::test]
    async fn test_create_submits_attributes_and_reads_back() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(store.clone());

        let planned = json!({
            "name": "main",
            "listen": ":8080",
            "count": 3,
            "tls": {"cert": "CERT", "key": "KEY"}
        });
        let record = ctl.create(&planned).await.unwrap();

        let identity = record["id"].as_str().unwrap();
        assert!(identity.starts_with("httpserver.skf_"));
        // The planned name is preserved, not overwritten by the label.
        assert_eq!(record["name"], "main");
        assert_eq!(record["listen"], ":8080");
        assert_eq!(record["count"], 3);
        assert_eq!(record["tls"]["cert"], "CERT");

        let state = store.instance(identity).unwrap();
        assert_eq!(state["listen"], json!(":8080"));
        assert_eq!(state["tls.cert"], json!("CERT"));
        assert_eq!(state["tls.key"], json!("KEY"));
        // Read-only attributes are never submitted.
        assert!(!state.contains_key("status"));
    }

    #[tokio::test]
    async fn test_create_with_no_attributes_skips_the_update() {
        let store = Arc::new(MemoryStore::new());
        // An update would fail, proving it is not attempted.
        store.fail_updates();
        let ctl = controller(store.clone());

        let record = ctl.create(&json!({"name": "main"})).await.unwrap();
        assert_eq!(store.identities().len(), 1);
        assert_eq!(record["name"], "main");
    }

    #[tokio::test]
    async fn test_create_destroys_instance_when_apply_fails() {
        let store = Arc::new(MemoryStore::new());
        store.fail_updates();
        let ctl = controller(store.clone());

        let err = ctl
            .create(&json!({"name": "main", "listen": ":8080"}))
            .await
            .unwrap_err();
        // The primary failure is reported, the cleanup succeeded quietly.
        assert!(matches!(*err.error, ProviderError::Transport(_)));
        assert!(err.cleanup.is_none());
        assert!(store.identities().is_empty());
    }

    #[tokio::test]
    async fn test_create_reports_orphan_when_cleanup_also_fails() {
        let store = Arc::new(MemoryStore::new());
        store.fail_updates();
        store.fail_destroys();
        let ctl = controller(store.clone());

        let err = ctl
            .create(&json!({"name": "main", "listen": ":8080"}))
            .await
            .unwrap_err();
        assert!(matches!(*err.error, ProviderError::Transport(_)));
        let cleanup = err.cleanup.expect("cleanup failure reported separately");
        assert!(cleanup.identity.starts_with("httpserver.skf_"));
        // The orphan is still on the server.
        assert_eq!(store.identities(), vec![cleanup.identity.clone()]);
    }

    #[tokio::test]
    async fn test_create_fails_fast_when_instance_creation_fails() {
        let store = Arc::new(MemoryStore::new());
        store.fail_creates();
        let ctl = controller(store.clone());

        let err = ctl.create(&json!({"name": "main"})).await.unwrap_err();
        assert!(err.cleanup.is_none());
        assert!(store.identities().is_empty());
    }

    #[tokio::test]
    async fn test_update_uses_submitted_values_for_unechoed_attributes() {
        let store = Arc::new(MemoryStore::new());
        // The server accepts writes to "count" but never echoes it back.
        store.withhold("count");
        let ctl = controller(store.clone());

        let prior = ctl
            .create(&json!({"name": "main", "listen": ":8080"}))
            .await
            .unwrap();

        let planned = json!({"name": "main", "listen": ":8080", "count": 7});
        let record = ctl.update(&prior, &planned).await.unwrap();

        // The withheld attribute does not read as drift.
        assert_eq!(record["count"], 7);
        assert_eq!(record["listen"], ":8080");
    }

    #[tokio::test]
    async fn test_read_reflects_server_state_without_fallback() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(store.clone());

        store.seed_instance(
            "httpserver.docs",
            InstanceState::from([
                ("listen".to_string(), json!(":8080")),
                ("status".to_string(), json!("running")),
                ("tls.cert".to_string(), json!("CERT")),
            ]),
        );

        let prior = json!({"id": "httpserver.docs", "name": "docs"});
        let record = ctl.read(&prior).await.unwrap();

        assert_eq!(record["id"], "httpserver.docs");
        assert_eq!(record["name"], "docs");
        assert_eq!(record["listen"], ":8080");
        assert_eq!(record["status"], "running");
        assert_eq!(record["tls"]["cert"], "CERT");
        // An absent block member is a null field inside the block object.
        assert_eq!(record["tls"]["key"], Value::Null);
        // Absent attributes come back as nulls.
        assert_eq!(record["count"], Value::Null);
    }

    #[tokio::test]
    async fn test_read_renders_wholly_absent_block_as_null() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(store.clone());
        store.seed_instance(
            "httpserver.docs",
            InstanceState::from([("listen".to_string(), json!(":8080"))]),
        );

        let record = ctl
            .read(&json!({"id": "httpserver.docs", "name": "docs"}))
            .await
            .unwrap();
        assert_eq!(record["tls"], Value::Null);
    }

    #[tokio::test]
    async fn test_read_fails_when_fetch_fails() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(store.clone());
        let err = ctl
            .read(&json!({"id": "httpserver.gone", "name": "gone"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_the_instance() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(store.clone());
        store.seed_instance("httpserver.docs", InstanceState::new());

        ctl.delete(&json!({"id": "httpserver.docs"})).await.unwrap();
        assert!(store.identities().is_empty());
    }

    #[tokio::test]
    async fn test_delete_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(store.clone());
        store.seed_instance("httpserver.docs", InstanceState::new());
        store.fail_destroys();

        assert!(ctl.delete(&json!({"id": "httpserver.docs"})).await.is_err());
        // Nothing was removed.
        assert_eq!(store.identities(), vec!["httpserver.docs".to_string()]);
    }

    #[tokio::test]
    async fn test_operations_reject_records_without_an_id() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(store);
        let err = ctl.read(&json!({"name": "docs"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }
}
