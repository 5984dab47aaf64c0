//! Schema types and the descriptor-to-schema translator.
//!
//! The Skiff server reports each resource type as a flat list of attribute
//! descriptors with dotted names (e.g. `tls.cert`). [`translate`] converts
//! that list into the nested, statically-shaped [`ResourceSchema`] the host
//! engine consumes: dotted names are grouped into single-nested blocks, the
//! reserved `name`/`id` fields are prepended, and required/optional/computed
//! policy is derived from the descriptor flags.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::coerce::TypeTag;
use crate::error::ProviderError;

/// Remote-reported metadata for one configurable attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Dotted attribute path, e.g. `"tls.cert"`.
    pub name: String,
    /// Type tag per the [`TypeTag`] grammar.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// The attribute must be set in configuration.
    #[serde(default)]
    pub required: bool,
    /// The attribute is reported by the server and cannot be configured.
    #[serde(default)]
    pub readonly: bool,
    /// The attribute value should be hidden in logs and UI.
    #[serde(default)]
    pub sensitive: bool,
    /// The attribute refers to another instance.
    #[serde(default)]
    pub reference: bool,
}

/// The type of a schema attribute as presented to the host engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// A string value.
    String,
    /// A 64-bit integer.
    Int64,
    /// A 64-bit floating point number.
    Float64,
    /// A boolean value.
    Bool,
    /// A list of values of a single type.
    List(Box<AttributeType>),
    /// A map from string keys to values of a single type.
    Map(Box<AttributeType>),
}

impl AttributeType {
    /// Create a list type.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// Create a map type.
    pub fn map(value_type: AttributeType) -> Self {
        Self::Map(Box::new(value_type))
    }
}

impl From<&TypeTag> for AttributeType {
    fn from(tag: &TypeTag) -> Self {
        match tag {
            TypeTag::Bool => Self::Bool,
            TypeTag::Int => Self::Int64,
            TypeTag::Float => Self::Float64,
            TypeTag::List(elem) => Self::list(Self::from(&**elem)),
            TypeTag::Map(value) => Self::map(Self::from(&**value)),
            // time, duration and ref are carried as strings.
            _ => Self::String,
        }
    }
}

/// Describes how an attribute can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The attribute is required in configuration.
    pub required: bool,
    /// The attribute is optional in configuration.
    pub optional: bool,
    /// The attribute may be populated by the provider or the server.
    pub computed: bool,
    /// The attribute is sensitive and should be hidden in logs/UI.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Flags for a required attribute.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Flags for an optional attribute.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Flags for a computed attribute (read-only, set by the server).
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Flags for an optional+computed attribute (configurable, but the
    /// server may supply a default).
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Mark the attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// A single attribute in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// The type of the attribute.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Flags describing how the attribute can be used.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description of the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// If set, changing this attribute forces instance replacement.
    #[serde(default)]
    pub force_new: bool,
}

impl Attribute {
    /// Create a new attribute with the given type and flags.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
        }
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark this attribute as forcing instance replacement when changed.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Mark this attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }
}

/// A named group of leaf attributes derived from a shared dotted-name
/// prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BlockSchema {
    /// The attributes within this block.
    #[serde(default)]
    pub attributes: HashMap<String, Attribute>,
    /// Flags for the block as a whole.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description of the block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BlockSchema {
    /// Create an empty block with the given flags.
    pub fn new(flags: AttributeFlags) -> Self {
        Self {
            attributes: HashMap::new(),
            flags,
            description: None,
        }
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }
}

/// Schema for a resource or data source: top-level leaf attributes plus
/// single-nested blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceSchema {
    /// The version of this schema.
    #[serde(default)]
    pub version: u64,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Top-level attributes.
    #[serde(default)]
    pub attributes: HashMap<String, Attribute>,
    /// Nested blocks keyed by block name.
    #[serde(default)]
    pub blocks: HashMap<String, BlockSchema>,
}

impl ResourceSchema {
    /// Create an empty schema at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a top-level attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block.
    pub fn with_block(mut self, name: impl Into<String>, block: BlockSchema) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }
}

/// Schema for the provider as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// Schema for provider configuration.
    #[serde(default)]
    pub provider: ResourceSchema,
    /// Schemas for each resource type.
    #[serde(default)]
    pub resources: HashMap<String, ResourceSchema>,
    /// Schemas for each data source type.
    #[serde(default)]
    pub data_sources: HashMap<String, ResourceSchema>,
}

impl ProviderSchema {
    /// Create a new empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration schema.
    pub fn with_provider_config(mut self, schema: ResourceSchema) -> Self {
        self.provider = schema;
        self
    }

    /// Add a resource schema.
    pub fn with_resource(mut self, name: impl Into<String>, schema: ResourceSchema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    /// Add a data source schema.
    pub fn with_data_source(mut self, name: impl Into<String>, schema: ResourceSchema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A diagnostic message from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Set the attribute path unless it is empty.
    pub fn with_attribute_if_not_empty(self, attribute: &str) -> Self {
        if attribute.is_empty() {
            self
        } else {
            self.with_attribute(attribute)
        }
    }
}

/// The bijective link between one remote descriptor and its location in the
/// translated schema.
#[derive(Debug, Clone)]
pub struct AttrInfo {
    /// The original dotted name as the server reports it.
    pub remote_name: String,
    /// Block name, or `None` for a top-level attribute.
    pub block: Option<String>,
    /// Field name within the block (or the top-level name).
    pub field: String,
    /// Parsed type tag.
    pub tag: TypeTag,
    /// The original descriptor metadata.
    pub descriptor: AttributeDescriptor,
}

impl AttrInfo {
    /// Derive the structured location from a descriptor. The dotted name is
    /// split at the first dot only; any further dots in the remainder become
    /// underscores (e.g. `"tls.cert.key"` → block `tls`, field `cert_key`).
    fn new(descriptor: AttributeDescriptor) -> Self {
        let (block, field) = match descriptor.name.split_once('.') {
            Some((block, rest)) => (Some(block.to_string()), rest.replace('.', "_")),
            None => (None, descriptor.name.clone()),
        };
        Self {
            remote_name: descriptor.name.clone(),
            block,
            field,
            tag: TypeTag::parse(&descriptor.type_tag),
            descriptor,
        }
    }

    /// Whether the attribute is reported by the server only.
    pub fn read_only(&self) -> bool {
        self.descriptor.readonly
    }
}

/// The cached output of one schema translation.
#[derive(Debug, Clone)]
pub struct TranslatedSchema {
    /// The host-facing schema.
    pub schema: ResourceSchema,
    /// One entry per remote descriptor, in input order.
    pub infos: Vec<AttrInfo>,
}

/// Top-level names reserved for the provider's own fields.
const RESERVED_NAMES: [&str; 2] = ["name", "id"];

/// Translate a resource type's attribute descriptors into a structured
/// schema plus the descriptor lookup table.
///
/// Fails wholesale on any reserved-name or naming collision: the returned
/// error carries one diagnostic per conflict and no partial schema is
/// produced, so a conflicting resource type is entirely unavailable rather
/// than partially usable.
pub fn translate(
    resource_type: &str,
    descriptors: &[AttributeDescriptor],
) -> Result<TranslatedSchema, ProviderError> {
    let mut diagnostics = Vec::new();
    let mut infos: Vec<AttrInfo> = Vec::new();
    // "block/field" → original remote name. Two distinct descriptors can
    // collide once dots become underscores (e.g. "tls.cert_key" and
    // "tls.cert.key" both yield block "tls", field "cert_key").
    let mut seen: HashMap<String, String> = HashMap::new();

    for descriptor in descriptors {
        let info = AttrInfo::new(descriptor.clone());
        if info.block.is_none() && RESERVED_NAMES.contains(&info.field.as_str()) {
            diagnostics.push(
                Diagnostic::error("Reserved attribute name")
                    .with_detail(format!(
                        "Resource {:?}: attribute {:?} conflicts with the reserved attribute {:?}",
                        resource_type, descriptor.name, info.field
                    ))
                    .with_attribute(info.field.as_str()),
            );
            continue;
        }
        let key = format!("{}/{}", info.block.as_deref().unwrap_or(""), info.field);
        if let Some(prev) = seen.get(&key) {
            diagnostics.push(
                Diagnostic::error("Attribute naming collision")
                    .with_detail(format!(
                        "Resource {:?}: attributes {:?} and {:?} both map to field {:?} (block {:?})",
                        resource_type,
                        prev,
                        descriptor.name,
                        info.field,
                        info.block.as_deref().unwrap_or("")
                    ))
                    .with_attribute(info.field.as_str()),
            );
            continue;
        }
        seen.insert(key, descriptor.name.clone());
        infos.push(info);
    }

    if !diagnostics.is_empty() {
        return Err(ProviderError::SchemaConflict {
            resource_type: resource_type.to_string(),
            diagnostics,
        });
    }

    // Fixed attributes every resource carries.
    let mut attributes = HashMap::from([
        (
            "name".to_string(),
            Attribute::required_string()
                .with_description("Instance label (e.g. \"main\").")
                .with_force_new(),
        ),
        (
            "id".to_string(),
            Attribute::computed_string()
                .with_description("Fully qualified instance name (resource_type.label)."),
        ),
    ]);

    // Group block members by prefix.
    let mut blocks: HashMap<String, BlockSchema> = HashMap::new();

    for info in &infos {
        let attr = attribute_from(info);
        match &info.block {
            Some(block) => {
                blocks
                    .entry(block.clone())
                    .or_default()
                    .attributes
                    .insert(info.field.clone(), attr);
            }
            None => {
                attributes.insert(info.field.clone(), attr);
            }
        }
    }

    // A block is required when any member is; otherwise it is marked
    // optional+computed so the server may populate defaults for it.
    for block in blocks.values_mut() {
        let required = block.attributes.values().any(|a| a.flags.required);
        block.flags = AttributeFlags {
            required,
            optional: !required,
            computed: !required,
            sensitive: false,
        };
    }

    let schema = ResourceSchema {
        version: 0,
        description: format!(
            "Manages a {} resource instance on a running Skiff server.",
            resource_type
        ),
        attributes,
        blocks,
    };

    Ok(TranslatedSchema { schema, infos })
}

/// Convert one descriptor to its host-facing attribute. Optional attributes
/// are marked computed so the server can supply defaults without the host
/// flagging an inconsistent result after apply.
fn attribute_from(info: &AttrInfo) -> Attribute {
    let descriptor = &info.descriptor;
    let optional = !descriptor.required && !descriptor.readonly;
    Attribute {
        attr_type: AttributeType::from(&info.tag),
        flags: AttributeFlags {
            required: descriptor.required,
            optional,
            computed: descriptor.readonly || optional,
            sensitive: descriptor.sensitive,
        },
        description: (!descriptor.description.is_empty())
            .then(|| descriptor.description.clone()),
        force_new: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_translate_groups_blocks_and_reserves_fixed_fields() {
        let descriptors = vec![
            descriptor("listen", "string"),
            descriptor("tls.cert", "string"),
            descriptor("tls.key", "string"),
        ];
        let translated = translate("httpserver", &descriptors).unwrap();

        assert!(translated.schema.attributes.contains_key("name"));
        assert!(translated.schema.attributes.contains_key("id"));
        assert!(translated.schema.attributes.contains_key("listen"));
        assert!(translated.schema.attributes["name"].force_new);
        assert!(translated.schema.attributes["id"].flags.computed);

        let tls = &translated.schema.blocks["tls"];
        assert!(tls.attributes.contains_key("cert"));
        assert!(tls.attributes.contains_key("key"));

        assert_eq!(translated.infos.len(), 3);
        let cert = translated
            .infos
            .iter()
            .find(|i| i.remote_name == "tls.cert")
            .unwrap();
        assert_eq!(cert.block.as_deref(), Some("tls"));
        assert_eq!(cert.field, "cert");
    }

    #[test]
    fn test_translate_replaces_deep_dots_with_underscores() {
        let descriptors = vec![descriptor("tls.cert.key", "string")];
        let translated = translate("httpserver", &descriptors).unwrap();
        let info = &translated.infos[0];
        assert_eq!(info.block.as_deref(), Some("tls"));
        assert_eq!(info.field, "cert_key");
    }

    #[test]
    fn test_translate_naming_collision_fails_wholesale() {
        let descriptors = vec![
            descriptor("listen", "string"),
            descriptor("tls.cert_key", "string"),
            descriptor("tls.cert.key", "string"),
        ];
        let err = translate("httpserver", &descriptors).unwrap_err();
        let ProviderError::SchemaConflict {
            resource_type,
            diagnostics,
        } = err
        else {
            panic!("expected a schema conflict");
        };
        assert_eq!(resource_type, "httpserver");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Attribute naming collision");
        let detail = diagnostics[0].detail.as_deref().unwrap();
        assert!(detail.contains("tls.cert_key"));
        assert!(detail.contains("tls.cert.key"));
    }

    #[test]
    fn test_translate_rejects_reserved_names() {
        for reserved in ["name", "id"] {
            let err = translate("httpserver", &[descriptor(reserved, "string")]).unwrap_err();
            let ProviderError::SchemaConflict { diagnostics, .. } = err else {
                panic!("expected a schema conflict");
            };
            assert_eq!(diagnostics[0].summary, "Reserved attribute name");
        }

        // A block member may use a reserved word; only top-level names clash.
        let translated = translate("httpserver", &[descriptor("meta.name", "string")]).unwrap();
        assert!(translated.schema.blocks["meta"].attributes.contains_key("name"));
    }

    #[test]
    fn test_translate_accumulates_all_conflicts() {
        let descriptors = vec![
            descriptor("id", "string"),
            descriptor("a.b_c", "string"),
            descriptor("a.b.c", "string"),
        ];
        let err = translate("queue", &descriptors).unwrap_err();
        let ProviderError::SchemaConflict { diagnostics, .. } = err else {
            panic!("expected a schema conflict");
        };
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_policy_assignment() {
        let mut required = descriptor("listen", "string");
        required.required = true;
        let mut readonly = descriptor("status", "string");
        readonly.readonly = true;
        let optional = descriptor("timeout", "duration");

        let translated =
            translate("httpserver", &[required, readonly, optional]).unwrap();
        let attrs = &translated.schema.attributes;

        assert!(attrs["listen"].flags.required);
        assert!(!attrs["listen"].flags.computed);

        assert!(attrs["status"].flags.computed);
        assert!(!attrs["status"].flags.optional);

        // Optional attributes are also computed so server defaults do not
        // read as drift.
        assert!(attrs["timeout"].flags.optional);
        assert!(attrs["timeout"].flags.computed);
    }

    #[test]
    fn test_block_required_iff_any_member_required() {
        let mut cert = descriptor("tls.cert", "string");
        cert.required = true;
        let key = descriptor("tls.key", "string");
        let translated = translate("httpserver", &[cert, key]).unwrap();
        let tls = &translated.schema.blocks["tls"];
        assert!(tls.flags.required);
        assert!(!tls.flags.optional);

        let translated = translate(
            "httpserver",
            &[descriptor("tls.cert", "string"), descriptor("tls.key", "string")],
        )
        .unwrap();
        let tls = &translated.schema.blocks["tls"];
        assert!(!tls.flags.required);
        assert!(tls.flags.optional);
        assert!(tls.flags.computed);
    }

    #[test]
    fn test_attribute_types_follow_tags() {
        let descriptors = vec![
            descriptor("count", "int"),
            descriptor("ratio", "float"),
            descriptor("active", "bool"),
            descriptor("hosts", "[]string"),
            descriptor("limits", "map[string]int"),
            descriptor("created", "time"),
        ];
        let translated = translate("pool", &descriptors).unwrap();
        let attrs = &translated.schema.attributes;
        assert_eq!(attrs["count"].attr_type, AttributeType::Int64);
        assert_eq!(attrs["ratio"].attr_type, AttributeType::Float64);
        assert_eq!(attrs["active"].attr_type, AttributeType::Bool);
        assert_eq!(
            attrs["hosts"].attr_type,
            AttributeType::list(AttributeType::String)
        );
        assert_eq!(
            attrs["limits"].attr_type,
            AttributeType::map(AttributeType::Int64)
        );
        assert_eq!(attrs["created"].attr_type, AttributeType::String);
    }

    #[test]
    fn test_sensitive_flag_carries_over() {
        let mut secret = descriptor("api_secret", "string");
        secret.sensitive = true;
        let translated = translate("httpserver", &[secret]).unwrap();
        assert!(translated.schema.attributes["api_secret"].flags.sensitive);
    }

    #[test]
    fn test_descriptor_deserialisation_defaults() {
        let descriptor: AttributeDescriptor =
            serde_json::from_value(serde_json::json!({"name": "listen", "type": "string"}))
                .unwrap();
        assert_eq!(descriptor.name, "listen");
        assert!(!descriptor.required);
        assert!(!descriptor.readonly);
    }

    #[test]
    fn test_provider_schema_builder() {
        let provider_schema = ProviderSchema::new()
            .with_provider_config(
                ResourceSchema::new()
                    .with_attribute("api_key", Attribute::optional_string().sensitive()),
            )
            .with_resource(
                "httpserver",
                ResourceSchema::new().with_attribute("name", Attribute::required_string()),
            )
            .with_data_source("resources", ResourceSchema::new());

        assert!(provider_schema.provider.attributes.contains_key("api_key"));
        assert!(provider_schema.resources.contains_key("httpserver"));
        assert!(provider_schema.data_sources.contains_key("resources"));
    }

    #[test]
    fn test_diagnostic_builders() {
        let err = Diagnostic::error("Invalid configuration")
            .with_detail("The value must be positive")
            .with_attribute("count");
        assert_eq!(err.severity, DiagnosticSeverity::Error);
        assert_eq!(err.detail, Some("The value must be positive".to_string()));
        assert_eq!(err.attribute, Some("count".to_string()));

        let warn = Diagnostic::warning("Cleanup failed").with_attribute_if_not_empty("");
        assert_eq!(warn.severity, DiagnosticSeverity::Warning);
        assert!(warn.attribute.is_none());
    }
}
