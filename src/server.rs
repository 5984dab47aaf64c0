//! Plugin server: the provider contract and the gRPC serving loop.
//!
//! [`ProviderService`] is the high-level contract the host engine drives;
//! [`crate::provider::DynamicProvider`] implements it. [`serve`] adapts an
//! implementation to the generated gRPC service, prints the
//! `SKIFF_PROVIDER|<version>|<address>` handshake on stdout so the host can
//! connect, and shuts down gracefully on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema, ResourceSchema};
use crate::types::{
    ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

/// The contract between the host engine and a provider implementation.
///
/// All state and configuration payloads are JSON documents. Implementations
/// with nothing to say for an optional method can rely on the defaults.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// The provider's full schema, including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Diagnostics accumulated while building the schema (e.g. resource
    /// types disabled by naming conflicts). Reported with the schema
    /// response.
    fn schema_diagnostics(&self) -> Vec<Diagnostic> {
        vec![]
    }

    /// Provider metadata; by default derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            capabilities: Default::default(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with endpoint and credentials.
    async fn configure(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        proposed_state: serde_json::Value,
        config: serde_json::Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new instance.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Read the current state of an instance.
    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Update an existing instance.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Delete an instance.
    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Import an existing instance into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::InvalidRequest(format!(
            "import is not supported for resource type {}",
            resource_type
        )))
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Read data from a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        _config: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

/// Convert high-level diagnostics into their protocol representation.
fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<crate::generated::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| crate::generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => crate::generated::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => {
                    crate::generated::diagnostic::Severity::Warning as i32
                }
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

/// Convert an error into protocol diagnostics.
///
/// A schema conflict surfaces its accumulated per-attribute diagnostics. A
/// create failure expands into the fatal error plus, when the compensating
/// destroy also failed, a separate warning naming the orphaned instance.
fn error_to_diagnostics(err: ProviderError) -> Vec<crate::generated::Diagnostic> {
    match err {
        ProviderError::SchemaConflict { diagnostics, .. } => diagnostics_to_proto(diagnostics),
        ProviderError::Create(create) => {
            let mut diagnostics = diagnostics_to_proto(vec![Diagnostic::error(
                create.error.to_string(),
            )]);
            if let Some(cleanup) = create.cleanup {
                diagnostics.extend(diagnostics_to_proto(vec![Diagnostic::warning(
                    "Cleanup failed",
                )
                .with_detail(cleanup.to_string())]));
            }
            diagnostics
        }
        other => diagnostics_to_proto(vec![Diagnostic::error(other.to_string())]),
    }
}

fn attribute_to_proto(name: &str, attr: &crate::schema::Attribute) -> crate::generated::Attribute {
    crate::generated::Attribute {
        name: name.to_string(),
        r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
        required: attr.flags.required,
        optional: attr.flags.optional,
        computed: attr.flags.computed,
        sensitive: attr.flags.sensitive,
        description: attr.description.clone().unwrap_or_default(),
        force_new: attr.force_new,
    }
}

fn schema_to_proto(schema: &ResourceSchema) -> crate::generated::Schema {
    crate::generated::Schema {
        version: schema.version as i64,
        block: Some(crate::generated::Block {
            attributes: schema
                .attributes
                .iter()
                .map(|(name, attr)| attribute_to_proto(name, attr))
                .collect(),
            block_types: schema
                .blocks
                .iter()
                .map(|(name, block)| crate::generated::NestedBlock {
                    type_name: name.clone(),
                    block: Some(crate::generated::Block {
                        attributes: block
                            .attributes
                            .iter()
                            .map(|(name, attr)| attribute_to_proto(name, attr))
                            .collect(),
                        block_types: vec![],
                        description: block.description.clone().unwrap_or_default(),
                    }),
                    required: block.flags.required,
                    optional: block.flags.optional,
                    computed: block.flags.computed,
                })
                .collect(),
            description: schema.description.clone(),
        }),
    }
}

/// Wrapper that implements the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

#[tonic::async_trait]
impl<P: ProviderService> crate::generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<crate::generated::GetMetadataRequest>,
    ) -> Result<tonic::Response<crate::generated::GetMetadataResponse>, tonic::Status> {
        debug!("GetMetadata called");
        let metadata = self.provider.metadata();
        info!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        Ok(tonic::Response::new(
            crate::generated::GetMetadataResponse {
                server_capabilities: Some(crate::generated::ServerCapabilities {
                    plan_destroy: metadata.capabilities.plan_destroy,
                }),
                resources: metadata.resources,
                data_sources: metadata.data_sources,
                diagnostics: vec![],
            },
        ))
    }

    #[instrument(skip(self, _request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<crate::generated::GetSchemaRequest>,
    ) -> Result<tonic::Response<crate::generated::GetSchemaResponse>, tonic::Status> {
        debug!("GetSchema called");
        let schema = self.provider.schema();
        let diagnostics = self.provider.schema_diagnostics();
        info!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            diagnostics = diagnostics.len(),
            "GetSchema completed"
        );
        Ok(tonic::Response::new(crate::generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: diagnostics_to_proto(diagnostics),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<crate::generated::ValidateProviderConfigRequest>,
    ) -> Result<tonic::Response<crate::generated::ValidateProviderConfigResponse>, tonic::Status>
    {
        debug!("ValidateProviderConfig called");
        let req = request.into_inner();
        let config = serde_json::from_slice(&req.config).unwrap_or(serde_json::Value::Null);

        match self.provider.validate_provider_config(config).await {
            Ok(diagnostics) => {
                let has_errors = diagnostics
                    .iter()
                    .any(|d| matches!(d.severity, DiagnosticSeverity::Error));
                if has_errors {
                    warn!(
                        diagnostics = diagnostics.len(),
                        "ValidateProviderConfig completed with errors"
                    );
                } else {
                    info!("ValidateProviderConfig completed successfully");
                }
                Ok(tonic::Response::new(
                    crate::generated::ValidateProviderConfigResponse {
                        diagnostics: diagnostics_to_proto(diagnostics),
                    },
                ))
            }
            Err(e) => {
                error!(error = %e, "ValidateProviderConfig failed");
                Ok(tonic::Response::new(
                    crate::generated::ValidateProviderConfigResponse {
                        diagnostics: error_to_diagnostics(e),
                    },
                ))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<crate::generated::ConfigureRequest>,
    ) -> Result<tonic::Response<crate::generated::ConfigureResponse>, tonic::Status> {
        debug!("Configure called");
        let req = request.into_inner();
        let config = serde_json::from_slice(&req.config).unwrap_or(serde_json::Value::Null);

        match self.provider.configure(config).await {
            Ok(diagnostics) => {
                info!("Configure completed successfully");
                Ok(tonic::Response::new(crate::generated::ConfigureResponse {
                    diagnostics: diagnostics_to_proto(diagnostics),
                }))
            }
            Err(e) => {
                error!(error = %e, "Configure failed");
                Ok(tonic::Response::new(crate::generated::ConfigureResponse {
                    diagnostics: error_to_diagnostics(e),
                }))
            }
        }
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<crate::generated::StopRequest>,
    ) -> Result<tonic::Response<crate::generated::StopResponse>, tonic::Status> {
        info!("Stop called");
        match self.provider.stop().await {
            Ok(()) => Ok(tonic::Response::new(crate::generated::StopResponse {
                error: String::new(),
            })),
            Err(e) => {
                error!(error = %e, "Stop failed");
                Ok(tonic::Response::new(crate::generated::StopResponse {
                    error: e.to_string(),
                }))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<crate::generated::ValidateResourceConfigRequest>,
    ) -> Result<tonic::Response<crate::generated::ValidateResourceConfigResponse>, tonic::Status>
    {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "ValidateResourceConfig called");
        let config = serde_json::from_slice(&req.config).unwrap_or(serde_json::Value::Null);

        match self
            .provider
            .validate_resource_config(&req.resource_type, config)
            .await
        {
            Ok(diagnostics) => Ok(tonic::Response::new(
                crate::generated::ValidateResourceConfigResponse {
                    diagnostics: diagnostics_to_proto(diagnostics),
                },
            )),
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "ValidateResourceConfig failed");
                Ok(tonic::Response::new(
                    crate::generated::ValidateResourceConfigResponse {
                        diagnostics: error_to_diagnostics(e),
                    },
                ))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.plan")]
    async fn plan(
        &self,
        request: tonic::Request<crate::generated::PlanRequest>,
    ) -> Result<tonic::Response<crate::generated::PlanResponse>, tonic::Status> {
        let req = request.into_inner();
        let is_create = req.prior_state.is_empty();
        debug!(resource_type = %req.resource_type, is_create, "Plan called");

        let prior_state = if req.prior_state.is_empty() {
            None
        } else {
            serde_json::from_slice(&req.prior_state).ok()
        };
        let proposed_state =
            serde_json::from_slice(&req.proposed_state).unwrap_or(serde_json::Value::Null);
        let config = serde_json::from_slice(&req.config).unwrap_or(serde_json::Value::Null);

        match self
            .provider
            .plan(&req.resource_type, prior_state, proposed_state, config)
            .await
        {
            Ok(result) => {
                info!(
                    resource_type = %req.resource_type,
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                Ok(tonic::Response::new(crate::generated::PlanResponse {
                    planned_state: serde_json::to_vec(&result.planned_state).unwrap_or_default(),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }))
            }
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Plan failed");
                Ok(tonic::Response::new(crate::generated::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_diagnostics(e),
                }))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.create")]
    async fn create(
        &self,
        request: tonic::Request<crate::generated::CreateRequest>,
    ) -> Result<tonic::Response<crate::generated::CreateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Create called");
        let planned_state =
            serde_json::from_slice(&req.planned_state).unwrap_or(serde_json::Value::Null);

        match self.provider.create(&req.resource_type, planned_state).await {
            Ok(state) => {
                info!(resource_type = %req.resource_type, "Create completed successfully");
                Ok(tonic::Response::new(crate::generated::CreateResponse {
                    state: serde_json::to_vec(&state).unwrap_or_default(),
                    diagnostics: vec![],
                }))
            }
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Create failed");
                Ok(tonic::Response::new(crate::generated::CreateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.read")]
    async fn read(
        &self,
        request: tonic::Request<crate::generated::ReadRequest>,
    ) -> Result<tonic::Response<crate::generated::ReadResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "Read called");
        let current_state =
            serde_json::from_slice(&req.current_state).unwrap_or(serde_json::Value::Null);

        match self.provider.read(&req.resource_type, current_state).await {
            Ok(state) => Ok(tonic::Response::new(crate::generated::ReadResponse {
                state: serde_json::to_vec(&state).unwrap_or_default(),
                diagnostics: vec![],
            })),
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Read failed");
                Ok(tonic::Response::new(crate::generated::ReadResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.update")]
    async fn update(
        &self,
        request: tonic::Request<crate::generated::UpdateRequest>,
    ) -> Result<tonic::Response<crate::generated::UpdateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Update called");
        let prior_state =
            serde_json::from_slice(&req.prior_state).unwrap_or(serde_json::Value::Null);
        let planned_state =
            serde_json::from_slice(&req.planned_state).unwrap_or(serde_json::Value::Null);

        match self
            .provider
            .update(&req.resource_type, prior_state, planned_state)
            .await
        {
            Ok(state) => {
                info!(resource_type = %req.resource_type, "Update completed successfully");
                Ok(tonic::Response::new(crate::generated::UpdateResponse {
                    state: serde_json::to_vec(&state).unwrap_or_default(),
                    diagnostics: vec![],
                }))
            }
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Update failed");
                Ok(tonic::Response::new(crate::generated::UpdateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.delete")]
    async fn delete(
        &self,
        request: tonic::Request<crate::generated::DeleteRequest>,
    ) -> Result<tonic::Response<crate::generated::DeleteResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Delete called");
        let current_state =
            serde_json::from_slice(&req.current_state).unwrap_or(serde_json::Value::Null);

        match self
            .provider
            .delete(&req.resource_type, current_state)
            .await
        {
            Ok(()) => {
                info!(resource_type = %req.resource_type, "Delete completed successfully");
                Ok(tonic::Response::new(crate::generated::DeleteResponse {
                    diagnostics: vec![],
                }))
            }
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Delete failed");
                Ok(tonic::Response::new(crate::generated::DeleteResponse {
                    diagnostics: error_to_diagnostics(e),
                }))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<crate::generated::ImportResourceStateRequest>,
    ) -> Result<tonic::Response<crate::generated::ImportResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, id = %req.id, "ImportResourceState called");

        match self
            .provider
            .import_resource(&req.resource_type, &req.id)
            .await
        {
            Ok(imported) => {
                info!(
                    resource_type = %req.resource_type,
                    id = %req.id,
                    imported_count = imported.len(),
                    "ImportResourceState completed"
                );
                Ok(tonic::Response::new(
                    crate::generated::ImportResourceStateResponse {
                        imported: imported
                            .into_iter()
                            .map(|r| crate::generated::ImportedResource {
                                resource_type: r.resource_type,
                                state: serde_json::to_vec(&r.state).unwrap_or_default(),
                            })
                            .collect(),
                        diagnostics: vec![],
                    },
                ))
            }
            Err(e) => {
                error!(resource_type = %req.resource_type, id = %req.id, error = %e, "ImportResourceState failed");
                Ok(tonic::Response::new(
                    crate::generated::ImportResourceStateResponse {
                        imported: vec![],
                        diagnostics: error_to_diagnostics(e),
                    },
                ))
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: tonic::Request<crate::generated::ReadDataSourceRequest>,
    ) -> Result<tonic::Response<crate::generated::ReadDataSourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(data_source_type = %req.data_source_type, "ReadDataSource called");
        let config = serde_json::from_slice(&req.config).unwrap_or(serde_json::Value::Null);

        match self
            .provider
            .read_data_source(&req.data_source_type, config)
            .await
        {
            Ok(state) => Ok(tonic::Response::new(
                crate::generated::ReadDataSourceResponse {
                    state: serde_json::to_vec(&state).unwrap_or_default(),
                    diagnostics: vec![],
                },
            )),
            Err(e) => {
                error!(data_source_type = %req.data_source_type, error = %e, "ReadDataSource failed");
                Ok(tonic::Response::new(
                    crate::generated::ReadDataSourceResponse {
                        state: vec![],
                        diagnostics: error_to_diagnostics(e),
                    },
                ))
            }
        }
    }
}

/// Options for the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long to wait for in-flight requests after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT; CTRL+C on Windows).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                eprintln!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                eprintln!("Received SIGINT, initiating graceful shutdown...");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        eprintln!("Received CTRL+C, initiating graceful shutdown...");
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider on an ephemeral port.
///
/// Prints the `SKIFF_PROVIDER|<version>|<address>` handshake on stdout so
/// the host engine can connect, then serves until a shutdown signal
/// arrives.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider on an ephemeral port with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    serve_on_listener(provider, listener, addr, options).await
}

/// Serve a provider on a specific address (useful with debuggers).
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Serve a provider on a specific address with custom options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    serve_on_listener(provider, listener, actual_addr, options).await
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // The handshake is the only thing written to stdout.
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);

    info!(address = %addr, "provider server starting");

    let provider = Arc::new(provider);
    let provider_for_shutdown = Arc::clone(&provider);

    let grpc_service = ProviderGrpcService { provider };
    let server = crate::generated::provider_server::ProviderServer::new(grpc_service);

    let server_future = Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async {
                wait_for_shutdown_signal().await;
            },
        );

    // The timeout bounds how long in-flight requests may run after the
    // shutdown signal.
    let shutdown_result = tokio::time::timeout(options.shutdown_timeout, server_future).await;

    match shutdown_result {
        Ok(Ok(())) => {
            info!("server shutdown complete");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server error during shutdown");
            return Err(e.into());
        }
        Err(_) => {
            warn!(
                timeout = ?options.shutdown_timeout,
                "shutdown timeout exceeded, forcing shutdown"
            );
        }
    }

    debug!("calling provider stop()");
    if let Err(e) = provider_for_shutdown.stop().await {
        warn!(error = %e, "provider stop() returned error");
    }

    info!("provider shutdown complete");
    Ok(())
}
