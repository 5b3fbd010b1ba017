// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol client factory.
//!
//! The factory parses the configured protocol variant into a [`ProtocolKind`],
//! checks the endpoint against it and asks a [`TransportProvider`] for the
//! session transport the adapter runs on.
//!
//! ```
//! use std::sync::Arc;
//! use opcc_config::ServerConnectionConfig;
//! use opcc_protocol::factory::{ClientFactory, SimulatedTransportProvider};
//!
//! let factory = ClientFactory::new(Arc::new(SimulatedTransportProvider::new()));
//! let config = ServerConnectionConfig::new("plc-1", "OPC-UA", "opc.tcp://plc:4840");
//! let client = factory.create(&config).unwrap();
//! assert_eq!(client.protocol().as_str(), "ua");
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use opcc_config::ServerConnectionConfig;
use opcc_core::client::ProtocolClient;
use opcc_core::error::{ClientError, ClientResult};
use opcc_core::types::{ProtocolKind, ServerId};
use tracing::debug;

use crate::ac::AcClient;
use crate::hda::HdaClient;
use crate::simulated::SimulatedServer;
use crate::transport::SessionTransport;
use crate::ua::UaClient;

// =============================================================================
// TransportProvider
// =============================================================================

/// Supplies session transports for server connections.
pub trait TransportProvider: Send + Sync {
    /// Returns a transport for `config`, already resolved to `kind`.
    fn transport(
        &self,
        kind: ProtocolKind,
        config: &ServerConnectionConfig,
    ) -> ClientResult<Arc<dyn SessionTransport>>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Provider used when no vendor stack is linked into the build.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransportProvider;

impl TransportProvider for NoTransportProvider {
    fn transport(
        &self,
        kind: ProtocolKind,
        config: &ServerConnectionConfig,
    ) -> ClientResult<Arc<dyn SessionTransport>> {
        Err(ClientError::configuration(format!(
            "no {} session transport is linked for server '{}'; run with --simulate",
            kind, config.id
        )))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Provider backed by [`SimulatedServer`]s.
///
/// Servers registered up front are returned by id; any other server gets a
/// fresh, empty simulated server on first use.
#[derive(Default)]
pub struct SimulatedTransportProvider {
    servers: DashMap<ServerId, Arc<SimulatedServer>>,
}

impl SimulatedTransportProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the server used for `server_id`.
    pub fn register(&self, server_id: impl Into<ServerId>, server: Arc<SimulatedServer>) {
        self.servers.insert(server_id.into(), server);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_server(self, server_id: impl Into<ServerId>, server: Arc<SimulatedServer>) -> Self {
        self.register(server_id, server);
        self
    }

    /// Returns the server backing `server_id`.
    pub fn get(&self, server_id: &ServerId) -> Option<Arc<SimulatedServer>> {
        self.servers.get(server_id).map(|s| s.value().clone())
    }
}

impl fmt::Debug for SimulatedTransportProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedTransportProvider")
            .field("servers", &self.servers.len())
            .finish()
    }
}

impl TransportProvider for SimulatedTransportProvider {
    fn transport(
        &self,
        _kind: ProtocolKind,
        config: &ServerConnectionConfig,
    ) -> ClientResult<Arc<dyn SessionTransport>> {
        let server = self
            .servers
            .entry(config.id.clone())
            .or_insert_with(|| Arc::new(SimulatedServer::new(config.endpoint.clone())))
            .value()
            .clone();
        Ok(server)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

// =============================================================================
// ClientFactory
// =============================================================================

/// Creates protocol clients from connection configs.
#[derive(Clone)]
pub struct ClientFactory {
    provider: Arc<dyn TransportProvider>,
}

impl ClientFactory {
    /// Creates a factory over `provider`.
    pub fn new(provider: Arc<dyn TransportProvider>) -> Self {
        Self { provider }
    }

    /// Builds the adapter for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] for unknown protocol variants
    /// and endpoints that do not fit the protocol. These are never retried.
    pub fn create(&self, config: &ServerConnectionConfig) -> ClientResult<Arc<dyn ProtocolClient>> {
        let kind = config.resolve_protocol("protocol")?;
        let transport = self.provider.transport(kind, config)?;

        debug!(
            server_id = %config.id,
            protocol = %kind,
            provider = self.provider.name(),
            "Creating protocol client"
        );

        let client: Arc<dyn ProtocolClient> = match kind {
            ProtocolKind::Ua => Arc::new(UaClient::new(config.clone(), transport)),
            ProtocolKind::Hda => Arc::new(HdaClient::new(config.clone(), transport)),
            ProtocolKind::Ac => Arc::new(AcClient::new(config.clone(), transport)),
        };
        Ok(client)
    }

    /// Name of the transport provider.
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("provider", &self.provider.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ClientFactory {
        ClientFactory::new(Arc::new(SimulatedTransportProvider::new()))
    }

    #[test]
    fn test_protocol_aliases() {
        let factory = factory();
        for (protocol, endpoint, expected) in [
            ("ua", "opc.tcp://h:4840", ProtocolKind::Ua),
            ("OPCUA", "opc.tcp://h:4840", ProtocolKind::Ua),
            ("opc-hda", "opc.hda://h", ProtocolKind::Hda),
            ("AE", "opc.ae://h", ProtocolKind::Ac),
            ("opc-ac", "opc.ae://h", ProtocolKind::Ac),
        ] {
            let config = ServerConnectionConfig::new("s", protocol, endpoint);
            let client = factory.create(&config).unwrap();
            assert_eq!(client.protocol(), expected, "{}", protocol);
        }
    }

    #[test]
    fn test_unsupported_protocol_is_configuration_error() {
        let config = ServerConnectionConfig::new("s", "modbus", "opc.tcp://h:4840");
        let err = factory().create(&config).err().expect("expected error");
        assert!(matches!(err, ClientError::Configuration { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_wrong_scheme_is_configuration_error() {
        let config = ServerConnectionConfig::new("s", "ua", "http://h:4840");
        assert!(matches!(
            factory().create(&config),
            Err(ClientError::Configuration { .. })
        ));

        let config = ServerConnectionConfig::new("s", "ua", "opc.tcp://");
        assert!(matches!(
            factory().create(&config),
            Err(ClientError::Configuration { .. })
        ));
    }

    #[test]
    fn test_no_transport_provider() {
        let factory = ClientFactory::new(Arc::new(NoTransportProvider));
        let config = ServerConnectionConfig::new("s", "ua", "opc.tcp://h:4840");
        let err = factory.create(&config).err().expect("expected error");
        assert!(err.to_string().contains("--simulate"));
    }

    #[test]
    fn test_simulated_provider_reuses_registered_server() {
        let server = Arc::new(SimulatedServer::new("opc.tcp://h:4840"));
        let provider = SimulatedTransportProvider::new().with_server("s", server.clone());
        let transport = provider
            .transport(
                ProtocolKind::Ua,
                &ServerConnectionConfig::new("s", "ua", "opc.tcp://h:4840"),
            )
            .unwrap();
        assert_eq!(transport.endpoint(), "opc.tcp://h:4840");
        assert!(Arc::ptr_eq(&provider.get(&ServerId::new("s")).unwrap(), &server));
    }
}
