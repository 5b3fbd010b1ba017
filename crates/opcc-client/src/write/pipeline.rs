// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use opcc_config::WriteConfig;
use opcc_core::audit::{AuditedItem, CriticalWriteLog};
use opcc_core::client::{ProtocolClient, WriteItem};
use opcc_core::error::{ClientError, ClientResult};
use opcc_core::scheduler::PeriodicTask;
use opcc_core::types::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{
    CriticalWriteAuditor, ItemOutcome, RateLimitDecision, ValidatedItem, WriteFailure, WriteRateLimiter,
    WriteRequest, WriteResult, WriteValidator,
};
use crate::manager::ConnectionManager;
use crate::tags::{to_engineering, TagRegistry};

/// Runs write requests through rate limiting, validation, pre-fetch,
/// the protocol write and auditing, in that order.
pub struct WritePipeline {
    connections: Arc<ConnectionManager>,
    limiter: WriteRateLimiter,
    validator: WriteValidator,
    auditor: Arc<CriticalWriteAuditor>,
}

impl WritePipeline {
    /// Creates a pipeline.
    pub fn new(
        connections: Arc<ConnectionManager>,
        tags: Arc<TagRegistry>,
        config: &WriteConfig,
        auditor: Arc<CriticalWriteAuditor>,
    ) -> Self {
        Self {
            connections,
            limiter: WriteRateLimiter::new(config.rate_limit.clone()),
            validator: WriteValidator::new(tags, &config.validation_rules),
            auditor,
        }
    }

    /// The rate limiter.
    pub fn rate_limiter(&self) -> &WriteRateLimiter {
        &self.limiter
    }

    /// The critical-write auditor.
    pub fn auditor(&self) -> &Arc<CriticalWriteAuditor> {
        &self.auditor
    }

    /// Handles one request.
    ///
    /// Failures are reported in the result; a stage that rejects the
    /// request stops every later stage.
    #[instrument(
        skip(self, request, cancel),
        fields(
            request_id = %request.request_id,
            server_id = %request.server_id,
            user_id = %request.context.user_id,
        )
    )]
    pub async fn handle(&self, request: WriteRequest, cancel: &CancellationToken) -> WriteResult {
        match self.run(&request, cancel).await {
            Ok(result) => {
                if result.is_success() {
                    info!(items = result.items.len(), audited = result.audited, "Write completed");
                } else {
                    warn!(%result, "Write completed with failures");
                }
                result
            }
            Err(failure) => {
                warn!(error = %failure, error_type = failure.error_type(), "Write rejected");
                WriteResult::rejected(&request, failure)
            }
        }
    }

    async fn run(&self, request: &WriteRequest, cancel: &CancellationToken) -> Result<WriteResult, WriteFailure> {
        if cancel.is_cancelled() {
            return Err(WriteFailure::Cancelled);
        }

        self.check_rate(request)?;
        let items = self
            .validator
            .validate(request)
            .map_err(|issues| WriteFailure::Validation { issues })?;
        let client = self
            .connections
            .active_client(&request.server_id)
            .map_err(|e| WriteFailure::ServerUnavailable {
                server_id: request.server_id.clone(),
                reason: e.to_string(),
            })?;

        let critical = request.is_critical || items.iter().any(|i| i.tag.critical);
        let old_values = if critical {
            self.prefetch(&client, request, &items, cancel).await?
        } else {
            vec![None; items.len()]
        };

        let (outcomes, failure) = match self.write(&client, request, &items, cancel).await {
            Ok(results) => (results, None),
            Err(WriteFailure::Cancelled) => return Err(WriteFailure::Cancelled),
            Err(failure) => {
                let message = failure.to_string();
                (items.iter().map(|_| Err(message.clone())).collect(), Some(failure))
            }
        };

        let items: Vec<ItemOutcome> = items
            .into_iter()
            .zip(old_values)
            .zip(outcomes)
            .map(|((item, old_value), outcome)| ItemOutcome {
                tag_id: item.tag.id,
                value: item.value,
                success: outcome.is_ok(),
                error: outcome.err(),
                old_value,
            })
            .collect();

        let audited = critical && self.audit(request, &items);

        Ok(WriteResult {
            request_id: request.request_id,
            server_id: request.server_id.clone(),
            items,
            failure,
            critical,
            audited,
        })
    }

    fn check_rate(&self, request: &WriteRequest) -> Result<(), WriteFailure> {
        match self.limiter.check(&request.context.user_id, &request.server_id) {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited { key, retry_after } => Err(WriteFailure::RateLimited { key, retry_after }),
        }
    }

    /// Reads current values of a critical write. Read failures yield `None`.
    async fn prefetch(
        &self,
        client: &Arc<dyn ProtocolClient>,
        request: &WriteRequest,
        items: &[ValidatedItem],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<Value>>, WriteFailure> {
        let addresses: Vec<String> = items.iter().map(|i| i.tag.address.clone()).collect();
        let result = self
            .connections
            .policies()
            .server_communication
            .execute_once(request.server_id.as_str(), cancel, client.read(&addresses))
            .await;

        match result {
            Ok(values) if values.len() == items.len() => Ok(items
                .iter()
                .zip(values)
                .map(|(item, read)| {
                    read.quality
                        .is_good()
                        .then(|| to_engineering(&item.tag, read.value))
                })
                .collect()),
            Ok(values) => {
                warn!(expected = items.len(), got = values.len(), "Pre-fetch returned wrong number of values");
                Ok(vec![None; items.len()])
            }
            Err(ClientError::Cancelled) => Err(WriteFailure::Cancelled),
            Err(e) => {
                warn!(error = %e, "Pre-fetch of current values failed, writing anyway");
                Ok(vec![None; items.len()])
            }
        }
    }

    /// Writes once through the server-communication breaker.
    async fn write(
        &self,
        client: &Arc<dyn ProtocolClient>,
        request: &WriteRequest,
        items: &[ValidatedItem],
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<(), String>>, WriteFailure> {
        let writes: Vec<WriteItem> = items
            .iter()
            .map(|i| WriteItem {
                address: i.tag.address.clone(),
                value: i.raw.clone(),
            })
            .collect();

        let results: ClientResult<Vec<ClientResult<()>>> = self
            .connections
            .policies()
            .server_communication
            .execute_once(request.server_id.as_str(), cancel, client.write(&writes))
            .await;

        match results {
            Ok(results) => {
                let mut results: Vec<_> = results.into_iter().map(|r| r.map_err(|e| e.to_string())).collect();
                results.resize(items.len(), Err("no result returned for item".to_string()));
                Ok(results)
            }
            Err(ClientError::Cancelled) => Err(WriteFailure::Cancelled),
            Err(ClientError::NotConnected) => Err(WriteFailure::ServerUnavailable {
                server_id: request.server_id.clone(),
                reason: ClientError::NotConnected.to_string(),
            }),
            Err(e) => Err(WriteFailure::Protocol { message: e.to_string() }),
        }
    }

    fn audit(&self, request: &WriteRequest, items: &[ItemOutcome]) -> bool {
        let mut log = CriticalWriteLog::new(
            request.request_id,
            request.server_id.clone(),
            request.context.user_id.clone(),
        );
        log.client_address = request.context.client_address.clone();
        log.reason = request.context.reason.clone();
        log.correlation_id = request.context.correlation_id.clone();

        let log = items.iter().fold(log, |log, item| {
            log.with_item(AuditedItem {
                tag_id: item.tag_id.clone(),
                old_value: item.old_value.clone(),
                new_value: item.value.clone(),
                success: item.success,
                error: item.error.clone(),
            })
        });

        debug!(items = items.len(), success = log.success, "Submitting critical-write audit");
        self.auditor.submit(log);
        true
    }
}

impl fmt::Debug for WritePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePipeline")
            .field("limiter", &self.limiter)
            .field("auditor", &self.auditor)
            .finish()
    }
}

/// Drops idle rate-limit buckets.
#[async_trait]
impl PeriodicTask for WritePipeline {
    fn name(&self) -> &str {
        "rate-limit-cleanup"
    }

    async fn run_once(&self) {
        let removed = self.limiter.cleanup();
        if removed > 0 {
            debug!(removed, remaining = self.limiter.bucket_count(), "Idle rate-limit buckets dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcc_config::{RateLimitConfig, ServerConnectionConfig, TagDefinition, ValidationRule};
    use opcc_core::audit::InMemoryAuditLogger;
    use opcc_core::types::TagId;
    use opcc_protocol::{ClientFactory, SimulatedServer, SimulatedTransportProvider};

    use crate::connection::TracingStatusSink;
    use crate::testing::fast_policies;
    use crate::write::{IssueKind, WriteContext};

    const SETPOINT: &str = "ns=2;s=Line1.Setpoint";
    const VALVE: &str = "ns=2;s=Line1.Valve";

    struct Fixture {
        server: Arc<SimulatedServer>,
        logger: Arc<InMemoryAuditLogger>,
        pipeline: WritePipeline,
        cancel: CancellationToken,
    }

    async fn fixture(rate_limit: RateLimitConfig) -> Fixture {
        let server = Arc::new(
            SimulatedServer::new("opc.tcp://plc:4840")
                .with_node(SETPOINT, Value::Float64(10.0), true)
                .with_node(VALVE, Value::Float64(0.0), true),
        );
        let provider = SimulatedTransportProvider::new().with_server("plc", server.clone());
        let connections = Arc::new(ConnectionManager::new(
            ClientFactory::new(Arc::new(provider)),
            fast_policies(0),
            Arc::new(TracingStatusSink),
        ));
        let cancel = CancellationToken::new();
        connections
            .initialize_connections(&[ServerConnectionConfig::new("plc", "ua", "opc.tcp://plc:4840")], &cancel)
            .await;

        let mut setpoint = TagDefinition::new("setpoint", "plc", SETPOINT);
        setpoint.writable = true;
        let mut valve = TagDefinition::new("valve", "plc", VALVE);
        valve.writable = true;
        valve.critical = true;

        let config = WriteConfig {
            rate_limit,
            validation_rules: vec![ValidationRule {
                tag_id: TagId::new("setpoint"),
                min: None,
                max: Some(100.0),
            }],
        };
        let logger = Arc::new(InMemoryAuditLogger::new(100));
        let auditor = Arc::new(CriticalWriteAuditor::new("client-1", logger.clone()));
        let pipeline = WritePipeline::new(
            connections,
            Arc::new(TagRegistry::new(vec![setpoint, valve])),
            &config,
            auditor,
        );

        Fixture {
            server,
            logger,
            pipeline,
            cancel,
        }
    }

    fn request(tag: &str, value: f64) -> WriteRequest {
        WriteRequest::new("plc", WriteContext::new("alice")).with_item(tag, Value::Float64(value))
    }

    #[tokio::test]
    async fn test_non_critical_write_is_not_audited() {
        let f = fixture(RateLimitConfig::default()).await;

        let result = f.pipeline.handle(request("setpoint", 42.0), &f.cancel).await;
        assert!(result.is_success(), "{}", result);
        assert!(!result.critical);
        assert!(!result.audited);
        assert_eq!(f.server.value(SETPOINT), Some(Value::Float64(42.0)));

        f.pipeline.auditor().wait_idle().await;
        assert!(f.logger.entries().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_never_touches_device() {
        let f = fixture(RateLimitConfig::default()).await;

        let result = f.pipeline.handle(request("setpoint", 142.0), &f.cancel).await;
        match result.failure {
            Some(WriteFailure::Validation { issues }) => assert_eq!(issues[0].kind, IssueKind::OutOfRange),
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert_eq!(f.server.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_write_performs_no_protocol_call() {
        let f = fixture(RateLimitConfig {
            enabled: true,
            requests_per_second: 0.001,
            burst_size: 1,
            ..RateLimitConfig::default()
        })
        .await;

        assert!(f.pipeline.handle(request("setpoint", 1.0), &f.cancel).await.is_success());
        let calls = f.server.write_calls();

        let result = f.pipeline.handle(request("setpoint", 2.0), &f.cancel).await;
        assert!(matches!(result.failure, Some(WriteFailure::RateLimited { .. })));
        assert_eq!(f.server.write_calls(), calls);
        assert_eq!(f.server.value(SETPOINT), Some(Value::Float64(1.0)));
    }

    #[tokio::test]
    async fn test_critical_write_is_audited_with_old_and_new_values() {
        let f = fixture(RateLimitConfig::default()).await;
        f.server.set_value(VALVE, Value::Float64(15.0));

        let request = WriteRequest::new(
            "plc",
            WriteContext::new("alice")
                .with_reason("maintenance")
                .with_client_address("10.0.0.7"),
        )
        .with_item("valve", Value::Float64(75.0));
        let request_id = request.request_id;

        let result = f.pipeline.handle(request, &f.cancel).await;
        assert!(result.is_success());
        assert!(result.critical);
        assert!(result.audited);

        f.pipeline.auditor().wait_idle().await;
        let entries = f.logger.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.request_id, request_id);
        assert_eq!(entry.user_id, "alice");
        assert_eq!(entry.reason.as_deref(), Some("maintenance"));
        assert_eq!(entry.items[0].old_value, Some(Value::Float64(15.0)));
        assert_eq!(entry.items[0].new_value, Value::Float64(75.0));
        assert!(entry.success);
    }

    #[tokio::test]
    async fn test_failed_prefetch_does_not_block_critical_write() {
        let f = fixture(RateLimitConfig::default()).await;
        f.server.fail_next_reads(1);

        let result = f
            .pipeline
            .handle(request("setpoint", 50.0).critical(), &f.cancel)
            .await;
        assert!(result.is_success(), "{}", result);
        assert_eq!(result.items[0].old_value, None);
        assert_eq!(f.server.value(SETPOINT), Some(Value::Float64(50.0)));

        f.pipeline.auditor().wait_idle().await;
        let entries = f.logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].items[0].old_value, None);
    }

    #[tokio::test]
    async fn test_disconnected_server_is_unavailable() {
        let f = fixture(RateLimitConfig::default()).await;
        f.server.drop_session();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let result = f.pipeline.handle(request("setpoint", 5.0), &f.cancel).await;
        assert!(matches!(result.failure, Some(WriteFailure::ServerUnavailable { .. })));
        assert!(result.items.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let f = fixture(RateLimitConfig::default()).await;
        f.cancel.cancel();
        let result = f.pipeline.handle(request("setpoint", 5.0), &f.cancel).await;
        assert_eq!(result.failure, Some(WriteFailure::Cancelled));
        assert_eq!(f.server.write_calls(), 0);
    }
}
