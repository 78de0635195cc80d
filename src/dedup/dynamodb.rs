use crate::dedup::clock::{Clock, SystemClock};
use crate::dedup::identity::validate_identity_hash;
use crate::dedup::provisioning::TableSchema;
use crate::dedup::record::{DedupRecord, HASH_ATTRIBUTE};
use crate::dedup::store::DedupStore;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_dynamodb::config::http::HttpResponse;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus, Tag, TimeToLiveSpecification,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Error codes DynamoDB returns for throttling and server-side hiccups.
const RETRYABLE_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "ThrottlingException",
    "InternalServerError",
    "ServiceUnavailable",
    "LimitExceededException",
];

/// Maps an SDK failure onto the store's error taxonomy.
///
/// `missing_table` recognises the operation's "table does not exist" variant,
/// which is the configuration-absent signal rather than a failure.
fn classify<E>(operation: &str, err: SdkError<E, HttpResponse>, missing_table: fn(&E) -> bool) -> AppError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(service_err) => {
            let inner = service_err.err();
            if missing_table(inner) {
                return AppError::NotConfigured;
            }
            let code = inner.code().unwrap_or("Unknown");
            AppError::DynamoDb {
                message: format!("{} failed: {}", operation, code),
                retryable: RETRYABLE_CODES.contains(&code),
            }
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            AppError::DynamoDb {
                message: format!("{} failed: {}", operation, err),
                retryable: true,
            }
        }
        _ => AppError::DynamoDb {
            message: format!("{} failed: {}", operation, err),
            retryable: false,
        },
    }
}

/// DynamoDB-backed dedup table: on-demand billing, native TTL on `ttl`.
pub struct DynamoDbDedupStore {
    table_name: String,
    dynamodb_client: aws_sdk_dynamodb::Client,
    consistent_read: bool,
    clock: Arc<dyn Clock>,
}

impl DynamoDbDedupStore {
    pub fn new(dynamodb_client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        Self::with_clock(dynamodb_client, table_name, Arc::new(SystemClock))
    }

    pub fn with_clock(
        dynamodb_client: aws_sdk_dynamodb::Client,
        table_name: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            dynamodb_client,
            consistent_read: true,
            clock,
        }
    }

    /// Eventually consistent reads halve read cost at the price of a wider race window.
    pub fn with_consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = consistent_read;
        self
    }

    fn key(&self, identity_hash: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([(
            HASH_ATTRIBUTE.to_string(),
            AttributeValue::S(identity_hash.to_string()),
        )])
    }

    fn observe<T>(&self, operation: &str, timer: LatencyTimer, result: &Result<T>) {
        get_metrics().record_store_operation(
            self.backend(),
            operation,
            timer.elapsed_ms(),
            result.is_ok(),
        );
    }

    async fn get_record(&self, identity_hash: &str) -> Result<Option<DedupRecord>> {
        let output = self
            .dynamodb_client
            .get_item()
            .table_name(&self.table_name)
            .consistent_read(self.consistent_read)
            .set_key(Some(self.key(identity_hash)))
            .send()
            .await
            .map_err(|err| classify("GetItem", err, |e| e.is_resource_not_found_exception()))?;

        output
            .item
            .map(|item| {
                serde_dynamo::from_item::<_, DedupRecord>(item)
                    .map_err(|e| AppError::Internal(anyhow!("Malformed dedup item: {}", e)))
            })
            .transpose()
    }

    async fn put_record(&self, record: &DedupRecord) -> Result<()> {
        let item: HashMap<String, AttributeValue> = serde_dynamo::to_item(record)
            .map_err(|e| AppError::Internal(anyhow!("Failed to encode dedup item: {}", e)))?;

        self.dynamodb_client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|err| classify("PutItem", err, |e| e.is_resource_not_found_exception()))?;

        Ok(())
    }

    /// Creates the on-demand table and enables TTL on the expiry attribute.
    ///
    /// An existing table is accepted as-is.
    pub async fn create_table(
        &self,
        schema: &TableSchema,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        let build_err = |e: aws_sdk_dynamodb::error::BuildError| AppError::Internal(e.into());

        let attribute = AttributeDefinition::builder()
            .attribute_name(schema.hash_attribute)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(build_err)?;
        let key_schema = KeySchemaElement::builder()
            .attribute_name(schema.hash_attribute)
            .key_type(KeyType::Hash)
            .build()
            .map_err(build_err)?;
        let tags = tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build().map_err(build_err))
            .collect::<Result<Vec<_>>>()?;

        let created = self
            .dynamodb_client
            .create_table()
            .table_name(&schema.table_name)
            .attribute_definitions(attribute)
            .key_schema(key_schema)
            .billing_mode(BillingMode::PayPerRequest)
            .set_tags(if tags.is_empty() { None } else { Some(tags) })
            .send()
            .await;

        match created {
            Ok(_) => tracing::info!(table = %schema.table_name, "Created dedup table"),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_resource_in_use_exception())
                    .unwrap_or(false)
                {
                    tracing::info!(table = %schema.table_name, "Dedup table already exists");
                } else {
                    return Err(classify("CreateTable", err, |_| false));
                }
            }
        }

        self.wait_until_active(&schema.table_name, Duration::from_secs(60))
            .await?;

        let ttl_spec = TimeToLiveSpecification::builder()
            .attribute_name(schema.ttl_attribute)
            .enabled(true)
            .build()
            .map_err(build_err)?;

        let ttl_result = self
            .dynamodb_client
            .update_time_to_live()
            .table_name(&schema.table_name)
            .time_to_live_specification(ttl_spec)
            .send()
            .await;

        if let Err(err) = ttl_result {
            // Re-enabling TTL on a table that already has it is rejected; that is fine.
            let already_enabled = err
                .as_service_error()
                .and_then(|e| e.message())
                .map(|m| m.contains("already enabled"))
                .unwrap_or(false);
            if !already_enabled {
                return Err(classify("UpdateTimeToLive", err, |e| {
                    e.is_resource_not_found_exception()
                }));
            }
        }

        Ok(())
    }

    async fn wait_until_active(&self, table_name: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let output = self
                .dynamodb_client
                .describe_table()
                .table_name(table_name)
                .send()
                .await
                .map_err(|err| {
                    classify("DescribeTable", err, |e| e.is_resource_not_found_exception())
                })?;

            let status = output.table.and_then(|table| table.table_status);
            if status == Some(TableStatus::Active) {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Transient(format!(
                    "table {} not active after {:?}",
                    table_name, timeout
                )));
            }

            tracing::debug!(table = %table_name, status = ?status, "Waiting for dedup table");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

#[async_trait]
impl DedupStore for DynamoDbDedupStore {
    async fn exists(&self, identity_hash: &str) -> Result<bool> {
        validate_identity_hash(identity_hash)?;
        let timer = LatencyTimer::new();

        // DynamoDB reclaims expired items lazily, so the filter is ours.
        let now = self.clock.now_epoch_seconds();
        let result = self
            .get_record(identity_hash)
            .await
            .map(|record| record.map_or(false, |record| record.is_live_at(now)));

        self.observe("exists", timer, &result);
        result
    }

    async fn put(&self, identity_hash: &str, ttl: i64) -> Result<()> {
        validate_identity_hash(identity_hash)?;
        let timer = LatencyTimer::new();

        let record =
            DedupRecord::new(identity_hash, ttl).with_created_at(self.clock.now_epoch_seconds());
        let result = self.put_record(&record).await;

        self.observe("put", timer, &result);
        if let Err(ref e) = result {
            tracing::warn!(error = %e, table = %self.table_name, "DynamoDB dedup put failed");
        }
        result
    }

    async fn delete(&self, identity_hash: &str) -> Result<bool> {
        validate_identity_hash(identity_hash)?;

        let output = self
            .dynamodb_client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key(identity_hash)))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
            .send()
            .await
            .map_err(|err| classify("DeleteItem", err, |e| e.is_resource_not_found_exception()))?;

        Ok(output.attributes.map_or(false, |attrs| !attrs.is_empty()))
    }

    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "dynamodb"
    }
}
