//! DynamoDB-backed ledger.
//!
//! Table layout: hash key `job_id` (S), a global secondary index on
//! `asset_id` (S), and `expires_at` (N, epoch seconds) registered as the
//! table's TTL attribute. Conditional writes keep inserts idempotent and
//! terminal states sticky across concurrent workers.

use crate::error::{LedgerError, LedgerResult};
use crate::expiry_for;
use crate::traits::JobLedger;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use mosaic_core::models::{ExternalJobRecord, JobKind, JobStatus};
use mosaic_core::LedgerConfig;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

type Item = HashMap<String, AttributeValue>;

const OUTSTANDING_CONDITION: &str = "(#status = :pending OR #status = :in_progress)";

#[derive(Clone)]
pub struct DynamoJobLedger {
    client: DynamoClient,
    table_name: String,
    asset_index_name: String,
    ttl_hours: i64,
}

impl DynamoJobLedger {
    pub async fn new(config: &LedgerConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws_region.clone()))
            .load()
            .await;
        Self::from_client(DynamoClient::new(&sdk_config), config)
    }

    pub fn from_client(client: DynamoClient, config: &LedgerConfig) -> Self {
        Self {
            client,
            table_name: config.table_name.clone(),
            asset_index_name: config.asset_index_name.clone(),
            ttl_hours: config.terminal_ttl_hours,
        }
    }
}

fn backend_error<E: std::error::Error>(operation: &str, err: E) -> LedgerError {
    LedgerError::Backend(format!("DynamoDB {} error: {}", operation, DisplayErrorContext(err)))
}

pub(crate) fn record_to_item(record: &ExternalJobRecord) -> Item {
    let mut item = HashMap::new();
    item.insert("job_id".to_string(), AttributeValue::S(record.job_id.clone()));
    item.insert(
        "asset_id".to_string(),
        AttributeValue::S(record.asset_id.to_string()),
    );
    item.insert(
        "kind".to_string(),
        AttributeValue::S(record.kind.as_str().to_string()),
    );
    item.insert(
        "status".to_string(),
        AttributeValue::S(record.status.as_str().to_string()),
    );
    item.insert(
        "source_key".to_string(),
        AttributeValue::S(record.source_key.clone()),
    );
    if let Some(reason) = &record.failure_reason {
        item.insert("failure_reason".to_string(), AttributeValue::S(reason.clone()));
    }
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(record.created_at.to_rfc3339()),
    );
    item.insert(
        "updated_at".to_string(),
        AttributeValue::S(record.updated_at.to_rfc3339()),
    );
    if let Some(expires_at) = record.expires_at {
        item.insert(
            "expires_at".to_string(),
            AttributeValue::N(expires_at.timestamp().to_string()),
        );
    }
    item
}

pub(crate) fn item_to_record(item: &Item) -> LedgerResult<ExternalJobRecord> {
    let job_id = item
        .get("job_id")
        .and_then(|v| v.as_s().ok())
        .cloned()
        .unwrap_or_default();
    let corrupt = |reason: String| LedgerError::Corrupt {
        job_id: job_id.clone(),
        reason,
    };

    let string = |name: &str| -> LedgerResult<String> {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .ok_or_else(|| corrupt(format!("missing attribute {}", name)))
    };
    let timestamp = |name: &str| -> LedgerResult<DateTime<Utc>> {
        let raw = string(name)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("invalid {}: {}", name, e)))
    };

    if job_id.is_empty() {
        return Err(corrupt("missing attribute job_id".to_string()));
    }

    let asset_id = Uuid::parse_str(&string("asset_id")?)
        .map_err(|e| corrupt(format!("invalid asset_id: {}", e)))?;
    let kind = JobKind::from_str(&string("kind")?).map_err(|e| corrupt(e.to_string()))?;
    let status = JobStatus::from_str(&string("status")?).map_err(|e| corrupt(e.to_string()))?;
    let expires_at = item
        .get("expires_at")
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    Ok(ExternalJobRecord {
        job_id: job_id.clone(),
        asset_id,
        kind,
        status,
        source_key: string("source_key")?,
        failure_reason: item
            .get("failure_reason")
            .and_then(|v| v.as_s().ok())
            .cloned(),
        created_at: timestamp("created_at")?,
        updated_at: timestamp("updated_at")?,
        expires_at,
    })
}

fn status_value(status: JobStatus) -> AttributeValue {
    AttributeValue::S(status.as_str().to_string())
}

#[async_trait]
impl JobLedger for DynamoJobLedger {
    #[tracing::instrument(skip(self, record), fields(job_id = %record.job_id, asset_id = %record.asset_id))]
    async fn put(&self, record: &ExternalJobRecord) -> LedgerResult<bool> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(record_to_item(record)))
            .condition_expression("attribute_not_exists(job_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                tracing::debug!("Job already recorded in ledger");
                Ok(false)
            }
            Err(e) => Err(backend_error("put_item", e)),
        }
    }

    async fn get(&self, job_id: &str) -> LedgerResult<Option<ExternalJobRecord>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| backend_error("get_item", e))?;

        result.item().map(item_to_record).transpose()
    }

    #[tracing::instrument(skip(self, status, failure_reason), fields(status = %status))]
    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        failure_reason: Option<&str>,
    ) -> LedgerResult<Option<ExternalJobRecord>> {
        let now = Utc::now();
        let mut set = vec!["#status = :status", "updated_at = :updated_at"];
        let mut remove = Vec::new();

        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .condition_expression(format!("attribute_exists(job_id) AND {}", OUTSTANDING_CONDITION))
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", status_value(status))
            .expression_attribute_values(":updated_at", AttributeValue::S(now.to_rfc3339()))
            .expression_attribute_values(":pending", status_value(JobStatus::Pending))
            .expression_attribute_values(":in_progress", status_value(JobStatus::InProgress))
            .return_values(ReturnValue::AllNew);

        match failure_reason {
            Some(reason) => {
                set.push("failure_reason = :reason");
                request = request
                    .expression_attribute_values(":reason", AttributeValue::S(reason.to_string()));
            }
            None => remove.push("failure_reason"),
        }
        match expiry_for(status, now, self.ttl_hours) {
            Some(expires_at) => {
                set.push("expires_at = :expires_at");
                request = request.expression_attribute_values(
                    ":expires_at",
                    AttributeValue::N(expires_at.timestamp().to_string()),
                );
            }
            None => remove.push("expires_at"),
        }

        let mut expression = format!("SET {}", set.join(", "));
        if !remove.is_empty() {
            expression.push_str(&format!(" REMOVE {}", remove.join(", ")));
        }

        match request.update_expression(expression).send().await {
            Ok(output) => output.attributes().map(item_to_record).transpose(),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                // Unknown job, or already terminal.
                self.get(job_id).await
            }
            Err(e) => Err(backend_error("update_item", e)),
        }
    }

    async fn list_by_asset(&self, asset_id: Uuid) -> LedgerResult<Vec<ExternalJobRecord>> {
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(&self.asset_index_name)
                .key_condition_expression("asset_id = :asset_id")
                .expression_attribute_values(":asset_id", AttributeValue::S(asset_id.to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| backend_error("query", e))?;

            for item in result.items() {
                records.push(item_to_record(item)?);
            }

            match result.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn list_pending(&self, kind: JobKind) -> LedgerResult<Vec<ExternalJobRecord>> {
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let result = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression(format!("#kind = :kind AND {}", OUTSTANDING_CONDITION))
                .expression_attribute_names("#kind", "kind")
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(":kind", AttributeValue::S(kind.as_str().to_string()))
                .expression_attribute_values(":pending", status_value(JobStatus::Pending))
                .expression_attribute_values(":in_progress", status_value(JobStatus::InProgress))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| backend_error("scan", e))?;

            for item in result.items() {
                match item_to_record(item) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!(error = %e, "Skipping unreadable ledger record"),
                }
            }

            match result.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(records)
    }
}
