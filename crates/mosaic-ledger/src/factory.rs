use crate::error::LedgerResult;
use crate::memory::MemoryJobLedger;
use crate::traits::JobLedger;
use mosaic_core::{LedgerBackend, LedgerConfig};
use std::sync::Arc;

pub async fn create_ledger(config: &LedgerConfig) -> LedgerResult<Arc<dyn JobLedger>> {
    match config.backend {
        #[cfg(feature = "dynamodb")]
        LedgerBackend::DynamoDb => {
            let ledger = crate::dynamodb::DynamoJobLedger::new(config).await;
            tracing::info!(
                table = %config.table_name,
                index = %config.asset_index_name,
                "Job ledger backed by DynamoDB"
            );
            Ok(Arc::new(ledger))
        }
        #[cfg(not(feature = "dynamodb"))]
        LedgerBackend::DynamoDb => Err(crate::error::LedgerError::Backend(
            "DynamoDB ledger support not compiled in (enable feature 'dynamodb')".to_string(),
        )),
        LedgerBackend::Memory => {
            tracing::warn!("Job ledger is in-memory; outstanding jobs are lost on restart");
            Ok(Arc::new(MemoryJobLedger::new(config.terminal_ttl_hours)))
        }
    }
}
