use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

use crate::{
    models::status::{NotificationStatus, StatusRecord},
    store::StatusLedger,
};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS notification_statuses (
        request_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        provider TEXT NOT NULL DEFAULT '',
        detail TEXT NOT NULL DEFAULT '',
        updated_at TIMESTAMPTZ NOT NULL
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO notification_statuses (request_id, status, provider, detail, updated_at)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (request_id) DO UPDATE
    SET status = EXCLUDED.status,
        provider = EXCLUDED.provider,
        detail = EXCLUDED.detail,
        updated_at = EXCLUDED.updated_at
    WHERE (
        notification_statuses.updated_at,
        array_position(ARRAY['queued', 'processing', 'failed', 'retrying', 'skipped', 'sent', 'dead_lettered'], notification_statuses.status),
        notification_statuses.provider COLLATE "C",
        notification_statuses.detail COLLATE "C"
    ) <= (
        EXCLUDED.updated_at,
        array_position(ARRAY['queued', 'processing', 'failed', 'retrying', 'skipped', 'sent', 'dead_lettered'], EXCLUDED.status),
        EXCLUDED.provider COLLATE "C",
        EXCLUDED.detail COLLATE "C"
    )
"#;

const SELECT: &str = r#"
    SELECT request_id, status, provider, detail, updated_at
    FROM notification_statuses
    WHERE request_id = $1
"#;

/// [`StatusLedger`] stored in the `notification_statuses` table.
pub struct PostgresLedger {
    database_url: String,
    client: RwLock<Arc<Client>>,
}

impl PostgresLedger {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let client = Self::open(database_url).await?;

        client
            .batch_execute(CREATE_TABLE)
            .await
            .map_err(|e| anyhow!("Failed to create status table: {}", e))?;

        info!("PostgreSQL connection established");

        Ok(Self {
            database_url: database_url.to_string(),
            client: RwLock::new(Arc::new(client)),
        })
    }

    async fn open(database_url: &str) -> Result<Client, Error> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        Ok(client)
    }

    /// Current client, reopened first if the previous connection died.
    async fn client(&self) -> Result<Arc<Client>, Error> {
        {
            let client = self.client.read().await;
            if !client.is_closed() {
                return Ok(Arc::clone(&client));
            }
        }

        let mut client = self.client.write().await;
        if client.is_closed() {
            warn!("PostgreSQL connection closed, reconnecting");
            *client = Arc::new(Self::open(&self.database_url).await?);
        }
        Ok(Arc::clone(&client))
    }

    fn record_from_row(row: &Row) -> Result<StatusRecord, Error> {
        let status: String = row.try_get("status")?;
        let status = NotificationStatus::from_string(&status)
            .ok_or_else(|| anyhow!("Unknown status '{}' in ledger", status))?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(StatusRecord {
            request_id: row.try_get("request_id")?,
            status,
            provider: row.try_get("provider")?,
            detail: row.try_get("detail")?,
            updated_at,
        })
    }
}

#[async_trait]
impl StatusLedger for PostgresLedger {
    async fn upsert(&self, record: &StatusRecord) -> Result<(), Error> {
        let client = self.client().await?;
        let status = record.status.as_str();

        client
            .execute(
                UPSERT,
                &[
                    &record.request_id,
                    &status,
                    &record.provider,
                    &record.detail,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    request_id = %record.request_id,
                    "Failed to write notification status"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(
            request_id = %record.request_id,
            status,
            "Notification status written"
        );

        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<StatusRecord>, Error> {
        let client = self.client().await?;

        let row = client
            .query_opt(SELECT, &[&request_id])
            .await
            .map_err(|e| anyhow!("Database read failed: {}", e))?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn ping(&self) -> Result<(), Error> {
        let client = self.client().await?;

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_ranks_statuses_in_lifecycle_order() {
        let ranking = NotificationStatus::LIFECYCLE
            .iter()
            .map(|status| format!("'{}'", status.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        assert_eq!(UPSERT.matches(&format!("ARRAY[{}]", ranking)).count(), 2);
    }
}
