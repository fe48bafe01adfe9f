use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{AlertRecord, DeliveryAudit, Notification, Store};
use crate::dispatch::{SubscriberKind, Subscription, TriggerEvent};

// ---------------------------------------------------------------------------
// Connection pool
// ---------------------------------------------------------------------------

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    tracing::info!("postgres_pool_connecting");
    let pool = PgPool::connect(database_url).await?;
    tracing::info!("postgres_pool_connected");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("postgres migrations failed")?;
    tracing::info!("postgres_migrations_applied");
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    // ── Alerts ──

    async fn load_active_alerts(&self) -> Result<Vec<AlertRecord>> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            r#"
            SELECT id, definition
            FROM alerts
            WHERE is_active = true
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = rows.len(), "alerts_loaded");
        Ok(rows
            .into_iter()
            .map(|(id, definition)| AlertRecord { id, definition })
            .collect())
    }

    async fn save_alert(&self, record: &AlertRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, definition, is_active, updated_at)
            VALUES ($1, $2, true, now())
            ON CONFLICT (id) DO UPDATE
               SET definition = EXCLUDED.definition,
                   is_active = true,
                   updated_at = now()
            "#,
        )
        .bind(&record.id)
        .bind(&record.definition)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate_alert(&self, alert_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE alerts SET is_active = false, updated_at = now() WHERE id = $1 AND is_active = true",
        )
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Subscriptions ──

    async fn load_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, (String, String, String, serde_json::Value, Option<DateTime<Utc>>)>(
            r#"
            SELECT id, subscriber_id, condition_id, config, last_triggered_at
            FROM alert_subscriptions
            WHERE is_active = true
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for (id, subscriber_id, condition_id, config, last_triggered_at) in rows {
            let kind: SubscriberKind = match serde_json::from_value(config) {
                Ok(k) => k,
                Err(e) => {
                    tracing::warn!(subscription_id = %id, error = %e, "subscription_config_invalid");
                    continue;
                }
            };
            subscriptions.push(Subscription {
                id,
                subscriber_id,
                condition_id,
                kind,
                active: true,
                last_triggered_at,
            });
        }
        Ok(subscriptions)
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_subscriptions (id, subscriber_id, condition_id, config, is_active, last_triggered_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
               SET config = EXCLUDED.config,
                   is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.subscriber_id)
        .bind(&subscription.condition_id)
        .bind(serde_json::to_value(&subscription.kind)?)
        .bind(subscription.active)
        .bind(subscription.last_triggered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate_subscription(&self, subscriber_id: &str, condition_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alert_subscriptions
               SET is_active = false, deactivated_at = now()
             WHERE subscriber_id = $1 AND condition_id = $2 AND is_active = true
            "#,
        )
        .bind(subscriber_id)
        .bind(condition_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn touch_subscription(&self, subscription_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE alert_subscriptions SET last_triggered_at = $2 WHERE id = $1")
            .bind(subscription_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Audit ──

    async fn record_trigger(&self, event: &TriggerEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO alert_triggers (event_id, alert_id, symbol, timeframe, bar_time, payload, triggered_at)
            VALUES ($1, $2, $3, $4, to_timestamp($5), $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.alert_id)
        .bind(&event.symbol)
        .bind(event.timeframe.to_string())
        .bind(event.bar_time)
        .bind(serde_json::to_value(event)?)
        .bind(event.triggered_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            sqlx::query(
                r#"
                UPDATE alerts
                   SET trigger_count = trigger_count + 1,
                       last_triggered_at = $2
                 WHERE id = $1
                "#,
            )
            .bind(&event.alert_id)
            .bind(event.triggered_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(event_id = %event.event_id, "trigger_recorded");
        Ok(())
    }

    async fn record_delivery(&self, audit: &DeliveryAudit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_deliveries (
                event_id, alert_id, subscription_id, url,
                attempts, status_code, delivered, error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&audit.event_id)
        .bind(&audit.alert_id)
        .bind(&audit.subscription_id)
        .bind(&audit.url)
        .bind(audit.attempts as i32)
        .bind(audit.status_code.map(i32::from))
        .bind(audit.delivered)
        .bind(&audit.error)
        .bind(audit.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, alert_id, event_id, title, body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, event_id) DO NOTHING
            "#,
        )
        .bind(&notification.user_id)
        .bind(&notification.alert_id)
        .bind(&notification.event_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn enqueue_bot_trigger(&self, bot_id: &str, event: &TriggerEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO bot_trigger_queue (bot_id, event_id, alert_id, payload, status, created_at)
            VALUES ($1, $2, $3, $4, 'pending', now())
            ON CONFLICT (bot_id, event_id) DO NOTHING
            "#,
        )
        .bind(bot_id)
        .bind(&event.event_id)
        .bind(&event.alert_id)
        .bind(serde_json::to_value(event)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
