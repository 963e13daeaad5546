//! PostgreSQL threat store

use async_trait::async_trait;
use sqlx::PgPool;

use super::models::{ThreatSignatureRow, json_list};
use super::{StoreError, ThreatStore};
use crate::model::ThreatSignature;

/// Repository for threat signature operations
#[derive(Clone)]
pub struct PgThreatStore {
    pool: PgPool,
}

impl PgThreatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThreatStore for PgThreatStore {
    async fn append_and_deduplicate(&self, threats: &[ThreatSignature]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut added = 0u64;

        for threat in threats {
            let result = sqlx::query(
                r#"
                INSERT INTO threat_signatures (
                    url, title, published_date, relevance_score, attack_type,
                    modality, affected_models, is_theoretical, severity,
                    summary_tldr, summary_detailed, key_findings,
                    methodology_brief, code_repository, source, processed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (url) DO NOTHING
                "#,
            )
            .bind(&threat.url)
            .bind(&threat.title)
            .bind(threat.published_date)
            .bind(threat.relevance_score)
            .bind(threat.attack_type.as_str())
            .bind(json_list(&threat.modality))
            .bind(json_list(&threat.affected_models))
            .bind(threat.is_theoretical)
            .bind(i16::from(threat.severity))
            .bind(&threat.summary_tldr)
            .bind(&threat.summary_detailed)
            .bind(json_list(&threat.key_findings))
            .bind(&threat.methodology_brief)
            .bind(&threat.code_repository)
            .bind(&threat.source)
            .bind(threat.processed_at)
            .execute(&mut *tx)
            .await?;

            added += result.rows_affected();
        }

        tx.commit().await?;

        tracing::debug!(
            submitted = threats.len(),
            added = added,
            "Appended threat signatures"
        );
        Ok(added as usize)
    }

    async fn fetch_recent(&self, days: u32) -> Result<Vec<ThreatSignature>, StoreError> {
        let rows: Vec<ThreatSignatureRow> = sqlx::query_as(
            r#"
            SELECT * FROM threat_signatures
            WHERE processed_at >= NOW() - make_interval(days => $1)
            ORDER BY processed_at DESC
            "#,
        )
        .bind(days as i32)
        .fetch_all(&self.pool)
        .await?;

        let mut threats = Vec::with_capacity(rows.len());
        for row in rows {
            let url = row.url.clone();
            match row.into_domain() {
                Ok(threat) => threats.push(threat),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Skipping invalid stored threat");
                }
            }
        }
        Ok(threats)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
