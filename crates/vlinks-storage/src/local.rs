//! Local relational store: the VC directory, client matches and the waitlist.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use vlinks_core::{ClientMatch, OutreachStatus, VcInvestor, WaitlistSignup};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("email already registered for waitlist")]
    DuplicateEmail,
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A client match with its VC resolved through the external id. `vc` is `None`
/// when the match points at a VC that has not been synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedMatch {
    pub client_match: ClientMatch,
    pub vc: Option<VcInvestor>,
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert or fully overwrite by `external_id`. No field of a previous version survives.
    async fn upsert_vc(&self, vc: &VcInvestor) -> Result<(), StoreError>;

    async fn get_vc(&self, external_id: &str) -> Result<Option<VcInvestor>, StoreError>;

    async fn count_vcs(&self) -> Result<usize, StoreError>;

    async fn upsert_client_match(&self, client_match: &ClientMatch) -> Result<(), StoreError>;

    /// Unlocked matches for `client_id`, newest assignment first.
    async fn matches_for_client(&self, client_id: &str) -> Result<Vec<JoinedMatch>, StoreError>;

    async fn add_waitlist(&self, email: &str) -> Result<WaitlistSignup, StoreError>;

    async fn waitlist_count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("local store migrations applied");
        Ok(())
    }
}

fn vc_from_row(row: &PgRow, prefix: &str) -> Result<VcInvestor, sqlx::Error> {
    let col = |name: &str| format!("{prefix}{name}");
    Ok(VcInvestor {
        external_id: row.try_get(col("external_id").as_str())?,
        name: row.try_get(col("name").as_str())?,
        firm: row.try_get(col("firm").as_str())?,
        email: row.try_get(col("email").as_str())?,
        phone: row.try_get(col("phone").as_str())?,
        linkedin: row.try_get(col("linkedin").as_str())?,
        website: row.try_get(col("website").as_str())?,
        investment_focus: row.try_get(col("investment_focus").as_str())?,
        investment_stage: row.try_get(col("investment_stage").as_str())?,
        geography: row.try_get(col("geography").as_str())?,
        portfolio_size: row.try_get(col("portfolio_size").as_str())?,
        description: row.try_get(col("description").as_str())?,
        updated_at: row.try_get(col("updated_at").as_str())?,
    })
}

fn match_from_row(row: &PgRow) -> Result<ClientMatch, StoreError> {
    let status: String = row.try_get("outreach_status")?;
    Ok(ClientMatch {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        vc_investor_id: row.try_get("vc_investor_id")?,
        match_reasoning: row.try_get("match_reasoning")?,
        portfolio_reasoning: row.try_get("portfolio_reasoning")?,
        client_access: row.try_get("client_access")?,
        assigned_at: row.try_get("assigned_at")?,
        notes: row.try_get("notes")?,
        outreach_status: status
            .parse::<OutreachStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        outreach_notes: row.try_get("outreach_notes")?,
    })
}

#[async_trait]
impl LocalStore for PgStore {
    async fn upsert_vc(&self, vc: &VcInvestor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO vc_investors (
                external_id, name, firm, email, phone, linkedin, website,
                investment_focus, investment_stage, geography, portfolio_size, description,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            ON CONFLICT (external_id) DO UPDATE SET
                name = EXCLUDED.name,
                firm = EXCLUDED.firm,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                linkedin = EXCLUDED.linkedin,
                website = EXCLUDED.website,
                investment_focus = EXCLUDED.investment_focus,
                investment_stage = EXCLUDED.investment_stage,
                geography = EXCLUDED.geography,
                portfolio_size = EXCLUDED.portfolio_size,
                description = EXCLUDED.description,
                updated_at = NOW()
            "#,
        )
        .bind(&vc.external_id)
        .bind(&vc.name)
        .bind(&vc.firm)
        .bind(&vc.email)
        .bind(&vc.phone)
        .bind(&vc.linkedin)
        .bind(&vc.website)
        .bind(&vc.investment_focus)
        .bind(&vc.investment_stage)
        .bind(&vc.geography)
        .bind(&vc.portfolio_size)
        .bind(&vc.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_vc(&self, external_id: &str) -> Result<Option<VcInvestor>, StoreError> {
        let row = sqlx::query("SELECT * FROM vc_investors WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| vc_from_row(&r, "")).transpose()?)
    }

    async fn count_vcs(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM vc_investors")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count.max(0) as usize)
    }

    async fn upsert_client_match(&self, m: &ClientMatch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO client_matches (
                id, client_id, vc_investor_id, match_reasoning, portfolio_reasoning,
                client_access, assigned_at, notes, outreach_status, outreach_notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                client_id = EXCLUDED.client_id,
                vc_investor_id = EXCLUDED.vc_investor_id,
                match_reasoning = EXCLUDED.match_reasoning,
                portfolio_reasoning = EXCLUDED.portfolio_reasoning,
                client_access = EXCLUDED.client_access,
                assigned_at = EXCLUDED.assigned_at,
                notes = EXCLUDED.notes,
                outreach_status = EXCLUDED.outreach_status,
                outreach_notes = EXCLUDED.outreach_notes
            "#,
        )
        .bind(&m.id)
        .bind(&m.client_id)
        .bind(&m.vc_investor_id)
        .bind(&m.match_reasoning)
        .bind(&m.portfolio_reasoning)
        .bind(m.client_access)
        .bind(m.assigned_at)
        .bind(&m.notes)
        .bind(m.outreach_status.as_str())
        .bind(&m.outreach_notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn matches_for_client(&self, client_id: &str) -> Result<Vec<JoinedMatch>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                m.id, m.client_id, m.vc_investor_id, m.match_reasoning, m.portfolio_reasoning,
                m.client_access, m.assigned_at, m.notes, m.outreach_status, m.outreach_notes,
                v.external_id AS vc_external_id, v.name AS vc_name, v.firm AS vc_firm,
                v.email AS vc_email, v.phone AS vc_phone, v.linkedin AS vc_linkedin,
                v.website AS vc_website, v.investment_focus AS vc_investment_focus,
                v.investment_stage AS vc_investment_stage, v.geography AS vc_geography,
                v.portfolio_size AS vc_portfolio_size, v.description AS vc_description,
                v.updated_at AS vc_updated_at
            FROM client_matches m
            LEFT JOIN vc_investors v ON v.external_id = m.vc_investor_id
            WHERE m.client_id = $1 AND m.client_access = TRUE
            ORDER BY m.assigned_at DESC
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<JoinedMatch, StoreError> {
                let client_match = match_from_row(row)?;
                let joined: Option<String> = row.try_get("vc_external_id")?;
                let vc = match joined {
                    Some(_) => Some(vc_from_row(row, "vc_")?),
                    None => None,
                };
                Ok(JoinedMatch { client_match, vc })
            })
            .collect()
    }

    async fn add_waitlist(&self, email: &str) -> Result<WaitlistSignup, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO waitlist_signups (email) VALUES ($1)
            ON CONFLICT (email) DO NOTHING
            RETURNING id, email, created_at
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::DuplicateEmail)?;

        Ok(WaitlistSignup {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    async fn waitlist_count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM waitlist_signups")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count.max(0) as usize)
    }
}

#[derive(Debug, Default)]
struct MemoryTables {
    vcs: BTreeMap<String, VcInvestor>,
    matches: BTreeMap<String, ClientMatch>,
    waitlist: Vec<WaitlistSignup>,
}

/// In-process store used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn upsert_vc(&self, vc: &VcInvestor) -> Result<(), StoreError> {
        let mut row = vc.clone();
        row.updated_at = Utc::now();
        self.tables
            .write()
            .await
            .vcs
            .insert(row.external_id.clone(), row);
        Ok(())
    }

    async fn get_vc(&self, external_id: &str) -> Result<Option<VcInvestor>, StoreError> {
        Ok(self.tables.read().await.vcs.get(external_id).cloned())
    }

    async fn count_vcs(&self) -> Result<usize, StoreError> {
        Ok(self.tables.read().await.vcs.len())
    }

    async fn upsert_client_match(&self, client_match: &ClientMatch) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .matches
            .insert(client_match.id.clone(), client_match.clone());
        Ok(())
    }

    async fn matches_for_client(&self, client_id: &str) -> Result<Vec<JoinedMatch>, StoreError> {
        let tables = self.tables.read().await;
        let mut joined = tables
            .matches
            .values()
            .filter(|m| m.client_id == client_id && m.client_access)
            .map(|m| JoinedMatch {
                client_match: m.clone(),
                vc: tables.vcs.get(&m.vc_investor_id).cloned(),
            })
            .collect::<Vec<_>>();
        joined.sort_by(|a, b| b.client_match.assigned_at.cmp(&a.client_match.assigned_at));
        Ok(joined)
    }

    async fn add_waitlist(&self, email: &str) -> Result<WaitlistSignup, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.waitlist.iter().any(|s| s.email == email) {
            return Err(StoreError::DuplicateEmail);
        }
        let signup = WaitlistSignup {
            id: tables.waitlist.len() as i64 + 1,
            email: email.to_string(),
            created_at: Utc::now(),
        };
        tables.waitlist.push(signup.clone());
        Ok(signup)
    }

    async fn waitlist_count(&self) -> Result<usize, StoreError> {
        Ok(self.tables.read().await.waitlist.len())
    }
}
