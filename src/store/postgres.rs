//! PostgreSQL record store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Postgres, Row, Transaction};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::{RecordStore, RecordTxn};
use crate::types::{
    AccessLevelInstance, AliId, AuditId, AuditNode, CanonicalId, CanonicalRecord, CycleId,
    DataState, ImportFileId, LabelId, LabelLink, MergePriority, MergeState, MeterId, MeterSeries,
    Note, NoteId, OrgId, Pairing, RecordType, StateId, StateRecord, View, ViewId,
};

/// DDL for the record tables, in dependency order.
pub const RECORD_TABLES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS access_level_instances (
    id UUID PRIMARY KEY,
    organization UUID NOT NULL,
    path TEXT[] NOT NULL
);

CREATE TABLE IF NOT EXISTS state_records (
    id UUID PRIMARY KEY,
    organization UUID NOT NULL,
    record_type TEXT NOT NULL,
    import_file UUID,
    data_state TEXT NOT NULL,
    merge_state TEXT NOT NULL,
    pm_property_id TEXT,
    jurisdiction_tax_lot_id TEXT,
    custom_id_1 TEXT,
    ubid TEXT,
    address_line_1 TEXT,
    address_line_2 TEXT,
    normalized_address TEXT,
    city TEXT,
    state TEXT,
    postal_code TEXT,
    gross_floor_area DOUBLE PRECISION,
    year_built INTEGER,
    extra_data JSONB NOT NULL DEFAULT '{}',
    updated TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS canonical_records (
    id UUID PRIMARY KEY,
    organization UUID NOT NULL,
    record_type TEXT NOT NULL,
    access_level_instance UUID NOT NULL REFERENCES access_level_instances(id),
    created TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS record_views (
    id UUID PRIMARY KEY,
    cycle UUID NOT NULL,
    canonical UUID NOT NULL REFERENCES canonical_records(id),
    state UUID NOT NULL REFERENCES state_records(id)
);

CREATE TABLE IF NOT EXISTS audit_nodes (
    id UUID PRIMARY KEY,
    record_type TEXT NOT NULL,
    parent1 UUID,
    parent2 UUID,
    parent_state1 UUID,
    parent_state2 UUID,
    state UUID NOT NULL,
    name TEXT NOT NULL,
    created TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS notes (
    id UUID PRIMARY KEY,
    view UUID NOT NULL,
    text TEXT NOT NULL,
    created TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS label_links (
    label UUID NOT NULL,
    view UUID NOT NULL,
    PRIMARY KEY (label, view)
);

CREATE TABLE IF NOT EXISTS pairings (
    property_view UUID NOT NULL,
    taxlot_view UUID NOT NULL,
    PRIMARY KEY (property_view, taxlot_view)
);

CREATE TABLE IF NOT EXISTS meter_series (
    id UUID PRIMARY KEY,
    canonical UUID NOT NULL,
    kind TEXT NOT NULL,
    readings JSONB NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS matching_columns (
    organization UUID NOT NULL,
    record_type TEXT NOT NULL,
    columns TEXT[] NOT NULL,
    PRIMARY KEY (organization, record_type)
);

CREATE TABLE IF NOT EXISTS merge_priorities (
    organization UUID NOT NULL,
    record_type TEXT NOT NULL,
    column_name TEXT NOT NULL,
    priority TEXT NOT NULL,
    PRIMARY KEY (organization, record_type, column_name)
);
"#;

/// Configuration for PostgreSQL connection pool.
///
/// Production defaults balance pool size against managed-Postgres
/// connection limits; timeouts are aggressive to fail fast, and max
/// lifetime forces periodic reconnection for health.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/inventory".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

fn env_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Error type for the PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored value failed to decode into its typed form.
    #[error("Decode error: {0}")]
    Decode(String),
}

/// PostgreSQL record store.
///
/// Uses connection pooling with production-tuned settings; each
/// [`RecordTxn`] maps onto one database transaction, so commit and
/// rollback semantics come straight from Postgres.
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Create the record tables when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        self.pool.execute(RECORD_TABLES_SCHEMA).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    type Error = PostgresError;
    type Txn = PostgresTxn;

    async fn begin(&self) -> Result<Self::Txn, Self::Error> {
        let txn = self.pool.begin().await?;
        Ok(PostgresTxn { txn })
    }
}

/// One database transaction.
pub struct PostgresTxn {
    txn: Transaction<'static, Postgres>,
}

fn priority_to_str(priority: MergePriority) -> &'static str {
    match priority {
        MergePriority::FavorNew => "favor_new",
        MergePriority::FavorExisting => "favor_existing",
    }
}

fn priority_from_str(s: &str) -> Result<MergePriority, PostgresError> {
    match s {
        "favor_new" => Ok(MergePriority::FavorNew),
        "favor_existing" => Ok(MergePriority::FavorExisting),
        other => Err(PostgresError::Decode(format!(
            "unknown merge priority: {other}"
        ))),
    }
}

fn parse_record_type(s: &str) -> Result<RecordType, PostgresError> {
    RecordType::from_str(s)
        .ok_or_else(|| PostgresError::Decode(format!("unknown record type: {s}")))
}

fn parse_state_row(row: &PgRow) -> Result<StateRecord, PostgresError> {
    let record_type: String = row.try_get("record_type")?;
    let data_state: String = row.try_get("data_state")?;
    let merge_state: String = row.try_get("merge_state")?;
    let extra: serde_json::Value = row.try_get("extra_data")?;

    Ok(StateRecord {
        id: StateId::new(row.try_get("id")?),
        organization: OrgId::new(row.try_get("organization")?),
        record_type: parse_record_type(&record_type)?,
        import_file: row
            .try_get::<Option<Uuid>, _>("import_file")?
            .map(ImportFileId::new),
        data_state: DataState::from_str(&data_state)
            .ok_or_else(|| PostgresError::Decode(format!("unknown data state: {data_state}")))?,
        merge_state: MergeState::from_str(&merge_state)
            .ok_or_else(|| PostgresError::Decode(format!("unknown merge state: {merge_state}")))?,
        pm_property_id: row.try_get("pm_property_id")?,
        jurisdiction_tax_lot_id: row.try_get("jurisdiction_tax_lot_id")?,
        custom_id_1: row.try_get("custom_id_1")?,
        ubid: row.try_get("ubid")?,
        address_line_1: row.try_get("address_line_1")?,
        address_line_2: row.try_get("address_line_2")?,
        normalized_address: row.try_get("normalized_address")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        postal_code: row.try_get("postal_code")?,
        gross_floor_area: row.try_get("gross_floor_area")?,
        year_built: row.try_get("year_built")?,
        extra_data: serde_json::from_value(extra)
            .map_err(|e| PostgresError::Decode(e.to_string()))?,
        updated: row.try_get("updated")?,
    })
}

fn parse_view_row(row: &PgRow) -> Result<View, PostgresError> {
    Ok(View {
        id: ViewId::new(row.try_get("id")?),
        cycle: CycleId::new(row.try_get("cycle")?),
        canonical: CanonicalId::new(row.try_get("canonical")?),
        state: StateId::new(row.try_get("state")?),
    })
}

fn parse_canonical_row(row: &PgRow) -> Result<CanonicalRecord, PostgresError> {
    let record_type: String = row.try_get("record_type")?;
    Ok(CanonicalRecord {
        id: CanonicalId::new(row.try_get("id")?),
        organization: OrgId::new(row.try_get("organization")?),
        record_type: parse_record_type(&record_type)?,
        access_level_instance: AliId::new(row.try_get("access_level_instance")?),
        created: row.try_get("created")?,
    })
}

fn parse_audit_row(row: &PgRow) -> Result<AuditNode, PostgresError> {
    let record_type: String = row.try_get("record_type")?;
    Ok(AuditNode {
        id: AuditId::new(row.try_get("id")?),
        record_type: parse_record_type(&record_type)?,
        parent1: row.try_get::<Option<Uuid>, _>("parent1")?.map(AuditId::new),
        parent2: row.try_get::<Option<Uuid>, _>("parent2")?.map(AuditId::new),
        parent_state1: row
            .try_get::<Option<Uuid>, _>("parent_state1")?
            .map(StateId::new),
        parent_state2: row
            .try_get::<Option<Uuid>, _>("parent_state2")?
            .map(StateId::new),
        state: StateId::new(row.try_get("state")?),
        name: row.try_get("name")?,
        created: row.try_get("created")?,
    })
}

const STATE_COLUMNS: &str = "id, organization, record_type, import_file, data_state, \
    merge_state, pm_property_id, jurisdiction_tax_lot_id, custom_id_1, ubid, \
    address_line_1, address_line_2, normalized_address, city, state, postal_code, \
    gross_floor_area, year_built, extra_data, updated";

#[async_trait]
impl RecordTxn for PostgresTxn {
    type Error = PostgresError;

    async fn state(&mut self, id: StateId) -> Result<Option<StateRecord>, Self::Error> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM state_records WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.txn)
        .await?;
        row.as_ref().map(parse_state_row).transpose()
    }

    async fn view(&mut self, id: ViewId) -> Result<Option<View>, Self::Error> {
        let row = sqlx::query("SELECT id, cycle, canonical, state FROM record_views WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.txn)
            .await?;
        row.as_ref().map(parse_view_row).transpose()
    }

    async fn canonical(&mut self, id: CanonicalId) -> Result<Option<CanonicalRecord>, Self::Error> {
        let row = sqlx::query(
            "SELECT id, organization, record_type, access_level_instance, created \
             FROM canonical_records WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.txn)
        .await?;
        row.as_ref().map(parse_canonical_row).transpose()
    }

    async fn ali(&mut self, id: AliId) -> Result<Option<AccessLevelInstance>, Self::Error> {
        let row =
            sqlx::query("SELECT id, organization, path FROM access_level_instances WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.txn)
                .await?;
        Ok(match row {
            Some(row) => Some(AccessLevelInstance {
                id: AliId::new(row.try_get("id")?),
                organization: OrgId::new(row.try_get("organization")?),
                path: row.try_get("path")?,
            }),
            None => None,
        })
    }

    async fn cycles_for_org(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Vec<CycleId>, Self::Error> {
        let rows = sqlx::query(
            "SELECT DISTINCT v.cycle FROM record_views v \
             JOIN state_records s ON s.id = v.state \
             WHERE s.organization = $1 AND s.record_type = $2 \
             ORDER BY v.cycle",
        )
        .bind(org.as_uuid())
        .bind(record_type.to_string())
        .fetch_all(&mut *self.txn)
        .await?;
        rows.iter()
            .map(|row| Ok(CycleId::new(row.try_get("cycle")?)))
            .collect()
    }

    async fn views_in_cycle(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        cycle: CycleId,
    ) -> Result<Vec<View>, Self::Error> {
        let rows = sqlx::query(
            "SELECT v.id, v.cycle, v.canonical, v.state FROM record_views v \
             JOIN state_records s ON s.id = v.state \
             WHERE s.organization = $1 AND s.record_type = $2 AND v.cycle = $3 \
             ORDER BY v.id",
        )
        .bind(org.as_uuid())
        .bind(record_type.to_string())
        .bind(cycle.as_uuid())
        .fetch_all(&mut *self.txn)
        .await?;
        rows.iter().map(parse_view_row).collect()
    }

    async fn views_in_org(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Vec<View>, Self::Error> {
        let rows = sqlx::query(
            "SELECT v.id, v.cycle, v.canonical, v.state FROM record_views v \
             JOIN state_records s ON s.id = v.state \
             WHERE s.organization = $1 AND s.record_type = $2 \
             ORDER BY v.id",
        )
        .bind(org.as_uuid())
        .bind(record_type.to_string())
        .fetch_all(&mut *self.txn)
        .await?;
        rows.iter().map(parse_view_row).collect()
    }

    async fn views_for_canonical(&mut self, id: CanonicalId) -> Result<Vec<View>, Self::Error> {
        let rows = sqlx::query(
            "SELECT id, cycle, canonical, state FROM record_views \
             WHERE canonical = $1 ORDER BY id",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.txn)
        .await?;
        rows.iter().map(parse_view_row).collect()
    }

    async fn matching_columns(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Option<Vec<String>>, Self::Error> {
        let row = sqlx::query(
            "SELECT columns FROM matching_columns \
             WHERE organization = $1 AND record_type = $2",
        )
        .bind(org.as_uuid())
        .bind(record_type.to_string())
        .fetch_optional(&mut *self.txn)
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("columns")?),
            None => None,
        })
    }

    async fn merge_priorities(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<BTreeMap<String, MergePriority>, Self::Error> {
        let rows = sqlx::query(
            "SELECT column_name, priority FROM merge_priorities \
             WHERE organization = $1 AND record_type = $2",
        )
        .bind(org.as_uuid())
        .bind(record_type.to_string())
        .fetch_all(&mut *self.txn)
        .await?;
        let mut priorities = BTreeMap::new();
        for row in rows {
            let column: String = row.try_get("column_name")?;
            let priority: String = row.try_get("priority")?;
            priorities.insert(column, priority_from_str(&priority)?);
        }
        Ok(priorities)
    }

    async fn audit_node(&mut self, id: AuditId) -> Result<Option<AuditNode>, Self::Error> {
        let row = sqlx::query(
            "SELECT id, record_type, parent1, parent2, parent_state1, parent_state2, \
             state, name, created FROM audit_nodes WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.txn)
        .await?;
        row.as_ref().map(parse_audit_row).transpose()
    }

    async fn latest_audit_for_state(
        &mut self,
        state: StateId,
    ) -> Result<Option<AuditNode>, Self::Error> {
        let row = sqlx::query(
            "SELECT id, record_type, parent1, parent2, parent_state1, parent_state2, \
             state, name, created FROM audit_nodes WHERE state = $1 \
             ORDER BY created DESC, id DESC LIMIT 1",
        )
        .bind(state.as_uuid())
        .fetch_optional(&mut *self.txn)
        .await?;
        row.as_ref().map(parse_audit_row).transpose()
    }

    async fn notes_for_view(&mut self, view: ViewId) -> Result<Vec<Note>, Self::Error> {
        let rows =
            sqlx::query("SELECT id, view, text, created FROM notes WHERE view = $1 ORDER BY id")
                .bind(view.as_uuid())
                .fetch_all(&mut *self.txn)
                .await?;
        rows.iter()
            .map(|row| {
                Ok(Note {
                    id: NoteId::new(row.try_get("id")?),
                    view: ViewId::new(row.try_get("view")?),
                    text: row.try_get("text")?,
                    created: row.try_get("created")?,
                })
            })
            .collect()
    }

    async fn labels_for_view(&mut self, view: ViewId) -> Result<Vec<LabelLink>, Self::Error> {
        let rows = sqlx::query(
            "SELECT label, view FROM label_links WHERE view = $1 ORDER BY label, view",
        )
        .bind(view.as_uuid())
        .fetch_all(&mut *self.txn)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(LabelLink {
                    label: LabelId::new(row.try_get("label")?),
                    view: ViewId::new(row.try_get("view")?),
                })
            })
            .collect()
    }

    async fn pairings_for_view(&mut self, view: ViewId) -> Result<Vec<Pairing>, Self::Error> {
        let rows = sqlx::query(
            "SELECT property_view, taxlot_view FROM pairings \
             WHERE property_view = $1 OR taxlot_view = $1 \
             ORDER BY property_view, taxlot_view",
        )
        .bind(view.as_uuid())
        .fetch_all(&mut *self.txn)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Pairing {
                    property_view: ViewId::new(row.try_get("property_view")?),
                    taxlot_view: ViewId::new(row.try_get("taxlot_view")?),
                })
            })
            .collect()
    }

    async fn meters_for_canonical(
        &mut self,
        canonical: CanonicalId,
    ) -> Result<Vec<MeterSeries>, Self::Error> {
        let rows = sqlx::query(
            "SELECT id, canonical, kind, readings FROM meter_series \
             WHERE canonical = $1 ORDER BY id",
        )
        .bind(canonical.as_uuid())
        .fetch_all(&mut *self.txn)
        .await?;
        rows.iter()
            .map(|row| {
                let readings: serde_json::Value = row.try_get("readings")?;
                Ok(MeterSeries {
                    id: MeterId::new(row.try_get("id")?),
                    canonical: CanonicalId::new(row.try_get("canonical")?),
                    kind: row.try_get("kind")?,
                    readings: serde_json::from_value(readings)
                        .map_err(|e| PostgresError::Decode(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn put_state(&mut self, state: StateRecord) -> Result<(), Self::Error> {
        let extra = serde_json::to_value(&state.extra_data)
            .map_err(|e| PostgresError::Decode(e.to_string()))?;
        sqlx::query(
            "INSERT INTO state_records (id, organization, record_type, import_file, \
             data_state, merge_state, pm_property_id, jurisdiction_tax_lot_id, custom_id_1, \
             ubid, address_line_1, address_line_2, normalized_address, city, state, \
             postal_code, gross_floor_area, year_built, extra_data, updated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
             $16, $17, $18, $19, $20) \
             ON CONFLICT (id) DO UPDATE SET \
             import_file = EXCLUDED.import_file, data_state = EXCLUDED.data_state, \
             merge_state = EXCLUDED.merge_state, pm_property_id = EXCLUDED.pm_property_id, \
             jurisdiction_tax_lot_id = EXCLUDED.jurisdiction_tax_lot_id, \
             custom_id_1 = EXCLUDED.custom_id_1, ubid = EXCLUDED.ubid, \
             address_line_1 = EXCLUDED.address_line_1, \
             address_line_2 = EXCLUDED.address_line_2, \
             normalized_address = EXCLUDED.normalized_address, city = EXCLUDED.city, \
             state = EXCLUDED.state, postal_code = EXCLUDED.postal_code, \
             gross_floor_area = EXCLUDED.gross_floor_area, \
             year_built = EXCLUDED.year_built, extra_data = EXCLUDED.extra_data, \
             updated = EXCLUDED.updated",
        )
        .bind(state.id.as_uuid())
        .bind(state.organization.as_uuid())
        .bind(state.record_type.to_string())
        .bind(state.import_file.map(|f| f.as_uuid()))
        .bind(state.data_state.to_string())
        .bind(state.merge_state.to_string())
        .bind(&state.pm_property_id)
        .bind(&state.jurisdiction_tax_lot_id)
        .bind(&state.custom_id_1)
        .bind(&state.ubid)
        .bind(&state.address_line_1)
        .bind(&state.address_line_2)
        .bind(&state.normalized_address)
        .bind(&state.city)
        .bind(&state.state)
        .bind(&state.postal_code)
        .bind(state.gross_floor_area)
        .bind(state.year_built)
        .bind(extra)
        .bind(state.updated)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn put_view(&mut self, view: View) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO record_views (id, cycle, canonical, state) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET cycle = EXCLUDED.cycle, \
             canonical = EXCLUDED.canonical, state = EXCLUDED.state",
        )
        .bind(view.id.as_uuid())
        .bind(view.cycle.as_uuid())
        .bind(view.canonical.as_uuid())
        .bind(view.state.as_uuid())
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn put_canonical(&mut self, canonical: CanonicalRecord) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO canonical_records (id, organization, record_type, \
             access_level_instance, created) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
             access_level_instance = EXCLUDED.access_level_instance",
        )
        .bind(canonical.id.as_uuid())
        .bind(canonical.organization.as_uuid())
        .bind(canonical.record_type.to_string())
        .bind(canonical.access_level_instance.as_uuid())
        .bind(canonical.created)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn put_ali(&mut self, ali: AccessLevelInstance) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO access_level_instances (id, organization, path) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET path = EXCLUDED.path",
        )
        .bind(ali.id.as_uuid())
        .bind(ali.organization.as_uuid())
        .bind(&ali.path)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn put_audit(&mut self, node: AuditNode) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO audit_nodes (id, record_type, parent1, parent2, parent_state1, \
             parent_state2, state, name, created) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(node.id.as_uuid())
        .bind(node.record_type.to_string())
        .bind(node.parent1.map(|p| p.as_uuid()))
        .bind(node.parent2.map(|p| p.as_uuid()))
        .bind(node.parent_state1.map(|p| p.as_uuid()))
        .bind(node.parent_state2.map(|p| p.as_uuid()))
        .bind(node.state.as_uuid())
        .bind(&node.name)
        .bind(node.created)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn put_note(&mut self, note: Note) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO notes (id, view, text, created) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET view = EXCLUDED.view",
        )
        .bind(note.id.as_uuid())
        .bind(note.view.as_uuid())
        .bind(&note.text)
        .bind(note.created)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn put_label(&mut self, link: LabelLink) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO label_links (label, view) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(link.label.as_uuid())
        .bind(link.view.as_uuid())
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn put_pairing(&mut self, pairing: Pairing) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO pairings (property_view, taxlot_view) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(pairing.property_view.as_uuid())
        .bind(pairing.taxlot_view.as_uuid())
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn put_meter(&mut self, meter: MeterSeries) -> Result<(), Self::Error> {
        let readings = serde_json::to_value(&meter.readings)
            .map_err(|e| PostgresError::Decode(e.to_string()))?;
        sqlx::query(
            "INSERT INTO meter_series (id, canonical, kind, readings) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET canonical = EXCLUDED.canonical, \
             readings = EXCLUDED.readings",
        )
        .bind(meter.id.as_uuid())
        .bind(meter.canonical.as_uuid())
        .bind(&meter.kind)
        .bind(readings)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn set_matching_columns(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        columns: Vec<String>,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO matching_columns (organization, record_type, columns) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (organization, record_type) DO UPDATE SET columns = EXCLUDED.columns",
        )
        .bind(org.as_uuid())
        .bind(record_type.to_string())
        .bind(&columns)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn set_merge_priority(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        column: String,
        priority: MergePriority,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO merge_priorities (organization, record_type, column_name, priority) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (organization, record_type, column_name) \
             DO UPDATE SET priority = EXCLUDED.priority",
        )
        .bind(org.as_uuid())
        .bind(record_type.to_string())
        .bind(&column)
        .bind(priority_to_str(priority))
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn delete_view(&mut self, id: ViewId) -> Result<(), Self::Error> {
        sqlx::query("DELETE FROM record_views WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.txn)
            .await?;
        Ok(())
    }

    async fn delete_canonical(&mut self, id: CanonicalId) -> Result<(), Self::Error> {
        sqlx::query("DELETE FROM canonical_records WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.txn)
            .await?;
        Ok(())
    }

    async fn delete_audit(&mut self, id: AuditId) -> Result<(), Self::Error> {
        sqlx::query("DELETE FROM audit_nodes WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.txn)
            .await?;
        Ok(())
    }

    async fn delete_labels_for_view(&mut self, view: ViewId) -> Result<(), Self::Error> {
        sqlx::query("DELETE FROM label_links WHERE view = $1")
            .bind(view.as_uuid())
            .execute(&mut *self.txn)
            .await?;
        Ok(())
    }

    async fn delete_pairings_for_view(&mut self, view: ViewId) -> Result<(), Self::Error> {
        sqlx::query("DELETE FROM pairings WHERE property_view = $1 OR taxlot_view = $1")
            .bind(view.as_uuid())
            .execute(&mut *self.txn)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), Self::Error> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        self.txn.rollback().await?;
        Ok(())
    }
}
