//! `PostgreSQL` record store.
//!
//! Rows map one-to-one onto the `disasters`, `resources`, and `reports`
//! tables from `migrations/`. Updates run inside a transaction holding a
//! row lock (`SELECT ... FOR UPDATE`) so the attribute patch and the
//! appended trail entry commit together and concurrent updates of the
//! same record serialize.

use chrono::{DateTime, Utc};
use relief_core::{append_entry, validate_trail, NearbyQuery};
use relief_types::{
    AuditEntry, Disaster, DisasterId, DisasterPatch, NewReport, NewResource, Report, ReportId,
    Resource, ResourceId, VerificationStatus,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{classify_sqlx, StoreError};
use crate::store::{NewRecord, RecordFilter};

const DISASTER_COLUMNS: &str =
    "id, title, location_name, description, tags, owner_id, created_at, audit_trail";

const RESOURCE_COLUMNS: &str = "id, disaster_id, name, type, location_name, lat, lon, created_at";

const REPORT_COLUMNS: &str =
    "id, disaster_id, user_id, content, image_url, verification_status, created_at";

/// `PostgreSQL`-backed [`RecordStore`](crate::RecordStore) backend.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Wrap a connection pool whose schema is already migrated.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) async fn create(&self, record: NewRecord) -> Result<Disaster, StoreError> {
        let trail = serde_json::to_value(&record.audit_trail)?;
        let tags: Vec<String> = record.tags.into_iter().collect();
        let row = sqlx::query_as::<_, DisasterRow>(&format!(
            "INSERT INTO disasters ({DISASTER_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {DISASTER_COLUMNS}"
        ))
        .bind(DisasterId::new().into_inner())
        .bind(&record.title)
        .bind(&record.location_name)
        .bind(&record.description)
        .bind(&tags)
        .bind(&record.owner_id)
        .bind(record.created_at)
        .bind(&trail)
        .fetch_one(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(row.into_disaster())
    }

    pub(crate) async fn get(&self, id: DisasterId) -> Result<Disaster, StoreError> {
        let row = sqlx::query_as::<_, DisasterRow>(&format!(
            "SELECT {DISASTER_COLUMNS} FROM disasters WHERE id = $1"
        ))
        .bind(id.into_inner())
        .fetch_optional(&self.pool)
        .await?;

        row.map(DisasterRow::into_disaster)
            .ok_or_else(|| StoreError::NotFound(format!("disaster {id}")))
    }

    pub(crate) async fn get_all(&self, filter: &RecordFilter) -> Result<Vec<Disaster>, StoreError> {
        let rows = sqlx::query_as::<_, DisasterRow>(&format!(
            "SELECT {DISASTER_COLUMNS} FROM disasters
             WHERE $1::TEXT IS NULL OR $1 = ANY(tags)
             ORDER BY created_at, id"
        ))
        .bind(filter.tag.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DisasterRow::into_disaster).collect())
    }

    pub(crate) async fn update(
        &self,
        id: DisasterId,
        patch: &DisasterPatch,
        entry: &AuditEntry,
    ) -> Result<Disaster, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DisasterRow>(&format!(
            "SELECT {DISASTER_COLUMNS} FROM disasters WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.into_inner())
        .fetch_optional(&mut *tx)
        .await?;

        let mut record = row
            .map(DisasterRow::into_disaster)
            .ok_or_else(|| StoreError::NotFound(format!("disaster {id}")))?;
        patch.apply_to(&mut record);
        record.audit_trail = append_entry(
            Some(&record.audit_trail),
            entry.action,
            &entry.user_id,
            entry.timestamp,
        );

        let trail = serde_json::to_value(&record.audit_trail)?;
        let tags: Vec<String> = record.tags.iter().cloned().collect();
        sqlx::query(
            r"UPDATE disasters
              SET title = $2, location_name = $3, description = $4, tags = $5,
                  owner_id = $6, audit_trail = $7
              WHERE id = $1",
        )
        .bind(id.into_inner())
        .bind(&record.title)
        .bind(&record.location_name)
        .bind(&record.description)
        .bind(&tags)
        .bind(&record.owner_id)
        .bind(&trail)
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        tx.commit().await?;
        Ok(record)
    }

    pub(crate) async fn delete(&self, id: DisasterId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM disasters WHERE id = $1")
            .bind(id.into_inner())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("disaster {id}")));
        }
        Ok(())
    }

    pub(crate) async fn create_resource(
        &self,
        disaster_id: DisasterId,
        resource: &NewResource,
        created_at: DateTime<Utc>,
    ) -> Result<Resource, StoreError> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "INSERT INTO resources ({RESOURCE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {RESOURCE_COLUMNS}"
        ))
        .bind(ResourceId::new().into_inner())
        .bind(disaster_id.into_inner())
        .bind(&resource.name)
        .bind(&resource.resource_type)
        .bind(&resource.location_name)
        .bind(resource.lat)
        .bind(resource.lon)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| missing_parent(e, disaster_id))?;

        Ok(row.into())
    }

    pub(crate) async fn list_resources(
        &self,
        disaster_id: DisasterId,
    ) -> Result<Vec<Resource>, StoreError> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources
             WHERE disaster_id = $1
             ORDER BY created_at, id"
        ))
        .bind(disaster_id.into_inner())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Resource::from).collect())
    }

    pub(crate) async fn nearby_resources(
        &self,
        query: &NearbyQuery,
    ) -> Result<Vec<Resource>, StoreError> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM get_nearby_resources($1, $2, $3, $4)"
        ))
        .bind(query.disaster_id.into_inner())
        .bind(query.center.lat())
        .bind(query.center.lon())
        .bind(query.radius_meters)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(
            disaster_id = %query.disaster_id,
            candidates = rows.len(),
            "get_nearby_resources returned"
        );
        Ok(rows.into_iter().map(Resource::from).collect())
    }

    pub(crate) async fn create_report(
        &self,
        disaster_id: DisasterId,
        user_id: &str,
        report: &NewReport,
        created_at: DateTime<Utc>,
    ) -> Result<Report, StoreError> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "INSERT INTO reports ({REPORT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {REPORT_COLUMNS}"
        ))
        .bind(ReportId::new().into_inner())
        .bind(disaster_id.into_inner())
        .bind(user_id)
        .bind(&report.content)
        .bind(report.image_url.as_deref())
        .bind(status_to_db(VerificationStatus::Pending))
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| missing_parent(e, disaster_id))?;

        row.try_into()
    }

    pub(crate) async fn list_reports(
        &self,
        disaster_id: DisasterId,
    ) -> Result<Vec<Report>, StoreError> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports
             WHERE disaster_id = $1
             ORDER BY created_at, id"
        ))
        .bind(disaster_id.into_inner())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Report::try_from).collect()
    }
}

/// A foreign-key violation on insert means the parent disaster is gone.
fn missing_parent(err: sqlx::Error, disaster_id: DisasterId) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && db.is_foreign_key_violation()
    {
        return StoreError::NotFound(format!("disaster {disaster_id}"));
    }
    classify_sqlx(err)
}

const fn status_to_db(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Pending => "pending",
        VerificationStatus::Verified => "verified",
        VerificationStatus::Suspicious => "suspicious",
        VerificationStatus::Rejected => "rejected",
    }
}

fn status_from_db(value: &str) -> Result<VerificationStatus, StoreError> {
    match value {
        "pending" => Ok(VerificationStatus::Pending),
        "verified" => Ok(VerificationStatus::Verified),
        "suspicious" => Ok(VerificationStatus::Suspicious),
        "rejected" => Ok(VerificationStatus::Rejected),
        other => Err(StoreError::Rejected(format!(
            "unknown verification status `{other}`"
        ))),
    }
}

/// Decode a stored trail. Missing or malformed trails read as empty.
///
/// A trail that decodes but breaks the trail invariants (rows written by
/// older deployments or edited by hand) is logged and served as stored.
fn decode_trail(id: Uuid, value: Option<serde_json::Value>) -> Vec<AuditEntry> {
    let Some(value) = value else {
        return Vec::new();
    };
    let trail: Vec<AuditEntry> = serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(disaster_id = %id, error = %e, "Malformed audit trail, reading as empty");
        Vec::new()
    });
    if let Err(e) = validate_trail(&trail) {
        tracing::warn!(disaster_id = %id, error = %e, "Audit trail breaks invariants, serving as stored");
    }
    trail
}

/// A row from the `disasters` table.
///
/// Uses runtime types rather than compile-time checked types to
/// avoid requiring a live database during builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DisasterRow {
    /// Record identifier.
    pub id: Uuid,
    /// Short human title.
    pub title: String,
    /// Free-form place name.
    pub location_name: String,
    /// Free-text description.
    pub description: String,
    /// Tag array.
    pub tags: Vec<String>,
    /// Owning identity.
    pub owner_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Trail as stored (JSONB array).
    pub audit_trail: Option<serde_json::Value>,
}

impl DisasterRow {
    fn into_disaster(self) -> Disaster {
        Disaster {
            id: DisasterId::from(self.id),
            title: self.title,
            location_name: self.location_name,
            description: self.description,
            tags: self.tags.into_iter().collect(),
            owner_id: self.owner_id,
            created_at: self.created_at,
            audit_trail: decode_trail(self.id, self.audit_trail),
        }
    }
}

/// A row from the `resources` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResourceRow {
    /// Resource identifier.
    pub id: Uuid,
    /// Owning disaster.
    pub disaster_id: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form category.
    #[sqlx(rename = "type")]
    pub resource_type: String,
    /// Free-form place name.
    pub location_name: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Self {
            id: ResourceId::from(row.id),
            disaster_id: DisasterId::from(row.disaster_id),
            name: row.name,
            resource_type: row.resource_type,
            location_name: row.location_name,
            lat: row.lat,
            lon: row.lon,
            created_at: row.created_at,
        }
    }
}

/// A row from the `reports` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportRow {
    /// Report identifier.
    pub id: Uuid,
    /// Disaster the report is about.
    pub disaster_id: Uuid,
    /// Submitting identity.
    pub user_id: String,
    /// Report text.
    pub content: String,
    /// Optional photo URL.
    pub image_url: Option<String>,
    /// Verification state as text.
    pub verification_status: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for Report {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ReportId::from(row.id),
            disaster_id: DisasterId::from(row.disaster_id),
            user_id: row.user_id,
            content: row.content,
            image_url: row.image_url,
            verification_status: status_from_db(&row.verification_status)?,
            created_at: row.created_at,
        })
    }
}
