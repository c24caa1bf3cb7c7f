//! PostgreSQL implementation of [`RecordStore`]
//!
//! Assignment writes run inside a single transaction. The schema carries a
//! partial unique index on `driver_load_assignments(driver_id) WHERE status =
//! 'ASSIGNED'`, so two concurrent creates for the same driver can never both
//! commit even when both pass the application-level pre-check.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use uuid::Uuid;

use super::repository::{RecordStore, StoreError, StoreResult};
use crate::models::{
    Assignment, AssignmentDetails, AssignmentStatus, Driver, DriverStatus, Load, LoadStatus,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS drivers (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        license_number TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'ACTIVE'
            CHECK (status IN ('ACTIVE', 'INACTIVE')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uq_drivers_license_number UNIQUE (license_number)
    );

    CREATE TABLE IF NOT EXISTS loads (
        id UUID PRIMARY KEY,
        origin TEXT NOT NULL,
        destination TEXT NOT NULL,
        cargo_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'OPEN'
            CHECK (status IN ('OPEN', 'ASSIGNED', 'COMPLETED', 'CANCELLED')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_loads_created_at
        ON loads(created_at DESC);

    CREATE TABLE IF NOT EXISTS driver_load_assignments (
        id UUID PRIMARY KEY,
        driver_id UUID NOT NULL REFERENCES drivers(id),
        load_id UUID NOT NULL REFERENCES loads(id),
        status TEXT NOT NULL DEFAULT 'ASSIGNED'
            CHECK (status IN ('ASSIGNED', 'COMPLETED', 'CANCELLED')),
        assigned_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE UNIQUE INDEX IF NOT EXISTS uq_assignments_active_driver
        ON driver_load_assignments(driver_id)
        WHERE status = 'ASSIGNED';

    CREATE INDEX IF NOT EXISTS idx_assignments_driver_status
        ON driver_load_assignments(driver_id, status);

    CREATE INDEX IF NOT EXISTS idx_assignments_load
        ON driver_load_assignments(load_id);
"#;

const ASSIGNMENT_COLUMNS: &str = "id, driver_id, load_id, status, assigned_at";

/// PostgreSQL-backed record store
#[derive(Clone)]
pub struct PgRecordStore {
    pool: Pool,
}

impl PgRecordStore {
    /// Wrap an existing pool
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .context("Failed to create record store schema")?;

        tracing::info!("Record store schema initialized");
        Ok(())
    }

    /// Insert a driver (driver management path, used for seeding)
    pub async fn insert_driver(&self, driver: &Driver) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO drivers (id, name, license_number, status, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &driver.id,
                    &driver.name,
                    &driver.license_number,
                    &driver.status.as_str(),
                    &driver.created_at,
                    &driver.updated_at,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    /// Insert a load (load management path, used for seeding)
    pub async fn insert_load(&self, load: &Load) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO loads (id, origin, destination, cargo_type, status, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &load.id,
                    &load.origin,
                    &load.destination,
                    &load.cargo_type,
                    &load.status.as_str(),
                    &load.created_at,
                    &load.updated_at,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get_driver(&self, id: Uuid) -> StoreResult<Option<Driver>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, license_number, status, created_at, updated_at
                 FROM drivers WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(map_pg_error)?;

        row.map(|r| driver_from_row(&r, "")).transpose()
    }

    async fn get_load(&self, id: Uuid) -> StoreResult<Option<Load>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, origin, destination, cargo_type, status, created_at, updated_at
                 FROM loads WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(map_pg_error)?;

        row.map(|r| load_from_row(&r, "")).transpose()
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {ASSIGNMENT_COLUMNS} FROM driver_load_assignments WHERE id = $1"),
                &[&id],
            )
            .await
            .map_err(map_pg_error)?;

        row.map(|r| assignment_from_row(&r)).transpose()
    }

    async fn get_assignment_details(&self, id: Uuid) -> StoreResult<Option<AssignmentDetails>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT a.id, a.driver_id, a.load_id, a.status, a.assigned_at,
                        d.id AS d_id, d.name AS d_name, d.license_number AS d_license_number,
                        d.status AS d_status, d.created_at AS d_created_at,
                        d.updated_at AS d_updated_at,
                        l.id AS l_id, l.origin AS l_origin, l.destination AS l_destination,
                        l.cargo_type AS l_cargo_type, l.status AS l_status,
                        l.created_at AS l_created_at, l.updated_at AS l_updated_at
                 FROM driver_load_assignments a
                 JOIN drivers d ON d.id = a.driver_id
                 JOIN loads l ON l.id = a.load_id
                 WHERE a.id = $1",
                &[&id],
            )
            .await
            .map_err(map_pg_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(AssignmentDetails {
            assignment: assignment_from_row(&row)?,
            driver: driver_from_row(&row, "d_")?,
            load: load_from_row(&row, "l_")?,
        }))
    }

    async fn find_assignment_by_driver(
        &self,
        driver_id: Uuid,
        status: AssignmentStatus,
    ) -> StoreResult<Option<Assignment>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM driver_load_assignments
                     WHERE driver_id = $1 AND status = $2
                     ORDER BY assigned_at
                     LIMIT 1"
                ),
                &[&driver_id, &status.as_str()],
            )
            .await
            .map_err(map_pg_error)?;

        row.map(|r| assignment_from_row(&r)).transpose()
    }

    async fn assign(&self, assignment: &Assignment) -> StoreResult<Assignment> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(map_pg_error)?;

        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO driver_load_assignments ({ASSIGNMENT_COLUMNS})
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING {ASSIGNMENT_COLUMNS}"
                ),
                &[
                    &assignment.id,
                    &assignment.driver_id,
                    &assignment.load_id,
                    &assignment.status.as_str(),
                    &assignment.assigned_at,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        let inserted = assignment_from_row(&row)?;

        // Guarded on OPEN: a concurrent assign of the same load waits on the row
        // lock and then matches nothing
        let updated = tx
            .execute(
                "UPDATE loads SET status = $2, updated_at = NOW()
                 WHERE id = $1 AND status = $3",
                &[
                    &assignment.load_id,
                    &LoadStatus::Assigned.as_str(),
                    &LoadStatus::Open.as_str(),
                ],
            )
            .await
            .map_err(map_pg_error)?;
        if updated == 0 {
            return Err(StoreError::StaleState {
                entity: "load",
                id: assignment.load_id,
            });
        }

        tx.commit().await.map_err(map_pg_error)?;
        Ok(inserted)
    }

    async fn transition(
        &self,
        assignment_id: Uuid,
        target: AssignmentStatus,
    ) -> StoreResult<Assignment> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(map_pg_error)?;

        let row = tx
            .query_opt(
                &format!(
                    "UPDATE driver_load_assignments SET status = $2
                     WHERE id = $1 AND status = $3
                     RETURNING {ASSIGNMENT_COLUMNS}"
                ),
                &[
                    &assignment_id,
                    &target.as_str(),
                    &AssignmentStatus::Assigned.as_str(),
                ],
            )
            .await
            .map_err(map_pg_error)?;
        let Some(row) = row else {
            return Err(StoreError::StaleState {
                entity: "assignment",
                id: assignment_id,
            });
        };
        let updated = assignment_from_row(&row)?;

        let touched = tx
            .execute(
                "UPDATE loads SET status = $2, updated_at = NOW() WHERE id = $1",
                &[&updated.load_id, &target.load_status().as_str()],
            )
            .await
            .map_err(map_pg_error)?;
        if touched == 0 {
            return Err(StoreError::Missing {
                entity: "load",
                id: updated.load_id,
            });
        }

        tx.commit().await.map_err(map_pg_error)?;
        Ok(updated)
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

/// Translate a driver error, keeping unique violations distinguishable
pub(crate) fn map_pg_error(err: tokio_postgres::Error) -> StoreError {
    if let Some(db) = err.as_db_error() {
        if db.code() == &SqlState::UNIQUE_VIOLATION {
            return StoreError::UniqueViolation {
                constraint: db.constraint().unwrap_or_default().to_string(),
            };
        }
    }
    StoreError::Database(err)
}

fn column(prefix: &str, name: &str) -> String {
    format!("{prefix}{name}")
}

fn parse_status<T: std::str::FromStr>(raw: &str) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn try_get<'a, T>(row: &'a Row, name: &str) -> StoreResult<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("{name}: {e}")))
}

fn driver_from_row(row: &Row, prefix: &str) -> StoreResult<Driver> {
    let status: String = try_get(row, &column(prefix, "status"))?;
    Ok(Driver {
        id: try_get(row, &column(prefix, "id"))?,
        name: try_get(row, &column(prefix, "name"))?,
        license_number: try_get(row, &column(prefix, "license_number"))?,
        status: parse_status::<DriverStatus>(&status)?,
        created_at: try_get(row, &column(prefix, "created_at"))?,
        updated_at: try_get(row, &column(prefix, "updated_at"))?,
    })
}

fn load_from_row(row: &Row, prefix: &str) -> StoreResult<Load> {
    let status: String = try_get(row, &column(prefix, "status"))?;
    Ok(Load {
        id: try_get(row, &column(prefix, "id"))?,
        origin: try_get(row, &column(prefix, "origin"))?,
        destination: try_get(row, &column(prefix, "destination"))?,
        cargo_type: try_get(row, &column(prefix, "cargo_type"))?,
        status: parse_status::<LoadStatus>(&status)?,
        created_at: try_get(row, &column(prefix, "created_at"))?,
        updated_at: try_get(row, &column(prefix, "updated_at"))?,
    })
}

fn assignment_from_row(row: &Row) -> StoreResult<Assignment> {
    let status: String = try_get(row, "status")?;
    Ok(Assignment {
        id: try_get(row, "id")?,
        driver_id: try_get(row, "driver_id")?,
        load_id: try_get(row, "load_id")?,
        status: parse_status::<AssignmentStatus>(&status)?,
        assigned_at: try_get(row, "assigned_at")?,
    })
}
