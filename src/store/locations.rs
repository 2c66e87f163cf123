// aqi_location table: seeded from config, read by both tasks.

use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;
use tracing::{info, instrument};

use super::{Store, from_millis, now_millis};
use crate::models::{Location, NewLocation};

pub(super) async fn init_locations_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aqi_location (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            location_id INTEGER NOT NULL UNIQUE,
            location_name TEXT NOT NULL,
            location_description TEXT NOT NULL,
            serial_no TEXT NOT NULL,
            model TEXT NOT NULL,
            firmware_version TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

impl Store {
    /// Inserts the location, or updates its metadata if the external id already exists.
    /// The internal key never changes once assigned.
    #[instrument(
        skip(self, loc),
        fields(repo = "locations", operation = "upsert_location", external_id = loc.external_id)
    )]
    pub async fn upsert_location(&self, loc: &NewLocation) -> anyhow::Result<Location> {
        let now = now_millis();
        sqlx::query(
            r#"
            INSERT INTO aqi_location
            (location_id, location_name, location_description, serial_no, model, firmware_version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (location_id) DO UPDATE SET
                location_name = excluded.location_name,
                location_description = excluded.location_description,
                serial_no = excluded.serial_no,
                model = excluded.model,
                firmware_version = excluded.firmware_version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(loc.external_id)
        .bind(&loc.name)
        .bind(&loc.description)
        .bind(&loc.serial_no)
        .bind(&loc.model)
        .bind(&loc.firmware_version)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_location_by_external_id(loc.external_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("location {} missing after upsert", loc.external_id))
    }

    /// Seeds every configured location. Returns how many are now stored.
    pub async fn seed_locations(&self, locations: &[NewLocation]) -> anyhow::Result<usize> {
        for loc in locations {
            let stored = self.upsert_location(loc).await?;
            info!(
                location_id = stored.external_id,
                id = stored.id,
                name = %stored.name,
                "location seeded"
            );
        }
        Ok(self.list_locations().await?.len())
    }

    #[instrument(skip(self), fields(repo = "locations", operation = "list_locations"))]
    pub async fn list_locations(&self) -> anyhow::Result<Vec<Location>> {
        let rows = sqlx::query(
            "SELECT id, location_id, location_name, location_description, serial_no, model,
                    firmware_version, created_at, updated_at
             FROM aqi_location ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_location_row).collect()
    }

    pub async fn get_location_by_external_id(
        &self,
        external_id: i64,
    ) -> anyhow::Result<Option<Location>> {
        let row = sqlx::query(
            "SELECT id, location_id, location_name, location_description, serial_no, model,
                    firmware_version, created_at, updated_at
             FROM aqi_location WHERE location_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_location_row).transpose()
    }
}

fn parse_location_row(row: &SqliteRow) -> anyhow::Result<Location> {
    Ok(Location {
        id: row.try_get("id")?,
        external_id: row.try_get("location_id")?,
        name: row.try_get("location_name")?,
        description: row.try_get("location_description")?,
        serial_no: row.try_get("serial_no")?,
        model: row.try_get("model")?,
        firmware_version: row.try_get("firmware_version")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}
