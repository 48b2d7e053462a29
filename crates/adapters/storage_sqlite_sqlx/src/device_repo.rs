//! `SQLite` implementation of [`DeviceRepository`].
//!
//! The cause of the last value change is kept next to the value as a
//! `(provenance_kind, provenance_id)` pair.

use std::future::Future;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use homegate_app::ports::DeviceRepository;
use homegate_domain::device::{Device, Provenance};
use homegate_domain::error::GatewayError;
use homegate_domain::id::DeviceId;

use crate::error::StorageError;
use crate::row::{parse, parse_opt, required};
use crate::storage::SqliteStorage;

/// Wrapper for converting database rows into domain [`Device`].
struct Wrapper(Device);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let device_type: String = row.try_get("device_type")?;
        let mqtt_connection_id: Option<String> = row.try_get("mqtt_connection_id")?;
        let sms_connection_id: Option<String> = row.try_get("sms_connection_id")?;

        Ok(Self(Device {
            id: parse(&id)?,
            name: row.try_get("name")?,
            value: row.try_get("value")?,
            device_type: parse(&device_type)?,
            mqtt_connection_id: parse_opt(mqtt_connection_id.as_deref())?,
            sms_connection_id: parse_opt(sms_connection_id.as_deref())?,
        }))
    }
}

/// Wrapper for the provenance columns of a device row.
struct ProvenanceRow(Option<Provenance>);

impl<'r> FromRow<'r, SqliteRow> for ProvenanceRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: Option<String> = row.try_get("provenance_kind")?;
        let id: Option<String> = row.try_get("provenance_id")?;
        let provenance = match kind.as_deref() {
            None => None,
            Some("manual") => Some(Provenance::Manual),
            Some("event") => Some(Provenance::Event(parse(&required(id, "provenance_id")?)?)),
            Some("command") => Some(Provenance::Command(parse(&required(id, "provenance_id")?)?)),
            Some(other) => {
                return Err(sqlx::Error::ColumnDecode {
                    index: "provenance_kind".to_string(),
                    source: format!("unknown provenance {other}").into(),
                });
            }
        };
        Ok(Self(provenance))
    }
}

fn provenance_columns(provenance: Provenance) -> (&'static str, Option<String>) {
    match provenance {
        Provenance::Event(id) => ("event", Some(id.to_string())),
        Provenance::Command(id) => ("command", Some(id.to_string())),
        Provenance::Manual => ("manual", None),
    }
}

const INSERT: &str = "INSERT INTO devices \
    (id, name, value, device_type, mqtt_connection_id, sms_connection_id) \
    VALUES (?, ?, ?, ?, ?, ?)";
const SELECT_BY_ID: &str = "SELECT * FROM devices WHERE id = ?";
const SELECT_ALL: &str = "SELECT * FROM devices ORDER BY name";
const UPDATE_VALUE: &str =
    "UPDATE devices SET value = ?, provenance_kind = ?, provenance_id = ? WHERE id = ?";
const SELECT_PROVENANCE: &str = "SELECT provenance_kind, provenance_id FROM devices WHERE id = ?";
const DELETE_BY_ID: &str = "DELETE FROM devices WHERE id = ?";

impl DeviceRepository for SqliteStorage {
    fn create_device(
        &self,
        device: Device,
    ) -> impl Future<Output = Result<Device, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            device.validate()?;
            sqlx::query(INSERT)
                .bind(device.id.to_string())
                .bind(&device.name)
                .bind(&device.value)
                .bind(device.device_type.as_str())
                .bind(device.mqtt_connection_id.map(|id| id.to_string()))
                .bind(device.sms_connection_id.map(|id| id.to_string()))
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(device)
        }
    }

    fn get_device(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
                .bind(id.to_string())
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(row.map(|w| w.0))
        }
    }

    fn list_devices(&self) -> impl Future<Output = Result<Vec<Device>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }

    fn list_devices_with_state(&self)
    -> impl Future<Output = Result<Vec<Device>, GatewayError>> + Send {
        let all = self.list_devices();
        async move {
            Ok(all
                .await?
                .into_iter()
                .filter(|device| device.device_type.has_state())
                .collect())
        }
    }

    fn update_device_value(
        &self,
        id: DeviceId,
        value: &str,
        provenance: Provenance,
    ) -> impl Future<Output = Result<Option<Device>, GatewayError>> + Send {
        let pool = self.pool.clone();
        let value = value.to_string();
        let storage = self.clone();
        async move {
            let (kind, provenance_id) = provenance_columns(provenance);
            let result = sqlx::query(UPDATE_VALUE)
                .bind(value)
                .bind(kind)
                .bind(provenance_id)
                .bind(id.to_string())
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            if result.rows_affected() == 0 {
                return Ok(None);
            }
            storage.get_device(id).await
        }
    }

    fn device_provenance(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Provenance>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let row: Option<ProvenanceRow> = sqlx::query_as(SELECT_PROVENANCE)
                .bind(id.to_string())
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(row.and_then(|p| p.0))
        }
    }

    fn delete_device(&self, id: DeviceId) -> impl Future<Output = Result<(), GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            sqlx::query(DELETE_BY_ID)
                .bind(id.to_string())
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(())
        }
    }
}
