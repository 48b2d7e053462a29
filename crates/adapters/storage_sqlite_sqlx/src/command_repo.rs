//! `SQLite` implementation of [`CommandRepository`].

use std::future::Future;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use homegate_app::ports::CommandRepository;
use homegate_domain::command::{Command, TransportKind};
use homegate_domain::error::GatewayError;
use homegate_domain::id::{CommandId, DeviceId};

use crate::error::StorageError;
use crate::row::parse;
use crate::storage::SqliteStorage;

/// Wrapper for converting database rows into domain [`Command`].
struct Wrapper(Command);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let transport: String = row.try_get("transport")?;
        let connection_id: String = row.try_get("connection_id")?;
        let device_id: String = row.try_get("device_id")?;
        let mode: String = row.try_get("mode")?;

        Ok(Self(Command {
            id: parse(&id)?,
            action: row.try_get("action")?,
            transport: parse(&transport)?,
            connection_id: parse(&connection_id)?,
            device_id: parse(&device_id)?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            data_field: row.try_get("data_field")?,
            is_json: row.try_get("is_json")?,
            mode: parse(&mode)?,
        }))
    }
}

const INSERT: &str = "INSERT INTO commands \
    (id, action, transport, connection_id, device_id, topic, payload, data_field, is_json, mode) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
const SELECT_BY_ID: &str = "SELECT * FROM commands WHERE id = ?";
const SELECT_BY_DEVICE_ACTION: &str =
    "SELECT * FROM commands WHERE device_id = ? AND action = ? AND transport = ? LIMIT 1";
const DELETE_BY_ID: &str = "DELETE FROM commands WHERE id = ?";

impl CommandRepository for SqliteStorage {
    fn create_command(
        &self,
        command: Command,
    ) -> impl Future<Output = Result<Command, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            command.validate()?;
            sqlx::query(INSERT)
                .bind(command.id.to_string())
                .bind(&command.action)
                .bind(command.transport.as_str())
                .bind(command.connection_id.to_string())
                .bind(command.device_id.to_string())
                .bind(&command.topic)
                .bind(&command.payload)
                .bind(&command.data_field)
                .bind(command.is_json)
                .bind(command.mode.as_str())
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(command)
        }
    }

    fn get_command(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<Option<Command>, GatewayError>> + Send {
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

    fn find_command(
        &self,
        device_id: DeviceId,
        action: &str,
        transport: TransportKind,
    ) -> impl Future<Output = Result<Option<Command>, GatewayError>> + Send {
        let pool = self.pool.clone();
        let action = action.to_string();
        async move {
            let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_DEVICE_ACTION)
                .bind(device_id.to_string())
                .bind(action)
                .bind(transport.as_str())
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(row.map(|w| w.0))
        }
    }

    fn delete_command(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send {
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
