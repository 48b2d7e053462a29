//! `SQLite` implementation of [`ConnectionRepository`].

use std::future::Future;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use homegate_app::ports::ConnectionRepository;
use homegate_domain::connection::{Connection, ConnectionType};
use homegate_domain::error::GatewayError;
use homegate_domain::id::ConnectionId;

use crate::error::StorageError;
use crate::row::{decode_err, parse};
use crate::storage::SqliteStorage;

/// Wrapper for converting database rows into domain [`Connection`].
struct Wrapper(Connection);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let mode: String = row.try_get("mode")?;
        let connection_type: String = row.try_get("connection_type")?;
        let port: i64 = row.try_get("port")?;
        let expired_time_ms: i64 = row.try_get("expired_time_ms")?;

        Ok(Self(Connection {
            id: parse(&id)?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            port: u16::try_from(port).map_err(decode_err)?,
            tls: row.try_get("tls")?,
            mode: parse(&mode)?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            parser: row.try_get("parser")?,
            expired_time_ms: u64::try_from(expired_time_ms).map_err(decode_err)?,
            connection_type: parse(&connection_type)?,
        }))
    }
}

const INSERT: &str = "INSERT INTO connections \
    (id, name, address, port, tls, mode, username, password, parser, expired_time_ms, connection_type) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
const SELECT_BY_ID: &str = "SELECT * FROM connections WHERE id = ?";
const SELECT_ALL: &str = "SELECT * FROM connections ORDER BY name";
const SELECT_BY_TYPE: &str = "SELECT * FROM connections WHERE connection_type = ? ORDER BY name";
const SELECT_BY_ADDRESS: &str =
    "SELECT * FROM connections WHERE connection_type = ? AND address = ? LIMIT 1";
const SELECT_LOCAL_BY_USERNAME: &str =
    "SELECT * FROM connections WHERE connection_type = ? AND username = ? LIMIT 1";
const DELETE_BY_ID: &str = "DELETE FROM connections WHERE id = ?";

impl ConnectionRepository for SqliteStorage {
    fn create_connection(
        &self,
        connection: Connection,
    ) -> impl Future<Output = Result<Connection, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            connection.validate()?;
            sqlx::query(INSERT)
                .bind(connection.id.to_string())
                .bind(&connection.name)
                .bind(&connection.address)
                .bind(i64::from(connection.port))
                .bind(connection.tls)
                .bind(connection.mode.as_str())
                .bind(&connection.username)
                .bind(&connection.password)
                .bind(&connection.parser)
                .bind(i64::try_from(connection.expired_time_ms).unwrap_or(i64::MAX))
                .bind(connection.connection_type.as_str())
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(connection)
        }
    }

    fn get_connection(
        &self,
        id: ConnectionId,
    ) -> impl Future<Output = Result<Option<Connection>, GatewayError>> + Send {
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

    fn list_connections(&self)
    -> impl Future<Output = Result<Vec<Connection>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }

    fn list_connections_by_type(
        &self,
        connection_type: ConnectionType,
    ) -> impl Future<Output = Result<Vec<Connection>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_TYPE)
                .bind(connection_type.as_str())
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }

    fn find_connection_by_address(
        &self,
        address: &str,
        connection_type: ConnectionType,
    ) -> impl Future<Output = Result<Option<Connection>, GatewayError>> + Send {
        let pool = self.pool.clone();
        let address = address.to_string();
        async move {
            let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ADDRESS)
                .bind(connection_type.as_str())
                .bind(address)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(row.map(|w| w.0))
        }
    }

    fn find_local_connection(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<Connection>, GatewayError>> + Send {
        let pool = self.pool.clone();
        let username = username.to_string();
        async move {
            let row: Option<Wrapper> = sqlx::query_as(SELECT_LOCAL_BY_USERNAME)
                .bind(ConnectionType::LocalMqtt.as_str())
                .bind(username)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(row.map(|w| w.0))
        }
    }

    fn delete_connection(
        &self,
        id: ConnectionId,
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
