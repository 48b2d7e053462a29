//! `SQLite` implementation of [`EventRepository`].

use std::future::Future;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use homegate_app::ports::EventRepository;
use homegate_domain::error::GatewayError;
use homegate_domain::event::Event;
use homegate_domain::id::{ConnectionId, DeviceId, EventId};

use crate::error::StorageError;
use crate::row::parse;
use crate::storage::SqliteStorage;

/// Wrapper for converting database rows into domain [`Event`].
struct Wrapper(Event);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let connection_id: String = row.try_get("connection_id")?;
        let device_id: String = row.try_get("device_id")?;

        Ok(Self(Event {
            id: parse(&id)?,
            event_type: row.try_get("event_type")?,
            connection_id: parse(&connection_id)?,
            device_id: parse(&device_id)?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            is_json: row.try_get("is_json")?,
            data_field: row.try_get("data_field")?,
        }))
    }
}

const INSERT: &str = "INSERT INTO events \
    (id, event_type, connection_id, device_id, topic, payload, is_json, data_field) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)";
const SELECT_BY_ID: &str = "SELECT * FROM events WHERE id = ?";
const SELECT_BY_CONNECTION: &str = "SELECT * FROM events WHERE connection_id = ?";
const SELECT_BY_TOPIC: &str = "SELECT * FROM events WHERE connection_id = ? AND topic = ?";
const SELECT_BY_PAYLOAD: &str =
    "SELECT * FROM events WHERE connection_id = ? AND topic = ? AND payload = ?";
const SELECT_BY_DEVICE: &str = "SELECT * FROM events WHERE device_id = ?";
const DELETE_BY_ID: &str = "DELETE FROM events WHERE id = ?";

impl SqliteStorage {
    async fn fetch_events(
        &self,
        query: &'static str,
        binds: Vec<String>,
    ) -> Result<Vec<Event>, GatewayError> {
        let mut query = sqlx::query_as::<_, Wrapper>(query);
        for bind in binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }
}

impl EventRepository for SqliteStorage {
    fn create_event(
        &self,
        event: Event,
    ) -> impl Future<Output = Result<Event, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            event.validate()?;
            sqlx::query(INSERT)
                .bind(event.id.to_string())
                .bind(&event.event_type)
                .bind(event.connection_id.to_string())
                .bind(event.device_id.to_string())
                .bind(&event.topic)
                .bind(&event.payload)
                .bind(event.is_json)
                .bind(&event.data_field)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(event)
        }
    }

    fn get_event(
        &self,
        id: EventId,
    ) -> impl Future<Output = Result<Option<Event>, GatewayError>> + Send {
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

    fn events_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> impl Future<Output = Result<Vec<Event>, GatewayError>> + Send {
        self.fetch_events(SELECT_BY_CONNECTION, vec![connection_id.to_string()])
    }

    fn events_for_topic(
        &self,
        connection_id: ConnectionId,
        topic: &str,
    ) -> impl Future<Output = Result<Vec<Event>, GatewayError>> + Send {
        self.fetch_events(SELECT_BY_TOPIC, vec![connection_id.to_string(), topic.to_string()])
    }

    fn events_for_payload(
        &self,
        connection_id: ConnectionId,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<Vec<Event>, GatewayError>> + Send {
        self.fetch_events(
            SELECT_BY_PAYLOAD,
            vec![connection_id.to_string(), topic.to_string(), payload.to_string()],
        )
    }

    fn events_for_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Event>, GatewayError>> + Send {
        self.fetch_events(SELECT_BY_DEVICE, vec![device_id.to_string()])
    }

    fn delete_event(&self, id: EventId) -> impl Future<Output = Result<(), GatewayError>> + Send {
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
