//! `SQLite` implementation of [`LogRepository`].

use std::future::Future;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use homegate_app::ports::LogRepository;
use homegate_domain::error::GatewayError;
use homegate_domain::log_message::LogMessage;

use crate::error::StorageError;
use crate::row::{format_timestamp, parse, parse_opt, parse_timestamp};
use crate::storage::SqliteStorage;

/// Wrapper for converting database rows into domain [`LogMessage`].
struct Wrapper(LogMessage);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let direction: String = row.try_get("direction")?;
        let connection_id: Option<String> = row.try_get("connection_id")?;
        let timestamp: String = row.try_get("timestamp")?;

        Ok(Self(LogMessage {
            id: parse(&id)?,
            direction: parse(&direction)?,
            connection_id: parse_opt(connection_id.as_deref())?,
            address: row.try_get("address")?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            timestamp: parse_timestamp(&timestamp)?,
        }))
    }
}

const INSERT: &str = "INSERT INTO log_messages \
    (id, direction, connection_id, address, topic, payload, timestamp) \
    VALUES (?, ?, ?, ?, ?, ?, ?)";
const SELECT_RECENT: &str = "SELECT * FROM log_messages ORDER BY seq DESC LIMIT ?";

impl LogRepository for SqliteStorage {
    fn append_log(
        &self,
        message: LogMessage,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            sqlx::query(INSERT)
                .bind(message.id.to_string())
                .bind(message.direction.as_str())
                .bind(message.connection_id.map(|id| id.to_string()))
                .bind(&message.address)
                .bind(&message.topic)
                .bind(&message.payload)
                .bind(format_timestamp(message.timestamp))
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(())
        }
    }

    fn recent_logs(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LogMessage>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_RECENT)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use homegate_domain::id::ConnectionId;
    use homegate_domain::log_message::Direction;

    use super::*;
    use crate::storage::testing::setup;

    #[tokio::test]
    async fn should_return_most_recent_logs_first() {
        let storage = setup().await;
        let conn_id = ConnectionId::new();
        storage
            .append_log(
                LogMessage::inbound("broker.local", "lamp/state", "on").with_connection(conn_id),
            )
            .await
            .unwrap();
        storage
            .append_log(LogMessage::outbound("broker.local", "lamp/set", "off"))
            .await
            .unwrap();
        storage
            .append_log(LogMessage::inbound("+3360000", "", "ALARM"))
            .await
            .unwrap();

        let recent = storage.recent_logs(2).await.unwrap();

        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, "ALARM");
        assert_eq!(recent[1].direction, Direction::Outbound);
        let all = storage.recent_logs(10).await.unwrap();
        assert_eq!(all[2].connection_id, Some(conn_id));
    }
}
