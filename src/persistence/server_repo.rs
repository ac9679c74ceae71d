//! Server record repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::server::Server;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for per-user server records.
#[derive(Clone)]
pub struct ServerRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ServerRow {
    id: i64,
    user_id: i64,
    name: String,
    proto: String,
    ip: String,
    port: i64,
    base_url: String,
}

impl ServerRow {
    fn into_server(self) -> Result<Server> {
        let port = u16::try_from(self.port)
            .map_err(|e| AppError::Db(format!("invalid port {}: {e}", self.port)))?;
        Ok(Server {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            proto: self.proto,
            ip: self.ip,
            port,
            base_url: self.base_url,
        })
    }
}

const SELECT_SERVER: &str = "SELECT id, user_id, name, proto, ip, port, base_url FROM servers";

impl ServerRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a server record, returning it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails, for example when the
    /// user already has a server of that name.
    pub async fn create(&self, server: &Server) -> Result<Server> {
        let result = sqlx::query(
            "INSERT INTO servers (user_id, name, proto, ip, port, base_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(server.user_id)
        .bind(&server.name)
        .bind(&server.proto)
        .bind(&server.ip)
        .bind(i64::from(server.port))
        .bind(&server.base_url)
        .execute(self.db.as_ref())
        .await?;

        Ok(Server {
            id: result.last_insert_rowid(),
            ..server.clone()
        })
    }

    /// Fetch one server by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the record does not exist.
    pub async fn get(&self, id: i64) -> Result<Server> {
        let row: Option<ServerRow> = sqlx::query_as(&format!("{SELECT_SERVER} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(ServerRow::into_server)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("server {id} not found")))
    }

    /// All servers of a user, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Server>> {
        let rows: Vec<ServerRow> =
            sqlx::query_as(&format!("{SELECT_SERVER} WHERE user_id = ?1 ORDER BY id ASC"))
                .bind(user_id)
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(ServerRow::into_server).collect()
    }

    /// Record where a server ended up listening.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_address(&self, id: i64, ip: &str, port: u16) -> Result<()> {
        sqlx::query("UPDATE servers SET ip = ?1, port = ?2 WHERE id = ?3")
            .bind(ip)
            .bind(i64::from(port))
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Remove every server record of a user. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_for_user(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM servers WHERE user_id = ?1")
            .bind(user_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
