//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{FileRecordRow, UploadPartRow, UploadSessionRow};
use crate::repos::{FileRepo, SessionRepo};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use time::OffsetDateTime;
use uuid::Uuid;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: SessionRepo + FileRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetadataError::Config(format!("cannot create {parent:?}: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }
}

fn parse_uuid(s: &str) -> MetadataResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| MetadataError::Internal(format!("corrupt UUID column: {e}")))
}

fn row_to_session(row: &SqliteRow) -> MetadataResult<UploadSessionRow> {
    Ok(UploadSessionRow {
        upload_id: parse_uuid(&row.try_get::<String, _>("upload_id")?)?,
        storage_key: row.try_get("storage_key")?,
        multipart_id: row.try_get("multipart_id")?,
        total_size: row.try_get("total_size")?,
        uploaded_size: row.try_get("uploaded_size")?,
        filename: row.try_get("filename")?,
        content_type: row.try_get("content_type")?,
        custom_metadata: row.try_get("custom_metadata")?,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        completed: row.try_get("completed")?,
    })
}

fn row_to_part(row: &SqliteRow) -> MetadataResult<UploadPartRow> {
    Ok(UploadPartRow {
        upload_id: parse_uuid(&row.try_get::<String, _>("upload_id")?)?,
        part_number: row.try_get("part_number")?,
        etag: row.try_get("etag")?,
        size_bytes: row.try_get("size_bytes")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn row_to_file(row: &SqliteRow) -> MetadataResult<FileRecordRow> {
    Ok(FileRecordRow {
        file_id: parse_uuid(&row.try_get::<String, _>("file_id")?)?,
        filename: row.try_get("filename")?,
        size_bytes: row.try_get("size_bytes")?,
        content_type: row.try_get("content_type")?,
        checksum: row.try_get("checksum")?,
        storage_key: row.try_get("storage_key")?,
        owner_id: row.try_get("owner_id")?,
        custom_metadata: row.try_get("custom_metadata")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_sessions (
                upload_id       TEXT PRIMARY KEY,
                storage_key     TEXT NOT NULL,
                multipart_id    TEXT NOT NULL,
                total_size      INTEGER NOT NULL,
                uploaded_size   INTEGER NOT NULL DEFAULT 0,
                filename        TEXT NOT NULL,
                content_type    TEXT NOT NULL,
                custom_metadata TEXT NOT NULL DEFAULT '{}',
                owner_id        TEXT,
                created_at      TEXT NOT NULL,
                expires_at      TEXT NOT NULL,
                completed       INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_sessions_expires_at \
             ON upload_sessions (expires_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_parts (
                upload_id   TEXT NOT NULL REFERENCES upload_sessions (upload_id)
                            ON DELETE CASCADE,
                part_number INTEGER NOT NULL,
                etag        TEXT NOT NULL,
                size_bytes  INTEGER NOT NULL,
                uploaded_at TEXT NOT NULL,
                PRIMARY KEY (upload_id, part_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id         TEXT PRIMARY KEY,
                filename        TEXT NOT NULL,
                size_bytes      INTEGER NOT NULL,
                content_type    TEXT NOT NULL,
                checksum        TEXT NOT NULL,
                storage_key     TEXT NOT NULL,
                owner_id        TEXT,
                custom_metadata TEXT NOT NULL DEFAULT '{}',
                uploaded_at     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepo for SqliteStore {
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                upload_id, storage_key, multipart_id, total_size, uploaded_size,
                filename, content_type, custom_metadata, owner_id,
                created_at, expires_at, completed
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(session.upload_id.to_string())
        .bind(&session.storage_key)
        .bind(&session.multipart_id)
        .bind(session.total_size)
        .bind(session.uploaded_size)
        .bind(&session.filename)
        .bind(&session.content_type)
        .bind(&session.custom_metadata)
        .bind(&session.owner_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.completed)
        .execute(&self.pool)
        .await
        .map_err(|e| MetadataError::from_sqlx(e, "upload session"))?;

        Ok(())
    }

    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
        let row = sqlx::query("SELECT * FROM upload_sessions WHERE upload_id = ?1")
            .bind(upload_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn get_parts(&self, upload_id: Uuid) -> MetadataResult<Vec<UploadPartRow>> {
        let rows = sqlx::query(
            "SELECT * FROM upload_parts WHERE upload_id = ?1 ORDER BY part_number ASC",
        )
        .bind(upload_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_part).collect()
    }

    async fn append_part(
        &self,
        upload_id: Uuid,
        part: &UploadPartRow,
        new_uploaded_size: i64,
    ) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO upload_parts (upload_id, part_number, etag, size_bytes, uploaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(upload_id.to_string())
        .bind(part.part_number)
        .bind(&part.etag)
        .bind(part.size_bytes)
        .bind(part.uploaded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| MetadataError::from_sqlx(e, "upload part"))?;

        let result = sqlx::query(
            "UPDATE upload_sessions SET uploaded_size = ?1 \
             WHERE upload_id = ?2 AND completed = 0",
        )
        .bind(new_uploaded_size)
        .bind(upload_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "open upload session {upload_id}"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_completed(&self, upload_id: Uuid, completed: bool) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE upload_sessions SET completed = ?1 WHERE upload_id = ?2")
            .bind(completed)
            .bind(upload_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "upload session {upload_id}"
            )));
        }
        Ok(())
    }

    async fn delete_session(&self, upload_id: Uuid) -> MetadataResult<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE upload_id = ?1")
            .bind(upload_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_expired_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>> {
        let rows = sqlx::query(
            "SELECT * FROM upload_sessions WHERE expires_at <= ?1 \
             ORDER BY expires_at ASC LIMIT ?2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    async fn get_live_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>> {
        let rows = sqlx::query(
            "SELECT * FROM upload_sessions WHERE expires_at > ?1 AND completed = 0 \
             ORDER BY expires_at ASC LIMIT ?2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    async fn count_active_sessions(&self) -> MetadataResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM upload_sessions WHERE completed = 0")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count as u64)
    }
}

#[async_trait]
impl FileRepo for SqliteStore {
    async fn insert_file(&self, record: &FileRecordRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                file_id, filename, size_bytes, content_type, checksum,
                storage_key, owner_id, custom_metadata, uploaded_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(record.file_id.to_string())
        .bind(&record.filename)
        .bind(record.size_bytes)
        .bind(&record.content_type)
        .bind(&record.checksum)
        .bind(&record.storage_key)
        .bind(&record.owner_id)
        .bind(&record.custom_metadata)
        .bind(record.uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MetadataError::from_sqlx(e, "file record"))?;

        Ok(())
    }

    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRecordRow>> {
        let row = sqlx::query("SELECT * FROM files WHERE file_id = ?1")
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_file).transpose()
    }
}
