//! Zip export of every application table as JSON.
//!
//! The archive is produced while it is sent: one table is fetched, serialized
//! and appended, and the compressed bytes are handed to the response before
//! the next table is queried. A failing query ends the stream with an error,
//! which truncates the download.

use crate::{db, AppError, Result};
use futures_util::Stream;
use sqlx::SqlitePool;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const BACKUP_FILENAME: &str = "companion-backup.zip";

pub const BACKUP_TABLES: &[&str] = &[
    "users",
    "settings",
    "appointments",
    "media",
    "chat_messages",
    "feedback",
    "milestones",
    "partner_messages",
];

pub fn entry_name(table: &str) -> String {
    format!("db/{}.json", table)
}

/// All rows of `table` as JSON objects keyed by column name.
pub async fn dump_table(pool: &SqlitePool, table: &str) -> Result<Vec<serde_json::Value>> {
    let columns = db::table_columns(pool, table).await?;
    if columns.is_empty() {
        return Err(AppError::Internal(format!("Unknown table: {}", table)));
    }

    let pairs = columns
        .iter()
        .map(|c| format!("'{}', \"{}\"", c, c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT json_object({}) FROM \"{}\" ORDER BY rowid", pairs, table);

    let rows: Vec<String> = sqlx::query_scalar(&sql).fetch_all(pool).await?;

    rows.iter()
        .map(|row| {
            serde_json::from_str(row)
                .map_err(|e| AppError::Internal(format!("Bad row JSON in {}: {}", table, e)))
        })
        .collect()
}

/// Sink shared between the zip writer and the task draining it.
#[derive(Clone, Default)]
struct ChunkBuffer(Arc<Mutex<Vec<u8>>>);

impl ChunkBuffer {
    fn take(&self) -> Vec<u8> {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }
}

impl Write for ChunkBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type Chunk = io::Result<Vec<u8>>;

fn zip_error(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("ZIP error: {}", e))
}

async fn send_chunk(tx: &mpsc::Sender<Chunk>, bytes: Vec<u8>) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    tx.send(Ok(bytes))
        .await
        .map_err(|_| AppError::Internal("Backup download was cancelled".to_string()))
}

async fn write_archive(
    pool: &SqlitePool,
    tables: &[&str],
    tx: &mpsc::Sender<Chunk>,
) -> Result<()> {
    let buffer = ChunkBuffer::default();
    let mut zip = ZipWriter::new_stream(buffer.clone());
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for table in tables {
        let rows = dump_table(pool, table).await?;
        let json = serde_json::to_vec_pretty(&rows)
            .map_err(|e| AppError::Internal(format!("Failed to serialize {}: {}", table, e)))?;

        zip.start_file(entry_name(table), options).map_err(zip_error)?;
        zip.write_all(&json).map_err(zip_error)?;

        tracing::debug!("Backup: appended {} ({} rows)", table, rows.len());
        send_chunk(tx, buffer.take()).await?;
    }

    zip.finish().map_err(zip_error)?;
    send_chunk(tx, buffer.take()).await?;
    Ok(())
}

/// Start exporting `tables` and return the archive as a byte stream.
pub fn stream_archive(
    pool: SqlitePool,
    tables: &'static [&'static str],
) -> impl Stream<Item = Chunk> + Send + 'static {
    let (tx, rx) = mpsc::channel::<Chunk>(4);

    tokio::spawn(async move {
        match write_archive(&pool, tables, &tx).await {
            Ok(()) => tracing::info!("Backup export completed ({} tables)", tables.len()),
            Err(e) => {
                tracing::error!("Backup export failed: {}", e);
                let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
            }
        }
    });

    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use futures_util::StreamExt;
    use std::io::{Cursor, Read};

    async fn collect(
        stream: impl Stream<Item = Chunk>,
    ) -> (Vec<u8>, Option<io::Error>) {
        let mut bytes = Vec::new();
        let mut error = None;
        futures_util::pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(data) => bytes.extend_from_slice(&data),
                Err(e) => error = Some(e),
            }
        }
        (bytes, error)
    }

    #[tokio::test]
    async fn test_archive_has_one_json_array_per_table() {
        let pool = test_support::memory_pool().await;
        sqlx::query("INSERT INTO appointments (title, start_time) VALUES ('Dinner', '2026-02-14 19:00')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO settings (key, value) VALUES ('app_settings', '{\"themeKey\":\"cozy-winter\"}')")
            .execute(&pool)
            .await
            .unwrap();

        let (bytes, error) = collect(stream_archive(pool, BACKUP_TABLES)).await;
        assert!(error.is_none());

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        names.sort();
        let mut expected: Vec<String> = BACKUP_TABLES.iter().map(|t| entry_name(t)).collect();
        expected.sort();
        assert_eq!(names, expected);

        for table in BACKUP_TABLES {
            let mut file = archive.by_name(&entry_name(table)).unwrap();
            let mut contents = String::new();
            file.read_to_string(&mut contents).unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
            assert!(parsed.is_array(), "{} is not an array", table);
        }

        let mut file = archive.by_name("db/appointments.json").unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "Dinner");
        assert!(rows[0].get("notes").is_some());
    }

    #[tokio::test]
    async fn test_failing_table_ends_stream_with_error() {
        const TABLES: &[&str] = &["appointments", "does_not_exist"];
        let pool = test_support::memory_pool().await;

        let (_, error) = collect(stream_archive(pool, TABLES)).await;
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn test_dump_table_keeps_nulls() {
        let pool = test_support::memory_pool().await;
        sqlx::query("INSERT INTO feedback (message) VALUES ('more candles')")
            .execute(&pool)
            .await
            .unwrap();

        let rows = dump_table(&pool, "feedback").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["message"], "more candles");
        assert!(rows[0]["author_id"].is_null());
    }
}
