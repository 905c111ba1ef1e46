use super::{Claim, ImageRegistry};
use crate::db::Database;
use crate::models::{Dimensions, EmoteKind, OutputFormat, Rendition, RenditionKey, SourceImage};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

const RENDITION_COLUMNS: &str =
    "id, image_id, width, height, webp, processed, path, format, out_width, out_height";

pub struct SqliteRegistry {
    db: Database,
}

impl SqliteRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn find_rendition(conn: &Connection, id: i64) -> Result<Option<Rendition>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM renditions WHERE id = ?1", RENDITION_COLUMNS),
                params![id],
                RenditionRow::from_row,
            )
            .optional()?;
        row.map(RenditionRow::into_rendition).transpose()
    }
}

/// Raw column values of a `renditions` row.
struct RenditionRow {
    id: i64,
    image_id: i64,
    width: u32,
    height: u32,
    webp: bool,
    processed: bool,
    path: String,
    format: Option<String>,
    out_width: Option<u32>,
    out_height: Option<u32>,
}

impl RenditionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            image_id: row.get(1)?,
            width: row.get(2)?,
            height: row.get(3)?,
            webp: row.get(4)?,
            processed: row.get(5)?,
            path: row.get(6)?,
            format: row.get(7)?,
            out_width: row.get(8)?,
            out_height: row.get(9)?,
        })
    }

    fn into_rendition(self) -> Result<Rendition> {
        let format = self
            .format
            .as_deref()
            .map(str::parse::<OutputFormat>)
            .transpose()?;
        let output = match (self.out_width, self.out_height) {
            (Some(width), Some(height)) => Some(Dimensions::new(width, height)),
            _ => None,
        };

        Ok(Rendition {
            id: self.id,
            image_id: self.image_id,
            key: RenditionKey::new(self.width, self.height, self.webp),
            processed: self.processed,
            path: self.path,
            format,
            output,
        })
    }
}

#[async_trait]
impl ImageRegistry for SqliteRegistry {
    async fn get_or_create_image(&self, original: &str) -> Result<SourceImage> {
        let conn = self.db.lock()?;

        conn.execute(
            "INSERT OR IGNORE INTO images (original, created_at) VALUES (?1, ?2)",
            params![original, Utc::now().to_rfc3339()],
        )?;

        let image = conn.query_row(
            "SELECT id, original, created_at FROM images WHERE original = ?1",
            params![original],
            |row| {
                Ok(SourceImage {
                    id: row.get(0)?,
                    original: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )?;

        Ok(image)
    }

    async fn claim_rendition(
        &self,
        image: &SourceImage,
        key: RenditionKey,
        kind: EmoteKind,
    ) -> Result<Claim> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM renditions
                     WHERE image_id = ?1 AND width = ?2 AND height = ?3 AND webp = ?4
                       AND kind = ?5",
                    RENDITION_COLUMNS
                ),
                params![
                    image.id,
                    key.width,
                    key.height,
                    key.prefer_webp,
                    kind.as_tag()
                ],
                RenditionRow::from_row,
            )
            .optional()?;

        let claim = match existing {
            Some(row) => {
                let rendition = row.into_rendition()?;
                if rendition.processed {
                    Claim::Ready(rendition)
                } else {
                    Claim::InFlight(rendition)
                }
            }
            None => {
                let path = key.storage_path(&image.original, kind);
                tx.execute(
                    "INSERT INTO renditions
                         (image_id, width, height, webp, kind, processed, path, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
                    params![
                        image.id,
                        key.width,
                        key.height,
                        key.prefer_webp,
                        kind.as_tag(),
                        path,
                        Utc::now().to_rfc3339()
                    ],
                )?;

                Claim::Claimed(Rendition {
                    id: tx.last_insert_rowid(),
                    image_id: image.id,
                    key,
                    processed: false,
                    path,
                    format: None,
                    output: None,
                })
            }
        };

        tx.commit()?;
        Ok(claim)
    }

    async fn complete_rendition(
        &self,
        id: i64,
        format: OutputFormat,
        output: Dimensions,
    ) -> Result<Rendition> {
        let conn = self.db.lock()?;

        let updated = conn.execute(
            "UPDATE renditions SET processed = 1, format = ?2, out_width = ?3, out_height = ?4
             WHERE id = ?1 AND processed = 0",
            params![id, format.as_str(), output.width, output.height],
        )?;

        if updated == 0 {
            return Err(Error::Invariant(format!(
                "Rendition {} is not awaiting processing",
                id
            )));
        }

        Self::find_rendition(&conn, id)?
            .ok_or_else(|| Error::Invariant(format!("Rendition {} vanished after update", id)))
    }

    async fn release_rendition(&self, id: i64) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "DELETE FROM renditions WHERE id = ?1 AND processed = 0",
            params![id],
        )?;
        Ok(())
    }

    async fn invalidate_rendition(&self, id: i64) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute("DELETE FROM renditions WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn reset_unprocessed(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        Ok(conn.execute("DELETE FROM renditions WHERE processed = 0", [])?)
    }
}
