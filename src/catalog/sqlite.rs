use super::{path_segments, NamespaceCatalog};
use crate::db::Database;
use crate::models::{CatalogEmote, EmoteKind, Namespace};
use crate::{Error, Result};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

pub struct SqliteCatalog {
    db: Database,
}

impl SqliteCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the namespace at `path`, along with any missing ancestors.
    pub fn create_namespace(&self, path: &str) -> Result<Namespace> {
        let segments = path_segments(path);
        if segments.is_empty() {
            return Err(Error::Config(format!("Empty namespace path: '{}'", path)));
        }

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let mut parent_id: Option<i64> = None;
        let mut leaf_parent: Option<i64> = None;
        let mut current_path = String::new();
        for segment in &segments {
            if !current_path.is_empty() {
                current_path.push('/');
            }
            current_path.push_str(segment);

            tx.execute(
                "INSERT OR IGNORE INTO namespaces (parent_id, slug, path) VALUES (?1, ?2, ?3)",
                params![parent_id, *segment, current_path],
            )?;
            let id: i64 = tx.query_row(
                "SELECT id FROM namespaces WHERE path = ?1",
                params![current_path],
                |row| row.get(0),
            )?;
            leaf_parent = parent_id;
            parent_id = Some(id);
        }

        tx.commit()?;

        let id = parent_id.ok_or_else(|| Error::Invariant("Namespace has no segments".into()))?;
        Ok(Namespace {
            id,
            parent_id: leaf_parent,
            slug: segments[segments.len() - 1].to_string(),
            path: current_path,
        })
    }

    /// Register (or replace) an emote within a namespace.
    pub fn add_emote(
        &self,
        namespace: &Namespace,
        slug: &str,
        original: &str,
        kind: EmoteKind,
    ) -> Result<CatalogEmote> {
        let conn = self.db.lock()?;

        conn.execute(
            "INSERT INTO emotes (namespace_id, slug, image, type) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace_id, slug) DO UPDATE SET image = excluded.image, type = excluded.type",
            params![namespace.id, slug, original, kind.as_tag()],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM emotes WHERE namespace_id = ?1 AND slug = ?2",
            params![namespace.id, slug],
            |row| row.get(0),
        )?;

        Ok(CatalogEmote {
            id,
            namespace_id: namespace.id,
            slug: slug.to_string(),
            original: original.to_string(),
            kind,
        })
    }
}

#[async_trait]
impl NamespaceCatalog for SqliteCatalog {
    async fn find_namespace(&self, path: &str) -> Result<Option<Namespace>> {
        let normalized = path_segments(path).join("/");
        if normalized.is_empty() {
            return Ok(None);
        }

        let conn = self.db.lock()?;
        let namespace = conn
            .query_row(
                "SELECT id, parent_id, slug, path FROM namespaces WHERE path = ?1",
                params![normalized],
                |row| {
                    Ok(Namespace {
                        id: row.get(0)?,
                        parent_id: row.get(1)?,
                        slug: row.get(2)?,
                        path: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(namespace)
    }

    async fn find_emote(&self, namespace: &Namespace, slug: &str) -> Result<Option<CatalogEmote>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT id, namespace_id, slug, image, type FROM emotes
                 WHERE namespace_id = ?1 AND slug = ?2",
                params![namespace.id, slug],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, namespace_id, slug, original, tag)| {
            Ok(CatalogEmote {
                id,
                namespace_id,
                slug,
                original,
                kind: EmoteKind::from_tag(&tag)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> SqliteCatalog {
        SqliteCatalog::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_nested_namespace_lookup() {
        let catalog = catalog();
        let created = catalog.create_namespace("streamers/alice").unwrap();

        let parent = catalog.find_namespace("streamers").await.unwrap().unwrap();
        let found = catalog.find_namespace("/streamers/alice/").await.unwrap().unwrap();

        assert_eq!(found, created);
        assert_eq!(found.slug, "alice");
        assert_eq!(found.parent_id, Some(parent.id));
        assert_eq!(parent.parent_id, None);
    }

    #[tokio::test]
    async fn test_create_namespace_is_idempotent() {
        let catalog = catalog();
        let first = catalog.create_namespace("a/b").unwrap();
        let second = catalog.create_namespace("a/b").unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_unknown_namespace() {
        let catalog = catalog();
        catalog.create_namespace("streamers/alice").unwrap();

        assert!(catalog.find_namespace("streamers/bob").await.unwrap().is_none());
        assert!(catalog.find_namespace("").await.unwrap().is_none());
        assert!(catalog.create_namespace("//").is_err());
    }

    #[tokio::test]
    async fn test_emote_lookup_by_slug() {
        let catalog = catalog();
        let namespace = catalog.create_namespace("streamers/alice").unwrap();
        let added = catalog
            .add_emote(&namespace, "wave", "alice/wave.gif", EmoteKind::Animated)
            .unwrap();

        let found = catalog.find_emote(&namespace, "wave").await.unwrap().unwrap();
        assert_eq!(found, added);
        assert!(catalog.find_emote(&namespace, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_emotes_are_scoped_to_their_namespace() {
        let catalog = catalog();
        let alice = catalog.create_namespace("alice").unwrap();
        let bob = catalog.create_namespace("bob").unwrap();
        catalog
            .add_emote(&alice, "wave", "alice/wave.png", EmoteKind::Static)
            .unwrap();

        assert!(catalog.find_emote(&bob, "wave").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_emote_replaces_image() {
        let catalog = catalog();
        let namespace = catalog.create_namespace("alice").unwrap();
        catalog
            .add_emote(&namespace, "wave", "old.png", EmoteKind::Static)
            .unwrap();
        catalog
            .add_emote(&namespace, "wave", "new.gif", EmoteKind::Animated)
            .unwrap();

        let found = catalog.find_emote(&namespace, "wave").await.unwrap().unwrap();
        assert_eq!(found.original, "new.gif");
        assert_eq!(found.kind, EmoteKind::Animated);
    }
}
