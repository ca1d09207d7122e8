use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use cloudtree_core::{
    CloudDirectory, CloudFile, FileKind, NodeKind, NodeRef, NodeTag, Tag, TreeError, TreePath,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool, migrate::Migrator};
use thiserror::Error;
use time::OffsetDateTime;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no directory row for '{0}'")]
    MissingDirectory(String),
    #[error("no file row for '{0}'")]
    MissingFile(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("stored tree is inconsistent: {0}")]
    Tree(#[from] TreeError),
}

/// Relational side of the dual write. Paths are canonical tree paths; each
/// method is one transaction.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load_tree(&self) -> Result<CloudDirectory, MetadataError>;
    async fn insert_directory(
        &self,
        parent: &TreePath,
        name: &str,
        created_time: OffsetDateTime,
    ) -> Result<(), MetadataError>;
    async fn insert_file(&self, directory: &TreePath, file: &CloudFile)
    -> Result<(), MetadataError>;
    /// Drops the same-named file row (and its tags) and inserts `file`.
    async fn replace_file(
        &self,
        directory: &TreePath,
        file: &CloudFile,
    ) -> Result<(), MetadataError>;
    /// Re-parents and/or renames a directory, rewriting every descendant's
    /// relative path.
    async fn relocate_directory(
        &self,
        from: &TreePath,
        parent: &TreePath,
        name: &str,
    ) -> Result<(), MetadataError>;
    async fn relocate_file(
        &self,
        from: &TreePath,
        parent: &TreePath,
        name: &str,
    ) -> Result<(), MetadataError>;
    async fn delete_directory(&self, path: &TreePath) -> Result<(), MetadataError>;
    async fn delete_file(&self, path: &TreePath) -> Result<(), MetadataError>;
    /// `false` when the pair already existed.
    async fn assign_tag(&self, node: &NodeRef, tag: Tag) -> Result<bool, MetadataError>;
    /// `false` when the pair did not exist.
    async fn remove_tag(&self, node: &NodeRef, tag: Tag) -> Result<bool, MetadataError>;
    async fn list_tags(&self) -> Result<Vec<NodeTag>, MetadataError>;
}

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Accepts a `sqlite:` URL or a plain database file path.
    pub async fn connect(target: &str) -> Result<Self, MetadataError> {
        let options = if target.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(target)?
        } else {
            let path = Path::new(target);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::new().filename(path)
        };
        let pool = SqlitePool::connect_with(options.create_if_missing(true).foreign_keys(true))
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self, MetadataError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), MetadataError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_nanos(value: OffsetDateTime) -> Result<i64, MetadataError> {
    i64::try_from(value.unix_timestamp_nanos())
        .map_err(|_| MetadataError::Corrupt(format!("timestamp {value} out of range")))
}

fn from_nanos(value: i64) -> Result<OffsetDateTime, MetadataError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value))
        .map_err(|err| MetadataError::Corrupt(err.to_string()))
}

struct KindColumns {
    file_type: &'static str,
    page_count: Option<i64>,
    width: Option<i64>,
    height: Option<i64>,
    encoding: Option<String>,
}

fn kind_columns(kind: &FileKind) -> KindColumns {
    let mut columns = KindColumns {
        file_type: kind.file_type().as_str(),
        page_count: None,
        width: None,
        height: None,
        encoding: None,
    };
    match kind {
        FileKind::Word { page_count } => columns.page_count = Some(i64::from(*page_count)),
        FileKind::Image { width, height } => {
            columns.width = Some(i64::from(*width));
            columns.height = Some(i64::from(*height));
        }
        FileKind::Text { encoding } => columns.encoding = Some(encoding.clone()),
    }
    columns
}

fn positive(column: &str, value: Option<i64>) -> Result<u32, MetadataError> {
    value
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| MetadataError::Corrupt(format!("{column} is missing or out of range")))
}

fn kind_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FileKind, MetadataError> {
    let file_type: String = row.try_get("file_type")?;
    match file_type.as_str() {
        "Word" => Ok(FileKind::Word {
            page_count: positive("page_count", row.try_get("page_count")?)?,
        }),
        "Image" => Ok(FileKind::Image {
            width: positive("width", row.try_get("width")?)?,
            height: positive("height", row.try_get("height")?)?,
        }),
        "Text" => {
            let encoding: Option<String> = row.try_get("encoding")?;
            Ok(FileKind::Text {
                encoding: encoding
                    .ok_or_else(|| MetadataError::Corrupt("encoding is missing".into()))?,
            })
        }
        other => Err(MetadataError::Corrupt(format!("unknown file type {other}"))),
    }
}

async fn directory_id(conn: &mut SqliteConnection, path: &TreePath) -> Result<i64, MetadataError> {
    sqlx::query("SELECT id FROM directories WHERE relative_path = ?1")
        .bind(path.relative())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.try_get::<i64, _>("id"))
        .transpose()?
        .ok_or_else(|| MetadataError::MissingDirectory(path.to_string()))
}

async fn file_id(conn: &mut SqliteConnection, path: &TreePath) -> Result<i64, MetadataError> {
    sqlx::query("SELECT id FROM files WHERE relative_path = ?1")
        .bind(path.relative())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.try_get::<i64, _>("id"))
        .transpose()?
        .ok_or_else(|| MetadataError::MissingFile(path.to_string()))
}

async fn insert_file_row(
    conn: &mut SqliteConnection,
    directory: &TreePath,
    file: &CloudFile,
) -> Result<(), MetadataError> {
    let parent_id = directory_id(conn, directory).await?;
    let columns = kind_columns(file.kind());
    let size = i64::try_from(file.size())
        .map_err(|_| MetadataError::Corrupt(format!("size of {} out of range", file.name())))?;
    sqlx::query(
        "INSERT INTO files (
            directory_id, name, relative_path, size, file_type,
            page_count, width, height, encoding, creation_order, created_at
        )
        VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
            (SELECT COALESCE(MAX(creation_order), 0) + 1 FROM files), ?10
        )",
    )
    .bind(parent_id)
    .bind(file.name())
    .bind(directory.join(file.name()).relative())
    .bind(size)
    .bind(columns.file_type)
    .bind(columns.page_count)
    .bind(columns.width)
    .bind(columns.height)
    .bind(columns.encoding)
    .bind(to_nanos(file.created_time())?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn node_id(conn: &mut SqliteConnection, node: &NodeRef) -> Result<i64, MetadataError> {
    match node.kind {
        NodeKind::Directory => directory_id(conn, &node.path).await,
        NodeKind::File => file_id(conn, &node.path).await,
    }
}

struct DirectoryRow {
    id: i64,
    name: String,
    created_at: i64,
}

fn build_directory(
    node: &mut CloudDirectory,
    id: i64,
    children: &mut HashMap<i64, Vec<DirectoryRow>>,
    files: &mut HashMap<i64, Vec<CloudFile>>,
) -> Result<(), MetadataError> {
    for file in files.remove(&id).unwrap_or_default() {
        node.add_file(file)?;
    }
    for row in children.remove(&id).unwrap_or_default() {
        let mut child = CloudDirectory::new(&row.name, from_nanos(row.created_at)?)?;
        build_directory(&mut child, row.id, children, files)?;
        node.attach_directory(child)
            .map_err(|rejected| rejected.error)?;
    }
    Ok(())
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn load_tree(&self) -> Result<CloudDirectory, MetadataError> {
        let rows = sqlx::query(
            "SELECT id, parent_id, name, created_at FROM directories ORDER BY creation_order ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut root: Option<(i64, i64)> = None;
        let mut children: HashMap<i64, Vec<DirectoryRow>> = HashMap::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let created_at: i64 = row.try_get("created_at")?;
            match row.try_get::<Option<i64>, _>("parent_id")? {
                None => root = Some((id, created_at)),
                Some(parent_id) => children.entry(parent_id).or_default().push(DirectoryRow {
                    id,
                    name: row.try_get("name")?,
                    created_at,
                }),
            }
        }
        let (root_id, root_created) =
            root.ok_or_else(|| MetadataError::Corrupt("root directory row is missing".into()))?;

        let rows = sqlx::query(
            "SELECT directory_id, name, size, file_type, page_count, width, height, encoding, created_at
             FROM files
             ORDER BY creation_order ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut files: HashMap<i64, Vec<CloudFile>> = HashMap::new();
        for row in rows {
            let name: String = row.try_get("name")?;
            let size: i64 = row.try_get("size")?;
            let size = u64::try_from(size)
                .map_err(|_| MetadataError::Corrupt(format!("negative size for {name}")))?;
            let file = CloudFile::new(
                &name,
                size,
                from_nanos(row.try_get("created_at")?)?,
                kind_from_row(&row)?,
            )?;
            files
                .entry(row.try_get("directory_id")?)
                .or_default()
                .push(file);
        }

        let mut tree = CloudDirectory::root(from_nanos(root_created)?);
        build_directory(&mut tree, root_id, &mut children, &mut files)?;
        Ok(tree)
    }

    async fn insert_directory(
        &self,
        parent: &TreePath,
        name: &str,
        created_time: OffsetDateTime,
    ) -> Result<(), MetadataError> {
        let mut tx = self.pool.begin().await?;
        let parent_id = directory_id(&mut tx, parent).await?;
        sqlx::query(
            "INSERT INTO directories (parent_id, name, relative_path, creation_order, created_at)
             VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(creation_order), 0) + 1 FROM directories), ?4)",
        )
        .bind(parent_id)
        .bind(name)
        .bind(parent.join(name).relative())
        .bind(to_nanos(created_time)?)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_file(
        &self,
        directory: &TreePath,
        file: &CloudFile,
    ) -> Result<(), MetadataError> {
        let mut tx = self.pool.begin().await?;
        insert_file_row(&mut tx, directory, file).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_file(
        &self,
        directory: &TreePath,
        file: &CloudFile,
    ) -> Result<(), MetadataError> {
        let mut tx = self.pool.begin().await?;
        let parent_id = directory_id(&mut tx, directory).await?;
        sqlx::query("DELETE FROM files WHERE directory_id = ?1 AND name = ?2 COLLATE NOCASE")
            .bind(parent_id)
            .bind(file.name())
            .execute(&mut *tx)
            .await?;
        insert_file_row(&mut tx, directory, file).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn relocate_directory(
        &self,
        from: &TreePath,
        parent: &TreePath,
        name: &str,
    ) -> Result<(), MetadataError> {
        let old_prefix = from.relative();
        let new_prefix = parent.join(name).relative();
        let mut tx = self.pool.begin().await?;
        let parent_id = directory_id(&mut tx, parent).await?;
        let moved = sqlx::query(
            "UPDATE directories SET parent_id = ?1, name = ?2 WHERE relative_path = ?3 AND parent_id IS NOT NULL",
        )
        .bind(parent_id)
        .bind(name)
        .bind(&old_prefix)
        .execute(&mut *tx)
        .await?;
        if moved.rows_affected() == 0 {
            return Err(MetadataError::MissingDirectory(from.to_string()));
        }
        sqlx::query(
            "UPDATE directories
             SET relative_path = ?1 || substr(relative_path, length(?2) + 1)
             WHERE relative_path = ?2
                OR substr(relative_path, 1, length(?2) + 1) COLLATE NOCASE = ?2 || '/'",
        )
        .bind(&new_prefix)
        .bind(&old_prefix)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE files
             SET relative_path = ?1 || substr(relative_path, length(?2) + 1)
             WHERE substr(relative_path, 1, length(?2) + 1) COLLATE NOCASE = ?2 || '/'",
        )
        .bind(&new_prefix)
        .bind(&old_prefix)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn relocate_file(
        &self,
        from: &TreePath,
        parent: &TreePath,
        name: &str,
    ) -> Result<(), MetadataError> {
        let mut tx = self.pool.begin().await?;
        let parent_id = directory_id(&mut tx, parent).await?;
        let moved = sqlx::query(
            "UPDATE files SET directory_id = ?1, name = ?2, relative_path = ?3 WHERE relative_path = ?4",
        )
        .bind(parent_id)
        .bind(name)
        .bind(parent.join(name).relative())
        .bind(from.relative())
        .execute(&mut *tx)
        .await?;
        if moved.rows_affected() == 0 {
            return Err(MetadataError::MissingFile(from.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_directory(&self, path: &TreePath) -> Result<(), MetadataError> {
        let deleted =
            sqlx::query("DELETE FROM directories WHERE relative_path = ?1 AND parent_id IS NOT NULL")
                .bind(path.relative())
                .execute(&self.pool)
                .await?;
        if deleted.rows_affected() == 0 {
            return Err(MetadataError::MissingDirectory(path.to_string()));
        }
        Ok(())
    }

    async fn delete_file(&self, path: &TreePath) -> Result<(), MetadataError> {
        let deleted = sqlx::query("DELETE FROM files WHERE relative_path = ?1")
            .bind(path.relative())
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(MetadataError::MissingFile(path.to_string()));
        }
        Ok(())
    }

    async fn assign_tag(&self, node: &NodeRef, tag: Tag) -> Result<bool, MetadataError> {
        let mut conn = self.pool.acquire().await?;
        let id = node_id(&mut conn, node).await?;
        let (directory_id, file_id) = match node.kind {
            NodeKind::Directory => (Some(id), None),
            NodeKind::File => (None, Some(id)),
        };
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO node_tags (tag_id, directory_id, file_id)
             VALUES ((SELECT id FROM tags WHERE name = ?1), ?2, ?3)",
        )
        .bind(tag.name())
        .bind(directory_id)
        .bind(file_id)
        .execute(&mut *conn)
        .await?;
        Ok(inserted.rows_affected() > 0)
    }

    async fn remove_tag(&self, node: &NodeRef, tag: Tag) -> Result<bool, MetadataError> {
        let mut conn = self.pool.acquire().await?;
        let id = node_id(&mut conn, node).await?;
        let sql = match node.kind {
            NodeKind::Directory => {
                "DELETE FROM node_tags WHERE tag_id = (SELECT id FROM tags WHERE name = ?1) AND directory_id = ?2"
            }
            NodeKind::File => {
                "DELETE FROM node_tags WHERE tag_id = (SELECT id FROM tags WHERE name = ?1) AND file_id = ?2"
            }
        };
        let removed = sqlx::query(sql)
            .bind(tag.name())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(removed.rows_affected() > 0)
    }

    async fn list_tags(&self) -> Result<Vec<NodeTag>, MetadataError> {
        let rows = sqlx::query(
            "SELECT d.relative_path AS path, 'directory' AS kind, t.name AS tag
             FROM node_tags nt
             JOIN tags t ON t.id = nt.tag_id
             JOIN directories d ON d.id = nt.directory_id
             UNION ALL
             SELECT f.relative_path AS path, 'file' AS kind, t.name AS tag
             FROM node_tags nt
             JOIN tags t ON t.id = nt.tag_id
             JOIN files f ON f.id = nt.file_id
             ORDER BY path ASC, tag ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let path: String = row.try_get("path")?;
            let kind: String = row.try_get("kind")?;
            let tag: String = row.try_get("tag")?;
            out.push(NodeTag {
                node: NodeRef {
                    path: TreePath::parse(&path)?,
                    kind: NodeKind::parse(&kind)
                        .ok_or_else(|| MetadataError::Corrupt(format!("node kind {kind}")))?,
                },
                tag: tag.parse()?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
