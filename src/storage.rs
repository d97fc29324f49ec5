use super::*;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Page {
    pub(crate) url: String,
    pub(crate) owner: String,
    pub(crate) title: String,
    /// Calendar date (`%Y-%m-%d`). Empty until the page is saved.
    pub(crate) saved_at: String,
}

impl Page {
    pub(crate) fn new(url: &str, owner: &str) -> Self {
        Page {
            url: url.to_string(),
            owner: owner.to_string(),
            title: String::new(),
            saved_at: String::new(),
        }
    }

    pub(crate) fn with_title(mut self, title: String) -> Self {
        self.title = title;
        self
    }

    /// Hex SHA-1 over url then owner.
    pub(crate) fn hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.url.as_bytes());
        hasher.update(self.owner.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Page {
            url: row.get(0)?,
            owner: row.get(1)?,
            title: row.get(2)?,
            saved_at: row.get(3)?,
        })
    }
}

#[async_trait]
pub(crate) trait PageStore: Send + Sync {
    async fn exists(&self, url: &str, owner: &str) -> Result<bool>;
    /// Inserts without a uniqueness check; callers check `exists` first.
    async fn save(&self, page: &Page) -> Result<()>;
    async fn pick_random(&self, owner: &str) -> Result<Option<Page>>;
    /// Newest first by `saved_at`; pages saved on the same date keep insertion order.
    async fn pick_last_five(&self, owner: &str) -> Result<Vec<Page>>;
    async fn remove(&self, page: &Page) -> Result<()>;
}

pub(crate) struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open database {}", path.display()))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("ping database")?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Creates the table and any missing columns. Safe to run on every boot.
    pub(crate) async fn init(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pages (url TEXT NOT NULL, user_name TEXT NOT NULL)",
            [],
        )
        .context("create pages table")?;

        let columns = table_columns(&conn, "pages")?;
        if !columns.iter().any(|name| name == "title") {
            conn.execute(
                "ALTER TABLE pages ADD COLUMN title TEXT NOT NULL DEFAULT ''",
                [],
            )
            .context("add title column")?;
        }
        if !columns.iter().any(|name| name == "saved_at") {
            conn.execute(
                &format!(
                    "ALTER TABLE pages ADD COLUMN saved_at TEXT NOT NULL DEFAULT '{}'",
                    EPOCH_DATE
                ),
                [],
            )
            .context("add saved_at column")?;
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS pages_owner_url ON pages (user_name, url)",
            [],
        )
        .context("create pages index")?;
        Ok(())
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .context("read table info")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read table columns")?;
    Ok(columns)
}

const PAGE_COLUMNS: &str =
    "url, user_name, COALESCE(title, ''), COALESCE(saved_at, '1970-01-01')";

#[async_trait]
impl PageStore for SqliteStore {
    async fn exists(&self, url: &str, owner: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pages WHERE url = ?1 AND user_name = ?2",
                params![url, owner],
                |row| row.get(0),
            )
            .context("check if page exists")?;
        Ok(count > 0)
    }

    async fn save(&self, page: &Page) -> Result<()> {
        let saved_at = if page.saved_at.is_empty() {
            today_date()
        } else {
            page.saved_at.clone()
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pages (url, user_name, title, saved_at) VALUES (?1, ?2, ?3, ?4)",
            params![page.url, page.owner, page.title, saved_at],
        )
        .context("save page")?;
        Ok(())
    }

    async fn pick_random(&self, owner: &str) -> Result<Option<Page>> {
        let conn = self.conn.lock().await;
        let page = conn
            .query_row(
                &format!(
                    "SELECT {} FROM pages WHERE user_name = ?1 ORDER BY RANDOM() LIMIT 1",
                    PAGE_COLUMNS
                ),
                params![owner],
                Page::from_row,
            )
            .optional()
            .context("pick random page")?;
        Ok(page)
    }

    async fn pick_last_five(&self, owner: &str) -> Result<Vec<Page>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM pages WHERE user_name = ?1 \
                 ORDER BY saved_at DESC, rowid ASC LIMIT ?2",
                PAGE_COLUMNS
            ))
            .context("prepare last pages query")?;
        let pages = stmt
            .query_map(params![owner, LAST_PAGES_LIMIT as i64], Page::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("pick last five pages")?;
        Ok(pages)
    }

    async fn remove(&self, page: &Page) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM pages WHERE url = ?1 AND user_name = ?2",
            params![page.url, page.owner],
        )
        .context("remove page")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selector {
    Random,
    LastFive,
}

/// Pages picked for delivery. Nothing is deleted until `commit`.
pub(crate) struct Take<'a, S> {
    store: &'a S,
    pages: Vec<Page>,
}

pub(crate) async fn take<'a, S: PageStore>(
    store: &'a S,
    owner: &str,
    selector: Selector,
) -> Result<Option<Take<'a, S>>> {
    let pages = match selector {
        Selector::Random => store.pick_random(owner).await?.into_iter().collect(),
        Selector::LastFive => store.pick_last_five(owner).await?,
    };
    if pages.is_empty() {
        return Ok(None);
    }
    Ok(Some(Take { store, pages }))
}

impl<'a, S: PageStore> Take<'a, S> {
    pub(crate) fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Drops everything after the first `len` pages from this take; they stay saved.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.pages.truncate(len);
    }

    pub(crate) async fn commit(self) -> Result<()> {
        for page in &self.pages {
            self.store
                .remove(page)
                .await
                .with_context(|| format!("remove delivered page {}", page.url))?;
        }
        Ok(())
    }

    pub(crate) fn release(self) -> Vec<Page> {
        self.pages
    }
}
