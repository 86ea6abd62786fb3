use crate::db::*;
use crate::error::{AppError, Result};
use crate::library::{BookUpdate, CompiledQuery, NewBook};
use crate::settings::{IndexerSettings, Preferences};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const BOOK_COLUMNS: &str = "b.id, b.title, b.subtitle, b.description, b.isbn, b.isbn13, \
     b.language, b.page_count, b.published_at, b.publisher, b.format, b.status, \
     b.reading_progress, b.personal_rating, b.date_added, b.date_read, b.google_books_id, \
     b.image_url, b.series_id, b.series_order, b.updated_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Persistence(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Persistence(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        register_functions(&conn)
            .map_err(|e| AppError::Persistence(format!("Failed to register functions: {}", e)))?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Authors table
            CREATE TABLE IF NOT EXISTS authors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                sort_name TEXT
            );

            -- Series table
            CREATE TABLE IF NOT EXISTS series (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT
            );

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                subtitle TEXT,
                description TEXT,
                isbn TEXT,
                isbn13 TEXT,
                language TEXT NOT NULL DEFAULT 'en',
                page_count INTEGER,
                published_at TEXT,
                publisher TEXT,
                format TEXT,
                status TEXT NOT NULL DEFAULT 'UNREAD',
                reading_progress INTEGER NOT NULL DEFAULT 0,
                personal_rating INTEGER,
                date_added INTEGER NOT NULL,
                date_read INTEGER,
                google_books_id TEXT,
                image_url TEXT,
                series_id TEXT,
                series_order INTEGER,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (series_id) REFERENCES series(id) ON DELETE SET NULL
            );

            -- Book/author links
            CREATE TABLE IF NOT EXISTS book_authors (
                book_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'author',
                "order" INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (book_id, author_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE,
                FOREIGN KEY (author_id) REFERENCES authors(id) ON DELETE CASCADE
            );

            -- Book categories
            CREATE TABLE IF NOT EXISTS book_categories (
                book_id TEXT NOT NULL,
                category TEXT NOT NULL,
                PRIMARY KEY (book_id, category),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Downloads table
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'QUEUED',
                progress REAL NOT NULL DEFAULT 0,
                size INTEGER,
                indexer TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Search indexers
            CREATE TABLE IF NOT EXISTS indexers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                url TEXT NOT NULL,
                api_key TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 5,
                requests_per_minute INTEGER NOT NULL DEFAULT 60,
                requests_per_day INTEGER NOT NULL DEFAULT 1000,
                search_enabled INTEGER NOT NULL DEFAULT 1,
                book_search_enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Key/value settings (provider API keys, preferences)
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_status ON books(status);
            CREATE INDEX IF NOT EXISTS idx_books_date_added ON books(date_added);
            CREATE INDEX IF NOT EXISTS idx_books_isbn13 ON books(isbn13);
            CREATE INDEX IF NOT EXISTS idx_book_authors_author ON book_authors(author_id);
            CREATE INDEX IF NOT EXISTS idx_downloads_book ON downloads(book_id);
            "#,
        )
        .map_err(|e| AppError::Persistence(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== AUTHOR OPERATIONS ==========

    /// Create an author. Fails when the name is already taken.
    #[cfg(test)]
    pub(crate) fn create_author(&self, name: &str, sort_name: Option<&str>) -> Result<Author> {
        let author = Author {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            sort_name: sort_name.map(str::to_string),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO authors (id, name, sort_name) VALUES (?1, ?2, ?3)",
            params![author.id, author.name, author.sort_name],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::invalid("name", format!("Author '{}' already exists", author.name))
            } else {
                AppError::Persistence(format!("Failed to create author: {}", e))
            }
        })?;
        Ok(author)
    }

    /// Find an author by name, ignoring case.
    #[cfg(test)]
    pub(crate) fn find_author_by_name(&self, name: &str) -> Result<Option<Author>> {
        let conn = self.conn.lock();
        find_author(&conn, name.trim())
            .map_err(|e| AppError::Persistence(format!("Failed to get author: {}", e)))
    }

    // ========== SERIES OPERATIONS ==========

    /// Create a series.
    #[cfg(test)]
    pub(crate) fn create_series(&self, name: &str, description: Option<&str>) -> Result<Series> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::invalid("name", "Series name is required"));
        }

        let series = Series {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO series (id, name, description) VALUES (?1, ?2, ?3)",
            params![series.id, series.name, series.description],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to create series: {}", e)))?;
        Ok(series)
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a validated book with its authors and categories.
    ///
    /// Authors are matched by name and created when missing. Everything
    /// happens in one transaction.
    pub fn create_book(&self, new: &NewBook) -> Result<BookWithDetails> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Persistence(format!("Failed to begin transaction: {}", e)))?;

        if let Some(series_id) = &new.series_id {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM series WHERE id = ?1",
                    params![series_id],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|e| AppError::Persistence(format!("Failed to get series: {}", e)))?;
            if exists.is_none() {
                return Err(AppError::invalid("seriesId", "Unknown series"));
            }
        }

        let now = now_timestamp();
        let book = StoredBook {
            id: Uuid::new_v4().to_string(),
            title: new.title.clone(),
            subtitle: new.subtitle.clone(),
            description: new.description.clone(),
            isbn: new.isbn.clone(),
            isbn13: new.isbn13.clone(),
            language: new.language.clone(),
            page_count: new.page_count,
            published_at: new.published_at.map(|d| d.format("%Y-%m-%d").to_string()),
            publisher: new.publisher.clone(),
            format: new.format.clone(),
            status: new.status,
            reading_progress: 0,
            personal_rating: None,
            date_added: now,
            date_read: None,
            google_books_id: new.google_books_id.clone(),
            image_url: new.image_url.clone(),
            series_id: new.series_id.clone(),
            series_order: new.series_order,
            updated_at: now,
        };

        insert_book_rows(&tx, &book, new)
            .map_err(|e| AppError::Persistence(format!("Failed to create book: {}", e)))?;
        let details = load_details(&tx, book)
            .map_err(|e| AppError::Persistence(format!("Failed to load book: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Persistence(format!("Failed to commit book: {}", e)))?;

        tracing::debug!(book_id = %details.book.id, title = %details.book.title, "Created book");
        Ok(details)
    }

    /// Save or update a bare book row.
    #[cfg(test)]
    pub(crate) fn save_book(&self, book: &StoredBook) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books
             (id, title, subtitle, description, isbn, isbn13, language, page_count,
              published_at, publisher, format, status, reading_progress, personal_rating,
              date_added, date_read, google_books_id, image_url, series_id, series_order,
              updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21)
             ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                subtitle = excluded.subtitle,
                description = excluded.description,
                isbn = excluded.isbn,
                isbn13 = excluded.isbn13,
                language = excluded.language,
                page_count = excluded.page_count,
                published_at = excluded.published_at,
                publisher = excluded.publisher,
                format = excluded.format,
                status = excluded.status,
                reading_progress = excluded.reading_progress,
                personal_rating = excluded.personal_rating,
                date_read = excluded.date_read,
                google_books_id = excluded.google_books_id,
                image_url = excluded.image_url,
                series_id = excluded.series_id,
                series_order = excluded.series_order,
                updated_at = excluded.updated_at",
            params![
                book.id,
                book.title,
                book.subtitle,
                book.description,
                book.isbn,
                book.isbn13,
                book.language,
                book.page_count,
                book.published_at,
                book.publisher,
                book.format,
                book.status.as_str(),
                book.reading_progress,
                book.personal_rating,
                book.date_added,
                book.date_read,
                book.google_books_id,
                book.image_url,
                book.series_id,
                book.series_order,
                book.updated_at,
            ],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to save book: {}", e)))?;
        Ok(())
    }

    /// Attach an existing author to a book.
    #[cfg(test)]
    pub(crate) fn link_author(&self, book_id: &str, author_id: &str, role: &str, order: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO book_authors (book_id, author_id, role, \"order\")
             VALUES (?1, ?2, ?3, ?4)",
            params![book_id, author_id, role, order],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to link author: {}", e)))?;
        Ok(())
    }

    /// Get a book with its relations.
    pub fn get_book(&self, id: &str) -> Result<Option<BookWithDetails>> {
        let conn = self.conn.lock();
        let book = conn
            .query_row(
                &format!("SELECT {BOOK_COLUMNS} FROM books b WHERE b.id = ?1"),
                params![id],
                row_to_stored_book,
            )
            .optional()
            .map_err(|e| AppError::Persistence(format!("Failed to get book: {}", e)))?;

        book.map(|book| load_details(&conn, book))
            .transpose()
            .map_err(|e| AppError::Persistence(format!("Failed to load book: {}", e)))
    }

    /// Apply a partial update. Returns `None` when the book does not exist.
    pub fn update_book(&self, id: &str, update: &BookUpdate) -> Result<Option<BookWithDetails>> {
        {
            let conn = self.conn.lock();
            let rows = conn
                .execute(
                    "UPDATE books SET
                        status = COALESCE(?2, status),
                        reading_progress = COALESCE(?3, reading_progress),
                        personal_rating = COALESCE(?4, personal_rating),
                        date_read = COALESCE(?5, date_read),
                        updated_at = ?6
                     WHERE id = ?1",
                    params![
                        id,
                        update.status.map(|s| s.as_str()),
                        update.reading_progress,
                        update.personal_rating,
                        update.date_read,
                        now_timestamp(),
                    ],
                )
                .map_err(|e| AppError::Persistence(format!("Failed to update book: {}", e)))?;

            if rows == 0 {
                return Ok(None);
            }
        }

        self.get_book(id)
    }

    /// Run a compiled library query: total count and one page, in one
    /// read transaction so both see the same snapshot.
    pub fn query_books(&self, query: &CompiledQuery) -> Result<(Vec<BookWithDetails>, u64)> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Persistence(format!("Failed to begin transaction: {}", e)))?;

        let total: i64 = tx
            .query_row(
                &format!("SELECT COUNT(*) FROM books b {}", query.where_sql),
                params_from_iter(query.params.iter()),
                |row| row.get(0),
            )
            .map_err(|e| AppError::Persistence(format!("Failed to count books: {}", e)))?;

        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books b {} ORDER BY {} LIMIT ? OFFSET ?",
            query.where_sql, query.order_sql
        );
        let mut values = query.params.clone();
        values.push(rusqlite::types::Value::Integer(query.limit));
        values.push(rusqlite::types::Value::Integer(query.offset));

        let books = {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| AppError::Persistence(format!("Failed to prepare query: {}", e)))?;
            stmt.query_map(params_from_iter(values.iter()), row_to_stored_book)
                .map_err(|e| AppError::Persistence(format!("Failed to query books: {}", e)))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| AppError::Persistence(format!("Failed to collect books: {}", e)))?
        };

        let details = books
            .into_iter()
            .map(|book| load_details(&tx, book))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Persistence(format!("Failed to load book details: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Persistence(format!("Failed to finish query: {}", e)))?;

        Ok((details, total.max(0) as u64))
    }

    // ========== DOWNLOAD OPERATIONS ==========

    /// Record a download for a book.
    #[cfg(test)]
    pub(crate) fn create_download(&self, download: &Download) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO downloads (id, book_id, title, status, progress, size, indexer, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                download.id,
                download.book_id,
                download.title,
                download.status.as_str(),
                download.progress,
                download.size,
                download.indexer,
                download.created_at,
            ],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to create download: {}", e)))?;
        Ok(())
    }

    // ========== SETTINGS OPERATIONS ==========

    /// Read a setting.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| AppError::Persistence(format!("Failed to get setting: {}", e)))
    }

    /// Insert or replace a setting.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to save setting: {}", e)))?;
        Ok(())
    }

    /// General preferences, defaults when never saved.
    pub fn get_preferences(&self) -> Result<Preferences> {
        match self.get_setting(PREFERENCES)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                AppError::Persistence(format!("Stored preferences are invalid: {}", e))
            }),
            None => Ok(Preferences::default()),
        }
    }

    /// Replace the general preferences.
    pub fn set_preferences(&self, preferences: &Preferences) -> Result<()> {
        let raw = serde_json::to_string(preferences)
            .map_err(|e| AppError::Internal(format!("Failed to encode preferences: {}", e)))?;
        self.set_setting(PREFERENCES, &raw)
    }

    // ========== INDEXER OPERATIONS ==========

    /// Store a new indexer.
    pub fn create_indexer(&self, settings: &IndexerSettings) -> Result<Indexer> {
        let now = now_timestamp();
        let indexer = Indexer {
            id: Uuid::new_v4().to_string(),
            name: settings.name.clone(),
            kind: settings.kind,
            url: settings.url.clone(),
            api_key: settings.api_key.clone(),
            enabled: settings.enabled,
            priority: settings.priority,
            requests_per_minute: settings.requests_per_minute,
            requests_per_day: settings.requests_per_day,
            search_enabled: settings.search_enabled,
            book_search_enabled: settings.book_search_enabled,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO indexers
             (id, name, kind, url, api_key, enabled, priority, requests_per_minute,
              requests_per_day, search_enabled, book_search_enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                indexer.id,
                indexer.name,
                indexer.kind.as_str(),
                indexer.url,
                indexer.api_key,
                indexer.enabled,
                indexer.priority,
                indexer.requests_per_minute,
                indexer.requests_per_day,
                indexer.search_enabled,
                indexer.book_search_enabled,
                indexer.created_at,
                indexer.updated_at,
            ],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to create indexer: {}", e)))?;

        tracing::debug!(indexer_id = %indexer.id, kind = indexer.kind.as_str(), "Created indexer");
        Ok(indexer)
    }

    /// All indexers, newest first.
    pub fn list_indexers(&self) -> Result<Vec<Indexer>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INDEXER_COLUMNS} FROM indexers ORDER BY created_at DESC, id"
            ))
            .map_err(|e| AppError::Persistence(format!("Failed to prepare query: {}", e)))?;

        stmt.query_map([], row_to_indexer)
            .map_err(|e| AppError::Persistence(format!("Failed to list indexers: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Persistence(format!("Failed to list indexers: {}", e)))
    }

    /// One indexer.
    pub fn get_indexer(&self, id: &str) -> Result<Option<Indexer>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {INDEXER_COLUMNS} FROM indexers WHERE id = ?1"),
            params![id],
            row_to_indexer,
        )
        .optional()
        .map_err(|e| AppError::Persistence(format!("Failed to get indexer: {}", e)))
    }

    /// Replace an indexer's fields. `None` when it does not exist.
    pub fn update_indexer(&self, id: &str, settings: &IndexerSettings) -> Result<Option<Indexer>> {
        let changed = {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE indexers SET name = ?2, kind = ?3, url = ?4, api_key = ?5, enabled = ?6,
                    priority = ?7, requests_per_minute = ?8, requests_per_day = ?9,
                    search_enabled = ?10, book_search_enabled = ?11, updated_at = ?12
                 WHERE id = ?1",
                params![
                    id,
                    settings.name,
                    settings.kind.as_str(),
                    settings.url,
                    settings.api_key,
                    settings.enabled,
                    settings.priority,
                    settings.requests_per_minute,
                    settings.requests_per_day,
                    settings.search_enabled,
                    settings.book_search_enabled,
                    now_timestamp(),
                ],
            )
            .map_err(|e| AppError::Persistence(format!("Failed to update indexer: {}", e)))?
        };

        if changed == 0 {
            return Ok(None);
        }
        self.get_indexer(id)
    }

    /// Delete an indexer. Returns whether it existed.
    pub fn delete_indexer(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM indexers WHERE id = ?1", params![id])
            .map_err(|e| AppError::Persistence(format!("Failed to delete indexer: {}", e)))?;
        Ok(deleted > 0)
    }
}

/// SQLite's `LOWER` only folds ASCII; filters use this instead so that
/// "Émile" matches "émile".
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|v| v.to_lowercase()))
        },
    )
}

fn find_author(conn: &Connection, name: &str) -> rusqlite::Result<Option<Author>> {
    conn.query_row(
        "SELECT id, name, sort_name FROM authors WHERE unicode_lower(name) = unicode_lower(?1)",
        params![name],
        |row| {
            Ok(Author {
                id: row.get(0)?,
                name: row.get(1)?,
                sort_name: row.get(2)?,
            })
        },
    )
    .optional()
}

fn insert_book_rows(conn: &Connection, book: &StoredBook, new: &NewBook) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO books
         (id, title, subtitle, description, isbn, isbn13, language, page_count,
          published_at, publisher, format, status, reading_progress, personal_rating,
          date_added, date_read, google_books_id, image_url, series_id, series_order,
          updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20, ?21)",
        params![
            book.id,
            book.title,
            book.subtitle,
            book.description,
            book.isbn,
            book.isbn13,
            book.language,
            book.page_count,
            book.published_at,
            book.publisher,
            book.format,
            book.status.as_str(),
            book.reading_progress,
            book.personal_rating,
            book.date_added,
            book.date_read,
            book.google_books_id,
            book.image_url,
            book.series_id,
            book.series_order,
            book.updated_at,
        ],
    )?;

    for (order, name) in new.authors.iter().enumerate() {
        let author_id = match find_author(conn, name)? {
            Some(author) => author.id,
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO authors (id, name, sort_name) VALUES (?1, ?2, NULL)",
                    params![id, name],
                )?;
                id
            }
        };
        conn.execute(
            "INSERT OR IGNORE INTO book_authors (book_id, author_id, role, \"order\")
             VALUES (?1, ?2, 'author', ?3)",
            params![book.id, author_id, order as i64],
        )?;
    }

    for category in &new.categories {
        conn.execute(
            "INSERT OR IGNORE INTO book_categories (book_id, category) VALUES (?1, ?2)",
            params![book.id, category],
        )?;
    }

    Ok(())
}

fn row_to_stored_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBook> {
    let status: String = row.get(11)?;
    Ok(StoredBook {
        id: row.get(0)?,
        title: row.get(1)?,
        subtitle: row.get(2)?,
        description: row.get(3)?,
        isbn: row.get(4)?,
        isbn13: row.get(5)?,
        language: row.get(6)?,
        page_count: row.get(7)?,
        published_at: row.get(8)?,
        publisher: row.get(9)?,
        format: row.get(10)?,
        status: BookStatus::parse(&status).unwrap_or_default(),
        reading_progress: row.get(12)?,
        personal_rating: row.get(13)?,
        date_added: row.get(14)?,
        date_read: row.get(15)?,
        google_books_id: row.get(16)?,
        image_url: row.get(17)?,
        series_id: row.get(18)?,
        series_order: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

const INDEXER_COLUMNS: &str = "id, name, kind, url, api_key, enabled, priority, \
     requests_per_minute, requests_per_day, search_enabled, book_search_enabled, \
     created_at, updated_at";

fn row_to_indexer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Indexer> {
    let kind: String = row.get(2)?;
    Ok(Indexer {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: IndexerKind::parse(&kind).unwrap_or(IndexerKind::Custom),
        url: row.get(3)?,
        api_key: row.get(4)?,
        enabled: row.get(5)?,
        priority: row.get(6)?,
        requests_per_minute: row.get(7)?,
        requests_per_day: row.get(8)?,
        search_enabled: row.get(9)?,
        book_search_enabled: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Attach authors, series, categories and downloads to a book row.
fn load_details(conn: &Connection, book: StoredBook) -> rusqlite::Result<BookWithDetails> {
    let authors = {
        let mut stmt = conn.prepare_cached(
            "SELECT a.id, a.name, a.sort_name, ba.role, ba.\"order\"
             FROM book_authors ba JOIN authors a ON a.id = ba.author_id
             WHERE ba.book_id = ?1
             ORDER BY ba.\"order\", a.name",
        )?;
        stmt.query_map(params![book.id], |row| {
            Ok(BookAuthor {
                author: Author {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    sort_name: row.get(2)?,
                },
                role: row.get(3)?,
                order: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    let series = match &book.series_id {
        Some(series_id) => conn
            .query_row(
                "SELECT id, name, description FROM series WHERE id = ?1",
                params![series_id],
                |row| {
                    Ok(Series {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()?,
        None => None,
    };

    let categories = {
        let mut stmt = conn.prepare_cached(
            "SELECT category FROM book_categories WHERE book_id = ?1 ORDER BY category",
        )?;
        stmt.query_map(params![book.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?
    };

    let downloads = {
        let mut stmt = conn.prepare_cached(
            "SELECT id, book_id, title, status, progress, size, indexer, created_at
             FROM downloads WHERE book_id = ?1
             ORDER BY created_at DESC, id",
        )?;
        stmt.query_map(params![book.id], |row| {
            let status: String = row.get(3)?;
            Ok(Download {
                id: row.get(0)?,
                book_id: row.get(1)?,
                title: row.get(2)?,
                status: DownloadStatus::parse(&status),
                progress: row.get(4)?,
                size: row.get(5)?,
                indexer: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    Ok(BookWithDetails {
        book,
        authors,
        series,
        categories,
        downloads,
    })
}
