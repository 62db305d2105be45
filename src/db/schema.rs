pub const SCHEMA: &str = r#"
-- articles table (owned by the CMS; the tracker only reads it)
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    featured_image_url TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- article_images table
CREATE TABLE IF NOT EXISTS article_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER REFERENCES articles(id) ON DELETE SET NULL,
    url TEXT NOT NULL,
    storage_id TEXT,
    file_name TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    mime_type TEXT,
    is_used INTEGER NOT NULL DEFAULT 0,
    is_featured_image INTEGER NOT NULL DEFAULT 0,
    marked_for_deletion_at TEXT,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_article_images_article_id ON article_images(article_id);
CREATE INDEX IF NOT EXISTS idx_article_images_url ON article_images(url);
CREATE INDEX IF NOT EXISTS idx_article_images_pending
    ON article_images(is_used, marked_for_deletion_at)
    WHERE deleted_at IS NULL;
"#;
