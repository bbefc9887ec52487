use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use tracing::info;
use utoipa::ToSchema;

use crate::auth;
use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
struct FeedRow {
    id: i64,
    name: String,
    url: String,
    is_visible: bool,
}

/// A feed together with the names of its categories, ordered by category id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub is_visible: bool,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
    pub is_visible: bool,
}

/// Partial feed update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct FeedChanges {
    pub name: Option<String>,
    pub url: Option<String>,
    pub is_visible: Option<bool>,
}

/// An account that can exchange its credentials for an API token.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

/// True when `err` is SQLite rejecting a duplicate value in a UNIQUE column.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(db_err)) if db_err.is_unique_violation()
    )
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                is_visible INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_categories (
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                category_id INTEGER NOT NULL REFERENCES categories(id),
                PRIMARY KEY (feed_id, category_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_feed_categories_category
            ON feed_categories(category_id, feed_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_tokens (
                key TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert configured users, categories and feeds that are not stored yet.
    ///
    /// Users and categories are matched by name and feeds by URL. Existing
    /// records are left untouched so edits made through the API survive a
    /// restart.
    pub async fn seed(&self, config: &Config) -> anyhow::Result<()> {
        for user in &config.users {
            if self.find_user_by_username(&user.username).await?.is_some() {
                continue;
            }
            let password_hash = auth::hash_password(&user.password)?;
            self.create_user(&user.username, &password_hash).await?;
            info!("Seeded user '{}'", user.username);
        }

        let mut names: Vec<&String> = config.categories.iter().collect();
        for feed in &config.feeds {
            names.extend(feed.categories.iter());
        }
        for name in names {
            sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES (?)")
                .bind(name)
                .execute(&self.pool)
                .await?;
        }

        for feed in &config.feeds {
            let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
                .bind(&feed.url)
                .fetch_optional(&self.pool)
                .await?;
            if existing.is_some() {
                continue;
            }

            let mut category_ids = Vec::with_capacity(feed.categories.len());
            for name in &feed.categories {
                if let Some(category) = self.find_category_by_name(name).await? {
                    category_ids.push(category.id);
                }
            }

            let new_feed = NewFeed {
                name: feed.name.clone(),
                url: feed.url.clone(),
                is_visible: feed.is_visible,
            };
            let created = self.create_feed(&new_feed, &category_ids).await?;
            info!("Seeded feed '{}' ({})", created.name, created.url);
        }

        Ok(())
    }

    // Categories

    pub async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>("SELECT id, name FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    pub async fn get_category(&self, category_id: i64) -> anyhow::Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>("SELECT id, name FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    /// Exact, case-sensitive name lookup.
    pub async fn find_category_by_name(&self, name: &str) -> anyhow::Result<Option<Category>> {
        let category =
            sqlx::query_as::<_, Category>("SELECT id, name FROM categories WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(category)
    }

    pub async fn create_category(&self, name: &str) -> anyhow::Result<Category> {
        let result = sqlx::query("INSERT INTO categories (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(Category {
            id: result.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    pub async fn update_category(
        &self,
        category_id: i64,
        name: &str,
    ) -> anyhow::Result<Option<Category>> {
        let result = sqlx::query("UPDATE categories SET name = ? WHERE id = ?")
            .bind(name)
            .bind(category_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(Category {
            id: category_id,
            name: name.to_string(),
        }))
    }

    /// Returns `false` if no category had this id.
    pub async fn delete_category(&self, category_id: i64) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM feed_categories WHERE category_id = ?")
            .bind(category_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(category_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // Feeds

    pub async fn list_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(
            "SELECT id, name, url, is_visible FROM feeds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        self.attach_categories(rows).await
    }

    pub async fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(
            "SELECT id, name, url, is_visible FROM feeds WHERE id = ?",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.attach_categories(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// All feeds tagged with the named category, in feed id order.
    pub async fn feeds_in_category(&self, name: &str) -> anyhow::Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT f.id, f.name, f.url, f.is_visible
            FROM feeds f
            JOIN feed_categories fc ON fc.feed_id = f.id
            JOIN categories c ON c.id = fc.category_id
            WHERE c.name = ?
            ORDER BY f.id
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        self.attach_categories(rows).await
    }

    pub async fn create_feed(&self, feed: &NewFeed, category_ids: &[i64]) -> anyhow::Result<Feed> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("INSERT INTO feeds (name, url, is_visible) VALUES (?, ?, ?)")
            .bind(&feed.name)
            .bind(&feed.url)
            .bind(feed.is_visible)
            .execute(&mut *tx)
            .await?;
        let feed_id = result.last_insert_rowid();

        for category_id in category_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO feed_categories (feed_id, category_id) VALUES (?, ?)",
            )
            .bind(feed_id)
            .bind(category_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_feed(feed_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Feed {} vanished after insert", feed_id))
    }

    /// Apply `changes` to a feed. When `category_ids` is given the feed's
    /// category set is replaced by it, otherwise memberships are kept.
    ///
    /// Returns `None` if no feed had this id.
    pub async fn update_feed(
        &self,
        feed_id: i64,
        changes: &FeedChanges,
        category_ids: Option<&[i64]>,
    ) -> anyhow::Result<Option<Feed>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET name = COALESCE(?, name),
                url = COALESCE(?, url),
                is_visible = COALESCE(?, is_visible)
            WHERE id = ?
            "#,
        )
        .bind(changes.name.as_deref())
        .bind(changes.url.as_deref())
        .bind(changes.is_visible)
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        if let Some(category_ids) = category_ids {
            sqlx::query("DELETE FROM feed_categories WHERE feed_id = ?")
                .bind(feed_id)
                .execute(&mut *tx)
                .await?;
            for category_id in category_ids {
                sqlx::query(
                    "INSERT OR IGNORE INTO feed_categories (feed_id, category_id) VALUES (?, ?)",
                )
                .bind(feed_id)
                .bind(category_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        self.get_feed(feed_id).await
    }

    /// Returns `false` if no feed had this id.
    pub async fn delete_feed(&self, feed_id: i64) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM feed_categories WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // Users and tokens

    pub async fn create_user(&self, username: &str, password_hash: &str) -> anyhow::Result<User> {
        let result = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    pub async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Returns the user's token, storing `new_key` first if they have none.
    pub async fn issue_token(&self, user_id: i64, new_key: &str) -> anyhow::Result<String> {
        sqlx::query("INSERT OR IGNORE INTO auth_tokens (key, user_id) VALUES (?, ?)")
            .bind(new_key)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let (key,): (String,) = sqlx::query_as("SELECT key FROM auth_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(key)
    }

    pub async fn token_exists(&self, key: &str) -> anyhow::Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT user_id FROM auth_tokens WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn category_names_for_feed(&self, feed_id: i64) -> anyhow::Result<Vec<String>> {
        let names: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT c.name
            FROM categories c
            JOIN feed_categories fc ON fc.category_id = c.id
            WHERE fc.feed_id = ?
            ORDER BY c.id
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn attach_categories(&self, rows: Vec<FeedRow>) -> anyhow::Result<Vec<Feed>> {
        let mut feeds = Vec::with_capacity(rows.len());
        for row in rows {
            let categories = self.category_names_for_feed(row.id).await?;
            feeds.push(Feed {
                id: row.id,
                name: row.name,
                url: row.url,
                is_visible: row.is_visible,
                categories,
            });
        }
        Ok(feeds)
    }
}
