use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cat::Cat;
use crate::cat_store::{CatQuery, CatStore, StoreError};
use crate::config::DatabaseConfig;

/// Row shape of the `cats` table
#[derive(Debug, FromRow)]
struct CatRow {
    id: Uuid,
    image: String,
    count: i32,
    issfw: Option<bool>,
    vote: bool,
}

impl From<CatRow> for Cat {
    fn from(row: CatRow) -> Self {
        Cat::restore(row.id, row.image, row.count, row.issfw, row.vote)
    }
}

/// PostgreSQL-backed cat store
pub struct PgCatStore {
    pool: PgPool,
}

impl PgCatStore {
    /// Create a new store with a connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// Append the WHERE clause for `query`, returning the next placeholder number
fn push_filter(sql: &mut String, query: &CatQuery) -> usize {
    let mut param_count = 0;
    sql.push_str(" WHERE 1=1");

    if query.safe_only {
        sql.push_str(" AND issfw = TRUE");
    }

    if query.id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND id = ${}", param_count));
    }

    param_count
}

#[async_trait]
impl CatStore for PgCatStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Cat>, StoreError> {
        let row = sqlx::query_as::<_, CatRow>(
            r#"
            SELECT id, image, count, issfw, vote
            FROM cats
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Cat::from))
    }

    #[instrument(skip(self))]
    async fn find_all(&self, query: &CatQuery) -> Result<Vec<Cat>, StoreError> {
        let mut sql = String::from("SELECT id, image, count, issfw, vote FROM cats");
        let mut param_count = push_filter(&mut sql, query);

        if query.order_by_count_desc {
            sql.push_str(" ORDER BY count DESC, created_at ASC");
        } else {
            sql.push_str(" ORDER BY created_at ASC, id ASC");
        }

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${}", param_count));
        }

        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${}", param_count));
        }

        let mut query_builder = sqlx::query_as::<_, CatRow>(&sql);

        if let Some(id) = query.id {
            query_builder = query_builder.bind(id);
        }
        if let Some(limit) = query.limit {
            query_builder = query_builder.bind(limit);
        }
        if let Some(offset) = query.offset {
            query_builder = query_builder.bind(offset);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(Cat::from).collect())
    }

    async fn find_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM cats ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn count(&self, query: &CatQuery) -> Result<u64, StoreError> {
        let mut sql = String::from("SELECT COUNT(*) FROM cats");
        push_filter(&mut sql, query);

        let mut query_builder = sqlx::query_as::<_, (i64,)>(&sql);
        if let Some(id) = query.id {
            query_builder = query_builder.bind(id);
        }

        let (count,) = query_builder.fetch_one(&self.pool).await?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, cat), fields(cat_id = ?cat.id()))]
    async fn persist_or_update(&self, cat: &mut Cat) -> Result<Uuid, StoreError> {
        let id = cat.assign_id(Uuid::new_v4());

        sqlx::query(
            r#"
            INSERT INTO cats (id, image, count, issfw, vote, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                image = EXCLUDED.image,
                count = EXCLUDED.count,
                issfw = EXCLUDED.issfw,
                vote = EXCLUDED.vote,
                updated_at = NOW()
            "#,
        )
        .bind(id)
        .bind(&cat.image)
        .bind(cat.count())
        .bind(cat.is_safe_for_work())
        .bind(cat.voted)
        .execute(&self.pool)
        .await?;

        debug!(cat_id = %id, count = cat.count(), issfw = ?cat.is_safe_for_work(), "Cat persisted");

        Ok(id)
    }

    #[instrument(skip(self))]
    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM cats WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM cats").execute(&self.pool).await?;

        info!(deleted_count = result.rows_affected(), "Deleted all cats");

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
