use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::{
        cache::CachedCounters,
        repos::{ProfilesRepo, RepoError},
    },
    domain::entities::{ProfileOwner, ProfileRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ProfileRow {
    user_id: i64,
    bio: Option<String>,
    posts_count: i64,
    subscribers_count: i64,
    subscriptions_count: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ProfileRow> for ProfileRecord {
    fn from(row: ProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            bio: row.bio,
            posts_count: row.posts_count,
            subscribers_count: row.subscribers_count,
            subscriptions_count: row.subscriptions_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OwnerRow {
    user_id: i64,
    email: String,
}

#[async_trait]
impl ProfilesRepo for PostgresRepositories {
    async fn find_profile(&self, user_id: i64) -> Result<Option<ProfileRecord>, RepoError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT user_id, bio, posts_count, subscribers_count,
                   subscriptions_count, created_at, updated_at
              FROM profiles
             WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn list_owners(&self) -> Result<Vec<ProfileOwner>, RepoError> {
        let rows = sqlx::query_as::<_, OwnerRow>(
            r#"
            SELECT p.user_id, u.email
              FROM profiles p
             INNER JOIN users u ON u.id = p.user_id
             ORDER BY p.user_id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| ProfileOwner {
                user_id: row.user_id,
                email: row.email,
            })
            .collect())
    }

    async fn apply_counters(
        &self,
        user_id: i64,
        counters: &CachedCounters,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE profiles
               SET posts_count = COALESCE($2, posts_count),
                   subscribers_count = COALESCE($3, subscribers_count),
                   subscriptions_count = COALESCE($4, subscriptions_count),
                   updated_at = now()
             WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(counters.posts_count)
        .bind(counters.subscribers_count)
        .bind(counters.subscriptions_count)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
