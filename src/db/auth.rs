use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::user::{User, UserRole};
use crate::error::Result;

// Database repository
pub struct AuthRepository {
    pool: PgPool,
}

impl AuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<(Uuid, String)> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (email, password_hash, full_name)
            VALUES ($1, $2, $3)
            RETURNING id, email
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(full_name)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("id")?, row.try_get("email")?))
    }

    pub async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<(Uuid, String, String)>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, password_hash
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok((
                row.try_get("id")?,
                row.try_get("email")?,
                row.try_get("password_hash")?,
            ))
        })
        .transpose()
    }

    pub async fn user_role(&self, user_id: Uuid) -> Result<Option<UserRole>> {
        let row = sqlx::query("SELECT role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let role: String = row.try_get("role")?;
            Ok(if role == "admin" {
                UserRole::Admin
            } else {
                UserRole::User
            })
        })
        .transpose()
    }

    pub async fn store_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn verify_refresh_token(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.email, u.password_hash, u.full_name, u.role, u.created_at, u.updated_at
            FROM users u
            INNER JOIN refresh_tokens rt ON rt.user_id = u.id
            WHERE rt.token = $1 AND rt.expires_at > CURRENT_TIMESTAMP
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let role: String = row.try_get("role")?;
            Ok(User {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                password_hash: row.try_get("password_hash")?,
                full_name: row.try_get("full_name")?,
                role: if role == "admin" {
                    UserRole::Admin
                } else {
                    UserRole::User
                },
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}
