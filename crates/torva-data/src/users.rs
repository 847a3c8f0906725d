//! User and subscription repositories.
//!
//! User lifecycle is a collaborator concern; the lifecycle core only reads
//! the subscription snapshot at quota checks and at the completion commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use sqlx::postgres::PgRow;
use torva_core::Plan;
use uuid::Uuid;

use crate::error::Result;
use crate::store::{Store, map_query_err};

/// A platform account.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    /// Account identifier.
    pub id: Uuid,
    /// Login email, unique.
    pub email: String,
    /// Argon2id password hash. Never serialised.
    #[serde(skip)]
    pub password_hash: String,
    /// Role: `user`, `premium`, `demo`, or `admin`.
    pub role: String,
    /// Payment-provider customer reference, when billing is wired up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_customer_ref: Option<String>,
    /// Row creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// A user's subscription; at most one row per user.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRecord {
    /// Subscription identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Plan name the numbers were snapshotted from.
    pub plan: String,
    /// Provider status (`active`, `past_due`, `canceled`, `trialing`).
    pub status: String,
    /// End of the current billing period, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<DateTime<Utc>>,
    /// Monthly transfer allowance in GB; negative means unlimited.
    pub download_limit_gb: i32,
    /// Concurrent-download ceiling.
    pub concurrent_limit: i32,
    /// Retention window applied at completion commits.
    pub retention_days: i32,
    /// Row creation instant.
    pub created_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Retention window as an unsigned day count.
    #[must_use]
    pub fn retention_days(&self) -> u32 {
        u32::try_from(self.retention_days).unwrap_or(Plan::free().retention_days)
    }
}

const USER_COLUMNS: &str =
    "id, email, password_hash, role, plan_customer_ref, created_at, updated_at";

impl Store {
    /// Create a user and their default `free` subscription in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if either insert fails (including duplicate email).
    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let free = Plan::free();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(map_query_err("begin create user"))?;

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, role, created_at, updated_at)
             VALUES ($1, $2, $3, 'user', $4, $4)",
        )
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_query_err("insert user"))?;

        sqlx::query(
            "INSERT INTO subscriptions (user_id, plan, status, download_limit_gb, concurrent_limit, retention_days)
             VALUES ($1, $2, 'active', $3, $4, $5)",
        )
        .bind(id)
        .bind(free.name)
        .bind(free.monthly_limit_gib.map_or(-1, |gib| i32::try_from(gib).unwrap_or(i32::MAX)))
        .bind(i32::try_from(free.concurrent_limit).unwrap_or(i32::MAX))
        .bind(i32::try_from(free.retention_days).unwrap_or(i32::MAX))
        .execute(&mut *tx)
        .await
        .map_err(map_query_err("insert default subscription"))?;

        tx.commit()
            .await
            .map_err(map_query_err("commit create user"))?;

        Ok(UserRecord {
            id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role: "user".to_string(),
            plan_customer_ref: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Look up a user by login email.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(self.pool())
        .await
        .map_err(map_query_err("fetch user by email"))?;
        row.map(|row| user_from_row(&row)).transpose()
    }

    /// Look up a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_query_err("fetch user by id"))?;
        row.map(|row| user_from_row(&row)).transpose()
    }

    /// Page through all users, newest first, with the total count.
    ///
    /// # Errors
    ///
    /// Returns an error if either query fails.
    pub async fn list_users(&self, limit: i64, offset: i64) -> Result<(Vec<UserRecord>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await
            .map_err(map_query_err("count users"))?;

        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_query_err("list users"))?;

        let users = rows.iter().map(user_from_row).collect::<Result<Vec<_>>>()?;
        Ok((users, total))
    }

    /// Change a user's role.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_user_role(&self, user_id: Uuid, role: &str) -> Result<()> {
        sqlx::query("UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2")
            .bind(role)
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(map_query_err("update user role"))?;
        Ok(())
    }

    /// Delete a user; torrents, subscriptions, and refresh tokens cascade.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(map_query_err("delete user"))?;
        Ok(())
    }

    /// Fetch a user's subscription snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_subscription(&self, user_id: Uuid) -> Result<Option<SubscriptionRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, plan, status, current_period_end, download_limit_gb,
                    concurrent_limit, retention_days, created_at
             FROM subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_query_err("fetch subscription"))?;
        row.map(|row| subscription_from_row(&row)).transpose()
    }

    /// Re-snapshot a user's subscription onto a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_subscription(
        &self,
        user_id: Uuid,
        plan: &Plan,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions SET plan = $1, status = $2, download_limit_gb = $3,
             concurrent_limit = $4, retention_days = $5 WHERE user_id = $6",
        )
        .bind(plan.name)
        .bind(status)
        .bind(plan.monthly_limit_gib.map_or(-1, |gib| i32::try_from(gib).unwrap_or(i32::MAX)))
        .bind(i32::try_from(plan.concurrent_limit).unwrap_or(i32::MAX))
        .bind(i32::try_from(plan.retention_days).unwrap_or(i32::MAX))
        .bind(user_id)
        .execute(self.pool())
        .await
        .map_err(map_query_err("update subscription"))?;
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> Result<UserRecord> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: row.try_get::<Option<String>, _>("role")?.unwrap_or_else(|| "user".to_string()),
        plan_customer_ref: row.try_get("plan_customer_ref")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<SubscriptionRecord> {
    Ok(SubscriptionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        plan: row.try_get("plan")?,
        status: row.try_get("status")?,
        current_period_end: row.try_get("current_period_end")?,
        download_limit_gb: row.try_get("download_limit_gb")?,
        concurrent_limit: row.try_get("concurrent_limit")?,
        retention_days: row.try_get("retention_days")?,
        created_at: row.try_get("created_at")?,
    })
}
