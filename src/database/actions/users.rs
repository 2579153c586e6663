use crate::{
    error::{constraint_error, QueryError},
    pagination::{PageContext, PageRequest},
    schema::{User, UserRow, Uuid},
};

use sqlx::{Pool, Postgres};

const USER_CONSTRAINTS: &[(&str, &str)] = &[
    ("users_username_key", "User with this username already exists"),
    ("users_email_key", "User with this email already exists"),
];

pub async fn get_user(pool: &Pool<Postgres>, username: &str) -> Result<Option<User>, potion::Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

pub async fn get_user_by_id(
    pool: &Pool<Postgres>,
    user_id: Uuid,
) -> Result<Option<User>, potion::Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

/// Stores the profile of an already registered user. Credentials live with
/// the authentication service.
pub async fn create_user(
    username: &str,
    email: &str,
    first_name: &str,
    last_name: &str,
    pool: &Pool<Postgres>,
) -> Result<Uuid, potion::Error> {
    let id: (Uuid,) = sqlx::query_as(
        "
        INSERT INTO users (username, email, first_name, last_name)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ",
    )
    .bind(username)
    .bind(email)
    .bind(first_name)
    .bind(last_name)
    .fetch_one(pool)
    .await
    .map_err(|e| constraint_error(e, USER_CONSTRAINTS))?;

    log::debug!("Created user {username} ({})", id.0);

    Ok(id.0)
}

pub async fn list_users(
    page: PageRequest,
    pool: &Pool<Postgres>,
) -> Result<PageContext<User>, potion::Error> {
    let rows: Vec<UserRow> =
        sqlx::query_as("SELECT u.*, COUNT(*) OVER() AS count FROM users u ORDER BY u.id LIMIT $1 OFFSET $2")
            .bind(page.limit)
            .bind(page.offset())
            .fetch_all(pool)
            .await
            .map_err(QueryError::from)?;

    let total_count = rows.first().map(|row| row.count).unwrap_or(0);
    let page = PageContext::from_rows(rows, total_count, &page).map(User::from);

    Ok(page)
}
