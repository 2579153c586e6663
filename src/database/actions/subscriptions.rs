use potion::HtmlError;
use sqlx::{Pool, Postgres};

use super::{recipes::list_author_recipes, users::get_user_by_id};
use crate::{
    error::QueryError,
    pagination::{check_recipes_limit, PageContext, PageRequest},
    schema::{Subscription, SubscriptionRow, Uuid},
};

pub async fn is_subscribed(
    subscriber_id: Uuid,
    author_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<bool, potion::Error> {
    let result: Option<(Uuid,)> = sqlx::query_as(
        "SELECT author_id FROM subscriptions WHERE subscriber_id = $1 AND author_id = $2",
    )
    .bind(subscriber_id)
    .bind(author_id)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(result.is_some())
}

pub async fn subscribe(
    subscriber_id: Uuid,
    author_id: Uuid,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Subscription, potion::Error> {
    let recipes_limit = check_recipes_limit(recipes_limit)?;

    if subscriber_id == author_id {
        return Err(HtmlError::InvalidRequest.new("You can't subscribe to yourself"));
    }

    if get_user_by_id(pool, author_id).await?.is_none() {
        return Err(HtmlError::InvalidRequest.new("User doesn't exist"));
    }

    let result = sqlx::query(
        "INSERT INTO subscriptions (subscriber_id, author_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(subscriber_id)
    .bind(author_id)
    .execute(pool)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("You are already subscribed to this author"));
    }

    let row: SubscriptionRow = sqlx::query_as(
        "
        SELECT u.*, (SELECT COUNT(*) FROM recipes r WHERE r.author_id = u.id) AS recipes_count, 1::BIGINT AS count
        FROM users u
        WHERE u.id = $1
    ",
    )
    .bind(author_id)
    .fetch_one(pool)
    .await
    .map_err(QueryError::from)?;

    let recipes = list_author_recipes(author_id, recipes_limit, pool).await?;

    Ok(Subscription::from_row(row, recipes))
}

pub async fn unsubscribe(
    subscriber_id: Uuid,
    author_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    let result =
        sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = $1 AND author_id = $2")
            .bind(subscriber_id)
            .bind(author_id)
            .execute(pool)
            .await
            .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("You are not subscribed to this author"));
    }

    Ok(())
}

/// Authors the user follows, each with at most `recipes_limit` recipes.
pub async fn fetch_subscriptions(
    subscriber_id: Uuid,
    recipes_limit: Option<i64>,
    page: PageRequest,
    pool: &Pool<Postgres>,
) -> Result<PageContext<Subscription>, potion::Error> {
    let recipes_limit = check_recipes_limit(recipes_limit)?;

    let rows: Vec<SubscriptionRow> = sqlx::query_as(
        "
        SELECT u.*, (SELECT COUNT(*) FROM recipes r WHERE r.author_id = u.id) AS recipes_count, COUNT(*) OVER() AS count
        FROM subscriptions s
        INNER JOIN users u ON u.id = s.author_id
        WHERE s.subscriber_id = $1
        ORDER BY u.username
        LIMIT $2 OFFSET $3
    ",
    )
    .bind(subscriber_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    let total_count = rows.first().map(|row| row.count).unwrap_or(0);

    let mut subscriptions = Vec::with_capacity(rows.len());
    for row in rows {
        let recipes = list_author_recipes(row.id, recipes_limit, pool).await?;
        subscriptions.push(Subscription::from_row(row, recipes));
    }

    Ok(PageContext::from_rows(subscriptions, total_count, &page))
}
