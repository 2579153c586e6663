use redis::aio::MultiplexedConnection;
use sqlx::{Pool, Postgres};

use crate::{
    error::QueryError,
    schema::{Ingredient, Uuid},
    CacheKeyType, RedisValue,
};

/// Case insensitive name prefix search, every ingredient when `name` is empty.
pub async fn list_ingredients(
    name: &str,
    pool: &Pool<Postgres>,
) -> Result<Vec<Ingredient>, potion::Error> {
    let pattern = format!("{}%", escape_like(name.trim()));

    let rows: Vec<Ingredient> = sqlx::query_as(
        "SELECT * FROM ingredients WHERE name ILIKE $1 ESCAPE '\\' ORDER BY name, measurement_unit",
    )
    .bind(pattern)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(rows)
}

/// Ingredients are reference data, so search results are cached for good.
pub async fn list_ingredients_cached(
    name: &str,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Vec<Ingredient>, potion::Error> {
    let key = CacheKeyType::Ingredients.new(name.trim().to_lowercase());
    let pool = pool.clone();
    let name = name.to_owned();

    let rows = RedisValue::get_or_optional(key, cache, || async move {
        list_ingredients(&name, &pool).await.map(Some)
    })
    .await?;

    Ok(rows.unwrap_or_default())
}

pub async fn get_ingredient(
    id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<Option<Ingredient>, potion::Error> {
    let row: Option<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

fn escape_like(value: &str) -> String {
    value
        .chars()
        .fold(String::with_capacity(value.len()), |mut s, c| {
            if matches!(c, '%' | '_' | '\\') {
                s.push('\\');
            }
            s.push(c);
            s
        })
}
