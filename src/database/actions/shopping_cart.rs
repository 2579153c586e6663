use potion::HtmlError;
use sqlx::{Pool, Postgres};

use super::recipes::get_recipe;
use crate::{
    error::QueryError,
    schema::{RecipeShort, Uuid},
    shopping_list::{aggregate_shopping_cart, ShoppingList},
};

pub async fn is_in_shopping_cart(
    recipe_id: Uuid,
    user_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<bool, potion::Error> {
    let result: Option<(Uuid,)> = sqlx::query_as(
        "SELECT recipe_id FROM shopping_cart WHERE recipe_id = $1 AND user_id = $2",
    )
    .bind(recipe_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(result.is_some())
}

pub async fn add_to_shopping_cart(
    recipe_id: Uuid,
    user_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<RecipeShort, potion::Error> {
    let recipe = get_recipe(recipe_id, pool)
        .await?
        .ok_or_else(|| HtmlError::InvalidRequest.new("No recipe exists with specified id"))?;

    let result = sqlx::query(
        "INSERT INTO shopping_cart (user_id, recipe_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(recipe_id)
    .execute(pool)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("Recipe is already in the shopping cart"));
    }

    Ok(recipe.into())
}

pub async fn remove_from_shopping_cart(
    recipe_id: Uuid,
    user_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    let result = sqlx::query("DELETE FROM shopping_cart WHERE user_id = $1 AND recipe_id = $2")
        .bind(user_id)
        .bind(recipe_id)
        .execute(pool)
        .await
        .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("Recipe is not in the shopping cart"));
    }

    Ok(())
}

/// Ingredient totals of the user's shopping cart. The returned list is a
/// `text/plain` attachment when used as a warp reply.
pub async fn download_shopping_cart(
    user_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<ShoppingList, potion::Error> {
    let list = aggregate_shopping_cart(pool, user_id).await?;

    Ok(list)
}
