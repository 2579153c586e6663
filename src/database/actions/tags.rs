use crate::{
    error::{constraint_error, QueryError},
    schema::{Tag, Uuid},
    RECIPE_CONSTRAINTS,
};

use sqlx::{Pool, Postgres, Transaction};

pub async fn get_tag(id: Uuid, pool: &Pool<Postgres>) -> Result<Option<Tag>, potion::Error> {
    let tag: Option<Tag> = sqlx::query_as("SELECT * FROM tags WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(tag)
}

pub async fn list_tags(pool: &Pool<Postgres>) -> Result<Vec<Tag>, potion::Error> {
    let list: Vec<Tag> = sqlx::query_as("SELECT * FROM tags ORDER BY name")
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(list)
}

pub async fn find_tags_by_slug(
    slugs: &[String],
    pool: &Pool<Postgres>,
) -> Result<Vec<Tag>, potion::Error> {
    let list: Vec<Tag> = sqlx::query_as("SELECT * FROM tags WHERE slug = ANY($1) ORDER BY name")
        .bind(slugs)
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(list)
}

pub async fn list_recipe_tags(
    pool: &Pool<Postgres>,
    recipe_id: Uuid,
) -> Result<Vec<Tag>, potion::Error> {
    let list: Vec<Tag> = sqlx::query_as(
        "
        SELECT t.*
        FROM recipe_tags rt
        INNER JOIN tags t ON t.id = rt.tag_id
        WHERE rt.recipe_id = $1
        ORDER BY t.name
    ",
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(list)
}

/// Replaces the tag set of a recipe inside the caller's transaction.
pub async fn set_recipe_tags(
    recipe_id: Uuid,
    tags: &[Uuid],
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), potion::Error> {
    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tx)
        .await
        .map_err(QueryError::from)?;

    sqlx::query(
        "
        INSERT INTO recipe_tags (recipe_id, tag_id)
        SELECT $1, tag_id FROM UNNEST($2::INTEGER[]) AS tag_id
        ON CONFLICT DO NOTHING
    ",
    )
    .bind(recipe_id)
    .bind(tags)
    .execute(&mut **tx)
    .await
    .map_err(|e| constraint_error(e, RECIPE_CONSTRAINTS))?;

    Ok(())
}
