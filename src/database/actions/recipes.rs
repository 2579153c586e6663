use potion::HtmlError;
use rand::{rngs::StdRng, SeedableRng};
use redis::aio::MultiplexedConnection;
use sqlx::{PgConnection, Pool, Postgres, QueryBuilder, Transaction};

use super::{
    favorites::is_favorite,
    shopping_cart::is_in_shopping_cart,
    subscriptions::is_subscribed,
    tags::{list_recipe_tags, set_recipe_tags},
    users::get_user_by_id,
};
use crate::{
    constants::{RECIPE_CONSTRAINTS, SHORT_LINK_CONSTRAINT},
    error::{constraint_error, is_unique_violation, violates_constraint, QueryError, TypeError},
    form::{NewRecipe, RecipeForm, RecipeIngredientInput},
    invalidate_recipe_cache,
    pagination::{check_recipes_limit, PageContext, PageRequest},
    schema::{Author, Recipe, RecipeDetail, RecipeIngredient, RecipeRow, RecipeShort, Uuid},
    short_link::{
        is_short_link, short_link_in_use, Reservation, ShortLinkGenerator, ShortLinkStore,
    },
    CacheKeyType, RedisValue,
};

/// Listing filters, parsed from the query string of the recipe list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeFilter {
    pub author: Option<Uuid>,
    pub tags: Vec<String>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

impl RecipeFilter {
    /// `tags` may repeat, a recipe matches when it has any of them.
    /// Unknown parameters are ignored.
    pub fn from_query<'a, I>(params: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filter = Self::default();

        for (key, value) in params {
            match key {
                "author" => {
                    let author = value
                        .parse::<Uuid>()
                        .map_err(|_e| TypeError::new("Invalid author id"))?;
                    filter.author = Some(author);
                }
                "tags" => {
                    if !value.is_empty() && !filter.tags.iter().any(|tag| tag == value) {
                        filter.tags.push(value.to_string());
                    }
                }
                "is_favorited" => filter.is_favorited = value == "1",
                "is_in_shopping_cart" => filter.is_in_shopping_cart = value == "1",
                _ => {}
            }
        }

        Ok(filter)
    }
}

/// Favorite and shopping cart filters only apply to a signed in viewer.
pub async fn fetch_recipes(
    filter: &RecipeFilter,
    viewer: Option<Uuid>,
    page: PageRequest,
    pool: &Pool<Postgres>,
) -> Result<PageContext<Recipe>, potion::Error> {
    let mut query: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT r.*, COUNT(*) OVER() AS count FROM recipes r WHERE TRUE");

    if let Some(author) = filter.author {
        query.push(" AND r.author_id = ").push_bind(author);
    }

    if !filter.tags.is_empty() {
        query
            .push(
                " AND EXISTS (SELECT 1 FROM recipe_tags rt INNER JOIN tags t ON t.id = rt.tag_id WHERE rt.recipe_id = r.id AND t.slug = ANY(",
            )
            .push_bind(filter.tags.clone())
            .push("))");
    }

    if let Some(user_id) = viewer {
        if filter.is_favorited {
            query
                .push(" AND EXISTS (SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = ")
                .push_bind(user_id)
                .push(")");
        }
        if filter.is_in_shopping_cart {
            query
                .push(" AND EXISTS (SELECT 1 FROM shopping_cart sc WHERE sc.recipe_id = r.id AND sc.user_id = ")
                .push_bind(user_id)
                .push(")");
        }
    }

    query
        .push(" ORDER BY LOWER(r.name), r.id LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows: Vec<RecipeRow> = query
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?;

    let total_count = rows.first().map(|row| row.count).unwrap_or(0);
    let page = PageContext::from_rows(rows, total_count, &page).map(Recipe::from);

    Ok(page)
}

pub async fn get_recipe(id: Uuid, pool: &Pool<Postgres>) -> Result<Option<Recipe>, potion::Error> {
    let row: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

/// Fetches a recipe the user is allowed to modify, only its author is.
pub async fn get_recipe_mut(
    id: Uuid,
    user_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<Recipe, potion::Error> {
    match get_recipe(id, pool).await? {
        Some(recipe) if recipe.author_id == user_id => Ok(recipe),
        Some(_) => Err(HtmlError::Unauthorized.new("Only the author can modify this recipe")),
        None => Err(HtmlError::InvalidRequest.new("No recipe exists with specified id")),
    }
}

pub async fn list_recipe_ingredients(
    pool: &Pool<Postgres>,
    recipe_id: Uuid,
) -> Result<Vec<RecipeIngredient>, potion::Error> {
    let rows: Vec<RecipeIngredient> = sqlx::query_as(
        "
        SELECT i.id AS id, i.name AS name, i.measurement_unit AS measurement_unit, ri.amount AS amount
        FROM recipe_ingredients ri
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE ri.recipe_id = $1
        ORDER BY i.name, i.measurement_unit
    ",
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(rows)
}

pub async fn list_author_recipes(
    author_id: Uuid,
    limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Vec<RecipeShort>, potion::Error> {
    let limit = check_recipes_limit(limit)?;

    let rows: Vec<RecipeShort> = sqlx::query_as(
        "
        SELECT id, name, time_to_cook AS cooking_time
        FROM recipes
        WHERE author_id = $1
        ORDER BY LOWER(name), id
        LIMIT $2
    ",
    )
    .bind(author_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(rows)
}

pub async fn get_recipe_detail(
    id: Uuid,
    viewer: Option<Uuid>,
    pool: &Pool<Postgres>,
) -> Result<Option<RecipeDetail>, potion::Error> {
    let recipe = match get_recipe(id, pool).await? {
        Some(recipe) => recipe,
        None => return Ok(None),
    };

    let user = get_user_by_id(pool, recipe.author_id)
        .await?
        .ok_or_else(|| HtmlError::InvalidRequest.new("Recipe author doesn't exist"))?;

    let (is_subscribed, is_favorited, is_in_shopping_cart) = match viewer {
        Some(user_id) => (
            is_subscribed(user_id, user.id, pool).await?,
            is_favorite(id, user_id, pool).await?,
            is_in_shopping_cart(id, user_id, pool).await?,
        ),
        None => (false, false, false),
    };

    Ok(Some(RecipeDetail {
        id: recipe.id,
        tags: list_recipe_tags(pool, id).await?,
        author: Author {
            user,
            is_subscribed,
        },
        ingredients: list_recipe_ingredients(pool, id).await?,
        is_favorited,
        is_in_shopping_cart,
        name: recipe.name,
        text: recipe.text,
        cooking_time: recipe.time_to_cook,
        short_link: recipe.short_link,
    }))
}

/// Claims a short link by inserting the recipe row under it, on the
/// connection of the surrounding transaction.
struct RecipeInsert<'a> {
    conn: &'a mut PgConnection,
    author_id: Uuid,
    recipe: &'a NewRecipe,
}

impl ShortLinkStore for RecipeInsert<'_> {
    type Reserved = Recipe;

    async fn short_link_exists(&mut self, short_link: &str) -> Result<bool, sqlx::Error> {
        short_link_in_use(&mut *self.conn, short_link).await
    }

    async fn reserve(&mut self, short_link: &str) -> Result<Reservation<Recipe>, sqlx::Error> {
        let created: Option<Recipe> = sqlx::query_as(
            "
            INSERT INTO recipes (author_id, name, text, time_to_cook, short_link)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (short_link) DO NOTHING
            RETURNING *
        ",
        )
        .bind(self.author_id)
        .bind(&self.recipe.name)
        .bind(&self.recipe.text)
        .bind(self.recipe.cooking_time)
        .bind(short_link)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(created.map_or(Reservation::Taken, Reservation::Reserved))
    }
}

/// Creates the recipe with its ingredients and tags in one transaction.
///
/// The short link is reserved by the insert itself: a token that another
/// writer took after the availability check leaves no row behind and a new
/// token is drawn.
pub async fn create_recipe(
    author_id: Uuid,
    recipe: NewRecipe,
    pool: &Pool<Postgres>,
) -> Result<Recipe, potion::Error> {
    let generator = ShortLinkGenerator::default();
    let mut rng = StdRng::from_entropy();
    let mut tx = pool.begin().await.map_err(QueryError::from)?;

    let mut insert = RecipeInsert {
        conn: &mut *tx,
        author_id,
        recipe: &recipe,
    };
    let created = generator
        .generate(&mut insert, &mut rng)
        .await
        .map_err(|e| e.with_constraints(RECIPE_CONSTRAINTS))?;

    set_recipe_ingredients(created.id, &recipe.ingredients, &mut tx).await?;
    set_recipe_tags(created.id, &recipe.tags, &mut tx).await?;

    tx.commit().await.map_err(QueryError::from)?;
    log::debug!(
        "Created recipe {} ({}) by {author_id}",
        created.id,
        created.short_link.as_deref().unwrap_or_default()
    );

    Ok(created)
}

/// Applies a partial update. `ingredients` and `tags`, when present,
/// replace the current sets.
pub async fn update_recipe(
    id: Uuid,
    form: RecipeForm,
    pool: &Pool<Postgres>,
) -> Result<Recipe, potion::Error> {
    let mut tx = pool.begin().await.map_err(QueryError::from)?;

    let recipe: Option<Recipe> = sqlx::query_as(
        "
        UPDATE recipes SET
        name = COALESCE($1, name),
        text = COALESCE($2, text),
        time_to_cook = COALESCE($3, time_to_cook)
        WHERE id = $4
        RETURNING *
    ",
    )
    .bind(form.name)
    .bind(form.text)
    .bind(form.cooking_time)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| constraint_error(e, RECIPE_CONSTRAINTS))?;

    let recipe =
        recipe.ok_or_else(|| HtmlError::InvalidRequest.new("No recipe exists with specified id"))?;

    if let Some(ingredients) = form.ingredients {
        set_recipe_ingredients(id, &ingredients, &mut tx).await?;
    }
    if let Some(tags) = form.tags {
        set_recipe_tags(id, &tags, &mut tx).await?;
    }

    tx.commit().await.map_err(QueryError::from)?;

    Ok(recipe)
}

pub async fn delete_recipe(id: Uuid, pool: &Pool<Postgres>) -> Result<(), potion::Error> {
    let result = sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("No recipe exists with specified id"));
    }

    Ok(())
}

/// Deletes the recipe and drops cached short link resolutions.
pub async fn delete_recipe_cached(
    id: Uuid,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<(), potion::Error> {
    delete_recipe(id, pool).await?;
    invalidate_recipe_cache(cache).await?;

    Ok(())
}

async fn set_recipe_ingredients(
    recipe_id: Uuid,
    ingredients: &[RecipeIngredientInput],
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), potion::Error> {
    let (ids, amounts): (Vec<Uuid>, Vec<f64>) = ingredients
        .iter()
        .map(|ingredient| (ingredient.id, ingredient.amount))
        .unzip();

    sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tx)
        .await
        .map_err(QueryError::from)?;

    sqlx::query(
        "
        INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount)
        SELECT $1, ingredient_id, amount
        FROM UNNEST($2::INTEGER[], $3::DOUBLE PRECISION[]) AS t (ingredient_id, amount)
    ",
    )
    .bind(recipe_id)
    .bind(ids)
    .bind(amounts)
    .execute(&mut **tx)
    .await
    .map_err(|e| constraint_error(e, RECIPE_CONSTRAINTS))?;

    Ok(())
}

/// Assigns a short link to a recipe that has none. Reserves `None` when the
/// recipe no longer exists.
struct ShortLinkAssignment<'a> {
    pool: &'a Pool<Postgres>,
    recipe_id: Uuid,
}

impl ShortLinkStore for ShortLinkAssignment<'_> {
    type Reserved = Option<String>;

    async fn short_link_exists(&mut self, short_link: &str) -> Result<bool, sqlx::Error> {
        short_link_in_use(self.pool, short_link).await
    }

    async fn reserve(
        &mut self,
        short_link: &str,
    ) -> Result<Reservation<Option<String>>, sqlx::Error> {
        let result: Result<Option<(Option<String>,)>, sqlx::Error> = sqlx::query_as(
            "UPDATE recipes SET short_link = COALESCE(short_link, $1) WHERE id = $2 RETURNING short_link",
        )
        .bind(short_link)
        .bind(self.recipe_id)
        .fetch_optional(self.pool)
        .await;

        assigned_short_link(result)
    }
}

/// Only a unique violation of the short link itself means the token was
/// taken, every other failure is passed on.
fn assigned_short_link(
    result: Result<Option<(Option<String>,)>, sqlx::Error>,
) -> Result<Reservation<Option<String>>, sqlx::Error> {
    match result {
        Ok(row) => Ok(Reservation::Reserved(row.and_then(|(short_link,)| short_link))),
        Err(e) if is_unique_violation(&e) && violates_constraint(&e, SHORT_LINK_CONSTRAINT) => {
            Ok(Reservation::Taken)
        }
        Err(e) => Err(e),
    }
}

/// Returns the recipe's short link, assigning one to recipes stored before
/// they had it. An assigned link never changes.
pub async fn get_short_link(id: Uuid, pool: &Pool<Postgres>) -> Result<String, potion::Error> {
    let recipe = get_recipe(id, pool)
        .await?
        .ok_or_else(|| HtmlError::InvalidRequest.new("No recipe exists with specified id"))?;

    if let Some(short_link) = recipe.short_link {
        return Ok(short_link);
    }

    let generator = ShortLinkGenerator::default();
    let mut rng = StdRng::from_entropy();
    let mut assignment = ShortLinkAssignment {
        pool,
        recipe_id: id,
    };

    generator
        .generate(&mut assignment, &mut rng)
        .await?
        .ok_or_else(|| HtmlError::InvalidRequest.new("No recipe exists with specified id"))
}

pub async fn resolve_short_link(
    short_link: &str,
    pool: &Pool<Postgres>,
) -> Result<Option<Uuid>, potion::Error> {
    if !is_short_link(short_link) {
        return Ok(None);
    }

    let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM recipes WHERE short_link = $1")
        .bind(short_link)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row.map(|r| r.0))
}

/// Short links never change, so a resolution only goes stale when the
/// recipe is deleted through [`delete_recipe_cached`].
pub async fn resolve_short_link_cached(
    short_link: &str,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Option<Uuid>, potion::Error> {
    if !is_short_link(short_link) {
        return Ok(None);
    }

    let key = CacheKeyType::ShortLink.new(short_link.to_owned());
    let short_link = short_link.to_owned();
    let pool = pool.clone();

    RedisValue::get_or_optional(key, cache, || async move {
        resolve_short_link(&short_link, &pool).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::{foreign_key_violation, unique_violation};

    #[test]
    fn filter_from_query() {
        let filter = RecipeFilter::from_query([
            ("author", "4"),
            ("tags", "breakfast"),
            ("tags", "lunch"),
            ("tags", "breakfast"),
            ("is_favorited", "1"),
            ("is_in_shopping_cart", "0"),
            ("page", "2"),
        ])
        .unwrap();

        assert_eq!(
            filter,
            RecipeFilter {
                author: Some(4),
                tags: vec![String::from("breakfast"), String::from("lunch")],
                is_favorited: true,
                is_in_shopping_cart: false,
            }
        );
    }

    #[test]
    fn empty_query_matches_everything() {
        let filter = RecipeFilter::from_query(std::iter::empty()).unwrap();

        assert_eq!(filter, RecipeFilter::default());
    }

    #[test]
    fn invalid_author_is_rejected() {
        let error = RecipeFilter::from_query([("author", "me")]).unwrap_err();

        assert_eq!(error.info(), "Invalid author id");
    }

    #[test]
    fn assigned_link_is_reserved() {
        let reservation = assigned_short_link(Ok(Some((Some(String::from("aB3dE9")),)))).unwrap();

        assert_eq!(
            reservation,
            Reservation::Reserved(Some(String::from("aB3dE9")))
        );
    }

    #[test]
    fn missing_recipe_reserves_nothing() {
        let reservation = assigned_short_link(Ok(None)).unwrap();

        assert_eq!(reservation, Reservation::Reserved(None));
    }

    #[test]
    fn short_link_violation_is_retried() {
        let reservation =
            assigned_short_link(Err(unique_violation(SHORT_LINK_CONSTRAINT))).unwrap();

        assert_eq!(reservation, Reservation::Taken);
    }

    #[test]
    fn other_violations_are_not_retried() {
        let error = assigned_short_link(Err(unique_violation("recipes_name_key"))).unwrap_err();
        assert!(violates_constraint(&error, "recipes_name_key"));

        let error =
            assigned_short_link(Err(foreign_key_violation(SHORT_LINK_CONSTRAINT))).unwrap_err();
        assert!(!is_unique_violation(&error));

        let error = assigned_short_link(Err(sqlx::Error::PoolTimedOut)).unwrap_err();
        assert!(matches!(error, sqlx::Error::PoolTimedOut));
    }
}
