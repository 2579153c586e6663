use serde::{Deserialize, Serialize};

pub type Uuid = i32;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,

    pub count: i64,
}

impl From<UserRow> for User {
    fn from(value: UserRow) -> Self {
        Self {
            id: value.id,
            username: value.username,
            email: value.email,
            first_name: value.first_name,
            last_name: value.last_name,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub author_id: Uuid,
    pub name: String,
    pub text: String,
    pub time_to_cook: i32,
    pub short_link: Option<String>,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct RecipeRow {
    pub id: Uuid,
    pub author_id: Uuid,
    pub name: String,
    pub text: String,
    pub time_to_cook: i32,
    pub short_link: Option<String>,

    pub count: i64,
}

impl From<RecipeRow> for Recipe {
    fn from(value: RecipeRow) -> Self {
        Self {
            id: value.id,
            author_id: value.author_id,
            name: value.name,
            text: value.text,
            time_to_cook: value.time_to_cook,
            short_link: value.short_link,
        }
    }
}

/// Compact recipe representation used by favorites, the shopping cart and
/// subscription listings.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeShort {
    pub id: Uuid,
    pub name: String,
    pub cooking_time: i32,
}

impl From<Recipe> for RecipeShort {
    fn from(value: Recipe) -> Self {
        Self {
            id: value.id,
            name: value.name,
            cooking_time: value.time_to_cook,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: f64,
}

/// A single ingredient row of a recipe in somebody's shopping cart.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingCartPart {
    pub recipe_id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Author {
    #[serde(flatten)]
    pub user: User,
    pub is_subscribed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    pub id: Uuid,
    pub tags: Vec<Tag>,
    pub author: Author,
    pub ingredients: Vec<RecipeIngredient>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub text: String,
    pub cooking_time: i32,
    pub short_link: Option<String>,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub recipes_count: i64,

    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    #[serde(flatten)]
    pub author: Author,
    pub recipes: Vec<RecipeShort>,
    pub recipes_count: i64,
}

impl Subscription {
    pub fn from_row(row: SubscriptionRow, recipes: Vec<RecipeShort>) -> Self {
        Self {
            author: Author {
                user: User {
                    id: row.id,
                    username: row.username,
                    email: row.email,
                    first_name: row.first_name,
                    last_name: row.last_name,
                },
                is_subscribed: true,
            },
            recipes,
            recipes_count: row.recipes_count,
        }
    }
}
