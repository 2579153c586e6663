pub const RECIPE_COUNT_PER_PAGE: i64 = 6;
pub const USER_COUNT_PER_PAGE: i64 = 6;
pub const MAX_COUNT_PER_PAGE: i64 = 100;

pub const SHORT_LINK_LENGTH: usize = 6;
pub const SHORT_LINK_MAX_ATTEMPTS: u32 = 100;
pub const SHORT_LINK_CONSTRAINT: &str = "recipes_short_link_key";
pub const SHORT_LINK_REDIRECT_PREFIX: &str = "/recipes";

pub const RECIPE_NAME_MAX_LENGTH: usize = 256;

pub const MIN_TIME_TO_COOK: i32 = 1;

pub const SHOPPING_LIST_FILENAME: &str = "shopping_cart.txt";
pub const SHOPPING_LIST_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub const RECIPE_CONSTRAINTS: &[(&str, &str)] = &[
    ("recipes_name_key", "Recipe with this name already exists"),
    (
        "recipe_ingredients_recipe_id_ingredient_id_key",
        "Recipe can't contain the same ingredient twice",
    ),
    (
        "recipe_ingredients_ingredient_id_fkey",
        "Ingredient doesn't exist",
    ),
    ("recipe_tags_tag_id_fkey", "Tag doesn't exist"),
];
