use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    future::Future,
};

use serde::Serialize;
use sqlx::{Pool, Postgres};
use warp::{
    http::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE},
    reply::{Reply, Response},
};

use super::{
    error::QueryError,
    schema::{ShoppingCartPart, Uuid},
};
use crate::constants::{SHOPPING_LIST_CONTENT_TYPE, SHOPPING_LIST_FILENAME};

pub trait ShoppingCartStore {
    /// Every ingredient row of every recipe in the user's shopping cart.
    fn list_shopping_cart_parts(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<ShoppingCartPart>, QueryError>> + Send;
}

impl ShoppingCartStore for Pool<Postgres> {
    async fn list_shopping_cart_parts(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ShoppingCartPart>, QueryError> {
        let rows: Vec<ShoppingCartPart> = sqlx::query_as(
            "
            SELECT ri.recipe_id AS recipe_id, i.name AS name, i.measurement_unit AS measurement_unit, ri.amount AS amount
            FROM shopping_cart sc
            INNER JOIN recipe_ingredients ri ON ri.recipe_id = sc.recipe_id
            INNER JOIN ingredients i ON i.id = ri.ingredient_id
            WHERE sc.user_id = $1
            ORDER BY i.name, i.measurement_unit, ri.recipe_id
        ",
        )
        .bind(user_id)
        .fetch_all(self)
        .await?;

        Ok(rows)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub total_amount: f64,
}

impl Display for ShoppingListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - {}",
            self.name,
            self.measurement_unit,
            format_amount(self.total_amount)
        )
    }
}

/// Whole amounts keep one decimal (`300.0`), the rest use the shortest
/// representation that round trips (`0.75`). Magnitudes below `1e-4` or from
/// `1e16` up switch to exponent form with a signed two digit exponent
/// (`1e-05`, `2.5e+16`).
pub fn format_amount(amount: f64) -> String {
    if !amount.is_finite() || amount == 0. {
        return format!("{amount:.1}");
    }

    let scientific = format!("{amount:e}");
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or_default()),
        None => (scientific.as_str(), 0),
    };

    if !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    } else if amount.fract() == 0. {
        format!("{amount:.1}")
    } else {
        format!("{amount}")
    }
}

/// Ingredient totals of a shopping cart, one item per `(name, unit)` pair,
/// ordered by name and then unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShoppingList {
    items: Vec<ShoppingListItem>,
}

impl ShoppingList {
    pub fn aggregate<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = ShoppingCartPart>,
    {
        let mut totals: BTreeMap<(String, String), f64> = BTreeMap::new();

        parts.into_iter().for_each(|part| {
            *totals
                .entry((part.name, part.measurement_unit))
                .or_insert(0.) += part.amount;
        });

        Self {
            items: totals
                .into_iter()
                .map(|((name, measurement_unit), total_amount)| ShoppingListItem {
                    name,
                    measurement_unit,
                    total_amount,
                })
                .collect(),
        }
    }

    pub fn items(&self) -> &[ShoppingListItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<String>>()
            .join("\n")
    }
}

impl Reply for ShoppingList {
    fn into_response(self) -> Response {
        let mut response = Response::new(self.render().into());
        let headers = response.headers_mut();

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(SHOPPING_LIST_CONTENT_TYPE),
        );
        if let Ok(value) =
            HeaderValue::from_str(&format!("attachment; filename=\"{SHOPPING_LIST_FILENAME}\""))
        {
            headers.insert(CONTENT_DISPOSITION, value);
        }

        response
    }
}

pub async fn aggregate_shopping_cart<S>(store: &S, user_id: Uuid) -> Result<ShoppingList, QueryError>
where
    S: ShoppingCartStore + ?Sized,
{
    let parts = store.list_shopping_cart_parts(user_id).await?;
    log::trace!("> Aggregating {} shopping cart rows for {user_id}", parts.len());

    Ok(ShoppingList::aggregate(parts))
}
