use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{error::TypeError, schema::Uuid};
use crate::constants::{MIN_TIME_TO_COOK, RECIPE_NAME_MAX_LENGTH};

pub type FormData = HashMap<String, Value>;

pub struct Form {
    inner: HashMap<String, Value>,
}

impl Form {
    pub fn from_data(data: FormData) -> Self {
        Self { inner: data }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Numbers are accepted both as JSON numbers and as numeric strings.
    pub fn get_number<T>(&self, key: &str) -> Result<T, TypeError>
    where
        T: FromStr,
    {
        match self.inner.get(key) {
            Some(value) => number_from_value(value)
                .ok_or_else(|| TypeError::new(&format!("Invalid number: {key}"))),
            None => Err(TypeError::new(&format!("Missing field: {key}"))),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<String, TypeError> {
        match self.inner.get(key) {
            Some(value) => match value.as_str() {
                Some(v) => Ok(v.to_string()),
                None => Err(TypeError::new(&format!("Expected a string: {key}"))),
            },
            None => Err(TypeError::new(&format!("Missing field: {key}"))),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<&Vec<Value>, TypeError> {
        match self.inner.get(key) {
            Some(value) => value
                .as_array()
                .ok_or_else(|| TypeError::new(&format!("Expected a list: {key}"))),
            None => Err(TypeError::new(&format!("Missing field: {key}"))),
        }
    }
}

fn number_from_value<T: FromStr>(value: &Value) -> Option<T> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredientInput {
    pub id: Uuid,
    pub amount: f64,
}

impl TryFrom<&Value> for RecipeIngredientInput {
    type Error = TypeError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let (id, amount) = match (value.get("id"), value.get("amount")) {
            (Some(id), Some(amount)) => (id, amount),
            _ => {
                return Err(TypeError::new(
                    "Every ingredient must have an id and an amount",
                ))
            }
        };

        let id: Uuid =
            number_from_value(id).ok_or_else(|| TypeError::new("Invalid ingredient id"))?;
        let amount: f64 = number_from_value(amount)
            .ok_or_else(|| TypeError::new("Invalid ingredient amount"))?;

        if !amount.is_finite() || amount <= 0. {
            return Err(TypeError::new("Ingredient amount must be positive"));
        }

        Ok(Self { id, amount })
    }
}

/// Recipe write payload. Every field is optional so the same form serves
/// partial updates, see [`RecipeForm::into_new_recipe`] for creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipeForm {
    pub name: Option<String>,
    pub text: Option<String>,
    pub cooking_time: Option<i32>,
    pub tags: Option<Vec<Uuid>>,
    pub ingredients: Option<Vec<RecipeIngredientInput>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRecipe {
    pub name: String,
    pub text: String,
    pub cooking_time: i32,
    pub tags: Vec<Uuid>,
    pub ingredients: Vec<RecipeIngredientInput>,
}

impl TryFrom<&Form> for RecipeForm {
    type Error = TypeError;

    fn try_from(form: &Form) -> Result<Self, Self::Error> {
        let name = match form.contains("name") {
            true => Some(validate_name(form.get_str("name")?)?),
            false => None,
        };

        let text = match form.contains("text") {
            true => Some(form.get_str("text")?),
            false => None,
        };

        let cooking_time = match form.contains("cooking_time") {
            true => {
                let cooking_time: i32 = form.get_number("cooking_time")?;
                if cooking_time < MIN_TIME_TO_COOK {
                    return Err(TypeError::new(&format!(
                        "Cooking time must be at least {MIN_TIME_TO_COOK}"
                    )));
                }
                Some(cooking_time)
            }
            false => None,
        };

        let tags = match form.contains("tags") {
            true => Some(
                form.get_list("tags")?
                    .iter()
                    .map(|tag| number_from_value(tag).ok_or_else(|| TypeError::new("Invalid tag id")))
                    .collect::<Result<Vec<Uuid>, TypeError>>()?,
            ),
            false => None,
        };

        let ingredients = match form.contains("ingredients") {
            true => Some(validate_ingredients(form.get_list("ingredients")?)?),
            false => None,
        };

        Ok(Self {
            name,
            text,
            cooking_time,
            tags,
            ingredients,
        })
    }
}

impl RecipeForm {
    pub fn into_new_recipe(self) -> Result<NewRecipe, TypeError> {
        match self {
            RecipeForm {
                name: Some(name),
                text: Some(text),
                cooking_time: Some(cooking_time),
                tags: Some(tags),
                ingredients: Some(ingredients),
            } => Ok(NewRecipe {
                name,
                text,
                cooking_time,
                tags,
                ingredients,
            }),
            _ => Err(TypeError::new(
                "name, text, cooking_time, tags and ingredients are required",
            )),
        }
    }
}

fn validate_name(name: String) -> Result<String, TypeError> {
    let name = name.trim().to_string();

    if name.is_empty() {
        return Err(TypeError::new("Recipe name can't be empty"));
    }
    if name.chars().count() > RECIPE_NAME_MAX_LENGTH {
        return Err(TypeError::new(&format!(
            "Recipe name can't be longer than {RECIPE_NAME_MAX_LENGTH} characters"
        )));
    }

    Ok(name)
}

fn validate_ingredients(values: &[Value]) -> Result<Vec<RecipeIngredientInput>, TypeError> {
    let ingredients = values
        .iter()
        .map(RecipeIngredientInput::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    if ingredients.iter().any(|ingredient| !seen.insert(ingredient.id)) {
        return Err(TypeError::new(
            "Recipe can't contain the same ingredient twice",
        ));
    }

    Ok(ingredients)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn form(value: Value) -> Form {
        let data: FormData = serde_json::from_value(value).unwrap();
        Form::from_data(data)
    }

    #[test]
    fn parses_complete_recipe() {
        let form = form(json!({
            "name": "  Apple pie ",
            "text": "Bake it",
            "cooking_time": 45,
            "tags": [1, "2"],
            "ingredients": [
                { "id": 1, "amount": 200 },
                { "id": "2", "amount": "0.5" }
            ]
        }));

        let recipe = RecipeForm::try_from(&form).unwrap().into_new_recipe().unwrap();

        assert_eq!(recipe.name, "Apple pie");
        assert_eq!(recipe.cooking_time, 45);
        assert_eq!(recipe.tags, vec![1, 2]);
        assert_eq!(
            recipe.ingredients,
            vec![
                RecipeIngredientInput { id: 1, amount: 200. },
                RecipeIngredientInput { id: 2, amount: 0.5 },
            ]
        );
    }

    #[test]
    fn partial_update_keeps_missing_fields_empty() {
        let form = form(json!({ "cooking_time": "10" }));
        let recipe = RecipeForm::try_from(&form).unwrap();

        assert_eq!(
            recipe,
            RecipeForm {
                cooking_time: Some(10),
                ..Default::default()
            }
        );
        assert!(recipe.into_new_recipe().is_err());
    }

    #[test]
    fn rejects_short_cooking_time() {
        let form = form(json!({ "cooking_time": 0 }));

        assert!(RecipeForm::try_from(&form).is_err());
    }

    #[test]
    fn rejects_blank_and_long_names() {
        assert!(RecipeForm::try_from(&form(json!({ "name": "   " }))).is_err());

        let name = "a".repeat(RECIPE_NAME_MAX_LENGTH + 1);
        assert!(RecipeForm::try_from(&form(json!({ "name": name }))).is_err());
    }

    #[test]
    fn rejects_duplicate_ingredients() {
        let form = form(json!({
            "ingredients": [{ "id": 3, "amount": 1 }, { "id": 3, "amount": 2 }]
        }));

        let error = RecipeForm::try_from(&form).unwrap_err();
        assert_eq!(error.info(), "Recipe can't contain the same ingredient twice");
    }

    #[test]
    fn rejects_incomplete_or_non_positive_ingredients() {
        let missing = form(json!({ "ingredients": [{ "id": 3 }] }));
        assert!(RecipeForm::try_from(&missing).is_err());

        let negative = form(json!({ "ingredients": [{ "id": 3, "amount": -1 }] }));
        assert!(RecipeForm::try_from(&negative).is_err());

        let zero = form(json!({ "ingredients": [{ "id": 3, "amount": 0 }] }));
        assert!(RecipeForm::try_from(&zero).is_err());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(RecipeForm::try_from(&form(json!({ "text": 5 }))).is_err());
        assert!(RecipeForm::try_from(&form(json!({ "tags": "1,2" }))).is_err());
        assert!(RecipeForm::try_from(&form(json!({ "tags": [true] }))).is_err());
    }
}
