use std::fmt::{self, Display};

use potion::{Error, HtmlError};
use warp::reject;

#[derive(Debug)]
pub struct QueryError {
    info: String,
}

impl QueryError {
    pub fn new(info: String) -> Self {
        Self { info }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Database(e) => match e.constraint() {
                Some(constraint) => Self::new(format!("{e} ({constraint})")),
                None => Self::new(format!("{e}")),
            },
            sqlx::Error::RowNotFound => Self::new(format!("RowNotFound")),
            sqlx::Error::ColumnNotFound(e) => Self::new(format!("Column not found: {e}")),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(format!("Column decode {index} ({source})"))
            }
            sqlx::Error::PoolTimedOut => Self::new(format!("Pool timed out")),
            sqlx::Error::PoolClosed => Self::new(format!("Pool closed")),
            e => Self::new(format!("{e}")),
        }
    }
}

impl Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info)
    }
}

impl From<QueryError> for Error {
    fn from(value: QueryError) -> Self {
        Error {
            code: 500,
            info: Some(value.info),
            redirect: None,
        }
    }
}

/// `true` when the statement was rejected by any unique constraint.
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(e) => e.is_unique_violation(),
        _ => false,
    }
}

/// `true` when the statement was rejected by the constraint called `name`.
pub fn violates_constraint(error: &sqlx::Error, name: &str) -> bool {
    match error {
        sqlx::Error::Database(e) => e.constraint() == Some(name),
        _ => false,
    }
}

/// Maps constraint violations listed in `messages` to validation errors.
/// Everything else stays a server side query error.
pub fn constraint_error(error: sqlx::Error, messages: &[(&str, &str)]) -> Error {
    let message = match &error {
        sqlx::Error::Database(e) => e.constraint().and_then(|constraint| {
            messages
                .iter()
                .find(|(name, _)| *name == constraint)
                .map(|(_, message)| *message)
        }),
        _ => None,
    };

    match message {
        Some(message) => HtmlError::InvalidRequest.new(message),
        None => QueryError::from(error).into(),
    }
}

#[derive(Debug)]
pub struct CacheError {
    info: String,
}

impl CacheError {
    pub fn new(info: String) -> Self {
        Self { info }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(value: redis::RedisError) -> Self {
        Self::new(format!("{:?} - {:?}", value.code(), value.detail()))
    }
}

impl From<CacheError> for Error {
    fn from(value: CacheError) -> Self {
        Error {
            code: 500,
            info: Some(value.info),
            redirect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    info: String,
}

impl TypeError {
    pub fn new(info: &str) -> Self {
        Self {
            info: info.to_string(),
        }
    }

    pub fn info(&self) -> &str {
        &self.info
    }
}

impl Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.info)
    }
}

impl std::error::Error for TypeError {}

impl From<TypeError> for Error {
    fn from(value: TypeError) -> Self {
        HtmlError::InvalidRequest.new(&value.info)
    }
}

// `From<TypeError> for Rejection` comes from warp's blanket impl over `Reject`.
impl reject::Reject for TypeError {}

#[derive(Debug)]
pub enum ShortLinkError {
    Exhausted { attempts: u32 },
    Store(sqlx::Error),
}

impl ShortLinkError {
    /// Like the plain conversion, but store errors from constraints listed in
    /// `messages` become validation errors.
    pub fn with_constraints(self, messages: &[(&str, &str)]) -> Error {
        match self {
            ShortLinkError::Store(e) => constraint_error(e, messages),
            e => e.into(),
        }
    }
}

impl From<sqlx::Error> for ShortLinkError {
    fn from(value: sqlx::Error) -> Self {
        Self::Store(value)
    }
}

impl Display for ShortLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShortLinkError::Exhausted { attempts } => {
                write!(f, "No unique short link found after {attempts} attempts")
            }
            ShortLinkError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl From<ShortLinkError> for Error {
    fn from(value: ShortLinkError) -> Self {
        match value {
            ShortLinkError::Exhausted { .. } => {
                HtmlError::InternalServerError.new(&value.to_string())
            }
            ShortLinkError::Store(e) => QueryError::from(e).into(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{error::Error as StdError, fmt};

    use sqlx::error::{DatabaseError, ErrorKind};

    #[derive(Debug)]
    struct ConstraintViolation {
        unique: bool,
        constraint: &'static str,
    }

    impl fmt::Display for ConstraintViolation {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "violates constraint \"{}\"", self.constraint)
        }
    }

    impl StdError for ConstraintViolation {}

    impl DatabaseError for ConstraintViolation {
        fn message(&self) -> &str {
            "constraint violation"
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn constraint(&self) -> Option<&str> {
            Some(self.constraint)
        }

        fn kind(&self) -> ErrorKind {
            match self.unique {
                true => ErrorKind::UniqueViolation,
                false => ErrorKind::ForeignKeyViolation,
            }
        }
    }

    pub fn unique_violation(constraint: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ConstraintViolation {
            unique: true,
            constraint,
        }))
    }

    pub fn foreign_key_violation(constraint: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ConstraintViolation {
            unique: false,
            constraint,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::*, *};
    use crate::constants::RECIPE_CONSTRAINTS;

    #[test]
    fn non_database_errors_are_not_constraint_violations() {
        let error = sqlx::Error::RowNotFound;

        assert!(!is_unique_violation(&error));
        assert!(!violates_constraint(&error, "recipes_short_link_key"));
    }

    #[test]
    fn constraint_violations_are_classified_by_name() {
        let error = unique_violation("recipes_short_link_key");

        assert!(is_unique_violation(&error));
        assert!(violates_constraint(&error, "recipes_short_link_key"));
        assert!(!violates_constraint(&error, "recipes_name_key"));

        let error = foreign_key_violation("recipe_tags_tag_id_fkey");
        assert!(!is_unique_violation(&error));
    }

    #[test]
    fn listed_constraints_become_validation_errors() {
        let error = constraint_error(unique_violation("recipes_name_key"), RECIPE_CONSTRAINTS);
        assert_ne!(error.code, 500);
        assert_eq!(
            error.info.as_deref(),
            Some("Recipe with this name already exists")
        );

        let error = constraint_error(
            foreign_key_violation("recipe_tags_tag_id_fkey"),
            RECIPE_CONSTRAINTS,
        );
        assert_ne!(error.code, 500);
        assert_eq!(error.info.as_deref(), Some("Tag doesn't exist"));
    }

    #[test]
    fn unlisted_constraints_stay_server_errors() {
        let error = constraint_error(unique_violation("users_email_key"), RECIPE_CONSTRAINTS);

        assert_eq!(error.code, 500);
    }

    #[test]
    fn short_link_store_errors_keep_constraint_messages() {
        let error = ShortLinkError::from(unique_violation("recipes_name_key"))
            .with_constraints(RECIPE_CONSTRAINTS);
        assert_ne!(error.code, 500);
        assert_eq!(
            error.info.as_deref(),
            Some("Recipe with this name already exists")
        );

        let error = ShortLinkError::Exhausted { attempts: 100 }.with_constraints(RECIPE_CONSTRAINTS);
        assert_eq!(error.code, 500);
    }

    #[test]
    fn query_error_keeps_the_driver_message() {
        let error = QueryError::from(sqlx::Error::PoolClosed);

        assert_eq!(error.to_string(), "Pool closed");
    }

    #[test]
    fn exhausted_short_link_reports_attempts() {
        let error = ShortLinkError::Exhausted { attempts: 100 };

        assert_eq!(
            error.to_string(),
            "No unique short link found after 100 attempts"
        );
    }
}
