use serde::{Deserialize, Serialize};

use super::error::TypeError;
use crate::constants::MAX_COUNT_PER_PAGE;

/// Page number based paging, `page` starts from 1.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, limit: Option<i64>, default_limit: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, MAX_COUNT_PER_PAGE),
        }
    }

    /// Saturates for pages far past the end, those simply come back empty.
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.limit)
    }
}

/// Number of recipes embedded per author, `None` means all of them.
pub fn check_recipes_limit(limit: Option<i64>) -> Result<Option<i64>, TypeError> {
    match limit {
        Some(limit) if limit < 0 => Err(TypeError::new("recipes_limit can't be negative")),
        limit => Ok(limit),
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PageContext<T> {
    pub rows: Vec<T>,
    pub total_rows: i64,
    pub page: i64,
    pub page_count: i64,
    pub next_page: Option<i64>,
    pub prev_page: Option<i64>,
}

impl<T> PageContext<T> {
    pub fn from_rows(rows: Vec<T>, total_rows: i64, request: &PageRequest) -> Self {
        if rows.is_empty() {
            return Self::no_rows(total_rows, request);
        }

        let page_count = (total_rows + request.limit - 1) / request.limit;

        Self {
            rows,
            total_rows,
            page: request.page,
            page_count,
            next_page: (request.page < page_count).then(|| request.page + 1),
            prev_page: (request.page > 1).then(|| request.page - 1),
        }
    }

    pub fn no_rows(total_rows: i64, request: &PageRequest) -> Self {
        Self {
            rows: vec![],
            total_rows,
            page: request.page,
            page_count: (total_rows + request.limit - 1) / request.limit,
            next_page: None,
            prev_page: (request.page > 1).then(|| request.page - 1),
        }
    }

    pub fn map<U, F>(self, f: F) -> PageContext<U>
    where
        F: FnMut(T) -> U,
    {
        PageContext {
            rows: self.rows.into_iter().map(f).collect(),
            total_rows: self.total_rows,
            page: self.page,
            page_count: self.page_count,
            next_page: self.next_page,
            prev_page: self.prev_page,
        }
    }
}
