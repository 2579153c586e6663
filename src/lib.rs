mod database {
    pub mod actions;
    pub mod error;
    pub mod form;
    pub mod pagination;
    pub mod schema;
    pub mod shopping_list;
    pub mod short_link;
}
mod constants;

mod cache {
    pub mod cache;
}

pub use cache::cache::*;
pub use constants::*;
pub use database::*;
pub use actions::*;
