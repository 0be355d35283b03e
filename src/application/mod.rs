//! Application services: query handles, the scope controller and the
//! mutation coordinator.

pub mod context;
pub mod error;
pub mod mutations;
pub mod notices;
pub mod operations;
pub mod query;
pub mod scope;

pub use context::AppContext;
pub use error::AppError;
pub use mutations::MutationCoordinator;
pub use notices::{Notice, Notices};
pub use query::{Queries, Query, QueryState};
pub use scope::{FamilySource, ScopeChange, ScopeController};
