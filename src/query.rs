//! Query values shared by every path of the lazy loading layer.
//!
//! # Architecture
//!
//! - **Select**: explicit selections (`Select`, `SelectItem`, `ColumnName`)
//! - **Fetch**: the structured query an executor runs (`FetchQuery`, `Join`, `Filter`, `OrderBy`)
//! - **Scope**: per-call `FindOptions` and the explicit ambient `ScopeStack`

pub mod select;
#[doc(inline)]
pub use select::{ColumnName, Select, SelectItem};

pub mod fetch;
#[doc(inline)]
pub use fetch::{Direction, FetchQuery, Filter, Join, JoinKind, OrderBy};

pub mod scope;
#[doc(inline)]
pub use scope::{EagerStrategy, FindOptions, Scope, ScopeStack};
