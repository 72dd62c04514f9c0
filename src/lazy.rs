//! Column-level lazy loading.
//!
//! # Architecture
//!
//! - **Registry**: per-entity lazy attribute sets (`LazyAttributeSet`)
//! - **Resolver**: eager column derivation and the selection precedence (`ColumnResolver`)
//! - **Fetcher**: on-demand single attribute fetch (`LazyAttributeFetcher`)
//!
//! The query paths that consult the resolver live next to the code they wrap:
//! [`finder`](crate::finder) for direct finds and [`relation`](crate::relation)
//! for association, preload and join paths.

pub mod registry;
#[doc(inline)]
pub use registry::LazyAttributeSet;

pub mod resolver;
#[doc(inline)]
pub use resolver::{ColumnResolver, QueryPath, ResolvedSelection, SelectionLayers, SelectionSource};

pub mod fetcher;
#[doc(inline)]
pub use fetcher::LazyAttributeFetcher;
