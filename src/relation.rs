//! Associations and the query paths that load them.
//!
//! - belongs_to / has_one: [`TargetFinder`] (`singular`)
//! - has_many, has_and_belongs_to_many, has_many :through: [`AssociationFinder`] (`collection`)
//! - batch eager loading: [`Preloader`] (`preload`)
//! - single-query eager loading: [`JoinColumns`] and [`JoinDependency`] (`join`)
//!
//! Each path is a trait with a base implementation and a lazy decorator that
//! rewrites the request (selection only) before delegating.

pub mod def;
pub use def::{AssociationDef, AssociationKind};

pub mod singular;
pub use singular::{BaseTargetFinder, LazyTargetFinder, TargetFinder};

pub mod collection;
pub use collection::{
    AssociationFinder, BaseAssociationFinder, LazyCollectionFinder, LazyJoinTableFinder,
    LazyThroughFinder,
};

pub mod preload;
pub use preload::{BasePreloader, LazyPreloader, Preloader};

pub mod join;
pub use join::{BaseJoinColumns, JoinColumns, JoinDependency, JoinSegment, LazyJoinColumns};

use crate::executor::LifeError;
use crate::model::Record;
use crate::schema::EntityDef;
use sea_query::Value;

/// Loaded value of a key column on `record`
///
/// Association paths never fetch keys lazily; a key that was not selected is
/// reported instead of silently producing an empty association.
pub(crate) fn key_value(record: &Record, column: &str) -> Result<Value, LifeError> {
    record
        .get(column)
        .cloned()
        .ok_or_else(|| LifeError::MissingAttribute {
            entity: record.entity_name().to_string(),
            attribute: column.to_string(),
        })
}

/// Association shape check shared by the paths
pub(crate) fn expect_kind(
    owner: &EntityDef,
    association: &AssociationDef,
    allowed: &[AssociationKind],
    path: &str,
) -> Result<(), LifeError> {
    if allowed.contains(&association.kind()) {
        Ok(())
    } else {
        Err(LifeError::Association(format!(
            "{}.{} is {}, which the {path} path cannot load",
            owner.name(),
            association.name(),
            association.kind().label()
        )))
    }
}
