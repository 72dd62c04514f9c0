//! Singular association targets (belongs_to, has_one).
//!
//! Loading `post.author` takes no per-call arguments, so only the association's
//! own selection, the target type's default selection and eager injection can
//! shape the query.

use crate::executor::LifeError;
use crate::finder::QueryContext;
use crate::lazy::resolver::{ColumnResolver, QueryPath, SelectionLayers};
use crate::model::{is_null, Record};
use crate::query::{ColumnName, FetchQuery, Filter};
use crate::relation::def::{AssociationDef, AssociationKind};
use crate::relation::{expect_kind, key_value};

/// Load the single target of a to-one association
pub trait TargetFinder {
    /// # Errors
    ///
    /// Returns `LifeError` if the association is not singular, a key column was
    /// not loaded on the owner, or the query fails.
    fn load_target(
        &self,
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
    ) -> Result<Option<Record>, LifeError>;
}

/// Singular load with the association's select, else the target default, else `*`
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseTargetFinder;

impl TargetFinder for BaseTargetFinder {
    fn load_target(
        &self,
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
    ) -> Result<Option<Record>, LifeError> {
        let owner_entity = owner.entity();
        expect_kind(
            owner_entity,
            association,
            &[AssociationKind::BelongsTo, AssociationKind::HasOne],
            QueryPath::Singular.label(),
        )?;
        let target = ctx.catalog.entity(association.target())?;
        let fk = association.foreign_key_column(owner_entity);
        let referenced = association.referenced_key_column(owner_entity, &target);

        let (key_column, key) = match association.kind() {
            AssociationKind::BelongsTo => (referenced.to_string(), key_value(owner, &fk)?),
            _ => (fk, key_value(owner, referenced)?),
        };
        if is_null(&key) {
            return Ok(None);
        }

        let select = association
            .configured_select()
            .or_else(|| target.default_selection())
            .cloned();
        let query = FetchQuery::new(target.table())
            .maybe_select(select)
            .filter(Filter::eq(ColumnName::qualified(target.table(), key_column), key))
            .filters(ctx.inheritance_filter(&target))
            .filters(association.conditions().iter().cloned())
            .order_by(association.ordering().iter().cloned())
            .limit(1);

        Ok(ctx
            .fetch_records(QueryPath::Singular, &target, &query)?
            .into_iter()
            .next())
    }
}

/// Injects eager columns into singular loads
///
/// Precedence: association select > target default > eager columns > `*`.
#[derive(Debug, Clone)]
pub struct LazyTargetFinder<T> {
    inner: T,
    resolver: ColumnResolver,
}

impl<T: TargetFinder> LazyTargetFinder<T> {
    pub fn new(inner: T, resolver: ColumnResolver) -> Self {
        Self { inner, resolver }
    }
}

impl<T: TargetFinder> TargetFinder for LazyTargetFinder<T> {
    fn load_target(
        &self,
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
    ) -> Result<Option<Record>, LifeError> {
        let target = ctx.catalog.entity(association.target())?;
        let layers = SelectionLayers::new()
            .association(association.configured_select())
            .type_default(target.default_selection());
        match self
            .resolver
            .resolve(QueryPath::Singular, &target, layers)
            .into_override()
        {
            Some(select) => {
                let association = association.clone().select(select);
                self.inner.load_target(ctx, owner, &association)
            }
            None => self.inner.load_target(ctx, owner, association),
        }
    }
}
