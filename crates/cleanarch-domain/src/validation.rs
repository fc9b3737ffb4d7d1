//! Validation of inbound request data and of the entities it targets.
//!
//! A validator holds two ordered lists of checks: data validators see the
//! inbound data and a caller context; entity validators additionally see the
//! stored entity the data refers to. Checks run in registration order and the
//! first failure is returned.

use std::fmt;

use crate::error::DomainResult;

type DataCheck<D, C> = Box<dyn Fn(&D, &C) -> DomainResult<()> + Send + Sync>;
type EntityCheck<E, D, C> = Box<dyn Fn(&E, &D, &C) -> DomainResult<()> + Send + Sync>;

/// Composable validator for data `D` targeting entity `E` under context `C`.
pub struct EntityValidator<D, E, C = ()> {
    data_validators: Vec<DataCheck<D, C>>,
    entity_validators: Vec<EntityCheck<E, D, C>>,
}

impl<D, E, C> EntityValidator<D, E, C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data_validators: Vec::new(),
            entity_validators: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_data<F>(mut self, check: F) -> Self
    where
        F: Fn(&D, &C) -> DomainResult<()> + Send + Sync + 'static,
    {
        self.data_validators.push(Box::new(check));
        self
    }

    #[must_use]
    pub fn with_entity<F>(mut self, check: F) -> Self
    where
        F: Fn(&E, &D, &C) -> DomainResult<()> + Send + Sync + 'static,
    {
        self.entity_validators.push(Box::new(check));
        self
    }

    /// Run every data validator.
    ///
    /// # Errors
    ///
    /// Returns the first validator failure.
    pub fn validate_data(&self, data: &D, ctx: &C) -> DomainResult<()> {
        self.data_validators.iter().try_for_each(|check| check(data, ctx))
    }

    /// Run every entity validator.
    ///
    /// # Errors
    ///
    /// Returns the first validator failure.
    pub fn validate_entity(&self, entity: &E, data: &D, ctx: &C) -> DomainResult<()> {
        self.entity_validators
            .iter()
            .try_for_each(|check| check(entity, data, ctx))
    }
}

impl<D, E, C> Default for EntityValidator<D, E, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, E, C> fmt::Debug for EntityValidator<D, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityValidator")
            .field("data_validators", &self.data_validators.len())
            .field("entity_validators", &self.entity_validators.len())
            .finish()
    }
}

/// Request types that carry their own validator.
pub trait ValidateEntity<E: 'static, C: 'static = ()>: Sized + 'static {
    fn validator() -> &'static EntityValidator<Self, E, C>;

    /// # Errors
    ///
    /// Returns the first data validator failure.
    fn validate_data(&self, ctx: &C) -> DomainResult<()> {
        Self::validator().validate_data(self, ctx)
    }

    /// # Errors
    ///
    /// Returns the first entity validator failure.
    fn validate_entity(&self, entity: &E, ctx: &C) -> DomainResult<()> {
        Self::validator().validate_entity(entity, self, ctx)
    }
}
