//! # Clean Architecture - Domain Model
//!
//! Storage-agnostic building blocks shared by every repository backend:
//! entities and their field schemas, partial-match filters with ordering
//! expressions, offset/limit pagination, the domain error taxonomy and
//! request/entity validators.
//!
//! Nothing in this crate performs I/O.

pub mod entity;
pub mod error;
pub mod filter;
pub mod page;
pub mod validation;
pub mod value_objects;

pub use entity::{
    unknown_field, Entity, EntityKey, FieldDef, FieldKind, FieldValue, ID_FIELD,
    IDENTITY_FIELDS, UUID_FIELD,
};
pub use error::{DomainError, DomainResult, FieldError};
pub use filter::{parse_order_by, Filter, OrderKey, DESCENDING_MARKER};
pub use page::LimitOffset;
pub use validation::{EntityValidator, ValidateEntity};
pub use value_objects::Lang;
