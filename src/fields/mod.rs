//! Computation fields
//!
//! A computation field is one measurable quantity (a sum of `value`, an
//! opening balance, a percentage of the total...) computed over a filtered,
//! optionally grouped set of rows.
//!
//! # Components
//! - [`ComputationFieldSpec`]: what a field aggregates and how it resolves
//! - [`ComputationField`]: configurable implementation and `create` factory
//! - [`FieldRegistry`]: name -> field lookup, with the built-ins preloaded
//! - [`PreparedField`]: a field bound to one report run, caching its aggregates

pub mod builtin;
pub mod error;
pub mod instance;
pub mod registry;
pub mod spec;

pub use error::{RegistryError, RegistryResult};
pub use instance::{AggregateResult, FieldContext, GroupKey, Grouping, PreparedField, SharedFields};
pub use registry::FieldRegistry;
pub use spec::{
    get_full_dependency_list, ComputationField, ComputationFieldSpec, DateScope, FieldRef, Requirement,
    ResolveInput, Resolver,
};
