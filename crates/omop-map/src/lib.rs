#![deny(unsafe_code)]

//! Mapping Repository and Concept Resolver.

pub mod error;
pub mod index;
pub mod repository;
pub mod resolver;

pub use error::MappingError;
pub use index::{FieldStaticRules, MappingIndex, SlotRules};
pub use repository::{MappingRepository, MappingSource};
pub use resolver::{ConceptCoverage, ConceptResolver, Resolution, ResolvedConcept, ResolverPolicy};
