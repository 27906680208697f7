pub mod build;
pub mod model;
pub mod namespaces;
pub mod turtle;
pub mod validate;

pub use build::{GraphBuild, GraphStats, build_triples, entity_iri};
pub use model::{Term, Triple};
pub use namespaces::Namespaces;
pub use turtle::{render_turtle, write_turtle};
pub use validate::{OutputValidationError, validate};
