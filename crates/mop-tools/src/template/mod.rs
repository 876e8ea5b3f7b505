//! Variable resolution module.
//!
//! Provides the single `{{ ... }}` substitution grammar using minijinja.

mod resolver;

pub use resolver::VariableResolver;
