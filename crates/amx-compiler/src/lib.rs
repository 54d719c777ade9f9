mod alerts;
mod backend;
mod builder;
mod compiler;
mod match_config;
mod options;
mod resolver;
mod scan;

#[cfg(test)]
mod test_support;

pub use alerts::{AlertCollector, AlertContext};
pub use backend::{backend_for, Backend, JsonBackend, TextBackend};
pub use builder::{FieldPlan, FieldTarget, FilterValueBuilder, MATCH_SUBJECT};
pub use compiler::{compile_matrix, Collaborators, CompileFailure};
pub use match_config::{build_match_tree, MatchOverrides, MatchTreeSource};
pub use options::CompilerOptions;
pub use resolver::{
    ExpressionResolver, ProducedValue, ReferenceScope, Resolution, ResolveTarget, RowLookup,
    UTILITY_MANAGER,
};
