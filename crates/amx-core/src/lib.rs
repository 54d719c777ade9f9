pub mod error;
pub mod program;
pub mod registry;
pub mod schema;
pub mod types;
pub mod value;

pub use error::MatrixError;
pub use program::*;
pub use registry::*;
pub use schema::*;
pub use types::*;
pub use value::*;
