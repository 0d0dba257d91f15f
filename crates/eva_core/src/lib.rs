pub mod api;
pub mod entity;
pub mod error;
pub mod filter;
pub mod ids;
pub mod schema_manifest;
pub mod time;
pub mod value;
pub mod wire;

pub use api::*;
pub use entity::*;
pub use error::{EvaError, EvaResult};
pub use filter::*;
pub use ids::*;
pub use schema_manifest::*;
pub use time::*;
pub use value::*;
pub use wire::{CreateEntityRequest, EntityResponse, QueryRequest};
