pub mod descriptor;
pub mod engine;
pub mod error;
pub mod event;
pub mod service;
pub mod structs;
pub mod woice;

pub use descriptor::Descriptor;
pub use engine::Engine;
pub use error::{PxtnError, PxtnResult};
pub use service::{Quality, RenderPreparation, Service};
