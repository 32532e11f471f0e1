pub mod dot;
pub mod error;
pub mod serialize;
pub mod status;

pub use dot::to_dot;
pub use error::ExportError;
pub use serialize::{export_project, from_json, serialize, to_json, validate, GameData};
pub use status::StatusReport;
