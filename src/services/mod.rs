pub mod boundary_service;
pub mod map_data_service;
pub mod table_lifecycle;
pub mod upload_service;

pub use boundary_service::*;
pub use map_data_service::*;
pub use table_lifecycle::*;
pub use upload_service::*;
