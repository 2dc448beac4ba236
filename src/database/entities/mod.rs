pub mod boundaries;
pub mod common_types;
pub mod map_data;

pub use boundaries::Entity as Boundaries;
pub use map_data::Entity as MapData;
