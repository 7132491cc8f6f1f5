//! Connection registry

mod user_map;

pub use user_map::UserMap;
