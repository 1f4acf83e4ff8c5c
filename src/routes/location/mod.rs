mod handler;
pub mod model;

pub use handler::{broadcast_location, find_nearby_users, refresh_profile, update_location};
