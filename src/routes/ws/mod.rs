mod handler;
pub mod model;

pub use handler::location_ws;
