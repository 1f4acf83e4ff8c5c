pub mod location;
pub mod ws;
