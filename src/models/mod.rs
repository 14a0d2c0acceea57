pub mod delivery;
pub mod driver;
pub mod fields;
pub mod location;
