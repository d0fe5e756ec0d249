pub mod asn;
pub mod hop;
pub mod measurement;
pub mod persist;
pub mod schema;
pub mod settings;
pub mod target;
