pub mod address;
pub mod audit;
pub mod config;
pub mod domain;
pub mod logging;
pub mod status;

pub use address::Address;
pub use domain::Domain;
pub use status::PhaseCode;
