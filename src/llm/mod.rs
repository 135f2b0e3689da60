pub mod provider;
pub mod providers;
pub mod registry;
pub mod response;
pub mod types;
