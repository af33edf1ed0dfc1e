pub mod hub;
pub mod presence;
pub mod session;
