pub mod auth;
pub mod channels;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod routes;
pub mod users;
