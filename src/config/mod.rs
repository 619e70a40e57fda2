pub mod prompt;
pub mod routes;
