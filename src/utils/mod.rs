pub mod auth;
pub mod hash;
pub mod validation;
