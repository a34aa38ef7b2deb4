//! `cadastro`: a small user-registration web service.
//!
//! Users register through an HTML form and are stored in a single JSON
//! file. Logging in opens a server-side session; administrators can list,
//! update and delete users.

pub mod auth;
pub mod config;
pub mod gateway;
pub mod users;
