//! Registered users and their JSON-file store.

pub mod model;
pub mod repository;

pub use model::{NewUser, User, UserPatch, UserUpdate, ADMIN_ROLE, DEFAULT_ROLE};
pub use repository::{StoreError, UserRepository};
