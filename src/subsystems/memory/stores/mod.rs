//! Concrete [`SessionStore`](super::store::SessionStore) backends.

pub mod file;
pub mod sqlite;
