//! The sea-orm entities of all tables that make up the blog.

pub mod comment;
pub mod follow;
pub mod group;
pub mod post;
pub mod session;
pub mod user;

