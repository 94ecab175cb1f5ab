pub mod api;
pub mod common;
pub mod config;
pub mod db;
pub mod entity;
pub mod feed;
pub mod forms;
pub mod migration;
pub mod page_cache;
pub mod policy;
pub mod trace;
pub mod web;
