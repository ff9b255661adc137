// Library root: re-exports all modules so integration tests can drive the
// bot without a live gateway.

pub mod announce;
pub mod app;
pub mod command;
pub mod config;
pub mod db;
pub mod gateway;
pub mod handlers;
pub mod protocol;
pub mod roles;
