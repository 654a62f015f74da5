pub mod api;
pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod export;
pub mod pagination;
pub mod qingping;
pub mod registry;
pub mod sensors;
pub mod token_cache;
pub mod tuya;

#[cfg(test)]
pub(crate) mod testing;
