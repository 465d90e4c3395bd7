pub mod api;
pub mod chat;
pub mod composer;
pub mod config;
pub mod data_models;
pub mod error;
pub mod fetcher;
pub mod relay;
pub mod search;
pub mod text;
