//! RSS Reader - a feed catalog with a merged article view
//!
//! Feeds and their categories are kept in SQLite and managed over a JSON
//! API. The `/articles/` endpoint fetches the selected feeds and merges
//! their entries into a single newest-first list. Writes need a token from
//! the config file or from `/login`, and `/openapi` describes the API.

pub mod aggregator;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod resolver;
pub mod routes;
