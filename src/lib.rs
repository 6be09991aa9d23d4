//! Homer Enrichment Hub - guardian portal
//!
//! Accounts, student rosters, program registration, waivers and
//! announcements for an after-school enrichment program.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
