//! # Notetaker Orchestrator Library
//!
//! Keeps a local mirror of calendar events, decides which meetings get a notetaker agent,
//! drives the agent and its recording through a persisted state machine, and reconciles
//! provider webhooks, scheduled dispatches and transcoding results against that state.

pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod monitor;
pub mod providers;
pub mod repositories;
pub mod rules;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod time_utils;
pub mod webhook_verification;
pub mod webhooks;
pub use migration;
