//! 3D asset ingestion service.
//!
//! Uploads are classified by extension, staged under the uploads root and
//! processed in the background: served raw, converted by an external tool,
//! or extracted into an I3S tree that `/i3s` maps REST-style paths onto.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
