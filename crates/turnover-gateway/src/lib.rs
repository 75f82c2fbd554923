//! # Turnover Gateway
//!
//! HTTP surface for cleaner callbacks. The yes/no links in every cleaner
//! request point at `/api/v1/respond`; each hit resumes exactly one
//! suspended execution through its token.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
