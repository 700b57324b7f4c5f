//! # Middleware Module
//!
//! Middleware runs before the route handlers and may short-circuit a request.
//!
//! ## Our Middleware
//! - `auth`: checks the bearer token minted at the end of a ceremony

pub mod auth;
