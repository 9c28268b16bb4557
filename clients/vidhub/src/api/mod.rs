//! Typed wrappers around the VidHub backend REST API.
//!
//! Everything goes through one [`ApiClient`], which owns the session and handles bearer
//! authentication and token refresh. Each submodule adds the endpoints of one area of the API
//! as methods on the client.

pub mod client;
pub mod error;
pub mod payments;
pub mod playlists;
pub mod streams;
pub mod tags;
pub mod types;
pub mod users;
pub mod videos;
pub mod wallet;

pub use client::ApiClient;
pub use error::{ApiError, ErrorKind};
