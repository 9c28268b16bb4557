//! Background tasks that keep client-side state in sync with the backend.

pub mod status_poller;

pub use status_poller::{
    DEFAULT_POLL_INTERVAL, PollerHandle, Readiness, StatusProbe, spawn_status_poller,
    watch_encoding, watch_live_readiness,
};
