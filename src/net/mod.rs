//! Peer-to-peer plumbing: the authenticated encrypted channel that
//! change sets travel over.

pub mod auth;

pub use auth::{AuthReadWriter, Keyring};
