//! SaltyRTC signaling client.
//!
//! This crate provides:
//! - A sans-IO signaling engine ([`Signaling`]) for both roles
//! - The initiator's responder pool
//! - The [`Task`] extension point and the relayed data task
//! - A tokio WebSocket driver ([`Client`])
//!
//! # Usage
//!
//! Build a [`ClientConfig`] with [`ClientBuilder`], hand it to
//! [`Client::spawn`] and consume [`SignalingEvent`]s. Tests and other
//! transports can drive [`Signaling`] directly.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod peer;
pub mod pool;
pub mod signaling;
pub mod state;
pub mod task;
pub mod tasks;

pub use client::Client;
pub use config::{ClientBuilder, ClientConfig, RoleConfig, SignalingConfig};
pub use error::SignalingError;
pub use event::{SignalingEvent, Transmit};
pub use signaling::Signaling;
pub use state::{HandoverState, SignalingRole, SignalingState};
pub use task::{Task, TaskAction, TaskContext};
