//! Overlay Core - Stacked Modal/Drawer Coordination over Page Navigation
//!
//! This crate keeps stacked "overlays" (modals and drawers) consistent
//! between a client that navigates by fetching page payloads and the server
//! that renders them. Overlays are fetched and refreshed through the same
//! navigation mechanism as whole pages, so they are addressable by URL,
//! survive partial reloads, and nest.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── CLIENT ─────────────────────────────┐
//! │  OverlayRuntime                                                 │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────────────┐ │
//! │  │ Registrar    │  │ Instances      │  │ NavigationInterceptor│ │
//! │  │ (stack)      │  │ (state machine)│  │ (headers, reconcile) │ │
//! │  └──────────────┘  └────────────────┘  └──────────┬───────────┘ │
//! └───────────────────────────────────────────────────┼─────────────┘
//!                      Overlay-* headers, ?overlay=id │ ▲ Page + envelope
//! ┌───────────────────────────────────────────────────▼─┼───────────┐
//! │  OverlayServer                                      │           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┴─────────┐ │
//! │  │ Context      │  │ Handlers +   │  │ Session cache,         │ │
//! │  │ (phase, ids) │  │ interceptors │  │ ResponseAssembler      │ │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘ │
//! └──────────────────────────── SERVER ─────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`OverlayId`]: URL-safe identifier encoding a typename and arguments
//! - [`OverlayRegistrar`]: ordered stack of open overlays; the top is focused
//! - [`OverlayRuntime`] / [`OverlayHandle`]: client-side lifecycle
//! - [`Navigator`]: the page-transition transport the runtime drives
//! - [`OverlayServer`]: server-side rendering of overlay requests
//! - [`OverlayHandler`]: implemented once per overlay type
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use overlay_core::{ClientConfig, OpenOptions, OverlayRuntime, Page};
//!
//! let runtime = OverlayRuntime::new(Arc::new(my_navigator), ClientConfig::default());
//! runtime.boot(Page::new("Users/Index", "/users")).await?;
//!
//! let editor = runtime.open(("profile-editor", args), OpenOptions::default()).await?;
//! editor.close().await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod events;
pub mod identity;
pub mod instance;
pub mod protocol;
pub mod server;
pub mod stack;

pub use client::{
    Navigator, NavigationError, NavigationInterceptor, OpenOptions, OpenTarget, OverlayError,
    OverlayHandle, OverlayRuntime, Visit,
};
pub use config::{
    load_config, load_config_from_path, ClientConfig, ConfigError, ConfigSource,
    OverlaySettings, ServerConfig,
};
pub use events::{EventChannel, ListenerId};
pub use identity::{IdentityError, OverlayArgs, OverlayId, OverlayIdentity};
pub use instance::{OverlayConfig, OverlayInstance, OverlayStatus, Size, StatusChange, Variant};
pub use protocol::{HeaderMap, Lifecycle, OverlayEnvelope, Page};
pub use server::{
    HandlerError, HandlerRegistry, OverlayContext, OverlayHandler, OverlayRequest,
    OverlayServer, Phase, Props, ServerError, SessionStore,
};
pub use stack::{OverlayRegistrar, OverlayStack, StackSnapshot};
