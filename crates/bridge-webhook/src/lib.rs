//! HTTP signal intake.
//!
//! Receives TradingView-style alerts over an authenticated endpoint and
//! hands validated [`Signal`](bridge_core::Signal) values to the trading
//! core. Core rejections come back as HTTP 200 with a structured error
//! body: signals are level-triggered intent, the sender must observe the
//! outcome but never retry.

pub mod auth;
pub mod parse;
pub mod server;

pub use parse::{parse_signal, ParseError};
pub use server::{router, serve, AppState, SignalGateway, WebhookConfig, WebhookError};
