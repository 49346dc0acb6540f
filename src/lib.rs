#![allow(missing_docs)] // TODO: enforce once the wire types settle

//! WeGram — bidirectional WeChat <-> Telegram bridge.
//!
//! Mirrors each WeChat conversation into a dedicated Telegram group and
//! relays messages, media, replies and revocations in both directions.
//! The WeChat side is reached through a third-party protocol gateway
//! (HTTP callback or AMQP queue in, JSON-over-HTTP commands out); the
//! Telegram side through the Bot API plus an MTProto user session for
//! the operations a bot cannot perform.

pub mod bot;
pub mod commands;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod gateway;
pub mod locales;
pub mod logging;
pub mod media;
pub mod provision;
pub mod registry;
pub mod revoke;
pub mod tg2wx;
pub mod user_client;
pub mod wechat;
pub mod wx2tg;
