//! # tootloom
//!
//! A Mastodon reply bot that weaves mentions into durable, forkable
//! conversation threads backed by SQLite, replies via an OpenAI-compatible
//! LLM (with a small tool set, including image generation), and splits
//! long replies into post-sized chains.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │ Notifications │──▶│ Resolver  │──▶│ History   │──▶│   LLM    │
//! │  (Mastodon)   │   │ fork/     │   │ Compiler  │   │ + tools  │
//! └──────────────┘   │ reconcile │   └───────────┘   └────┬─────┘
//!                    └─────┬─────┘                        │
//!                          ▼                              ▼
//!                    ┌───────────┐                  ┌──────────┐
//!                    │  SQLite    │◀────────────────│ Pipeline │──▶ posts
//!                    │ threads    │   persist, then │ split +  │
//!                    │ + cursor   │   post          │ chain    │
//!                    └───────────┘                  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Message/thread persistence and the cursor |
//! | [`resolver`] | Thread resolution: continue, fork, or reconcile |
//! | [`history`] | Bounded LLM context compilation |
//! | [`llm`] | OpenAI-compatible chat client and tool loop |
//! | [`tools`] | The closed tool set |
//! | [`mastodon`] | Mastodon API client |
//! | [`textsplit`] | Post-length splitting |
//! | [`pipeline`] | The reply pipeline |
//! | [`server`] | The mention polling loop |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod history;
pub mod llm;
pub mod mastodon;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod server;
pub mod store;
pub mod textsplit;
pub mod tools;
