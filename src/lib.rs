//! # formfill
//!
//! An AI-backed question answering engine for automated job application forms.
//!
//! Given a form question (optionally with a fixed set of allowed choices) and
//! a structured applicant profile, formfill deterministically produces an
//! answer: drawn directly from profile fields when possible, otherwise
//! generated by an LLM constrained by retrieved profile context, and coerced
//! to exactly one allowed choice when choices are present. Answered
//! questions are batched and written behind as per-question conversation
//! records.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────┐
//! │ Profile  │──▶│ Render+Embed  │──▶│  SQLite    │
//! │  (YAML)  │   │   (index)     │   │ kv chunks │
//! └──────────┘   └───────┬───────┘   └────┬──────┘
//!                        │                │
//!            ┌───────────▼────────────────▼──┐      ┌──────────┐
//!            │         Answer Engine         │─────▶│ Journal  │
//!            │ direct → retrieve → prompt →  │      │ (write-  │
//!            │        validate options       │      │  behind) │
//!            └───────────┬───────────────────┘      └──────────┘
//!                        ▼
//!                ┌───────────────┐
//!                │ Provider      │
//!                │ local/external│
//!                └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! formfill init                           # create database
//! formfill ingest                         # embed the profile
//! formfill search "python experience"     # inspect retrieval
//! formfill answer "What is your email?"   # answer one question
//! formfill answer "Visa required?" --options "Please select;Yes;No"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`profile`] | Profile parsing, lookup, and direct matching |
//! | [`render`] | Profile → field entry renderer |
//! | [`index`] | Embedding index and cosine retrieval |
//! | [`classify`] | Question classification with session cache |
//! | [`answer`] | The answer engine |
//! | [`options`] | Option coercion |
//! | [`provider`] | Provider gateway (local and external LLM back-ends) |
//! | [`journal`] | Debounced write-behind conversation journal |
//! | [`store`] | SQLite persistence |
//! | [`stop`] | Cooperative cancellation |
//! | [`progress`] | Ingest progress reporting |

pub mod answer;
pub mod classify;
pub mod config;
pub mod index;
pub mod journal;
pub mod models;
pub mod options;
pub mod profile;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod render;
pub mod stop;
pub mod store;
