//! # Memory Gateway
//!
//! **A memory-agent gateway: semantic storage on the Internet Computer,
//! audit trail on Monad.**
//!
//! The gateway accepts user content over HTTP, stores it in the Kinic
//! vector-search canister, mirrors a compact metadata record of every
//! operation to the `KinicMemoryLog` contract on Monad, and serves
//! memory-conditioned chat through an LLM. Per-user isolation is enforced
//! across both backends via principal-scoped tags.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌─────────────────┐
//! │   HTTP   │──▶│ Admission │──▶│  Pipeline  │──▶│ Kinic canister   │
//! │  (axum)  │   │ key+rate  │   │            │   │ (vector search)  │
//! └──────────┘   └───────────┘   │  extract   │   └─────────────────┘
//!                                │  scope     │   ┌─────────────────┐
//!                                │  dispatch  │──▶│ Monad audit log  │
//!                                └─────┬──────┘   │ (KinicMemoryLog) │
//!                                      │          └───────┬─────────┘
//!                                      ▼                  ▼
//!                                ┌──────────┐     ┌──────────────┐
//!                                │   LLM    │     │  Chain cache  │
//!                                │ (chat)   │     │ (projection)  │
//!                                └──────────┘     └──────────────┘
//! ```
//!
//! ## Request Flows
//!
//! 1. **insert** — [`metadata`] derives `(title, summary, tags, fingerprint)`
//!    from the raw content, [`scope`] prefixes the principal onto the vector
//!    tag, [`kinic`] stores the content, then [`monad`] logs the metadata.
//!    A failed vector write aborts the flow; a failed chain write after a
//!    durable vector insert is flagged, never raised.
//! 2. **search** — [`kinic`] over-fetches raw hits, [`scope`] post-filters
//!    them to the caller's principal, and the search itself is audited on
//!    chain.
//! 3. **chat** — retrieval as in search, then [`llm`] generates a reply
//!    conditioned on the retrieved memories, and the turn is recorded as a
//!    knowledge event.
//!
//! Read endpoints are served from [`cache`], an in-memory projection of the
//! audit log refreshed in the background.
//!
//! ## Modules
//!
//! - [`config`] — one configuration record, TOML + env overrides
//! - [`error`] — the error taxonomy every layer shares
//! - [`metadata`] — deterministic metadata extraction (no LLM)
//! - [`scope`] — principal namespacing and the isolation predicate
//! - [`kinic`] — vector-canister client (embeddings + candid calls)
//! - [`monad`] — audit-contract client (alloy, single signer mutex)
//! - [`cache`] — queryable projection of the on-chain log
//! - [`llm`] — Anthropic messages client with context budgeting
//! - [`pipeline`] — the three flows and their failure policy
//! - [`admission`] — API-key gate and per-source rate limiting
//! - [`server`] — axum router, the sole error-to-status translator

pub mod admission;
pub mod cache;
pub mod config;
pub mod error;
pub mod kinic;
pub mod llm;
pub mod metadata;
pub mod models;
pub mod monad;
pub mod pipeline;
pub mod scope;
pub mod server;
