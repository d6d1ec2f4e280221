//! # tandem-core: Domain model for the Tandem project dashboard
//!
//! Pure, synchronous building blocks shared by the server and the client:
//!
//! ```text
//! ┌──────────────┐   validate    ┌───────────────────┐
//! │ JSON payload │ ────────────► │ MutationProcessor │
//! └──────────────┘               └─────────┬─────────┘
//!                                          │ put / remove
//!                                          ▼
//!                                 ┌─────────────────┐   fingerprint   ┌────────────┐
//!                                 │  ProjectStore   │ ──────────────► │ SyncEngine │
//!                                 │ (authoritative) │                 │ (per conn) │
//!                                 └─────────────────┘                 └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: `Project`, `Step`, `ProjectStatus`
//! - [`derive`]: progress / status / next-step derivation
//! - [`fingerprint`]: per-project change digests
//! - [`validate`]: strict wire-level payload validation
//! - [`store`]: in-memory authoritative map
//! - [`mutation`]: validated add/update/delete of projects and steps
//! - [`clock`]: injectable time source

pub mod clock;
pub mod derive;
pub mod fingerprint;
pub mod model;
pub mod mutation;
pub mod store;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fingerprint::{fingerprint, Fingerprint};
pub use model::{Project, ProjectMap, ProjectStatus, Step};
pub use mutation::{Change, Commit, Mutation, MutationError, MutationProcessor};
pub use store::ProjectStore;
pub use validate::ValidationError;
