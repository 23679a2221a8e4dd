//! Keyward Server Library - activation lifecycle and signature verification engine
//!
//! The protocol services (`lifecycle`, `signature`, `offline`, `vault`,
//! `replay`) are transport-agnostic and wired together by [`AppState`]. The
//! binary adds the health/readiness router and the background cleanup task.

pub mod application;
pub mod callback;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod offline;
pub mod replay;
pub mod routes;
pub mod signature;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod vault;

pub use application::ApplicationService;
pub use callback::{ActivationStatusChange, CallbackNotifier, ChannelNotifier, TracingNotifier};
pub use config::{Config, ConfigError, ReplayVerificationMode};
pub use error::{ErrorCategory, ServiceError};
pub use lifecycle::{ActivationService, ActivationStatusInfo, CreatedActivation};
pub use offline::{OfflineSignatureRequest, OfflineSignatureService, ProximityCheck};
pub use replay::{DefaultReplayGuard, NoopReplayGuard, ReplayGuard, UniqueValueClaim};
pub use routes::create_router;
pub use signature::{
    SignatureRequest, SignatureVerifier, VerificationPolicy, VerificationResponse,
    PROXIMITY_CHECK_FAILED,
};
pub use state::AppState;
pub use storage::{MemoryStore, PostgresStore, Storage, StorageError};
pub use vault::{VaultService, VaultUnlockRequest, VaultUnlockResponse};
