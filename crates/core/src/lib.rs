// crates/core/src/lib.rs
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod funnel;
pub mod gateway;
pub mod notify;
pub mod persist;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transition;
pub mod types;

pub use auth::{AuthState, Authenticator, Identity, IdentityProvider};
pub use catalog::{StageCatalog, StageList, StageSource, DEFAULT_STAGE_NAMES};
pub use config::{AppConfig, BackendKind};
pub use error::*;
pub use funnel::{FunnelRow, FunnelSummary};
pub use gateway::{ApiGateway, LeadGateway, WebhookGateway};
pub use notify::{Notice, NoticeLevel, Notifier, RecordingNotifier, TracingNotifier};
pub use persist::LocalStore;
pub use pipeline::{is_terminal, pipeline_view, PipelineStep, StepStatus};
pub use scheduler::{Scheduler, SessionSignal};
pub use session::{Session, SessionDeps};
pub use store::{LeadStore, RefetchReason, StorePhase};
pub use transition::{Direction, TransitionController, TransitionOutcome};
pub use types::*;
