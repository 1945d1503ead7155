//! Vendor-portal automation engine.
//!
//! Drives a server-rendered, cookie-session admin portal with plain HTTP:
//! one shared authenticated session ([`SessionManager`]), form snapshots
//! merged with partial updates ([`form`]), label-to-option resolution for
//! dropdowns ([`options`]) and the multi-step workflows built on them
//! ([`workflow::Orchestrator`]).

pub mod aliases;
pub mod client;
pub mod config;
pub mod corrections;
pub mod error;
pub mod form;
pub mod http;
pub mod options;
pub mod session;
pub mod workflow;

pub use client::{Attachment, PortalClient};
pub use config::{FieldPrefixes, PortalConfig, PortalRoutes};
pub use corrections::CorrectionTables;
pub use error::{PortalError, PreconditionReason};
pub use form::{FieldMapping, FormSnapshot, UpdateRequest};
pub use options::{MatchKind, OptionCandidate, OptionDomain, Resolution};
pub use session::{PortalSession, SessionManager, SessionState};
pub use workflow::{
    bounded, ActivateCommand, ActivationOutcome, CreateTicketCommand, EditInstallationCommand,
    InstallationOutcome, Orchestrator, SubmitOutcome, TicketOutcome,
};
