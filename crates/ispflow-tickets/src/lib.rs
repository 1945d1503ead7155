//! Client for the remote ticketing/staff REST API.

pub mod client;
pub mod error;
pub mod types;

pub use client::{TicketClient, TicketRoutes, MAX_PAGES};
pub use error::TicketError;
pub use types::{RemoteTicket, StaffMember, TicketUpdate, UpdateMethod};
