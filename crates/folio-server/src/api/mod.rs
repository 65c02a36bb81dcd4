//! API routes and handlers

pub mod agent;
pub mod chats;
pub mod health;
pub mod request_context;
mod router;
pub mod views;

pub use router::create_router;
