// Realty Portal - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod schema;         // Shape Layer - validation at the storage boundary
pub mod entities;       // Realtors and buyers
pub mod invites;        // Invite registry: generate, validate, consume
pub mod signup;         // Buyer signup (consumes an invite)
pub mod legacy;         // Browser-storage export migration
pub mod export;         // Roster CSV export
pub mod chat;           // Assistant proxy client + polling
pub mod relay;          // Contact form relay

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    Event,
    open_database, setup_database, insert_event, record_event,
    get_events_for_entity, recent_events, events_for_realtor,
};
pub use schema::{ValidationError, ValidationResult};
pub use entities::{
    BuyerAccount, BuyerProgress, BuyerStep, RealtorAccount, RealtorRoster, Role,
    create_realtor, get_buyer, get_realtor, realtor_roster, complete_buyer_step,
};
pub use invites::{
    InviteCode, InviteStatus, InviteRegistry, InvitePolicy, InviteValidation,
    InvalidReason, MatchSource,
};
pub use signup::{sign_up_buyer, SignupError, SignupRequest};
pub use legacy::{import_legacy_export, import_legacy_file, ImportReport, InviteConflict};
pub use export::{export_roster_csv, write_roster_csv};
pub use chat::{
    AssistantApi, ChatError, ChatMessage, ChatRole, OpenAiAssistant, PollConfig, Run, RunStatus,
};
pub use relay::{ContactForm, ContactRelay, RelayError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
