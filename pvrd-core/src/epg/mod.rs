//! EPG ingestion.
//!
//! EIT sections are decoded into candidate events, which are merged into
//! per-channel schedules through the chain of registered handlers.

mod bugfix;
mod decoder;
mod handler;
mod manager;
mod models;
mod schedule;

pub use bugfix::NO_TITLE;
pub use bugfix::fix_epg_bugs;
pub use decoder::DecodedSection;
pub use decoder::EitDecoder;
pub use handler::EpgHandler;
pub use handler::EpgHandlers;
pub use manager::ScheduleManager;
pub use models::CandidateEvent;
pub use models::Event;
pub use models::Genre;
pub use models::MAX_EVENT_CONTENTS;
pub use models::TABLE_ID_NONE;
pub use models::VERSION_NONE;
pub use schedule::Schedule;
pub use schedule::is_newer_version;
