pub mod briefing;
pub mod config;
pub mod document;
pub mod extracted;
pub mod filter;
pub mod threat;
pub mod trigger;

pub use briefing::{CritiqueResult, DailyBriefing, PublishedBriefing};
pub use config::Config;
pub use document::{RawDocument, truncate_chars};
pub use extracted::ExtractedThreat;
pub use filter::{FilterStatus, FilterVerdict, PreFilterResult};
pub use threat::{AttackType, Modality, SeverityInput, ThreatDraft, ThreatError, ThreatSignature};
pub use trigger::{Trigger, WorkerState};
