pub mod orphans;
pub mod plan;
pub mod rules;

pub use orphans::{OrphanCandidate, OrphanDetector, OrphanKind, OrphanReport, Scope};
pub use plan::{CleanupOutcome, CleanupPlan, CleanupSession, CleanupState};
pub use rules::{Classification, RuleSet, RulesFile};
