//! Pipeline entry points.
//!
//! - `ChannelHarvester`: incremental harvest of one channel
//! - `DetectionEnricher`: bounded detection pass over downloaded images
//! - `Orchestrator`: `run_harvest_all` across channels, `run_enrich`
//! - `run_validate`: strict config check

pub mod enrich;
pub mod harvest;
pub mod orchestrator;
pub mod validate;

pub use enrich::{DetectionEnricher, EnrichSummary, ImageOutcome};
pub use harvest::{ChannelHarvester, ChannelSummary};
pub use orchestrator::{ChannelStatus, HarvestReport, Orchestrator};
pub use validate::run_validate;
