pub mod admin;
pub mod distribution;
pub mod experiment;
pub mod project;
pub mod user;
pub mod variant;

pub use admin::AdminUser;
pub use distribution::Distribution;
pub use experiment::{Experiment, ExperimentBrief, ExperimentKind, ExperimentStatus, ExperimentSummary};
pub use project::Project;
pub use user::{ProjectUser, UserSummary};
pub use variant::{Variant, VariantSummary};
