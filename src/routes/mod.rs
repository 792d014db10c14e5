pub mod admin_auth;
pub mod admin_distributions;
pub mod admin_experiments;
pub mod admin_projects;
pub mod admin_users;
pub mod admin_variants;
pub mod library;
pub mod wsroute;
