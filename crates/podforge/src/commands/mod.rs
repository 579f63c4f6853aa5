pub mod build;
pub mod reconcile;
pub mod status;
