pub mod anomalies;
pub mod deviations;
pub mod events;
pub mod proposals;
