pub mod extraction;
pub mod healing;
pub mod intake; // Submission admission checks
pub mod ledger; // Append-only stage audit trail
pub mod mapping;
pub mod processor; // Statement processing orchestrator
