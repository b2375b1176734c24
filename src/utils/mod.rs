// Shared helpers

pub mod serde_helpers;
