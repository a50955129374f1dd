//! AWS SDK client initialisation for KMS and S3.
//!
//! Credentials and region come from the standard AWS provider chain. An
//! optional endpoint override points both clients at a local emulator.

pub mod clients;

pub use clients::AwsClients;
