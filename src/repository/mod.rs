//! Repository 抽象层

pub mod keystore_repository;

pub use keystore_repository::{validate_account_name, FileKeystoreRepository, KeystoreRepository};
