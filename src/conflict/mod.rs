/// This module contains the pre-flight revision check of a transaction.
pub mod detection;
