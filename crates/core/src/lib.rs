//! Core types for the Strata database server
//!
//! This crate defines the foundational types used throughout the system:
//! - StrataError / StrataResult: Error type hierarchy
//! - DatabaseName: Validated logical database name
//! - NamePolicy: Pluggable legality rule for names
//! - NameResolver: Name validation and name <-> path translation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod name;

pub use error::{StrataError, StrataResult};
pub use name::{
    file_name_for, name_for_file, validate_name, CouchStyle, DatabaseName, DatabaseNameError,
    NamePolicy, NameResolver, PermittedChars, DATABASE_SUFFIX, MAX_DATABASE_NAME_LENGTH,
};
