//! # lb-model
//!
//! Data model for the ldapbrowse directory engine.
//!
//! This crate defines the types the query engine hands to its consumers:
//! [`EntryRecord`] and its attribute table, the [`ServerProfile`]
//! configuration record, DN helpers, and the RFC 2849 LDIF encoder.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod dn;
pub mod entry;
pub mod error;
pub mod event;
pub mod ldif;
pub mod profile;

pub use entry::{
    is_binary_attribute, sort_by_label, Attribute, AttributeMap, AttributeValue, EntryRecord,
};
pub use error::{ProfileError, ProfileResult};
pub use event::{ProfileEvent, ProfileEvents, ProfileField, SubscriptionId};
pub use ldif::{is_safe_string, to_ldif, LdifEncoder, LdifWriter, LineEnding};
pub use profile::{
    Authentication, AuthenticationKind, KerberosLoginKind, KerberosSettings, Secret,
    ServerProfile, ServerProfileBuilder,
};
