//! Docshelf - docset acquisition and content-rewrite library
//!
//! This crate implements the pipeline behind a docset server: resolving a
//! library name to a feed descriptor, fetching and extracting the matching
//! versioned archive exactly once, deriving canonical metadata from feeds
//! and bundle property lists, and rewriting served HTML so it can be
//! embedded inside a different origin's page.
//!
//! ## Components
//!
//! - [`feed`] / [`plist`] - metadata parsers for the two formats a docset
//!   travels with
//! - [`Acquirer`] - collision-safe archive download and extraction
//! - [`Registry`] - local bundle enumeration joined against known feeds
//! - [`rewrite`] - base-URL insertion, query propagation, theming injection
//!
//! Each acquisition is a full fetch-extract-discard operation; there is no
//! dependency resolution, signature verification, or delta updating.

pub mod acquire;
pub mod config;
mod error;
pub mod feed;
pub mod plist;
pub mod registry;
pub mod rewrite;

pub use acquire::{AcquisitionResult, Acquirer};
pub use config::StoreConfig;
pub use error::DocshelfError;
pub use feed::{derive_name_from_feed_file, parse_feed, FeedDescriptor, FeedVersion};
pub use plist::{derive_name_from_bundle_folder, parse_plist, BundleMetadata, PlistDict};
pub use registry::{BundleSummary, DocsetListing, Registry};
pub use rewrite::{base_href_for, rewrite_document, RequestContext};

/// Default User-Agent string
pub const DEFAULT_USER_AGENT: &str = "Docshelf/0.1";
