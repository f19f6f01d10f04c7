//! Extraction adapter trait and the built-in selector-driven adapter.
//!
//! An adapter turns one rendered list item into a candidate [`RawRecord`].
//! Sites differ in markup, so each configured source gets its own adapter.

mod selector;

use jobharvest_shared::{RawRecord, Result};

use crate::surface::ItemHandle;

pub use selector::SelectorAdapter;

/// Per-source extraction from rendered items.
pub trait ExtractionAdapter: Send + Sync {
    /// Extract a candidate record from one list item.
    ///
    /// `Ok(None)` means the item is not a usable listing (for example it has
    /// no title) and should be skipped quietly. `Err` means the item looked
    /// like a listing but could not be parsed; callers skip it and carry on.
    fn extract(&self, item: &ItemHandle) -> Result<Option<RawRecord>>;

    /// Extract the description text from a detail page element.
    fn extract_detail(&self, item: &ItemHandle) -> Option<String>;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}
