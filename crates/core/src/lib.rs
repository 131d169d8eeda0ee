pub mod geometry;
pub mod invoice;
pub mod receipt;
pub mod record;

pub use geometry::{BoundingBox, PixelRegion, NORMALIZED_MAX};
pub use invoice::{Confidence, InvalidInvoiceNumber, InvoiceNumber, InvoiceState};
pub use receipt::{Category, PaymentMethod, TaxRate};
pub use record::{
    required_missing, vendor_is_known, DraftRecord, MissingField, Provenance, ReconciledRecord,
    ReviewFlag, ScanPass,
};
