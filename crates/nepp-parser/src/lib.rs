pub mod document;
pub mod errors;
pub mod model;

pub use document::parse_document;
pub use errors::ParseError;
pub use model::{
    parse_instant, DateRange, ParsedDocument, PriceRecord, SkipReason, SkippedSeries,
};
