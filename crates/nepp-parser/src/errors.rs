use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("unexpected root element '{found}'")]
    UnexpectedRoot { found: String },

    #[error("unsupported document namespace '{namespace}'")]
    Namespace { namespace: String },

    #[error("upstream acknowledgement without data: {reason}")]
    Acknowledgement { reason: String },

    #[error("time series {series_index} period {period_index}: {message}")]
    Period {
        series_index: usize,
        period_index: usize,
        message: String,
    },

    #[error("time series {series_index} period {period_index} point {point_index}: {message}")]
    Point {
        series_index: usize,
        period_index: usize,
        point_index: usize,
        message: String,
    },

    #[error("invalid instant '{value}'")]
    Instant { value: String },
}
