pub mod backend;
pub mod config;
pub mod extract;
pub mod gateway;
pub mod gemini;
pub mod hash;
pub mod openai;
pub mod pipeline;
pub mod response;
pub mod tiler;

pub use backend::{is_retryable, BackendError, MockBackend, VisionBackend, EXTRACTION_PROMPT};
pub use config::{ConfigError, OcrConfig};
pub use extract::{extract_best_date, extract_invoice, normalize_draft, normalize_invoice_candidate};
pub use gateway::{next_step, CallOutcome, NextStep, OcrGateway, RetryPolicy, ScanReply};
pub use gemini::GeminiBackend;
pub use hash::image_digest;
pub use openai::OpenAiBackend;
pub use pipeline::{AnalysisReport, PipelineError, ReceiptPipeline};
pub use response::{parse_response, ResponseItem};
pub use tiler::{split_into_tiles, tile_regions, Tile, TileError};
