//! # Reportsmith Tools
//!
//! Evidence providers for the reportsmith pipeline: web search (Tavily),
//! arXiv, Semantic Scholar and NewsAPI, plus the registry that wires the
//! configured ones into a throttled retrieval fan-out.

pub mod arxiv;
pub mod http;
pub mod news;
pub mod registry;
pub mod semantic_scholar;
pub mod web;

pub use arxiv::ArxivProvider;
pub use news::NewsApiProvider;
pub use registry::{Registration, SkippedProvider, build_fanout, create_provider};
pub use semantic_scholar::SemanticScholarProvider;
pub use web::TavilyProvider;
