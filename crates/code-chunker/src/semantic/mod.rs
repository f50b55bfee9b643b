mod analyzer;
mod classify;

pub use analyzer::SemanticChunker;
