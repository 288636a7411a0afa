//! Responses-style engine: JSON request in, JSON-lines chunks out.

mod jsonl;
mod streaming;
mod translate;

#[cfg(test)]
mod tests;

pub use streaming::HttpResponseEngine;
