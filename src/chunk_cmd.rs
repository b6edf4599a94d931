//! `askdoc chunk`: show how a file would be chunked, without embedding.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::extract;
use crate::normalize::normalize;

#[derive(Debug, Serialize)]
pub struct ChunkSummary {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub chars: usize,
    pub hash: String,
    pub preview: String,
}

const PREVIEW_CHARS: usize = 60;

/// Extract, normalize and chunk `bytes` using the configured strategy.
pub fn summarize(config: &Config, bytes: &[u8], filename: &str) -> Result<Vec<ChunkSummary>> {
    let raw = extract::extract_file(bytes, None, filename)?;
    let text = normalize(&raw);
    let chunker = Chunker::new(config.chunking.chunk_config_for(&text))?;

    Ok(chunker
        .chunks(filename, &text)
        .map(|chunk| {
            let preview: String = chunk
                .text
                .chars()
                .take(PREVIEW_CHARS)
                .map(|c| if c == '\n' { ' ' } else { c })
                .collect();
            ChunkSummary {
                index: chunk.index,
                start: chunk.start,
                end: chunk.end,
                chars: chunk.text.chars().count(),
                hash: chunk.hash[..12].to_string(),
                preview,
            }
        })
        .collect())
}

pub async fn run_chunk(config: &Config, path: &Path, json: bool) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();
    let config = config.clone();
    let chunks = tokio::task::spawn_blocking(move || summarize(&config, &bytes, &filename))
        .await
        .context("chunking task failed")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    for c in &chunks {
        println!(
            "#{:<4} {:>7}..{:<7} {:>5} chars  {}  {}",
            c.index, c.start, c.end, c.chars, c.hash, c.preview
        );
    }
    println!("{} chunks", chunks.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_text() {
        let mut config = Config::default();
        config.chunking.max_chunk_size = 20;
        config.chunking.overlap = 5;
        let chunks = summarize(&config, b"one two three four five six seven eight", "a.txt").unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start, 0);
        assert!(chunks.iter().all(|c| c.chars <= 20));
        assert_eq!(chunks[0].hash.len(), 12);
    }

    #[test]
    fn test_summarize_empty_file() {
        let chunks = summarize(&Config::default(), b"   \n\n ", "blank.txt").unwrap();
        assert!(chunks.is_empty());
    }
}
