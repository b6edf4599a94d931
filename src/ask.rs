//! `askdoc ask`: index one file and answer a question from it.
//!
//! Runs the whole pipeline in-process: extract → session upload (normalize,
//! chunk, embed, index) → retrieve → assemble → generate. Progress goes to
//! stderr; the answer and its sources go to stdout.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::context::ContextAssembler;
use crate::embedding::Embedder;
use crate::extract;
use crate::generate;
use crate::models::ContextBundle;
use crate::progress::ProgressMode;
use crate::session::{Session, SessionSettings};

/// Options for [`run_ask`].
#[derive(Debug, Clone)]
pub struct AskOptions {
    pub top_k: Option<usize>,
    pub json: bool,
    pub progress: ProgressMode,
}

/// Index `path` and retrieve the grounded context for `question`.
pub async fn build_context(
    config: &Config,
    path: &Path,
    question: &str,
    top_k: Option<usize>,
    progress: ProgressMode,
) -> Result<ContextBundle> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();

    let name = filename.clone();
    let text = tokio::task::spawn_blocking(move || extract::extract_file(&bytes, None, &name))
        .await
        .context("extraction task failed")??;

    let embedder = Embedder::from_config(&config.embedding)?;
    let settings = SessionSettings::from_config(config);
    let session = Session::new("cli", embedder, settings).with_reporter(progress.reporter());
    session.upload(&filename, &text).await?;

    let results = session.retrieve(question, top_k).await?;
    Ok(ContextAssembler::new(config.retrieval.context_budget).bundle(question, &results))
}

pub async fn run_ask(config: &Config, path: &Path, question: &str, opts: AskOptions) -> Result<()> {
    let bundle = build_context(config, path, question, opts.top_k, opts.progress).await?;

    let generator = generate::create_generator(&config.generation)?;
    let answer = generate::answer(generator.as_deref(), &bundle).await?;

    if opts.json {
        let out = serde_json::json!({
            "query": bundle.query,
            "response": answer,
            "context": bundle.context,
            "chunks": bundle.chunks,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", answer);
    if !bundle.chunks.is_empty() {
        println!();
        println!("Sources:");
        for hit in &bundle.chunks {
            println!(
                "  #{:<4} score {:.3}  bytes {}..{}",
                hit.index, hit.score, hit.start, hit.end
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_context_from_text_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("handbook.md");
        std::fs::write(
            &path,
            "# Handbook\n\nVacation requests go to your manager two weeks ahead.\n\n\
             Expense reports are due by the fifth of each month.",
        )
        .unwrap();

        let bundle = build_context(
            &Config::default(),
            &path,
            "when are expense reports due",
            Some(1),
            ProgressMode::Off,
        )
        .await
        .unwrap();
        assert!(bundle.has_context());
        assert_eq!(bundle.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("image.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        let err = build_context(&Config::default(), &path, "q", None, ProgressMode::Off)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported format"));
    }
}
