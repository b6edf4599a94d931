//! Grounded context assembly.
//!
//! Turns a [`RetrievalResult`] into the single string handed to answer
//! generation. Chunks are emitted in result order (best first) and joined
//! with [`CHUNK_DELIMITER`]. The character budget covers chunk text and
//! delimiters; assembly stops at the first chunk that would overflow it, so
//! a lower-ranked but shorter chunk never jumps the queue.
//!
//! Neighbouring chunks overlap, so two hits often share text. Every span of a
//! hit already covered by an emitted chunk is cut out; when the cut falls in
//! the middle of a hit, the pieces on either side are emitted as separate
//! entries. Hits that are covered entirely are skipped.

use crate::models::{ContextBundle, RetrievalResult, RetrievedChunk};

/// Placed in the context when nothing was retrieved or nothing fit.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant context was found in the document.";

pub const CHUNK_DELIMITER: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    budget: usize,
}

impl ContextAssembler {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Assemble the context for `query` and keep the hits alongside it.
    pub fn bundle(&self, query: &str, results: &RetrievalResult) -> ContextBundle {
        ContextBundle {
            query: query.to_string(),
            context: Self::assemble(results, self.budget),
            chunks: results.hits.clone(),
        }
    }

    /// Join hit texts within `budget` characters, or return
    /// [`NO_CONTEXT_SENTINEL`].
    pub fn assemble(results: &RetrievalResult, budget: usize) -> String {
        let delimiter_chars = CHUNK_DELIMITER.chars().count();
        let mut covered: Vec<(usize, usize)> = Vec::new();
        let mut context = String::new();
        let mut used = 0usize;

        for hit in results.iter() {
            let pieces = uncovered_pieces(hit, &covered);
            if pieces.is_empty() {
                continue;
            }

            let mut cost = 0;
            let mut first = context.is_empty();
            for piece in &pieces {
                cost += if first { 0 } else { delimiter_chars } + piece.chars().count();
                first = false;
            }
            if used + cost > budget {
                break;
            }

            for piece in pieces {
                if !context.is_empty() {
                    context.push_str(CHUNK_DELIMITER);
                }
                context.push_str(piece);
            }
            used += cost;
            covered.push((hit.start, hit.end));
        }

        if context.is_empty() {
            NO_CONTEXT_SENTINEL.to_string()
        } else {
            context
        }
    }
}

/// The trimmed, non-empty parts of `hit` not inside any covered span, in
/// text order.
fn uncovered_pieces<'a>(hit: &'a RetrievedChunk, covered: &[(usize, usize)]) -> Vec<&'a str> {
    let mut spans = vec![(hit.start, hit.end)];
    for &(cs, ce) in covered {
        spans = spans
            .into_iter()
            .flat_map(|(a, b)| {
                if ce <= a || cs >= b {
                    return vec![(a, b)];
                }
                let mut rest = Vec::with_capacity(2);
                if a < cs {
                    rest.push((a, cs));
                }
                if ce < b {
                    rest.push((ce, b));
                }
                rest
            })
            .collect();
    }

    // Offsets come from the same text, so they fall on char boundaries; fall
    // back to the whole chunk if they somehow do not.
    let pieces: Option<Vec<&str>> = spans
        .iter()
        .map(|&(a, b)| hit.text.get(a - hit.start..b - hit.start))
        .collect();
    pieces
        .unwrap_or_else(|| vec![hit.text.as_str()])
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}
