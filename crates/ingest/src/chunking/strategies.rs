//! Chunking strategies: markdown (heading-aware) and code (blank-line blocks).

use quarry_core::ChunkKind;

use super::helpers::{merge_tiny, pack, paragraphs, split_oversized, Block};
use crate::contracts::ChunkSegment;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub max_tokens: usize,
    pub min_tokens: usize,
}

// ── Markdown strategy ───────────────────────────────────────────────

/// `# Title` → `(1, "Title")`. Needs a space after the hashes.
fn heading(line: &str) -> Option<(usize, String)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    (!title.is_empty()).then(|| (level, title.to_string()))
}

struct Section {
    /// Enclosing headings, outermost first.
    context: Vec<String>,
    title: Option<String>,
    start_line: u32,
    lines: Vec<String>,
}

pub(crate) fn chunk_markdown(text: &str, limits: Limits) -> Vec<ChunkSegment> {
    let mut sections: Vec<Section> = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current = Section {
        context: Vec::new(),
        title: None,
        start_line: 1,
        lines: Vec::new(),
    };

    let mut in_fence = false;
    for (idx, line) in text.lines().enumerate() {
        let number = idx as u32 + 1;
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let parsed = if in_fence { None } else { heading(line) };
        match parsed {
            Some((level, title)) => {
                sections.push(std::mem::replace(
                    &mut current,
                    Section {
                        context: Vec::new(),
                        title: None,
                        start_line: number,
                        lines: Vec::new(),
                    },
                ));
                stack.retain(|(l, _)| *l < level);
                current.context = stack.iter().map(|(_, t)| t.clone()).collect();
                current.title = Some(title.clone());
                current.lines.push(line.to_string());
                stack.push((level, title));
            }
            None => current.lines.push(line.to_string()),
        }
    }
    sections.push(current);

    let mut segments = Vec::new();
    for section in sections {
        let lines: Vec<&str> = section.lines.iter().map(String::as_str).collect();
        let blocks: Vec<Block> = paragraphs(&lines, section.start_line)
            .into_iter()
            .flat_map(|b| split_oversized(b, limits.max_tokens))
            .collect();
        let kind = if section.title.is_some() {
            ChunkKind::Section
        } else {
            ChunkKind::Paragraph
        };
        for block in merge_tiny(blocks, limits.min_tokens) {
            segments.push(ChunkSegment {
                content: block.text,
                kind,
                start_line: block.start_line,
                end_line: block.end_line,
                symbol: section.title.clone(),
                context: section.context.clone(),
            });
        }
    }
    segments
}

// ── Code strategy ───────────────────────────────────────────────────

pub(crate) fn chunk_code(text: &str, limits: Limits) -> Vec<ChunkSegment> {
    let lines: Vec<&str> = text.lines().collect();
    let blocks: Vec<Block> = paragraphs(&lines, 1)
        .into_iter()
        .flat_map(|b| split_oversized(b, limits.max_tokens))
        .collect();

    pack(blocks, limits.max_tokens)
        .into_iter()
        .map(|block| ChunkSegment {
            content: block.text,
            kind: ChunkKind::Code,
            start_line: block.start_line,
            end_line: block.end_line,
            symbol: None,
            context: Vec::new(),
        })
        .collect()
}
