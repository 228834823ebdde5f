//! Line-tracked splitting and merging shared by the chunking strategies.

/// Approximate token count via whitespace splitting.
pub(crate) fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// A run of source text with its 1-based, inclusive line span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl Block {
    pub fn tokens(&self) -> usize {
        count_tokens(&self.text)
    }

    fn absorb(&mut self, next: Block) {
        self.text.push_str("\n\n");
        self.text.push_str(&next.text);
        self.end_line = next.end_line;
    }
}

/// Split `lines` into blank-line separated blocks. `first_line` is the line
/// number of `lines[0]`.
pub(crate) fn paragraphs(lines: &[&str], first_line: u32) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for (offset, line) in lines.iter().enumerate() {
        let number = first_line + offset as u32;
        if line.trim().is_empty() {
            blocks.extend(current.take());
            continue;
        }
        match current.as_mut() {
            Some(block) => {
                block.text.push('\n');
                block.text.push_str(line);
                block.end_line = number;
            }
            None => {
                current = Some(Block {
                    text: line.to_string(),
                    start_line: number,
                    end_line: number,
                })
            }
        }
    }
    blocks.extend(current);
    blocks
}

/// Break a block over `max_tokens` into consecutive line windows. A single
/// line longer than the limit is kept whole rather than cut mid-line.
pub(crate) fn split_oversized(block: Block, max_tokens: usize) -> Vec<Block> {
    if block.tokens() <= max_tokens {
        return vec![block];
    }

    let mut pieces = Vec::new();
    let mut buf: Option<Block> = None;
    for (offset, line) in block.text.lines().enumerate() {
        let number = block.start_line + offset as u32;
        let line_tokens = count_tokens(line);
        if let Some(current) = buf.as_mut() {
            if current.tokens() + line_tokens <= max_tokens {
                current.text.push('\n');
                current.text.push_str(line);
                current.end_line = number;
                continue;
            }
        }
        pieces.extend(buf.take());
        buf = Some(Block {
            text: line.to_string(),
            start_line: number,
            end_line: number,
        });
    }
    pieces.extend(buf);
    pieces
}

/// Merge blocks under `min_tokens` into their neighbour.
pub(crate) fn merge_tiny(blocks: Vec<Block>, min_tokens: usize) -> Vec<Block> {
    let mut merged: Vec<Block> = Vec::with_capacity(blocks.len());
    for block in blocks {
        if let Some(last) = merged.last_mut() {
            if last.tokens() < min_tokens {
                last.absorb(block);
                continue;
            }
        }
        merged.push(block);
    }
    // A tiny tail folds back into its predecessor.
    if merged.len() >= 2 && merged.last().is_some_and(|b| b.tokens() < min_tokens) {
        if let Some(tail) = merged.pop() {
            if let Some(last) = merged.last_mut() {
                last.absorb(tail);
            }
        }
    }
    merged
}

/// Greedily pack consecutive blocks while the total stays within `max_tokens`.
pub(crate) fn pack(blocks: Vec<Block>, max_tokens: usize) -> Vec<Block> {
    let mut packed: Vec<Block> = Vec::with_capacity(blocks.len());
    for block in blocks {
        if let Some(last) = packed.last_mut() {
            if last.tokens() + block.tokens() <= max_tokens {
                last.absorb(block);
                continue;
            }
        }
        packed.push(block);
    }
    packed
}
