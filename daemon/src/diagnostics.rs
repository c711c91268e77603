//! Editor diagnostics and the prompt built from them for a fix turn.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lines of context shown around each line of interest.
const CONTEXT_LINES: usize = 3;

/// A single editor diagnostic. Line numbers are zero-based, as the editor
/// reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default)]
    pub code: Option<Value>,
    pub lnum: usize,
    #[serde(default)]
    pub col: usize,
    #[serde(default)]
    pub end_lnum: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    fn code_label(&self) -> String {
        match &self.code {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn lines(&self) -> std::ops::RangeInclusive<usize> {
        let end = self.end_lnum.unwrap_or(self.lnum).max(self.lnum);
        self.lnum..=end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiagnostics {
    pub fname: String,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Build the fix prompt for one file. `content` is `None` when the file could
/// not be read; the prompt then carries no source context.
pub fn build_prompt(file: &FileDiagnostics, rel_fname: &str, content: Option<&str>) -> String {
    let mut prompt = String::from("# Fix any errors below, if possible.\n\n");
    let mut lines = BTreeSet::new();

    for diagnostic in &file.diagnostics {
        let _ = writeln!(
            prompt,
            "{}:{}:{}: {}: {}",
            file.fname,
            diagnostic.lnum,
            diagnostic.col,
            diagnostic.code_label(),
            diagnostic.message
        );
        prompt.push('\n');
        lines.extend(diagnostic.lines());
    }

    if let Some(content) = content {
        prompt.push_str(&render_context(rel_fname, content, &lines));
    }
    prompt
}

/// Render the lines of interest with surrounding context.
pub fn render_context(rel_fname: &str, content: &str, lines: &BTreeSet<usize>) -> String {
    let source: Vec<&str> = content.lines().collect();
    if source.is_empty() || lines.is_empty() {
        return String::new();
    }

    let shown: BTreeSet<usize> = lines
        .iter()
        .filter(|&&l| l < source.len())
        .flat_map(|&l| l.saturating_sub(CONTEXT_LINES)..=(l + CONTEXT_LINES).min(source.len() - 1))
        .collect();

    let mut out = format!("\n{rel_fname}:\n");
    let mut previous: Option<usize> = None;
    for &idx in &shown {
        let gap = match previous {
            None => idx > 0,
            Some(prev) => idx > prev + 1,
        };
        if gap {
            out.push_str("⋮...\n");
        }
        let marker = if lines.contains(&idx) { '█' } else { '│' };
        let _ = writeln!(out, "{marker}{}", source[idx]);
        previous = Some(idx);
    }
    if previous.is_some_and(|last| last + 1 < source.len()) {
        out.push_str("⋮...\n");
    }
    out
}
