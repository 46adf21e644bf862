//! Compiler output classification.
//!
//! Two grammars live here. The GCC grammar turns toolchain output into
//! [`Diagnostic`] values for editor integration. The SGDK grammar annotates
//! lines for highlighting in interactive terminals and never produces
//! diagnostics.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Error,
    Warning,
    Note,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

impl DiagnosticKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "error" => Some(DiagnosticKind::Error),
            "warning" => Some(DiagnosticKind::Warning),
            "note" => Some(DiagnosticKind::Note),
            _ => None,
        }
    }

    pub fn severity(self) -> DiagnosticSeverity {
        match self {
            DiagnosticKind::Error => DiagnosticSeverity::Error,
            DiagnosticKind::Warning => DiagnosticSeverity::Warning,
            DiagnosticKind::Note => DiagnosticSeverity::Info,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DiagnosticKind::Error => "ERROR",
            DiagnosticKind::Warning => "WARNING",
            DiagnosticKind::Note => "NOTE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub kind: DiagnosticKind,
    pub message: String,
    pub severity: DiagnosticSeverity,
}

impl Diagnostic {
    fn new(file: &str, line: u32, column: u32, kind: DiagnosticKind, message: &str) -> Self {
        Diagnostic {
            file: file.trim().to_string(),
            line: line.max(1),
            column: column.max(1),
            kind,
            message: message.trim().to_string(),
            severity: kind.severity(),
        }
    }

    /// `file` relative to `project_root` when it lives under it.
    pub fn relative_file(&self, project_root: &str) -> String {
        if project_root.is_empty() {
            return self.file.clone();
        }
        match self.file.find(project_root) {
            Some(idx) => self.file[idx + project_root.len()..]
                .trim_start_matches(['/', '\\'])
                .to_string(),
            None => self.file.clone(),
        }
    }
}

/// Result of running one pattern over one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMatch {
    Matched(Diagnostic),
    Unmatched,
}

type Extractor = fn(&Captures) -> Option<Diagnostic>;

struct LinePattern {
    regex: Regex,
    extract: Extractor,
}

fn number(caps: &Captures, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse().ok()
}

fn with_column(caps: &Captures) -> Option<Diagnostic> {
    Some(Diagnostic::new(
        &caps[1],
        number(caps, 2)?,
        number(caps, 3)?,
        DiagnosticKind::parse(&caps[4])?,
        &caps[5],
    ))
}

fn without_column(caps: &Captures) -> Option<Diagnostic> {
    Some(Diagnostic::new(
        &caps[1],
        number(caps, 2)?,
        1,
        DiagnosticKind::parse(&caps[3])?,
        &caps[4],
    ))
}

fn generic(caps: &Captures) -> Option<Diagnostic> {
    Some(Diagnostic::new(&caps[1], number(caps, 2)?, 1, DiagnosticKind::Error, &caps[3]))
}

// Most specific first.
static GCC_PATTERNS: Lazy<Vec<LinePattern>> = Lazy::new(|| {
    let build = |pattern: &str, extract: Extractor| LinePattern {
        regex: Regex::new(pattern).expect("diagnostic pattern must compile"),
        extract,
    };
    vec![
        build(r"^([^:]+):(\d+):(\d+):\s*(error|warning|note):\s*(.+)$", with_column),
        build(r"^([^:]+):(\d+):\s*(error|warning|note):\s*(.+)$", without_column),
        build(r"^(.+?):(\d+):\s*(.+)$", generic),
    ]
});

impl LinePattern {
    fn apply(&self, line: &str) -> LineMatch {
        match self.regex.captures(line).and_then(|caps| (self.extract)(&caps)) {
            Some(diagnostic) => LineMatch::Matched(diagnostic),
            None => LineMatch::Unmatched,
        }
    }
}

/// Classifies one line of toolchain output. First matching pattern wins.
pub fn classify_line(line: &str) -> Option<Diagnostic> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return None;
    }
    GCC_PATTERNS.iter().find_map(|pattern| match pattern.apply(line) {
        LineMatch::Matched(diagnostic) => Some(diagnostic),
        LineMatch::Unmatched => None,
    })
}

/// Classifies full build output, dropping repeats of `(file, line, message)`.
pub fn classify_output(output: &str) -> Vec<Diagnostic> {
    let mut seen: HashSet<(String, u32, String)> = HashSet::new();
    output
        .split('\n')
        .filter_map(classify_line)
        .filter(|d| seen.insert((d.file.clone(), d.line, d.message.clone())))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticStats {
    pub total: usize,
    pub errors: usize,
    pub warnings: usize,
    pub notes: usize,
    pub files: usize,
}

pub fn stats(diagnostics: &[Diagnostic]) -> DiagnosticStats {
    let mut stats = DiagnosticStats { total: diagnostics.len(), ..Default::default() };
    let mut files = HashSet::new();
    for d in diagnostics {
        match d.severity {
            DiagnosticSeverity::Error => stats.errors += 1,
            DiagnosticSeverity::Warning => stats.warnings += 1,
            DiagnosticSeverity::Info => stats.notes += 1,
        }
        files.insert(d.file.as_str());
    }
    stats.files = files.len();
    stats
}

pub fn group_by_file(diagnostics: &[Diagnostic]) -> BTreeMap<String, Vec<Diagnostic>> {
    let mut grouped: BTreeMap<String, Vec<Diagnostic>> = BTreeMap::new();
    for d in diagnostics {
        grouped.entry(d.file.clone()).or_default().push(d.clone());
    }
    grouped
}

const DISPLAY_LIMIT: usize = 10;

/// Human-readable summary for the terminal.
pub fn format_for_display(diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return "Build completed successfully".to_string();
    }

    let mut out = format!("Build failed with {} issue(s):\n\n", diagnostics.len());
    let shown = diagnostics.iter().take(DISPLAY_LIMIT).collect::<Vec<_>>();
    for (index, d) in shown.iter().enumerate() {
        let marker = if d.severity == DiagnosticSeverity::Error { "x" } else { "!" };
        out.push_str(&format!("{} {}:{}:{}\n", marker, d.file, d.line, d.column));
        out.push_str(&format!("   {}: {}\n", d.kind.label(), d.message));
        if index + 1 < diagnostics.len() {
            out.push('\n');
        }
    }
    if diagnostics.len() > DISPLAY_LIMIT {
        out.push_str(&format!("\n... and {} more issues", diagnostics.len() - DISPLAY_LIMIT));
    }
    out
}

// ---------------------------------------------------------------------------
// SGDK highlight grammar

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HighlightKind {
    Error,
    Warning,
    Note,
    SgdkError,
    SgdkWarning,
    BuildComplete,
    LinkComplete,
    CompilationComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightSeverity {
    Error,
    Warning,
    Info,
    Success,
}

impl HighlightKind {
    pub fn severity(self) -> HighlightSeverity {
        match self {
            HighlightKind::Error | HighlightKind::SgdkError => HighlightSeverity::Error,
            HighlightKind::Warning | HighlightKind::SgdkWarning => HighlightSeverity::Warning,
            HighlightKind::Note => HighlightSeverity::Info,
            HighlightKind::BuildComplete
            | HighlightKind::LinkComplete
            | HighlightKind::CompilationComplete => HighlightSeverity::Success,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub kind: HighlightKind,
    pub severity: HighlightSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedLine {
    pub text: String,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Highlight>,
}

static SGDK_PATTERNS: Lazy<Vec<(HighlightKind, Regex)>> = Lazy::new(|| {
    let build = |kind, pattern: &str| (kind, Regex::new(pattern).expect("sgdk pattern must compile"));
    vec![
        build(HighlightKind::Error, r"^(.*?):(\d+):\d+?:\s*error:\s*(.*)$"),
        build(HighlightKind::Warning, r"^(.*?):(\d+):\d+?:\s*warning:\s*(.*)$"),
        build(HighlightKind::Note, r"^(.*?):(\d+):\d+?:\s*note:\s*(.*)$"),
        build(HighlightKind::SgdkError, r"^Error:\s*(.*)$"),
        build(HighlightKind::SgdkWarning, r"^Warning:\s*(.*)$"),
        build(HighlightKind::BuildComplete, r"(?i)build\s+complete"),
        build(HighlightKind::LinkComplete, r"(?i)link\s+complete"),
        build(HighlightKind::CompilationComplete, r"(?i)compilation\s+complete"),
    ]
});

/// Highlights one line with the SGDK grammar.
pub fn highlight_line(line: &str) -> Option<Highlight> {
    let line = line.trim_end_matches('\r');
    SGDK_PATTERNS.iter().find_map(|(kind, regex)| {
        let caps = regex.captures(line)?;
        let highlight = match kind {
            HighlightKind::Error | HighlightKind::Warning | HighlightKind::Note => Highlight {
                kind: *kind,
                severity: kind.severity(),
                file: Some(caps[1].to_string()),
                line_number: number(&caps, 2),
                message: caps[3].to_string(),
            },
            HighlightKind::SgdkError | HighlightKind::SgdkWarning => Highlight {
                kind: *kind,
                severity: kind.severity(),
                file: None,
                line_number: None,
                message: caps[1].to_string(),
            },
            _ => Highlight {
                kind: *kind,
                severity: kind.severity(),
                file: None,
                line_number: None,
                message: line.to_string(),
            },
        };
        Some(highlight)
    })
}

/// Annotates every line of `output`; line numbers are 1-based.
pub fn annotate_output(output: &str) -> Vec<AnnotatedLine> {
    output
        .split('\n')
        .enumerate()
        .map(|(index, text)| AnnotatedLine {
            text: text.to_string(),
            line: index + 1,
            highlight: highlight_line(text),
        })
        .collect()
}
