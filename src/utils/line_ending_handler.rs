#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEndingStyle {
    Lf,   // \n
    CrLf, // \r\n
}

impl LineEndingStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEndingStyle::Lf => "\n",
            LineEndingStyle::CrLf => "\r\n",
        }
    }
}

/// Normalizes all line endings in a string to the specified style.
///
/// Lone `\r` is left alone: progress bars and prompts rely on it to rewrite the
/// current terminal line.
pub fn normalize_line_endings(text: &str, target_style: LineEndingStyle) -> String {
    let normalized_to_lf = text.replace("\r\n", "\n");
    match target_style {
        LineEndingStyle::Lf => normalized_to_lf,
        LineEndingStyle::CrLf => normalized_to_lf.replace('\n', LineEndingStyle::CrLf.as_str()),
    }
}

/// Output of a piped child process prepared for the terminal surface.
pub fn for_terminal(text: &str) -> String {
    normalize_line_endings(text, LineEndingStyle::CrLf)
}
