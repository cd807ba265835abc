//! Prompts and LaTeX boilerplate for the handwriting tool.
//!
//! Kept in one place so prompt changes never touch the transcription or
//! compilation code, and so tests can inspect them without a vision model.

/// Instruction sent with every page image.
///
/// The model answers with LaTeX *body* content only; [`LATEX_PREAMBLE`] and
/// [`LATEX_END`] wrap the concatenated pages into a compilable document.
pub const LATEX_EXTRACTION_PROMPT: &str = r#"You are an expert at reading handwritten notes and converting them to LaTeX. Examine this image of handwritten notes carefully. Extract ALL text, mathematical equations, diagram descriptions, and content. Output ONLY the LaTeX body content (no \documentclass, no \begin{document}, no \end{document}). Use appropriate LaTeX commands for:
- Mathematical equations (use $ for inline, $$ or \[ \] for display)
- Section headings (\section, \subsection) if structure is visible
- Lists (itemize/enumerate) where appropriate
- Tables if any tabular data is present
- Bold/italic for emphasized text
If you cannot read something clearly, make your best attempt and add a \textcolor{red}{[unclear]} marker.
Do NOT wrap your output in ```latex``` code fences. Output raw LaTeX only."#;

/// Document preamble up to and including `\begin{document}`.
pub const LATEX_PREAMBLE: &str = r"\documentclass[12pt,a4paper]{article}
\usepackage[utf8]{inputenc}
\usepackage{amsmath,amssymb,amsfonts}
\usepackage{graphicx}
\usepackage{xcolor}
\usepackage[margin=1in]{geometry}
\begin{document}
";

pub const LATEX_END: &str = r"\end{document}
";

/// Separator placed between page sections.
pub const PAGE_SEPARATOR: &str = r"\newpage";
