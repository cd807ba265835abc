//! LaTeX document assembly and compilation.
//!
//! The compiler is an external process. It runs twice so cross-references
//! settle, each run under its own deadline; the child is killed if the
//! deadline passes or the request is dropped. Success is judged by the PDF
//! existing afterwards, not by the exit code: `nonstopmode` exits non-zero on
//! recoverable errors while still producing a usable document.

use super::checkpoint;
use crate::error::ToolError;
use crate::prompts::{LATEX_END, LATEX_PREAMBLE, PAGE_SEPARATOR};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Stem of the `.tex` source and the produced PDF.
pub const JOB_NAME: &str = "typeset_notes";

const COMPILE_PASSES: usize = 2;

/// Bytes of compiler output kept for the error message.
const LOG_TAIL_BYTES: usize = 500;

/// Locate `compiler` on `PATH` (or accept it as a path to an existing file).
pub fn find_compiler(compiler: &str) -> Option<PathBuf> {
    let direct = Path::new(compiler);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(compiler))
        .find(|candidate| candidate.is_file())
}

/// Wrap page sections into a complete document, pages separated by `\newpage`.
pub fn assemble_document(sections: &[String]) -> String {
    let mut tex = String::from(LATEX_PREAMBLE);
    for (idx, section) in sections.iter().enumerate() {
        if idx > 0 {
            tex.push_str(PAGE_SEPARATOR);
            tex.push('\n');
        }
        tex.push_str(section);
        tex.push_str("\n\n");
    }
    tex.push_str(LATEX_END);
    tex
}

/// Escape LaTeX special characters in plain text.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str(r"\textbackslash{}"),
            '{' | '}' | '$' | '&' | '#' | '_' | '%' => {
                out.push('\\');
                out.push(c);
            }
            '^' => out.push_str(r"\textasciicircum{}"),
            '~' => out.push_str(r"\textasciitilde{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Write `tex` into `work_dir` and compile it to `<work_dir>/typeset_notes.pdf`.
///
/// Each pass is bounded by `timeout_secs`; `cancel` is checked between passes.
pub async fn compile(
    tex: &str,
    work_dir: &Path,
    compiler: &str,
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> Result<PathBuf, ToolError> {
    let program = find_compiler(compiler).ok_or_else(|| ToolError::CompilerMissing {
        compiler: compiler.to_string(),
    })?;

    let tex_path = work_dir.join(format!("{JOB_NAME}.tex"));
    tokio::fs::write(&tex_path, tex)
        .await
        .map_err(|e| ToolError::io(&tex_path, e))?;

    let mut log_tail = String::new();
    for pass in 1..=COMPILE_PASSES {
        checkpoint(cancel)?;
        let child = Command::new(&program)
            .arg("-interaction=nonstopmode")
            .arg("-output-directory")
            .arg(work_dir)
            .arg(&tex_path)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child)
            .await
            .map_err(|_| ToolError::Timeout { secs: timeout_secs })?
            .map_err(|e| ToolError::io(&program, e))?;

        if !output.status.success() {
            log_tail = tail(&output.stdout, &output.stderr);
            warn!(
                "{} pass {} exited with {}: {}",
                compiler, pass, output.status, log_tail
            );
        } else {
            debug!("{} pass {} ok", compiler, pass);
        }
    }

    let pdf = work_dir.join(format!("{JOB_NAME}.pdf"));
    if !pdf.is_file() {
        return Err(ToolError::CompileFailed { log_tail });
    }
    Ok(pdf)
}

fn tail(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(stderr));
    let text = text.trim();
    let mut start = text.len().saturating_sub(LOG_TAIL_BYTES);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_joins_pages_with_newpage() {
        let tex = assemble_document(&["First".into(), "Second".into()]);
        assert!(tex.starts_with(LATEX_PREAMBLE));
        assert!(tex.ends_with(LATEX_END));
        let first = tex.find("First").unwrap();
        let sep = tex.find(PAGE_SEPARATOR).unwrap();
        let second = tex.find("Second").unwrap();
        assert!(first < sep && sep < second);
        assert_eq!(tex.matches(PAGE_SEPARATOR).count(), 1);
    }

    #[test]
    fn escapes_specials() {
        assert_eq!(escape_text("50% of $x_1$"), r"50\% of \$x\_1\$");
        assert_eq!(escape_text(r"a\b"), r"a\textbackslash{}b");
        assert_eq!(escape_text("{~^}"), r"\{\textasciitilde{}\textasciicircum{}\}");
    }

    #[test]
    fn tail_is_bounded() {
        let long = "é".repeat(600);
        let t = tail(long.as_bytes(), b"");
        assert!(t.len() <= LOG_TAIL_BYTES);
        assert!(t.chars().all(|c| c == 'é'));
    }

    #[test]
    fn missing_compiler_is_not_found() {
        assert!(find_compiler("definitely-not-a-latex-compiler").is_none());
        assert!(find_compiler("/nonexistent/bin/pdflatex").is_none());
    }

    #[tokio::test]
    async fn compile_without_compiler_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = compile(
            "x",
            dir.path(),
            "definitely-not-a-latex-compiler",
            5,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::CompilerMissing { .. }));
        assert_eq!(err.status(), 500);
    }

    #[cfg(unix)]
    fn fake_compiler(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-latex");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn compiler_output_is_returned() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        // $3 is the output directory
        let compiler = fake_compiler(bin.path(), r#"echo "%PDF-1.4" > "$3/typeset_notes.pdf""#);

        let pdf = compile(
            "body",
            work.path(),
            compiler.to_str().unwrap(),
            10,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(pdf, work.path().join("typeset_notes.pdf"));
        let tex = std::fs::read_to_string(work.path().join("typeset_notes.tex")).unwrap();
        assert_eq!(tex, "body");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn no_pdf_is_compile_failure() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let compiler = fake_compiler(bin.path(), "echo '! Undefined control sequence.'; exit 1");

        let err = compile(
            "body",
            work.path(),
            compiler.to_str().unwrap(),
            10,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            ToolError::CompileFailed { log_tail } => {
                assert!(log_tail.contains("Undefined control sequence"))
            }
            other => panic!("expected CompileFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_compiler_times_out() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let compiler = fake_compiler(bin.path(), "sleep 30");

        let err = compile(
            "body",
            work.path(),
            compiler.to_str().unwrap(),
            1,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ToolError::Timeout { secs: 1 }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_compile_starts_no_pass() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let compiler = fake_compiler(bin.path(), r#"touch "$3/ran""#);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = compile("body", work.path(), compiler.to_str().unwrap(), 10, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Cancelled));
        assert!(!work.path().join("ran").exists());
    }
}
