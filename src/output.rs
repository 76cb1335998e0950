//! User-facing terminal output.
//!
//! The log stream records what happened; this module covers what the person at the
//! terminal reads: headers, the moved-file summary, the revert prompt and the progress bar.

use crate::revert::RevertReport;
use crate::transition::TransitionReport;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};

pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol, on stderr.
    pub fn warning(message: &str) {
        eprintln!("{} {}", "⚠".yellow(), message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates a progress bar for the transition batch.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use centralink::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_and_clear();
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Invalid progress bar template")
                .progress_chars("█▓░"),
        );
        pb
    }

    /// Lists every file that now lives in the repository, followed by any failures.
    pub fn transition_summary(report: &TransitionReport) {
        Self::header("SUMMARY");

        let moved = report.transitions.len();
        if moved > 0 {
            println!(
                "{} {} moved to the central repository:",
                moved.to_string().green().bold(),
                if moved == 1 { "file was" } else { "files were" }
            );
            for path in report.moved_paths() {
                println!("  {}", path.display());
            }
        } else {
            println!("No files were moved.");
        }

        if !report.failures.is_empty() {
            println!(
                "{} {} could not be moved:",
                report.failures.len().to_string().red().bold(),
                if report.failures.len() == 1 { "file" } else { "files" }
            );
            for failure in &report.failures {
                eprintln!("  {}: {}", failure.path.display(), failure.error);
            }
        }
    }

    pub fn revert_summary(report: &RevertReport) {
        Self::header("REVERT");
        println!("  Restored: {}", report.restored.len().to_string().green());

        if !report.skipped.is_empty() {
            println!("  Skipped: {}", report.skipped.len());
            for (path, reason) in &report.skipped {
                println!("    - {}: {}", path.display(), reason);
            }
        }

        if !report.failures.is_empty() {
            println!("  Failed: {}", report.failures.len().to_string().red());
            for (path, reason) in &report.failures {
                eprintln!("    - {}: {}", path.display(), reason);
            }
        }
    }
}

/// Asks a question and returns the trimmed answer. `None` on end of input.
pub fn prompt_line<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> io::Result<Option<String>> {
    write!(output, "{} ", question)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Offers to revert the run. Only `X` or `x` counts as yes.
pub fn confirm_revert<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> io::Result<bool> {
    writeln!(
        output,
        "\nPlease check that your files are in the central repository."
    )?;
    let answer = prompt_line(
        input,
        output,
        "If something went wrong and you want to revert the changes, type 'X':",
    )?;
    Ok(answer.is_some_and(|a| a.eq_ignore_ascii_case("x")))
}
