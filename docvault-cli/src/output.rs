//! Styled terminal output utilities.

use std::io::{self, Write};

use docvault_mongodb::{Phase, ProgressEvent};
use owo_colors::OwoColorize;

/// Print a header/title
pub fn header(text: &str) {
    println!();
    println!("{}", text.bold().cyan());
    println!("{}", "─".repeat(text.len()).dimmed());
    println!();
}

/// Print the docvault logo
pub fn logo() {
    let logo = r#"
     _                          _ _
  __| | ___   _____   ____ _ _   _| | |_
 / _` |/ _ \ / __\ \ / / _` | | | | | __|
| (_| | (_) | (__ \ V / (_| | |_| | | |_
 \__,_|\___/ \___| \_/ \__,_|\__,_|_|\__|
    "#;
    println!("{}", logo.bright_cyan().bold());
}

/// Print a section header
pub fn section(text: &str) {
    println!("{}", text.bold().white());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a success message
pub fn success(text: &str) {
    println!("{} {}", "✔".green().bold(), text.green());
}

/// Print an info message
pub fn info(text: &str) {
    println!("{} {}", "ℹ".blue().bold(), text);
}

/// Print a warning message
pub fn warn(text: &str) {
    println!("{} {}", "⚠".yellow().bold(), text.yellow());
}

/// Print an error message
pub fn error(text: &str) {
    eprintln!("{} {}", "✖".red().bold(), text.red());
}

/// Print a step indicator
pub fn step(current: usize, total: usize, text: &str) {
    println!("{} {}", format!("[{}/{}]", current, total).dimmed(), text);
}

/// Print a list item
pub fn list_item(text: &str) {
    println!("  {} {}", "•".dimmed(), text);
}

/// Print a numbered list item
pub fn numbered_item(number: usize, text: &str) {
    println!("  {}. {}", number.to_string().dimmed(), text);
}

/// Print a newline
pub fn newline() {
    println!();
}

/// Print dimmed text
pub fn dim(text: &str) {
    println!("{}", text.dimmed());
}

/// Style text as success (green)
pub fn style_success(text: &str) -> String {
    text.green().to_string()
}

/// Style text as pending (yellow)
pub fn style_pending(text: &str) -> String {
    text.yellow().to_string()
}

/// Style text as error (red)
pub fn style_error(text: &str) -> String {
    text.red().to_string()
}

/// Render one progress event on stderr, overwriting the current line.
pub fn progress(event: &ProgressEvent) {
    let mut stderr = io::stderr();
    let counts = match event.total {
        Some(total) => format!("{}/{}", event.processed, total),
        None => event.processed.to_string(),
    };
    let percent = event
        .fraction()
        .map(|f| format!(" ({:.0}%)", f * 100.0))
        .unwrap_or_default();

    if event.phase == Phase::Complete {
        let _ = writeln!(
            stderr,
            "\r\x1b[2K  {} {} {}",
            "✔".green(),
            event.collection.bold(),
            format!("{} documents", event.processed).dimmed()
        );
    } else {
        let _ = write!(
            stderr,
            "\r\x1b[2K  {} {} {}{}",
            format!("[{}]", event.phase).dimmed(),
            event.collection,
            counts,
            percent
        );
        let _ = stderr.flush();
    }
}

/// Ask for confirmation
pub fn confirm(prompt: &str) -> bool {
    print!("{} {} ", prompt, "[y/N]".dimmed());
    io::stdout().flush().ok();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }

    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Ask user to pick any number of options.
///
/// Accepts numbers and ranges (`1,3,5-7`); a blank answer selects every
/// option. Returns `None` when the answer cannot be parsed.
pub fn multi_select(prompt: &str, options: &[String]) -> Option<Vec<usize>> {
    println!("{}", prompt);
    for (i, option) in options.iter().enumerate() {
        numbered_item(i + 1, option);
    }

    print!("{}: ", "Select (blank for all)".dimmed());
    io::stdout().flush().ok();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return None;
    }
    parse_selection(&input, options.len())
}

/// Parse a `1,3,5-7` style answer into zero-based, de-duplicated indices.
pub fn parse_selection(input: &str, len: usize) -> Option<Vec<usize>> {
    let input = input.trim();
    if input.is_empty() {
        return Some((0..len).collect());
    }

    let mut picked = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (a.trim().parse::<usize>().ok()?, b.trim().parse::<usize>().ok()?),
            None => {
                let n = part.parse::<usize>().ok()?;
                (n, n)
            }
        };
        if start == 0 || end < start || end > len {
            return None;
        }
        for n in start..=end {
            if !picked.contains(&(n - 1)) {
                picked.push(n - 1);
            }
        }
    }
    Some(picked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("", 3), Some(vec![0, 1, 2]));
        assert_eq!(parse_selection("2", 3), Some(vec![1]));
        assert_eq!(parse_selection("3, 1-2,3", 3), Some(vec![2, 0, 1]));
        assert_eq!(parse_selection("0", 3), None);
        assert_eq!(parse_selection("4", 3), None);
        assert_eq!(parse_selection("2-1", 3), None);
        assert_eq!(parse_selection("abc", 3), None);
    }
}
