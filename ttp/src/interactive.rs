//! Interactive mode.
//!
//! A line-oriented loop over stdin: every plain line is mapped and its
//! report printed, lines starting with `#` are commands.

use anyhow::Result;
use std::io::{self, BufRead, Write};
use ttp_core::{Focus, Orchestrator, Report};

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Empty,
    Quit,
    Help,
    SetFocus(Option<&'a str>),
    File(Option<&'a str>),
    Unknown,
    Activity(&'a str),
}

fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Empty;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Line::Quit;
    }

    let Some(command) = line.strip_prefix('#') else {
        return Line::Activity(line);
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (command, None),
    };

    match name {
        "quit" | "exit" => Line::Quit,
        "help" => Line::Help,
        "focus" => Line::SetFocus(arg),
        "file" => Line::File(arg),
        _ => Line::Unknown,
    }
}

fn print_help() {
    println!("Commands:");
    println!("  #focus <mitre|ksa|both> - Change which frameworks are mapped");
    println!("  #file <path>            - Map the contents of a file");
    println!("  #help                   - Show this help");
    println!("  #quit                   - Exit");
    println!("  (anything else is mapped as an activity description)");
}

async fn map(orchestrator: &Orchestrator, input: &str, focus: Focus) {
    print!("[PROCESSING]");
    io::stdout().flush().ok();

    let outcome = orchestrator.run(input, focus).await;

    // Clear the processing indicator
    print!("\r            \r");
    println!("{}", Report::new(input, &outcome));
}

/// Run the interactive loop until `#quit` or end of input.
pub async fn run_interactive(orchestrator: &Orchestrator, mut focus: Focus) -> Result<()> {
    let kb = orchestrator.knowledge_base();
    println!("=== TTP Mapper ===");
    println!(
        "Knowledge base: {} techniques, {} NICE elements{}",
        kb.technique_count(),
        kb.role_count(),
        if kb.is_degraded() { " (incomplete)" } else { "" }
    );
    println!("Focus: {focus}");
    println!();
    print_help();
    println!();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        match parse_line(&line) {
            Line::Empty => continue,
            Line::Quit => {
                println!("Goodbye!");
                break;
            }
            Line::Help => print_help(),
            Line::SetFocus(Some(value)) => match value.parse::<Focus>() {
                Ok(f) => {
                    focus = f;
                    println!("[FOCUS] {focus}");
                }
                Err(e) => println!("[ERROR] {e}"),
            },
            Line::SetFocus(None) => println!("[FOCUS] {focus} (usage: #focus <mitre|ksa|both>)"),
            Line::File(Some(path)) => match tokio::fs::read_to_string(path).await {
                Ok(content) if !content.trim().is_empty() => {
                    map(orchestrator, content.trim(), focus).await
                }
                Ok(_) => println!("[ERROR] {path} is empty"),
                Err(e) => println!("[ERROR] Failed to read {path}: {e}"),
            },
            Line::File(None) => println!("[ERROR] Usage: #file <path>"),
            Line::Unknown => println!("[ERROR] Unknown command. Type #help for help."),
            Line::Activity(text) => map(orchestrator, text, focus).await,
        }
        io::stdout().flush().ok();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("   "), Line::Empty);
        assert_eq!(parse_line("#quit"), Line::Quit);
        assert_eq!(parse_line("EXIT"), Line::Quit);
        assert_eq!(parse_line("#help"), Line::Help);
        assert_eq!(parse_line("#focus  ksa "), Line::SetFocus(Some("ksa")));
        assert_eq!(parse_line("#focus"), Line::SetFocus(None));
        assert_eq!(parse_line("#file notes/incident 1.txt"), Line::File(Some("notes/incident 1.txt")));
        assert_eq!(parse_line("#dance"), Line::Unknown);
        assert_eq!(parse_line("#"), Line::Unknown);
    }

    #[test]
    fn test_plain_lines_are_activities() {
        assert_eq!(
            parse_line(" dumped lsass with procdump "),
            Line::Activity("dumped lsass with procdump")
        );
        assert_eq!(parse_line("quit smoking"), Line::Activity("quit smoking"));
    }
}
