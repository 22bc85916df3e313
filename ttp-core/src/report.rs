//! Plain-text rendering of a run outcome.

use crate::orchestrator::RunOutcome;
use crate::record::KsaRef;
use std::fmt;

/// A printable view of a run outcome.
pub struct Report<'a> {
    pub input: &'a str,
    pub outcome: &'a RunOutcome,
}

impl<'a> Report<'a> {
    pub fn new(input: &'a str, outcome: &'a RunOutcome) -> Self {
        Self { input, outcome }
    }
}

fn write_ksa(f: &mut fmt::Formatter<'_>, title: &str, items: &[KsaRef]) -> fmt::Result {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(f, "\n{title}")?;
    for item in items {
        writeln!(f, "  - {}: {}", item.id, item.description)?;
    }
    Ok(())
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.outcome;

        if outcome.passed() {
            writeln!(f, "[GROUNDED] verified after {} attempt(s)", outcome.attempts)?;
        } else {
            writeln!(
                f,
                "[BEST EFFORT] not verified after {} attempt(s); treat ids with caution",
                outcome.attempts
            )?;
        }
        if outcome.kb_degraded {
            writeln!(f, "[WARNING] knowledge base incomplete; grounding could not be fully checked")?;
        }
        writeln!(f, "\nINPUT\n  {}", self.input)?;

        let Some(record) = &outcome.record else {
            writeln!(f, "\nNo usable mapping was produced.")?;
            if let Some(verdict) = &outcome.verdict {
                writeln!(f, "\nLAST FEEDBACK\n{}", verdict.feedback)?;
            }
            return Ok(());
        };

        if !record.summary.trim().is_empty() {
            writeln!(f, "\nSUMMARY\n  {}", record.summary)?;
        }

        if !record.techniques.is_empty() {
            writeln!(f, "\nATT&CK TECHNIQUES")?;
            for technique in &record.techniques {
                writeln!(f, "  - {}: {}", technique.id, technique.name)?;
            }
        }
        write_ksa(f, "KNOWLEDGE", &record.knowledge)?;
        write_ksa(f, "SKILLS", &record.skills)?;
        write_ksa(f, "ABILITIES", &record.abilities)?;
        write_ksa(f, "TASKS", &record.tasks)?;

        if !record.justification.trim().is_empty() {
            writeln!(f, "\nJUSTIFICATION\n  {}", record.justification)?;
        }

        if !outcome.passed() {
            if let Some(verdict) = outcome.verdict.as_ref().filter(|v| !v.feedback.is_empty()) {
                writeln!(f, "\nLAST FEEDBACK\n{}", verdict.feedback)?;
            }
        }

        Ok(())
    }
}
