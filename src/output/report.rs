use std::collections::BTreeMap;
use std::fmt;

use crate::phases::{Phase, PhaseReport};
use crate::tasks::OutcomeRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    task: String,
    detail: String,
}

impl Line {
    fn from_record(record: &OutcomeRecord) -> Self {
        Self {
            task: record.task_id.as_str().to_string(),
            detail: single_line(&record.detail),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Section {
    successes: Vec<Line>,
    failures: Vec<Line>,
    notes: Vec<String>,
}

impl Section {
    fn sort(&mut self) {
        self.successes
            .sort_by(|a, b| (&a.task, &a.detail).cmp(&(&b.task, &b.detail)));
        self.failures
            .sort_by(|a, b| (&a.task, &a.detail).cmp(&(&b.task, &b.detail)));
    }
}

/// End-of-run status report. Rendering is a pure function of the records it was
/// built from, so equal inputs always render to the same text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    sections: BTreeMap<Phase, Section>,
}

impl Summary {
    pub fn success_count(&self) -> usize {
        self.sections.values().map(|s| s.successes.len()).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.sections.values().map(|s| s.failures.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "bootstrap summary: {} succeeded, {} failed",
            self.success_count(),
            self.failure_count()
        )?;
        for (phase, section) in &self.sections {
            writeln!(
                f,
                "[{phase}] {} ok, {} failed",
                section.successes.len(),
                section.failures.len()
            )?;
            for line in &section.successes {
                writeln!(f, "  ok    {}: {}", line.task, line.detail)?;
            }
            for line in &section.failures {
                writeln!(f, "  FAIL  {}: {}", line.task, line.detail)?;
            }
            for note in &section.notes {
                writeln!(f, "  note  {note}")?;
            }
        }
        match self.failure_count() {
            0 => writeln!(f, "zero failures"),
            n => writeln!(f, "{n} failure(s); continuing"),
        }
    }
}

/// Groups records by the phase their task belongs to.
pub fn report(successes: &[OutcomeRecord], failures: &[OutcomeRecord]) -> Summary {
    let mut sections: BTreeMap<Phase, Section> = BTreeMap::new();
    for record in successes {
        sections
            .entry(record.kind.phase())
            .or_default()
            .successes
            .push(Line::from_record(record));
    }
    for record in failures {
        sections
            .entry(record.kind.phase())
            .or_default()
            .failures
            .push(Line::from_record(record));
    }
    sections.values_mut().for_each(Section::sort);
    Summary { sections }
}

/// Like [`report`], also listing every phase's notes and setup errors.
pub fn report_phases(reports: &[PhaseReport]) -> Summary {
    let mut sections: BTreeMap<Phase, Section> = BTreeMap::new();
    for phase_report in reports {
        let section = sections.entry(phase_report.phase).or_default();
        let outcomes = &phase_report.outcomes;
        section
            .successes
            .extend(outcomes.successes.iter().map(Line::from_record));
        section
            .failures
            .extend(outcomes.failures.iter().map(Line::from_record));
        if let Some(error) = &phase_report.setup_error {
            section.failures.push(Line {
                task: format!("{} setup", phase_report.phase),
                detail: single_line(error),
            });
        }
        section
            .notes
            .extend(phase_report.notes.iter().map(|note| single_line(note)));
    }
    sections.values_mut().for_each(Section::sort);
    Summary { sections }
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskId, TaskKind};

    fn ok(id: &str, kind: TaskKind) -> OutcomeRecord {
        OutcomeRecord::ok(TaskId::new(id), kind, "done")
    }

    fn fail(id: &str, kind: TaskKind, detail: &str) -> OutcomeRecord {
        OutcomeRecord::fail(TaskId::new(id), kind, detail)
    }

    #[test]
    fn groups_by_phase_and_counts() {
        let summary = report(
            &[ok("ComfyUI", TaskKind::Clone), ok("a:file", TaskKind::Download)],
            &[fail("requirements x", TaskKind::Install, "pip exploded")],
        );

        assert_eq!(summary.success_count(), 2);
        assert_eq!(summary.failure_count(), 1);
        assert!(!summary.is_clean());
        let text = summary.to_string();
        assert_eq!(
            text,
            "bootstrap summary: 2 succeeded, 1 failed\n\
             [acquire] 1 ok, 0 failed\n  ok    ComfyUI: done\n\
             [install] 0 ok, 1 failed\n  FAIL  requirements x: pip exploded\n\
             [download] 1 ok, 0 failed\n  ok    a:file: done\n\
             1 failure(s); continuing\n"
        );
    }

    #[test]
    fn rendering_ignores_completion_order() {
        let first = report(
            &[ok("b", TaskKind::Download), ok("a", TaskKind::Download)],
            &[fail("z", TaskKind::Download, "x"), fail("y", TaskKind::Download, "x")],
        );
        let second = report(
            &[ok("a", TaskKind::Download), ok("b", TaskKind::Download)],
            &[fail("y", TaskKind::Download, "x"), fail("z", TaskKind::Download, "x")],
        );
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(first.to_string(), first.to_string());
    }

    #[test]
    fn empty_run_reports_zero_failures() {
        let summary = report(&[], &[]);
        assert!(summary.is_clean());
        assert_eq!(
            summary.to_string(),
            "bootstrap summary: 0 succeeded, 0 failed\nzero failures\n"
        );
    }

    #[test]
    fn multi_line_details_are_flattened() {
        let summary = report(
            &[],
            &[fail("t", TaskKind::Clone, "git exited 128\n  fatal: nope\n")],
        );
        assert!(summary.to_string().contains("FAIL  t: git exited 128 | fatal: nope\n"));
    }

    #[test]
    fn phase_reports_include_notes_and_setup_errors() {
        let mut acquire = PhaseReport::crashed(Phase::Acquire, "thread panicked");
        acquire.notes.push("nothing to clone".into());
        let summary = report_phases(&[acquire]);
        assert_eq!(summary.failure_count(), 1);
        let text = summary.to_string();
        assert!(text.contains("FAIL  acquire setup: thread panicked"));
        assert!(text.contains("note  nothing to clone"));
    }
}
