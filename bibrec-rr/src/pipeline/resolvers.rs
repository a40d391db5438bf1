//! Choice resolvers
//!
//! Implementations of the consumer contract: automated policies, the terminal
//! review prompt, and a scripted resolver for tests and batch runs.

use super::{arxiv_fallback, ChoiceResolver, ReferenceChoice, ReferenceChoiceTask, ReferenceOrigin};
use crate::decision::UpdateMethod;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use tracing::warn;

/// Keeps every entry unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepCurrentResolver;

impl ChoiceResolver for KeepCurrentResolver {
    fn resolve(&mut self, task: &ReferenceChoiceTask) -> ReferenceChoice {
        ReferenceChoice::keep(task.current.clone())
    }

    fn method(&self) -> UpdateMethod {
        UpdateMethod::Automated
    }
}

/// Unattended policy
///
/// Accepts the first suggestion whose normalized title equals the entry's,
/// otherwise falls back to arXiv synthesis, otherwise keeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutomatedResolver;

impl ChoiceResolver for AutomatedResolver {
    fn resolve(&mut self, task: &ReferenceChoiceTask) -> ReferenceChoice {
        let current = &task.current;
        if !current.title.is_empty() {
            if let Some(found) = task.suggestions().iter().find(|s| s.title == current.title) {
                return ReferenceChoice {
                    current: current.clone(),
                    chosen: found.clone(),
                };
            }
        }
        arxiv_fallback(task)
    }

    fn method(&self) -> UpdateMethod {
        UpdateMethod::Automated
    }
}

/// Numbered terminal prompt
///
/// `0` (or an empty line) keeps the entry, `1..` picks a suggestion, `n`
/// means none is acceptable (arXiv fallback), `q` stops the review and keeps
/// every remaining entry. End of input behaves like `q`.
pub struct InteractiveResolver<R, W> {
    input: R,
    output: W,
    reviewed: usize,
    finished: bool,
}

impl<R: BufRead + Send, W: Write + Send> InteractiveResolver<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            reviewed: 0,
            finished: false,
        }
    }

    fn render(&mut self, task: &ReferenceChoiceTask) -> std::io::Result<()> {
        let out = &mut self.output;
        writeln!(out)?;
        writeln!(out, "[{}] {}", self.reviewed, task.current.entry.key)?;
        for (i, reference) in task.candidates.iter().enumerate() {
            let label = match &reference.origin {
                ReferenceOrigin::Input => "current",
                ReferenceOrigin::Candidate { service } => service.as_str(),
                ReferenceOrigin::Arxiv => "arxiv",
            };
            let year = reference
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "----".to_string());
            writeln!(out, "  {}) [{}] {} {}", i, label, year, reference.title)?;
            if !reference.author.is_empty() {
                writeln!(out, "       {}", reference.author)?;
            }
        }
        write!(
            out,
            "Choose 0-{}, n = none acceptable, q = stop review: ",
            task.candidates.len() - 1
        )?;
        out.flush()
    }

    fn prompt(&mut self, task: &ReferenceChoiceTask) -> std::io::Result<ReferenceChoice> {
        loop {
            self.render(task)?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                self.finished = true;
                return Ok(ReferenceChoice::keep(task.current.clone()));
            }

            match line.trim() {
                "" | "0" => return Ok(ReferenceChoice::keep(task.current.clone())),
                "q" | "Q" => {
                    self.finished = true;
                    return Ok(ReferenceChoice::keep(task.current.clone()));
                }
                "n" | "N" => return Ok(arxiv_fallback(task)),
                other => match other.parse::<usize>() {
                    Ok(i) if i < task.candidates.len() => {
                        return Ok(ReferenceChoice {
                            current: task.current.clone(),
                            chosen: task.candidates[i].clone(),
                        })
                    }
                    _ => writeln!(self.output, "Invalid choice: {}", other)?,
                },
            }
        }
    }
}

impl<R: BufRead + Send, W: Write + Send> ChoiceResolver for InteractiveResolver<R, W> {
    fn resolve(&mut self, task: &ReferenceChoiceTask) -> ReferenceChoice {
        self.reviewed += 1;
        match self.prompt(task) {
            Ok(choice) => choice,
            Err(e) => {
                warn!(error = %e, "Review input failed, stopping review");
                self.finished = true;
                ReferenceChoice::keep(task.current.clone())
            }
        }
    }

    fn method(&self) -> UpdateMethod {
        UpdateMethod::Manual
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// One pre-recorded decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedDecision {
    Keep,
    /// Candidate index; 0 is the current reference
    Pick(usize),
    NoneAcceptable,
    /// Keep this entry and stop the review
    Stop,
}

/// Replays a fixed decision list; keeps everything once it runs out
///
/// Updates are recorded as manual, like a terminal review.
#[derive(Debug, Clone)]
pub struct ScriptedResolver {
    script: VecDeque<ScriptedDecision>,
    finished: bool,
}

impl ScriptedResolver {
    pub fn new(script: Vec<ScriptedDecision>) -> Self {
        Self {
            script: script.into(),
            finished: false,
        }
    }
}

impl ChoiceResolver for ScriptedResolver {
    fn resolve(&mut self, task: &ReferenceChoiceTask) -> ReferenceChoice {
        let keep = ReferenceChoice::keep(task.current.clone());
        match self.script.pop_front().unwrap_or(ScriptedDecision::Keep) {
            ScriptedDecision::Keep => keep,
            ScriptedDecision::Pick(i) => match task.candidates.get(i) {
                Some(chosen) => ReferenceChoice {
                    current: task.current.clone(),
                    chosen: chosen.clone(),
                },
                None => keep,
            },
            ScriptedDecision::NoneAcceptable => arxiv_fallback(task),
            ScriptedDecision::Stop => {
                self.finished = true;
                keep
            }
        }
    }

    fn method(&self) -> UpdateMethod {
        UpdateMethod::Manual
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bibtex::Entry;
    use crate::lookup::Candidate;
    use crate::pipeline::Reference;
    use std::io::Cursor;

    fn task() -> ReferenceChoiceTask {
        let current = Reference::from_entry(
            Entry::new("article", "Smith21")
                .with_field("title", "Deep Learning")
                .with_field("note", "arXiv:2101.00001"),
        );
        let suggestions = vec![
            Reference::from_candidate(Candidate {
                service: "dblp".into(),
                entry: Entry::new("inproceedings", "DBLP:1").with_field("title", "Deep Learnings"),
            }),
            Reference::from_candidate(Candidate {
                service: "crossref".into(),
                entry: Entry::new("article", "cr1")
                    .with_field("title", "Deep learning!")
                    .with_field("year", "2015"),
            }),
            Reference::from_candidate(Candidate {
                service: "crossref".into(),
                entry: Entry::new("article", "cr2").with_field("title", "Deep Learning"),
            }),
        ];
        ReferenceChoiceTask::new(current, suggestions)
    }

    #[test]
    fn test_automated_picks_exact_title() {
        let choice = AutomatedResolver.resolve(&task());
        assert_eq!(choice.chosen.entry.key, "cr2");
    }

    #[test]
    fn test_automated_falls_back_to_arxiv() {
        let current = Reference::from_entry(
            Entry::new("misc", "K")
                .with_field("title", "Unknown Work")
                .with_field("url", "https://arxiv.org/abs/1901.12345"),
        );
        let choice = AutomatedResolver.resolve(&ReferenceChoiceTask::new(current, Vec::new()));
        assert_eq!(choice.chosen.origin, ReferenceOrigin::Arxiv);
        assert_eq!(choice.chosen.entry.get("year"), Some("2019"));
    }

    #[test]
    fn test_interactive_number_picks_candidate() {
        let mut output = Vec::new();
        let mut resolver = InteractiveResolver::new(Cursor::new("x\n7\n2\n"), &mut output);
        let choice = resolver.resolve(&task());
        assert_eq!(choice.chosen.entry.key, "cr1");
        assert!(!resolver.is_finished());
        assert_eq!(resolver.method(), UpdateMethod::Manual);
        drop(resolver);

        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("0) [current] ---- Deep Learning"));
        assert!(shown.contains("2) [crossref] 2015 Deep learning"));
        assert!(shown.contains("Invalid choice: x"));
        assert!(shown.contains("Invalid choice: 7"));
    }

    #[test]
    fn test_interactive_none_and_quit() {
        let mut resolver = InteractiveResolver::new(Cursor::new("n\nq\n"), Vec::new());
        let first = resolver.resolve(&task());
        assert_eq!(first.chosen.origin, ReferenceOrigin::Arxiv);
        assert!(!resolver.is_finished());

        let second = resolver.resolve(&task());
        assert!(second.is_keep());
        assert!(resolver.is_finished());
    }

    #[test]
    fn test_interactive_end_of_input_stops() {
        let mut resolver = InteractiveResolver::new(Cursor::new(""), Vec::new());
        assert!(resolver.resolve(&task()).is_keep());
        assert!(resolver.is_finished());
    }

    #[test]
    fn test_scripted_runs_out_to_keep() {
        let mut resolver = ScriptedResolver::new(vec![ScriptedDecision::Pick(9)]);
        assert_eq!(resolver.method(), UpdateMethod::Manual);
        assert!(resolver.resolve(&task()).is_keep());
        assert!(resolver.resolve(&task()).is_keep());
        assert!(!resolver.is_finished());
    }
}
