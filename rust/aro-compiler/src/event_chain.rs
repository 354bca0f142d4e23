//! Event-chain cycle analysis.
//!
//! Builds the directed graph `event type → event types its handlers can
//! emit` and reports every closed walk before execution, so a program
//! whose handlers would ping-pong events forever is rejected up front.
//!
//! Edges come from walking each handler's statement tree (including match
//! arms, loop bodies, and guarded statements) for action statements whose
//! surface verb is `emit`; the emitted event type is the action's result
//! base. Handlers for the dedicated runtime channels (`Socket Event`,
//! `File Event`, `Application-End`) never participate.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use aro_core::ast::{AnalyzedProgram, FeatureSet, Statement};
use aro_core::span::Span;
use aro_core::verbs::is_emit_verb;

/// A detected cycle in the emit graph.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCycle {
    /// The closed walk, first node repeated at the end (e.g. `[A, B, A]`).
    pub path: Vec<String>,
    /// Names of the feature sets whose handlers form the cycle.
    pub feature_sets: Vec<String>,
    /// Span of the first handler on the cycle, for reporting.
    pub span: Span,
}

impl EventCycle {
    /// Canonical key: the cycle's distinct nodes, sorted and joined with
    /// commas. Rotations of the same cycle share a key, so each cycle is
    /// reported at most once.
    pub fn canonical_key(&self) -> String {
        let mut nodes: Vec<&str> = self
            .path
            .iter()
            .take(self.path.len().saturating_sub(1))
            .map(String::as_str)
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes.join(",")
    }
}

/// Analyzer over a program's handler set.
pub struct EventChainAnalyzer<'a> {
    /// event type → emitted event types
    graph: BTreeMap<String, BTreeSet<String>>,
    /// event type → (handler feature-set name, span)
    handlers: BTreeMap<String, (&'a str, &'a Span)>,
}

impl<'a> EventChainAnalyzer<'a> {
    pub fn new(program: &'a AnalyzedProgram) -> Self {
        let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut handlers = BTreeMap::new();
        for fs in &program.feature_sets {
            let Some(event_type) = fs.handler_event_type() else {
                continue;
            };
            handlers.insert(event_type.to_string(), (fs.name.as_str(), &fs.span));
            let emits = graph.entry(event_type.to_string()).or_default();
            collect_emits(&fs.statements, emits);
        }
        Self { graph, handlers }
    }

    /// Detect every cycle in the emit graph. Each canonical cycle appears
    /// exactly once; discovery order follows sorted event-type order, so
    /// the report is deterministic.
    pub fn detect_cycles(&self) -> Vec<EventCycle> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            Unvisited,
            InPath,
            Done,
        }

        let mut colors: BTreeMap<&str, Color> = self
            .graph
            .keys()
            .map(|k| (k.as_str(), Color::Unvisited))
            .collect();
        let mut cycles = Vec::new();
        let mut seen_keys: HashSet<String> = HashSet::new();

        for root in self.graph.keys() {
            if colors[root.as_str()] != Color::Unvisited {
                continue;
            }
            // Iterative DFS; each stack frame tracks its remaining successors.
            let mut path: Vec<&str> = Vec::new();
            let mut stack: Vec<(&str, Vec<&str>)> = vec![(root.as_str(), self.successors(root))];
            colors.insert(root.as_str(), Color::InPath);
            path.push(root.as_str());

            while let Some((_, successors)) = stack.last_mut() {
                if let Some(next) = successors.pop() {
                    match colors.get(next).copied().unwrap_or(Color::Unvisited) {
                        Color::InPath => {
                            if let Some(cycle) = self.close_cycle(&path, next) {
                                if seen_keys.insert(cycle.canonical_key()) {
                                    cycles.push(cycle);
                                }
                            }
                        }
                        Color::Unvisited if self.graph.contains_key(next) => {
                            colors.insert(next, Color::InPath);
                            path.push(next);
                            stack.push((next, self.successors(next)));
                        }
                        // Emitted types without a handler terminate the walk;
                        // Done nodes cannot extend a cycle.
                        _ => {}
                    }
                } else {
                    let (node, _) = stack.pop().expect("frame present");
                    colors.insert(node, Color::Done);
                    path.pop();
                }
            }
        }
        cycles
    }

    fn successors(&self, node: &str) -> Vec<&str> {
        // Reversed so that popping visits in sorted order.
        self.graph
            .get(node)
            .map(|set| set.iter().rev().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn close_cycle(&self, path: &[&str], back_to: &str) -> Option<EventCycle> {
        let start = path.iter().position(|n| *n == back_to)?;
        let mut nodes: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
        nodes.push(back_to.to_string());
        let feature_sets = nodes[..nodes.len() - 1]
            .iter()
            .filter_map(|evt| self.handlers.get(evt).map(|(name, _)| name.to_string()))
            .collect();
        let span = self
            .handlers
            .get(back_to)
            .map(|(_, span)| (*span).clone())
            .unwrap_or_else(Span::synthetic);
        Some(EventCycle {
            path: nodes,
            feature_sets,
            span,
        })
    }
}

/// Walk a statement tree collecting the event types emitted by `emit`
/// action statements.
fn collect_emits(statements: &[Statement], emits: &mut BTreeSet<String>) {
    for statement in statements {
        match statement {
            Statement::Action { verb, result, .. } => {
                if is_emit_verb(verb) {
                    emits.insert(result.base.clone());
                }
            }
            Statement::Match {
                cases, otherwise, ..
            } => {
                for case in cases {
                    collect_emits(&case.body, emits);
                }
                if let Some(body) = otherwise {
                    collect_emits(body, emits);
                }
            }
            Statement::ForEach { body, .. } => collect_emits(body, emits),
            Statement::Publish { .. } | Statement::Require { .. } => {}
        }
    }
}

/// Convenience entry point used by the compile pipeline.
pub fn detect_cycles(program: &AnalyzedProgram) -> Vec<EventCycle> {
    EventChainAnalyzer::new(program).detect_cycles()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_core::ast::{QualifiedNoun, QueryModifiers, RangeModifiers, ValueSource};

    fn emit_statement(event: &str) -> Statement {
        Statement::Action {
            verb: "emit".to_string(),
            result: QualifiedNoun::new(event),
            object: None,
            value: ValueSource::None,
            query: QueryModifiers::default(),
            range: RangeModifiers::default(),
            guard: None,
            span: Span::synthetic(),
        }
    }

    fn handler(name: &str, event: &str, body: Vec<Statement>) -> FeatureSet {
        FeatureSet {
            name: name.to_string(),
            business_activity: format!("{event} Handler"),
            statements: body,
            span: Span::synthetic(),
        }
    }

    #[test]
    fn two_handler_ping_pong_is_reported_once() {
        let program = AnalyzedProgram::new(vec![
            handler("a-handler", "A", vec![emit_statement("B")]),
            handler("b-handler", "B", vec![emit_statement("A")]),
        ]);
        let cycles = detect_cycles(&program);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path, vec!["A", "B", "A"]);
        assert_eq!(cycles[0].canonical_key(), "A,B");
        assert_eq!(cycles[0].feature_sets, vec!["a-handler", "b-handler"]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let program = AnalyzedProgram::new(vec![handler(
            "echo",
            "Echo",
            vec![emit_statement("Echo")],
        )]);
        let cycles = detect_cycles(&program);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path, vec!["Echo", "Echo"]);
    }

    #[test]
    fn acyclic_chains_report_nothing() {
        let program = AnalyzedProgram::new(vec![
            handler("a", "A", vec![emit_statement("B")]),
            handler("b", "B", vec![emit_statement("C")]),
        ]);
        assert!(detect_cycles(&program).is_empty());
    }

    #[test]
    fn emits_inside_match_and_loops_are_seen() {
        use aro_core::ast::MatchCase;
        let body = vec![Statement::Match {
            subject: QualifiedNoun::new("result"),
            cases: vec![MatchCase {
                pattern: aro_core::ast::Expression::Literal(
                    aro_core::ast::LiteralValue::String("retry".into()),
                ),
                body: vec![Statement::ForEach {
                    item: "attempt".to_string(),
                    index: None,
                    collection: QualifiedNoun::new("attempts"),
                    filter: None,
                    body: vec![emit_statement("A")],
                    span: Span::synthetic(),
                }],
            }],
            otherwise: None,
            span: Span::synthetic(),
        }];
        let program = AnalyzedProgram::new(vec![handler("a", "A", body)]);
        let cycles = detect_cycles(&program);
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn excluded_channel_handlers_are_ignored() {
        let program = AnalyzedProgram::new(vec![FeatureSet {
            name: "socket".to_string(),
            business_activity: "Socket Event Handler".to_string(),
            statements: vec![emit_statement("Socket Event")],
            span: Span::synthetic(),
        }]);
        assert!(detect_cycles(&program).is_empty());
    }

    #[test]
    fn overlapping_cycles_keep_distinct_keys() {
        // A -> B -> A and A -> C -> A share node A but are distinct cycles.
        let program = AnalyzedProgram::new(vec![
            handler("a", "A", vec![emit_statement("B"), emit_statement("C")]),
            handler("b", "B", vec![emit_statement("A")]),
            handler("c", "C", vec![emit_statement("A")]),
        ]);
        let cycles = detect_cycles(&program);
        let mut keys: Vec<String> = cycles.iter().map(EventCycle::canonical_key).collect();
        keys.sort();
        assert_eq!(keys, vec!["A,B", "A,C"]);
    }
}
