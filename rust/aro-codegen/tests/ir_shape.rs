//! Shape tests over rendered IR: the fixed feature-set function skeleton,
//! descriptor layout, control-flow blocks, and module-level registration.

use aro_codegen::{compile_program, CompileOptions};
use aro_core::ast::{
    AnalyzedProgram, BinaryOp, Expression, FeatureSet, LiteralValue, MatchCase, ObjectRef,
    Preposition, QualifiedNoun, QueryModifiers, RangeModifiers, Statement, ValueSource,
};
use aro_core::span::Span;

fn action(verb: &str, result: &str, object: Option<(&str, Preposition)>) -> Statement {
    Statement::Action {
        verb: verb.to_string(),
        result: QualifiedNoun::new(result),
        object: object.map(|(base, preposition)| ObjectRef {
            preposition,
            noun: QualifiedNoun::new(base),
        }),
        value: ValueSource::None,
        query: QueryModifiers::default(),
        range: RangeModifiers::default(),
        guard: None,
        span: Span::synthetic(),
    }
}

fn program_with(statements: Vec<Statement>) -> AnalyzedProgram {
    AnalyzedProgram::new(vec![FeatureSet {
        name: "Application-Start".to_string(),
        business_activity: "Process Order".to_string(),
        statements,
        span: Span::synthetic(),
    }])
}

fn compile_text(program: &AnalyzedProgram) -> String {
    compile_program(program, &CompileOptions::named("shape"))
        .expect("compiles")
        .render()
}

#[test]
fn extract_statement_emits_the_canonical_skeleton() {
    // <Extract> the <user> from the <request>.
    let program = program_with(vec![action(
        "extract",
        "user",
        Some(("request", Preposition::From)),
    )]);
    let text = compile_text(&program);

    // Entry block: null-initialized result slot.
    assert!(text.contains("define ptr @aro_fs_application_start_process_order(ptr %v0)"));
    assert!(text.contains("%v1 = alloca ptr"));
    assert!(text.contains("store ptr null, ptr %v1"));

    // Result and object descriptors on the stack; preposition `from` = 1.
    assert!(text.contains("alloca %aro.ResultDescriptor"));
    assert!(text.contains("alloca %aro.ObjectDescriptor"));
    assert!(text.contains("store i32 1, ptr"));

    // The action call, result store, and has-error check.
    assert!(text.contains("call ptr @aro_action_extract(ptr %v0, ptr"));
    assert!(text.contains("call i32 @aro_rt_context_has_error(ptr %v0)"));
    assert!(text.contains("br i1"));
    assert!(text.contains("label %error_exit"));

    // The two well-known exits.
    assert!(text.contains("normal_return:"));
    assert!(text.contains("ret ptr %v"));
    assert!(text.contains("error_exit:"));
    assert!(text.contains("call void @aro_rt_context_print_error(ptr %v0)"));
    assert!(text.contains("ret ptr null"));
}

#[test]
fn every_preposition_encodes_its_table_value() {
    for (preposition, code) in [
        (Preposition::From, 1),
        (Preposition::Into, 5),
        (Preposition::At, 10),
    ] {
        let program = program_with(vec![action(
            if preposition == Preposition::Into { "store" } else { "extract" },
            "user",
            Some(("request", preposition)),
        )]);
        // `extract ... at` would be rejected at runtime, but the encoding
        // in the descriptor is a compile-time fact regardless.
        let text = match preposition {
            Preposition::At => {
                let program = program_with(vec![action(
                    "start",
                    "server",
                    Some(("port", Preposition::At)),
                )]);
                compile_text(&program)
            }
            _ => compile_text(&program),
        };
        assert!(
            text.contains(&format!("store i32 {code}, ptr")),
            "missing preposition encoding {code}"
        );
    }
}

#[test]
fn guarded_statement_emits_skip_body_merge() {
    let mut statement = action("extract", "user", Some(("request", Preposition::From)));
    if let Statement::Action { guard, .. } = &mut statement {
        *guard = Some(Expression::VariableRef(QualifiedNoun::new("enabled")));
    }
    let text = compile_text(&program_with(vec![statement]));
    assert!(text.contains("call i32 @aro_rt_evaluate_when_guard(ptr %v0, ptr"));
    assert!(text.contains("s0_skip:"));
    assert!(text.contains("s0_body:"));
    assert!(text.contains("s0_merge:"));
}

#[test]
fn match_statement_emits_case_chain_with_shared_end() {
    let statement = Statement::Match {
        subject: QualifiedNoun::new("result"),
        cases: vec![
            MatchCase {
                pattern: Expression::Literal(LiteralValue::String("ok".into())),
                body: vec![action("respond", "response", Some(("result", Preposition::With)))],
            },
            MatchCase {
                pattern: Expression::Literal(LiteralValue::String("validation-failed".into())),
                body: vec![],
            },
        ],
        otherwise: Some(vec![]),
        span: Span::synthetic(),
    };
    let text = compile_text(&program_with(vec![statement]));
    assert!(text.contains("call i32 @aro_rt_match_pattern(ptr %v0, ptr"));
    assert!(text.contains("s0_case0_body:"));
    assert!(text.contains("s0_case0_next:"));
    assert!(text.contains("s0_case1_body:"));
    assert!(text.contains("s0_case1_next:"));
    assert!(text.contains("s0_end:"));
}

#[test]
fn for_each_emits_cond_body_incr_end() {
    let statement = Statement::ForEach {
        item: "line".to_string(),
        index: Some("i".to_string()),
        collection: QualifiedNoun::with_specifiers("order", vec!["lines".into()]),
        filter: Some(Expression::Binary {
            op: BinaryOp::GreaterThan,
            left: Box::new(Expression::VariableRef(QualifiedNoun::with_specifiers(
                "line",
                vec!["qty".into()],
            ))),
            right: Box::new(Expression::Literal(LiteralValue::Integer(0))),
        }),
        body: vec![action("compute", "total", Some(("line", Preposition::From)))],
        span: Span::synthetic(),
    };
    let text = compile_text(&program_with(vec![statement]));

    assert!(text.contains("s0_cond:"));
    assert!(text.contains("s0_body:"));
    assert!(text.contains("s0_iter:"));
    assert!(text.contains("s0_incr:"));
    assert!(text.contains("s0_end:"));
    // Specifier applied through dict-get, index compared against count.
    assert!(text.contains("call ptr @aro_rt_dict_get"));
    assert!(text.contains("call i64 @aro_rt_array_count"));
    assert!(text.contains("icmp sge i64"));
    // Item rebinding protocol and the boxed loop index.
    assert!(text.contains("call void @aro_rt_unbind"));
    assert!(text.contains("call ptr @aro_rt_value_create_int"));
    // The collection handle is released at loop exit.
    assert!(text.contains("call void @aro_rt_value_destroy"));
}

#[test]
fn publish_and_require_lower_through_reserved_bindings() {
    let program = program_with(vec![
        Statement::Publish {
            external_name: "Order-Placed".to_string(),
            internal_variable: "order".to_string(),
            span: Span::synthetic(),
        },
        Statement::Require {
            variable: "api-key".to_string(),
            source: aro_core::ast::RequireSource::Environment,
            span: Span::synthetic(),
        },
        Statement::Require {
            variable: "logger".to_string(),
            source: aro_core::ast::RequireSource::Framework,
            span: Span::synthetic(),
        },
    ]);
    let text = compile_text(&program);
    assert!(text.contains("call ptr @aro_action_publish"));
    assert!(text.contains("call ptr @aro_action_extract"));
    // The reserved names travel as string constants.
    assert!(text.contains("_publish_alias_"));
    assert!(text.contains("_require_source_"));
    // Framework requires are a no-op: exactly one extract call (from the
    // environment require).
    assert_eq!(text.matches("call ptr @aro_action_extract").count(), 1);
}

#[test]
fn string_constants_are_deduplicated() {
    let program = program_with(vec![
        action("extract", "user", Some(("request", Preposition::From))),
        action("validate", "user", Some(("request", Preposition::Against))),
    ]);
    let text = compile_text(&program);
    // One constant for "user" however many statements mention it.
    assert_eq!(text.matches("c\"user\\00\"").count(), 1);
    assert_eq!(text.matches("c\"request\\00\"").count(), 1);
}

#[test]
fn folded_constants_lower_as_immediate_binds() {
    // 2 + 3 * 4 folds to 14, so the emitted code binds an integer
    // immediate instead of calling the evaluator.
    let mut statement = action("compute", "total", None);
    if let Statement::Action { value, .. } = &mut statement {
        *value = ValueSource::Expression(Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expression::Literal(LiteralValue::Integer(2))),
            right: Box::new(Expression::Binary {
                op: BinaryOp::Multiply,
                left: Box::new(Expression::Literal(LiteralValue::Integer(3))),
                right: Box::new(Expression::Literal(LiteralValue::Integer(4))),
            }),
        });
    }
    let text = compile_text(&program_with(vec![statement]));
    assert!(text.contains("call void @aro_rt_bind_int(ptr %v0, ptr %v"));
    assert!(text.contains("i64 14"));
    assert!(!text.contains("call ptr @aro_rt_evaluate_expression"));
}
