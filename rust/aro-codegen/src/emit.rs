//! Module emission.
//!
//! Walks an analyzed program and produces one IR module: the runtime ABI
//! declarations, the string-constant globals from the pre-pass, one
//! function per feature set, handler and observer registration, and the
//! synthesized `main`.
//!
//! Unknown-verb statements become diagnostics and the pass continues;
//! only a missing entry point or a verification failure aborts the
//! compile.

use std::collections::HashSet;

use thiserror::Error;

use aro_compiler::diagnostics::{CompileErrorKind, Diagnostic};
use aro_core::ast::{AnalyzedProgram, FeatureSet};

use crate::abi;
use crate::ir::{Module, Operand, Type};
use crate::lower::{str_constant_gep, FeatureSetLowering};
use crate::strings::{collect_program_strings, StringPool};

/// Errors that abort code generation.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("lowering error: {0}")]
    Lowering(String),

    #[error("program has no entry point")]
    NoEntryPoint,

    #[error("module verification failed:\n{0}")]
    Verification(String),
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub module_name: String,
    /// A JSON OpenAPI document to register at startup.
    pub embedded_openapi: Option<String>,
}

impl CompileOptions {
    pub fn named(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            embedded_openapi: None,
        }
    }
}

/// A compiled module plus the diagnostics collected along the way.
pub struct CompiledModule {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledModule {
    pub fn render(&self) -> String {
        self.module.render()
    }
}

/// Lower an analyzed program to a verified IR module.
pub fn compile_program(
    program: &AnalyzedProgram,
    options: &CompileOptions,
) -> Result<CompiledModule, CodegenError> {
    if program.main_entry_point().is_none() {
        return Err(CodegenError::NoEntryPoint);
    }

    let mut module = Module::new(if options.module_name.is_empty() {
        "aro_module".to_string()
    } else {
        options.module_name.clone()
    });
    abi::declare_runtime(&mut module);

    let mut pool = StringPool::new();
    collect_program_strings(program, options.embedded_openapi.as_deref(), &mut pool);
    for (content, name) in pool.iter() {
        module.add_string_constant(name, content);
    }

    let mut diagnostics = Vec::new();
    let mut used_names: HashSet<String> = HashSet::new();
    let mut functions: Vec<(String, &FeatureSet)> = Vec::new();

    for feature_set in &program.feature_sets {
        let name = unique_name(function_name(feature_set), &mut used_names);
        let builder = module.define_function(&name, vec![Type::Ptr], Type::Ptr);
        let failures = FeatureSetLowering::new(builder, &pool).lower_feature_set(feature_set)?;
        for failure in failures {
            diagnostics.push(Diagnostic::new(
                CompileErrorKind::UnknownVerb,
                failure.message,
                failure.span,
            ));
        }
        functions.push((name, feature_set));
    }

    emit_main(&mut module, &pool, &functions, options)?;

    if let Err(problems) = module.verify() {
        return Err(CodegenError::Verification(problems.join("\n")));
    }
    Ok(CompiledModule {
        module,
        diagnostics,
    })
}

/// `Application-Start` entries get one function per business activity so a
/// module import can carry its own entry point; everything else is named
/// by feature-set name.
pub fn function_name(feature_set: &FeatureSet) -> String {
    if feature_set.is_entry_point() {
        format!(
            "aro_fs_application_start_{}",
            sanitize(&feature_set.business_activity)
        )
    } else {
        format!("aro_fs_{}", sanitize(&feature_set.name))
    }
}

/// Lowercase, keep `[a-z0-9]`, fold every other character to `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn unique_name(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut counter = 2;
    loop {
        let candidate = format!("{base}_{counter}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Seconds the shutdown barrier waits for in-flight handlers.
const AWAIT_PENDING_SECONDS: f64 = 10.0;

fn emit_main(
    module: &mut Module,
    pool: &StringPool,
    functions: &[(String, &FeatureSet)],
    options: &CompileOptions,
) -> Result<(), CodegenError> {
    let mut builder = module.define_function("main", vec![Type::I32, Type::Ptr], Type::I32);

    let runtime = Operand::Value(
        builder
            .call(Type::Ptr, abi::RT_INIT, vec![])
            .ok_or_else(|| CodegenError::Lowering("runtime init must return".into()))?,
    );
    builder.store(
        Type::Ptr,
        runtime.clone(),
        Operand::Global(abi::RUNTIME_GLOBAL.to_string()),
    );

    if let Some(openapi) = options.embedded_openapi.as_deref() {
        let json_ptr = str_constant_gep(&mut builder, pool, openapi)?;
        builder.call(
            Type::Void,
            abi::RT_SET_EMBEDDED_OPENAPI,
            vec![(Type::Ptr, runtime.clone()), (Type::Ptr, json_ptr)],
        );
    }
    builder.call(
        Type::I32,
        abi::RT_LOAD_PRECOMPILED_PLUGINS,
        vec![(Type::Ptr, runtime.clone())],
    );

    // Handler and observer registration.
    for (name, feature_set) in functions {
        if let Some(event_type) = feature_set.handler_event_type() {
            let type_ptr = str_constant_gep(&mut builder, pool, event_type)?;
            builder.call(
                Type::Void,
                abi::RT_REGISTER_HANDLER,
                vec![
                    (Type::Ptr, runtime.clone()),
                    (Type::Ptr, type_ptr),
                    (Type::Ptr, Operand::Global(name.clone())),
                ],
            );
        }
        if let Some(repository) = feature_set.observed_repository() {
            let repo_ptr = str_constant_gep(&mut builder, pool, repository)?;
            builder.call(
                Type::Void,
                abi::RT_REGISTER_REPOSITORY_OBSERVER,
                vec![
                    (Type::Ptr, runtime.clone()),
                    (Type::Ptr, repo_ptr),
                    (Type::Ptr, Operand::Global(name.clone())),
                ],
            );
        }
    }

    // Entry points run in program order; the last one's context becomes
    // the application's main context.
    let entries: Vec<&(String, &FeatureSet)> = functions
        .iter()
        .filter(|(_, fs)| fs.is_entry_point())
        .collect();
    let main_entry_index = entries.len().saturating_sub(1);
    let mut main_context = None;
    for (i, (name, feature_set)) in entries.iter().enumerate() {
        let context_name = str_constant_gep(&mut builder, pool, &feature_set.business_activity)?;
        let context = Operand::Value(
            builder
                .call(
                    Type::Ptr,
                    abi::RT_CONTEXT_CREATE,
                    vec![(Type::Ptr, runtime.clone()), (Type::Ptr, context_name)],
                )
                .ok_or_else(|| CodegenError::Lowering("context create must return".into()))?,
        );
        let result = builder
            .call(Type::Ptr, name, vec![(Type::Ptr, context.clone())])
            .ok_or_else(|| CodegenError::Lowering("feature set must return".into()))?;
        builder.call(
            Type::Void,
            abi::RT_VALUE_DESTROY,
            vec![(Type::Ptr, Operand::Value(result))],
        );
        if i == main_entry_index {
            main_context = Some(context);
        } else {
            builder.call(
                Type::Void,
                abi::RT_CONTEXT_DESTROY,
                vec![(Type::Ptr, context)],
            );
        }
    }
    let main_context =
        main_context.ok_or_else(|| CodegenError::Lowering("entry points vanished".into()))?;

    builder.call(
        Type::I32,
        abi::RT_AWAIT_PENDING_EVENTS,
        vec![
            (Type::Ptr, runtime.clone()),
            (Type::F64, Operand::ConstFloat(AWAIT_PENDING_SECONDS)),
        ],
    );
    builder.call(
        Type::Void,
        abi::RT_CONTEXT_PRINT_RESPONSE,
        vec![(Type::Ptr, main_context.clone())],
    );
    builder.call(
        Type::Void,
        abi::RT_CONTEXT_DESTROY,
        vec![(Type::Ptr, main_context)],
    );
    builder.call(Type::Void, abi::RT_SHUTDOWN, vec![(Type::Ptr, runtime)]);
    builder.ret(Type::I32, Some(Operand::ConstInt(0)));
    Ok(())
}
