//! Statement lowering.
//!
//! Lowers one feature set into one IR function. The function shape is
//! fixed: the entry block allocates a null-initialized result slot, every
//! action call stores its return there and is followed by a has-error
//! check branching to `error_exit`, and `normal_return` loads the slot and
//! returns it.
//!
//! Every statement gets a unique `s<index>` block-name prefix, indices
//! counting nested statements too.

use aro_core::ast::{
    FeatureSet, LiteralValue, ObjectRef, QualifiedNoun, RequireSource, Statement, Preposition,
};
use aro_core::reserved;

use crate::abi;
use crate::emit::CodegenError;
use crate::ir::{BlockId, FunctionBuilder, IcmpPred, Operand, Type};
use crate::serialize::{
    expression_to_json, lowered_value_source, to_text, variable_ref_json, LoweredValueSource,
};
use crate::strings::StringPool;

/// A statement that cannot be lowered; reported as a diagnostic while the
/// pass continues with the next statement.
#[derive(Debug, Clone, PartialEq)]
pub struct UnloweredStatement {
    pub message: String,
    pub span: aro_core::span::Span,
}

/// Check that every verb in the statement tree resolves to an action
/// symbol. Runs before lowering so a failed statement emits nothing.
pub fn validate_statement(statement: &Statement) -> Result<(), UnloweredStatement> {
    match statement {
        Statement::Action { verb, span, .. } => {
            if abi::action_symbol(verb).is_none() {
                return Err(UnloweredStatement {
                    message: format!("no action is registered for verb '{verb}'"),
                    span: span.clone(),
                });
            }
            Ok(())
        }
        Statement::Match {
            cases, otherwise, ..
        } => {
            for case in cases {
                for nested in &case.body {
                    validate_statement(nested)?;
                }
            }
            if let Some(body) = otherwise {
                for nested in body {
                    validate_statement(nested)?;
                }
            }
            Ok(())
        }
        Statement::ForEach { body, .. } => {
            for nested in body {
                validate_statement(nested)?;
            }
            Ok(())
        }
        Statement::Publish { .. } | Statement::Require { .. } => Ok(()),
    }
}

/// Lowers the statements of one feature set into its function body.
pub struct FeatureSetLowering<'m, 'p> {
    builder: FunctionBuilder<'m>,
    pool: &'p StringPool,
    ctx: Operand,
    result_ptr: Operand,
    normal_return: BlockId,
    error_exit: BlockId,
    stmt_counter: usize,
}

impl<'m, 'p> FeatureSetLowering<'m, 'p> {
    /// Set up the fixed function shape and position the builder in the
    /// entry block, ready for statement lowering.
    pub fn new(mut builder: FunctionBuilder<'m>, pool: &'p StringPool) -> Self {
        let ctx = Operand::Value(builder.param(0));
        let result_slot = builder.alloca(Type::Ptr);
        let result_ptr = Operand::Value(result_slot);
        builder.store(Type::Ptr, Operand::Null, result_ptr.clone());
        let normal_return = builder.create_block("normal_return");
        let error_exit = builder.create_block("error_exit");
        Self {
            builder,
            pool,
            ctx,
            result_ptr,
            normal_return,
            error_exit,
            stmt_counter: 0,
        }
    }

    /// Lower the whole statement list and close the function.
    pub fn lower_feature_set(mut self, feature_set: &FeatureSet) -> Result<Vec<UnloweredStatement>, CodegenError> {
        let mut failures = Vec::new();
        for statement in &feature_set.statements {
            match validate_statement(statement) {
                Ok(()) => self.lower_statement(statement)?,
                Err(failure) => failures.push(failure),
            }
        }
        self.finish()?;
        Ok(failures)
    }

    fn finish(mut self) -> Result<(), CodegenError> {
        self.builder.br(self.normal_return);

        self.builder.switch_to(self.normal_return);
        let result = self.builder.load(Type::Ptr, self.result_ptr.clone());
        self.builder.ret(Type::Ptr, Some(Operand::Value(result)));

        self.builder.switch_to(self.error_exit);
        self.builder.call(
            Type::Void,
            abi::RT_CONTEXT_PRINT_ERROR,
            vec![(Type::Ptr, self.ctx.clone())],
        );
        self.builder.ret(Type::Ptr, Some(Operand::Null));
        Ok(())
    }

    fn next_prefix(&mut self) -> String {
        let prefix = format!("s{}", self.stmt_counter);
        self.stmt_counter += 1;
        prefix
    }

    // -- statements --------------------------------------------------------

    fn lower_statement(&mut self, statement: &Statement) -> Result<(), CodegenError> {
        match statement {
            Statement::Action {
                verb,
                result,
                object,
                value,
                query,
                range,
                guard,
                ..
            } => self.lower_action(verb, result, object.as_ref(), value, query, range, guard.as_ref()),
            Statement::Match {
                subject,
                cases,
                otherwise,
                ..
            } => self.lower_match(subject, cases, otherwise.as_deref()),
            Statement::ForEach {
                item,
                index,
                collection,
                filter,
                body,
                ..
            } => self.lower_for_each(item, index.as_deref(), collection, filter.as_ref(), body),
            Statement::Publish {
                external_name,
                internal_variable,
                ..
            } => self.lower_publish(external_name, internal_variable),
            Statement::Require {
                variable, source, ..
            } => self.lower_require(variable, source),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_action(
        &mut self,
        verb: &str,
        result: &QualifiedNoun,
        object: Option<&ObjectRef>,
        value: &aro_core::ast::ValueSource,
        query: &aro_core::ast::QueryModifiers,
        range: &aro_core::ast::RangeModifiers,
        guard: Option<&aro_core::ast::Expression>,
    ) -> Result<(), CodegenError> {
        let prefix = self.next_prefix();

        let merge = if let Some(guard) = guard {
            let skip = self.builder.create_block(format!("{prefix}_skip"));
            let body = self.builder.create_block(format!("{prefix}_body"));
            let merge = self.builder.create_block(format!("{prefix}_merge"));

            let guard_json = to_text(&expression_to_json(guard));
            let guard_ptr = self.str_ptr(&guard_json)?;
            let passed = self.builder.call(
                Type::I32,
                abi::RT_EVALUATE_WHEN_GUARD,
                vec![(Type::Ptr, self.ctx.clone()), (Type::Ptr, guard_ptr)],
            );
            let cond = self.truthy_i32(passed);
            self.builder.cond_br(cond, body, skip);

            self.builder.switch_to(skip);
            self.builder.br(merge);

            self.builder.switch_to(body);
            Some(merge)
        } else {
            None
        };

        self.bind_modifiers(query, range)?;
        self.bind_value_source(&result.base, value)?;

        let result_desc = self.build_result_descriptor(result)?;
        let object_desc = match object {
            Some(object) => self.build_object_descriptor(object)?,
            None => Operand::Null,
        };
        self.call_action(&prefix, verb, result_desc, object_desc)?;

        if let Some(merge) = merge {
            self.builder.br(merge);
            self.builder.switch_to(merge);
        }
        Ok(())
    }

    fn lower_match(
        &mut self,
        subject: &QualifiedNoun,
        cases: &[aro_core::ast::MatchCase],
        otherwise: Option<&[Statement]>,
    ) -> Result<(), CodegenError> {
        let prefix = self.next_prefix();
        let end = self.builder.create_block(format!("{prefix}_end"));
        let subject_json = to_text(&variable_ref_json(subject));

        for (case_index, case) in cases.iter().enumerate() {
            let body = self
                .builder
                .create_block(format!("{prefix}_case{case_index}_body"));
            let next = self
                .builder
                .create_block(format!("{prefix}_case{case_index}_next"));

            let subject_ptr = self.str_ptr(&subject_json)?;
            let pattern_json = to_text(&expression_to_json(&case.pattern));
            let pattern_ptr = self.str_ptr(&pattern_json)?;
            let matched = self.builder.call(
                Type::I32,
                abi::RT_MATCH_PATTERN,
                vec![
                    (Type::Ptr, self.ctx.clone()),
                    (Type::Ptr, subject_ptr),
                    (Type::Ptr, pattern_ptr),
                ],
            );
            let cond = self.truthy_i32(matched);
            self.builder.cond_br(cond, body, next);

            self.builder.switch_to(body);
            for nested in &case.body {
                self.lower_statement(nested)?;
            }
            if !self.builder.is_terminated() {
                self.builder.br(end);
            }
            self.builder.switch_to(next);
        }

        if let Some(body) = otherwise {
            for nested in body {
                self.lower_statement(nested)?;
            }
        }
        if !self.builder.is_terminated() {
            self.builder.br(end);
        }
        self.builder.switch_to(end);
        Ok(())
    }

    fn lower_for_each(
        &mut self,
        item: &str,
        index: Option<&str>,
        collection: &QualifiedNoun,
        filter: Option<&aro_core::ast::Expression>,
        body: &[Statement],
    ) -> Result<(), CodegenError> {
        let prefix = self.next_prefix();

        // Resolve the collection base, then apply specifiers one dict-get
        // at a time, releasing each intermediate handle.
        let base_ptr = self.str_ptr(&collection.base)?;
        let mut current = Operand::Value(
            self.builder
                .call(
                    Type::Ptr,
                    abi::RT_RESOLVE,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, base_ptr),
                        (Type::Ptr, Operand::Null),
                        (Type::I32, Operand::ConstInt(0)),
                    ],
                )
                .expect("resolve returns a value"),
        );
        for specifier in &collection.specifiers {
            let key_ptr = self.str_ptr(specifier)?;
            let next = self
                .builder
                .call(
                    Type::Ptr,
                    abi::RT_DICT_GET,
                    vec![(Type::Ptr, current.clone()), (Type::Ptr, key_ptr)],
                )
                .expect("dict_get returns a value");
            self.builder.call(
                Type::Void,
                abi::RT_VALUE_DESTROY,
                vec![(Type::Ptr, current.clone())],
            );
            current = Operand::Value(next);
        }
        let collection_value = current;

        let index_slot = self.builder.alloca(Type::I64);
        let index_ptr = Operand::Value(index_slot);
        self.builder
            .store(Type::I64, Operand::ConstInt(0), index_ptr.clone());

        let cond = self.builder.create_block(format!("{prefix}_cond"));
        let body_block = self.builder.create_block(format!("{prefix}_body"));
        let incr = self.builder.create_block(format!("{prefix}_incr"));
        let end = self.builder.create_block(format!("{prefix}_end"));
        self.builder.br(cond);

        self.builder.switch_to(cond);
        let i = self.builder.load(Type::I64, index_ptr.clone());
        let count = self
            .builder
            .call(
                Type::I64,
                abi::RT_ARRAY_COUNT,
                vec![(Type::Ptr, collection_value.clone())],
            )
            .expect("array_count returns a value");
        let done = self.builder.icmp(
            IcmpPred::Sge,
            Type::I64,
            Operand::Value(i),
            Operand::Value(count),
        );
        self.builder.cond_br(Operand::Value(done), end, body_block);

        self.builder.switch_to(body_block);
        let i_in_body = self.builder.load(Type::I64, index_ptr.clone());
        let element = self
            .builder
            .call(
                Type::Ptr,
                abi::RT_ARRAY_GET,
                vec![
                    (Type::Ptr, collection_value.clone()),
                    (Type::I64, Operand::Value(i_in_body)),
                ],
            )
            .expect("array_get returns a value");
        let item_ptr = self.str_ptr(item)?;
        self.builder.call(
            Type::Void,
            abi::RT_UNBIND,
            vec![(Type::Ptr, self.ctx.clone()), (Type::Ptr, item_ptr.clone())],
        );
        self.builder.call(
            Type::Void,
            abi::RT_BIND_VALUE,
            vec![
                (Type::Ptr, self.ctx.clone()),
                (Type::Ptr, item_ptr),
                (Type::Ptr, Operand::Value(element)),
            ],
        );
        if let Some(index_name) = index {
            let boxed = self
                .builder
                .call(
                    Type::Ptr,
                    abi::RT_VALUE_CREATE_INT,
                    vec![(Type::I64, Operand::Value(i_in_body))],
                )
                .expect("value_create_int returns a value");
            let index_name_ptr = self.str_ptr(index_name)?;
            self.builder.call(
                Type::Void,
                abi::RT_BIND_VALUE,
                vec![
                    (Type::Ptr, self.ctx.clone()),
                    (Type::Ptr, index_name_ptr),
                    (Type::Ptr, Operand::Value(boxed)),
                ],
            );
        }

        if let Some(filter) = filter {
            let iter_block = self.builder.create_block(format!("{prefix}_iter"));
            let filter_json = to_text(&expression_to_json(filter));
            let filter_ptr = self.str_ptr(&filter_json)?;
            let passed = self.builder.call(
                Type::I32,
                abi::RT_EVALUATE_WHEN_GUARD,
                vec![(Type::Ptr, self.ctx.clone()), (Type::Ptr, filter_ptr)],
            );
            let cond_value = self.truthy_i32(passed);
            self.builder.cond_br(cond_value, iter_block, incr);
            self.builder.switch_to(iter_block);
        }
        for nested in body {
            self.lower_statement(nested)?;
        }
        if !self.builder.is_terminated() {
            self.builder.br(incr);
        }

        self.builder.switch_to(incr);
        let i_in_incr = self.builder.load(Type::I64, index_ptr.clone());
        let bumped = self
            .builder
            .add(Type::I64, Operand::Value(i_in_incr), Operand::ConstInt(1));
        self.builder
            .store(Type::I64, Operand::Value(bumped), index_ptr);
        self.builder.br(cond);

        self.builder.switch_to(end);
        self.builder.call(
            Type::Void,
            abi::RT_VALUE_DESTROY,
            vec![(Type::Ptr, collection_value)],
        );
        Ok(())
    }

    fn lower_publish(
        &mut self,
        external_name: &str,
        internal_variable: &str,
    ) -> Result<(), CodegenError> {
        let prefix = self.next_prefix();
        self.bind_string_value(reserved::PUBLISH_ALIAS, external_name)?;
        self.bind_string_value(reserved::PUBLISH_VARIABLE, internal_variable)?;

        let result_desc = self.build_result_descriptor(&QualifiedNoun::new(external_name))?;
        let object_desc = self.build_object_descriptor(&ObjectRef {
            preposition: Preposition::From,
            noun: QualifiedNoun::new(internal_variable),
        })?;
        self.call_action(&prefix, "publish", result_desc, object_desc)
    }

    fn lower_require(
        &mut self,
        variable: &str,
        source: &RequireSource,
    ) -> Result<(), CodegenError> {
        let source_name = match source {
            // The runtime auto-binds frameworks; nothing to emit.
            RequireSource::Framework => return Ok(()),
            RequireSource::Environment => "environment",
            RequireSource::FeatureSet(name) => name.as_str(),
        };
        let prefix = self.next_prefix();
        self.bind_string_value(reserved::REQUIRE_VARIABLE, variable)?;
        self.bind_string_value(reserved::REQUIRE_SOURCE, source_name)?;

        let result_desc = self.build_result_descriptor(&QualifiedNoun::new(variable))?;
        let object_desc = self.build_object_descriptor(&ObjectRef {
            preposition: Preposition::From,
            noun: QualifiedNoun::new(source_name),
        })?;
        self.call_action(&prefix, "extract", result_desc, object_desc)
    }

    // -- building blocks ---------------------------------------------------

    /// Call the verb's action, store its result, and emit the has-error
    /// check that mirrors the interpreter's halt-on-first-failure.
    fn call_action(
        &mut self,
        prefix: &str,
        verb: &str,
        result_desc: Operand,
        object_desc: Operand,
    ) -> Result<(), CodegenError> {
        let symbol = abi::action_symbol(verb).ok_or_else(|| {
            CodegenError::Lowering(format!("verb '{verb}' escaped validation"))
        })?;
        let result = self
            .builder
            .call(
                Type::Ptr,
                &symbol,
                vec![
                    (Type::Ptr, self.ctx.clone()),
                    (Type::Ptr, result_desc),
                    (Type::Ptr, object_desc),
                ],
            )
            .expect("actions return a value");
        self.builder
            .store(Type::Ptr, Operand::Value(result), self.result_ptr.clone());

        let error = self.builder.call(
            Type::I32,
            abi::RT_CONTEXT_HAS_ERROR,
            vec![(Type::Ptr, self.ctx.clone())],
        );
        let has_error = self.truthy_i32(error);
        let cont = self.builder.create_block(format!("{prefix}_cont"));
        self.builder.cond_br(has_error, self.error_exit, cont);
        self.builder.switch_to(cont);
        Ok(())
    }

    fn bind_modifiers(
        &mut self,
        query: &aro_core::ast::QueryModifiers,
        range: &aro_core::ast::RangeModifiers,
    ) -> Result<(), CodegenError> {
        let string_modifiers = [
            (reserved::WHERE_FIELD, query.where_field.as_deref()),
            (reserved::WHERE_OP, query.where_op.as_deref()),
            (reserved::AGGREGATION_TYPE, query.aggregation_type.as_deref()),
            (reserved::AGGREGATION_FIELD, query.aggregation_field.as_deref()),
            (reserved::BY_PATTERN, query.by_pattern.as_deref()),
            (reserved::BY_FLAGS, query.by_flags.as_deref()),
        ];
        for (name, value) in string_modifiers {
            if let Some(value) = value {
                self.bind_string_value(name, value)?;
            }
        }
        let literal_modifiers = [
            (reserved::WHERE_VALUE, query.where_value.as_ref()),
            (reserved::RANGE_TO, range.to.as_ref()),
            (reserved::RANGE_WITH, range.with.as_ref()),
        ];
        for (name, literal) in literal_modifiers {
            if let Some(literal) = literal {
                self.bind_literal(name, literal)?;
            }
        }
        Ok(())
    }

    fn bind_value_source(
        &mut self,
        result_base: &str,
        source: &aro_core::ast::ValueSource,
    ) -> Result<(), CodegenError> {
        match lowered_value_source(source) {
            LoweredValueSource::None => Ok(()),
            LoweredValueSource::Literal(literal) => self.bind_literal(result_base, &literal),
            LoweredValueSource::SinkLiteral(literal) => {
                self.bind_literal(reserved::RESULT_EXPRESSION, &literal)
            }
            LoweredValueSource::Expression(json) => {
                let json_ptr = self.str_ptr(&to_text(&json))?;
                let value = self
                    .builder
                    .call(
                        Type::Ptr,
                        abi::RT_EVALUATE_EXPRESSION,
                        vec![(Type::Ptr, self.ctx.clone()), (Type::Ptr, json_ptr)],
                    )
                    .expect("evaluate returns a value");
                let name_ptr = self.str_ptr(result_base)?;
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_VALUE,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::Ptr, Operand::Value(value)),
                    ],
                );
                Ok(())
            }
            LoweredValueSource::Sink(json) => {
                let name_ptr = self.str_ptr(reserved::RESULT_EXPRESSION)?;
                let json_ptr = self.str_ptr(&to_text(&json))?;
                self.builder.call(
                    Type::I32,
                    abi::RT_EVALUATE_AND_BIND,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::Ptr, json_ptr),
                    ],
                );
                Ok(())
            }
        }
    }

    fn bind_literal(&mut self, name: &str, literal: &LiteralValue) -> Result<(), CodegenError> {
        let name_ptr = self.str_ptr(name)?;
        match literal {
            LiteralValue::String(s) => {
                let value_ptr = self.str_ptr(s)?;
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_STRING,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::Ptr, value_ptr),
                    ],
                );
            }
            LiteralValue::Integer(i) => {
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_INT,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::I64, Operand::ConstInt(*i)),
                    ],
                );
            }
            LiteralValue::Float(f) => {
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_DOUBLE,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::F64, Operand::ConstFloat(*f)),
                    ],
                );
            }
            LiteralValue::Boolean(b) => {
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_BOOL,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::I32, Operand::ConstInt(i64::from(*b))),
                    ],
                );
            }
            LiteralValue::Null => {
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_VALUE,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::Ptr, Operand::Null),
                    ],
                );
            }
            LiteralValue::Array(_) => {
                let json_ptr = self.str_ptr(&to_text(&literal.to_json()))?;
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_ARRAY,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::Ptr, json_ptr),
                    ],
                );
            }
            LiteralValue::Object(_) => {
                let json_ptr = self.str_ptr(&to_text(&literal.to_json()))?;
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_DICT,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::Ptr, json_ptr),
                    ],
                );
            }
            LiteralValue::Regex { pattern, .. } => {
                let value_ptr = self.str_ptr(pattern)?;
                self.builder.call(
                    Type::Void,
                    abi::RT_BIND_STRING,
                    vec![
                        (Type::Ptr, self.ctx.clone()),
                        (Type::Ptr, name_ptr),
                        (Type::Ptr, value_ptr),
                    ],
                );
            }
        }
        Ok(())
    }

    fn bind_string_value(&mut self, name: &str, value: &str) -> Result<(), CodegenError> {
        let name_ptr = self.str_ptr(name)?;
        let value_ptr = self.str_ptr(value)?;
        self.builder.call(
            Type::Void,
            abi::RT_BIND_STRING,
            vec![
                (Type::Ptr, self.ctx.clone()),
                (Type::Ptr, name_ptr),
                (Type::Ptr, value_ptr),
            ],
        );
        Ok(())
    }

    fn build_result_descriptor(&mut self, noun: &QualifiedNoun) -> Result<Operand, CodegenError> {
        let descriptor = self.builder.alloca(Type::Struct(abi::RESULT_DESCRIPTOR));
        let descriptor = Operand::Value(descriptor);

        let base_ptr = self.str_ptr(&noun.base)?;
        let base_field =
            self.builder
                .struct_gep(abi::RESULT_DESCRIPTOR, descriptor.clone(), 0);
        self.builder
            .store(Type::Ptr, base_ptr, Operand::Value(base_field));

        let specifiers = self.build_specifier_array(&noun.specifiers)?;
        let specifiers_field =
            self.builder
                .struct_gep(abi::RESULT_DESCRIPTOR, descriptor.clone(), 1);
        self.builder
            .store(Type::Ptr, specifiers, Operand::Value(specifiers_field));

        let count_field =
            self.builder
                .struct_gep(abi::RESULT_DESCRIPTOR, descriptor.clone(), 2);
        self.builder.store(
            Type::I32,
            Operand::ConstInt(noun.specifiers.len() as i64),
            Operand::Value(count_field),
        );
        Ok(descriptor)
    }

    fn build_object_descriptor(&mut self, object: &ObjectRef) -> Result<Operand, CodegenError> {
        let descriptor = self.builder.alloca(Type::Struct(abi::OBJECT_DESCRIPTOR));
        let descriptor = Operand::Value(descriptor);

        let base_ptr = self.str_ptr(&object.noun.base)?;
        let base_field =
            self.builder
                .struct_gep(abi::OBJECT_DESCRIPTOR, descriptor.clone(), 0);
        self.builder
            .store(Type::Ptr, base_ptr, Operand::Value(base_field));

        let preposition_field =
            self.builder
                .struct_gep(abi::OBJECT_DESCRIPTOR, descriptor.clone(), 1);
        self.builder.store(
            Type::I32,
            Operand::ConstInt(i64::from(object.preposition.encoding())),
            Operand::Value(preposition_field),
        );

        let specifiers = self.build_specifier_array(&object.noun.specifiers)?;
        let specifiers_field =
            self.builder
                .struct_gep(abi::OBJECT_DESCRIPTOR, descriptor.clone(), 2);
        self.builder
            .store(Type::Ptr, specifiers, Operand::Value(specifiers_field));

        let count_field =
            self.builder
                .struct_gep(abi::OBJECT_DESCRIPTOR, descriptor.clone(), 3);
        self.builder.store(
            Type::I32,
            Operand::ConstInt(object.noun.specifiers.len() as i64),
            Operand::Value(count_field),
        );
        Ok(descriptor)
    }

    /// A stack-allocated `[N x ptr]` of interned specifier strings, or
    /// null when there are none.
    fn build_specifier_array(&mut self, specifiers: &[String]) -> Result<Operand, CodegenError> {
        if specifiers.is_empty() {
            return Ok(Operand::Null);
        }
        let array_ty = Type::Array(specifiers.len(), Box::new(Type::Ptr));
        let array = self.builder.alloca(array_ty.clone());
        for (i, specifier) in specifiers.iter().enumerate() {
            let spec_ptr = self.str_ptr(specifier)?;
            let slot = self.builder.gep(
                array_ty.clone(),
                Operand::Value(array),
                vec![(Type::I64, 0), (Type::I64, i as i64)],
            );
            self.builder.store(Type::Ptr, spec_ptr, Operand::Value(slot));
        }
        Ok(Operand::Value(array))
    }

    /// A `ptr` to the interned string constant for `content`. A miss is an
    /// internal error: the pre-pass guarantees every needed string.
    fn str_ptr(&mut self, content: &str) -> Result<Operand, CodegenError> {
        str_constant_gep(&mut self.builder, self.pool, content)
    }

    fn truthy_i32(&mut self, value: Option<crate::ir::ValueId>) -> Operand {
        let value = value.expect("i32 calls return a value");
        let flag = self.builder.icmp(
            IcmpPred::Ne,
            Type::I32,
            Operand::Value(value),
            Operand::ConstInt(0),
        );
        Operand::Value(flag)
    }
}

/// A `ptr` into an interned NUL-terminated `[N x i8]` string constant.
/// Shared by statement lowering and main synthesis.
pub(crate) fn str_constant_gep(
    builder: &mut FunctionBuilder<'_>,
    pool: &StringPool,
    content: &str,
) -> Result<Operand, CodegenError> {
    let name = pool.get(content).ok_or_else(|| {
        CodegenError::Lowering(format!("string constant not interned: {content:?}"))
    })?;
    let pointer = builder.gep(
        Type::Array(content.len() + 1, Box::new(Type::I8)),
        Operand::Global(name.to_string()),
        vec![(Type::I64, 0), (Type::I64, 0)],
    );
    Ok(Operand::Value(pointer))
}
