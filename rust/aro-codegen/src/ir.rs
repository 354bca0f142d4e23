//! The IR module model.
//!
//! An ID-based representation of one LLVM module: named struct types,
//! string-constant globals, extern declarations, and functions made of
//! basic blocks. Lowering builds functions through [`FunctionBuilder`]
//! handles ([`ValueId`], [`BlockId`]); [`Module::verify`] checks the
//! structural invariants and [`Module::render`] prints deterministic
//! textual IR.
//!
//! Invariants enforced here:
//! - every basic block carries exactly one terminator, and it is last
//!   (the builder rejects a second one at build time);
//! - every referenced value is defined before use in block layout order;
//! - every branch target exists.

use std::collections::HashSet;
use std::fmt::Write as _;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An IR type. Pointers are opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    I1,
    I8,
    I32,
    I64,
    F64,
    Ptr,
    /// A named struct type, e.g. `%aro.ResultDescriptor`.
    Struct(&'static str),
    /// A fixed-size array, e.g. `[4 x ptr]`.
    Array(usize, Box<Type>),
}

impl Type {
    fn render(&self) -> String {
        match self {
            Type::Void => "void".to_string(),
            Type::I1 => "i1".to_string(),
            Type::I8 => "i8".to_string(),
            Type::I32 => "i32".to_string(),
            Type::I64 => "i64".to_string(),
            Type::F64 => "double".to_string(),
            Type::Ptr => "ptr".to_string(),
            Type::Struct(name) => format!("%{name}"),
            Type::Array(len, elem) => format!("[{len} x {}]", elem.render()),
        }
    }
}

// ---------------------------------------------------------------------------
// Handles and operands
// ---------------------------------------------------------------------------

/// A local SSA value within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(u32);

/// A basic block within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(usize);

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A local value, `%vN`.
    Value(ValueId),
    /// An integer constant of the instruction's type.
    ConstInt(i64),
    /// A double constant, rendered in bit-exact hex form.
    ConstFloat(f64),
    /// The null pointer.
    Null,
    /// A global or function symbol, `@name`.
    Global(String),
}

impl Operand {
    fn render(&self) -> String {
        match self {
            Operand::Value(id) => format!("%v{}", id.0),
            Operand::ConstInt(v) => v.to_string(),
            Operand::ConstFloat(v) => format!("0x{:016X}", v.to_bits()),
            Operand::Null => "null".to_string(),
            Operand::Global(name) => format!("@{name}"),
        }
    }
}

/// Integer comparison predicates used by the lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpPred {
    Ne,
    Eq,
    Sge,
}

impl IcmpPred {
    fn render(self) -> &'static str {
        match self {
            IcmpPred::Ne => "ne",
            IcmpPred::Eq => "eq",
            IcmpPred::Sge => "sge",
        }
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Inst {
    Alloca {
        result: ValueId,
        ty: Type,
    },
    Store {
        ty: Type,
        value: Operand,
        ptr: Operand,
    },
    Load {
        result: ValueId,
        ty: Type,
        ptr: Operand,
    },
    /// `getelementptr inbounds <base_ty>, ptr <ptr>, <indices...>`
    Gep {
        result: ValueId,
        base_ty: Type,
        ptr: Operand,
        indices: Vec<(Type, i64)>,
    },
    Call {
        result: Option<ValueId>,
        ret: Type,
        callee: String,
        args: Vec<(Type, Operand)>,
    },
    Icmp {
        result: ValueId,
        pred: IcmpPred,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Add {
        result: ValueId,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Terminator {
    Br(BlockId),
    CondBr {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret {
        ty: Type,
        value: Option<Operand>,
    },
}

#[derive(Debug, Clone)]
struct BasicBlock {
    label: String,
    insts: Vec<Inst>,
    terminator: Option<Terminator>,
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// One function definition under construction or complete.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    params: Vec<Type>,
    ret: Type,
    blocks: Vec<BasicBlock>,
    next_value: u32,
}

impl Function {
    fn new(name: &str, params: Vec<Type>, ret: Type) -> Self {
        let mut function = Self {
            name: name.to_string(),
            params,
            ret,
            blocks: Vec::new(),
            next_value: 0,
        };
        // Parameter values come first: %v0, %v1, ...
        function.next_value = function.params.len() as u32;
        function.blocks.push(BasicBlock {
            label: "entry".to_string(),
            insts: Vec::new(),
            terminator: None,
        });
        function
    }

    /// The value handle for the `index`-th parameter.
    pub fn param(&self, index: usize) -> ValueId {
        ValueId(index as u32)
    }

    fn fresh(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }
}

/// Appends instructions to a function, one current block at a time.
pub struct FunctionBuilder<'a> {
    function: &'a mut Function,
    current: BlockId,
}

impl<'a> FunctionBuilder<'a> {
    pub fn entry_block(&self) -> BlockId {
        BlockId(0)
    }

    /// The value handle for the `index`-th function parameter.
    pub fn param(&self, index: usize) -> ValueId {
        self.function.param(index)
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Create a new (empty, unterminated) block with the given label.
    pub fn create_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.function.blocks.len());
        self.function.blocks.push(BasicBlock {
            label: label.into(),
            insts: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Whether the current block already ends in a terminator.
    pub fn is_terminated(&self) -> bool {
        self.function.blocks[self.current.0].terminator.is_some()
    }

    fn push(&mut self, inst: Inst) {
        let block = &mut self.function.blocks[self.current.0];
        assert!(
            block.terminator.is_none(),
            "instruction after terminator in block '{}'",
            block.label
        );
        block.insts.push(inst);
    }

    fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.function.blocks[self.current.0];
        assert!(
            block.terminator.is_none(),
            "second terminator in block '{}'",
            block.label
        );
        block.terminator = Some(terminator);
    }

    // -- instructions ------------------------------------------------------

    pub fn alloca(&mut self, ty: Type) -> ValueId {
        let result = self.function.fresh();
        self.push(Inst::Alloca { result, ty });
        result
    }

    pub fn store(&mut self, ty: Type, value: Operand, ptr: Operand) {
        self.push(Inst::Store { ty, value, ptr });
    }

    pub fn load(&mut self, ty: Type, ptr: Operand) -> ValueId {
        let result = self.function.fresh();
        self.push(Inst::Load { result, ty, ptr });
        result
    }

    pub fn gep(&mut self, base_ty: Type, ptr: Operand, indices: Vec<(Type, i64)>) -> ValueId {
        let result = self.function.fresh();
        self.push(Inst::Gep {
            result,
            base_ty,
            ptr,
            indices,
        });
        result
    }

    /// A pointer to field `index` of a struct at `ptr`.
    pub fn struct_gep(&mut self, struct_name: &'static str, ptr: Operand, index: i64) -> ValueId {
        self.gep(
            Type::Struct(struct_name),
            ptr,
            vec![(Type::I32, 0), (Type::I32, index)],
        )
    }

    pub fn call(&mut self, ret: Type, callee: &str, args: Vec<(Type, Operand)>) -> Option<ValueId> {
        let result = if ret == Type::Void {
            None
        } else {
            Some(self.function.fresh())
        };
        self.push(Inst::Call {
            result,
            ret,
            callee: callee.to_string(),
            args,
        });
        result
    }

    pub fn icmp(&mut self, pred: IcmpPred, ty: Type, lhs: Operand, rhs: Operand) -> ValueId {
        let result = self.function.fresh();
        self.push(Inst::Icmp {
            result,
            pred,
            ty,
            lhs,
            rhs,
        });
        result
    }

    pub fn add(&mut self, ty: Type, lhs: Operand, rhs: Operand) -> ValueId {
        let result = self.function.fresh();
        self.push(Inst::Add {
            result,
            ty,
            lhs,
            rhs,
        });
        result
    }

    // -- terminators -------------------------------------------------------

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: Operand, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, ty: Type, value: Option<Operand>) {
        self.terminate(Terminator::Ret { ty, value });
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StringConstant {
    name: String,
    content: String,
}

#[derive(Debug, Clone)]
struct ExternDecl {
    name: String,
    ret: Type,
    params: Vec<Type>,
}

/// One module: struct types, globals, declarations, functions.
pub struct Module {
    pub name: String,
    struct_types: Vec<(&'static str, Vec<Type>)>,
    string_constants: Vec<StringConstant>,
    ptr_globals: Vec<String>,
    declarations: Vec<ExternDecl>,
    functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            struct_types: Vec::new(),
            string_constants: Vec::new(),
            ptr_globals: Vec::new(),
            declarations: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn define_struct(&mut self, name: &'static str, fields: Vec<Type>) {
        if !self.struct_types.iter().any(|(n, _)| *n == name) {
            self.struct_types.push((name, fields));
        }
    }

    /// Add a NUL-terminated string constant global.
    pub fn add_string_constant(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.string_constants.push(StringConstant {
            name: name.into(),
            content: content.into(),
        });
    }

    /// Add an internal `ptr` global initialized to null.
    pub fn add_ptr_global(&mut self, name: impl Into<String>) {
        self.ptr_globals.push(name.into());
    }

    /// Declare an external function once; repeated declarations are merged.
    pub fn declare_extern(&mut self, name: &str, ret: Type, params: Vec<Type>) {
        if !self.declarations.iter().any(|d| d.name == name) {
            self.declarations.push(ExternDecl {
                name: name.to_string(),
                ret,
                params,
            });
        }
    }

    pub fn has_declaration(&self, name: &str) -> bool {
        self.declarations.iter().any(|d| d.name == name)
    }

    /// Start a function definition and hand back a builder positioned at
    /// its entry block.
    pub fn define_function(
        &mut self,
        name: &str,
        params: Vec<Type>,
        ret: Type,
    ) -> FunctionBuilder<'_> {
        self.functions.push(Function::new(name, params, ret));
        let function = self.functions.last_mut().expect("just pushed");
        FunctionBuilder {
            function,
            current: BlockId(0),
        }
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    // -- verification ------------------------------------------------------

    /// Structural verification. Returns every violation found.
    pub fn verify(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        for function in &self.functions {
            let block_count = function.blocks.len();
            let mut defined: HashSet<ValueId> =
                (0..function.params.len()).map(|i| ValueId(i as u32)).collect();
            let mut alloca_slots: HashSet<ValueId> = HashSet::new();
            let mut stored_slots: HashSet<ValueId> = HashSet::new();

            for block in &function.blocks {
                match &block.terminator {
                    None => problems.push(format!(
                        "{}: block '{}' has no terminator",
                        function.name, block.label
                    )),
                    Some(Terminator::Br(target)) => {
                        if target.0 >= block_count {
                            problems.push(format!(
                                "{}: block '{}' branches to a missing block",
                                function.name, block.label
                            ));
                        }
                    }
                    Some(Terminator::CondBr {
                        then_block,
                        else_block,
                        ..
                    }) => {
                        if then_block.0 >= block_count || else_block.0 >= block_count {
                            problems.push(format!(
                                "{}: block '{}' branches to a missing block",
                                function.name, block.label
                            ));
                        }
                    }
                    Some(Terminator::Ret { .. }) => {}
                }

                for inst in &block.insts {
                    for operand in inst_operands(inst) {
                        if let Operand::Value(id) = operand {
                            if !defined.contains(id) {
                                problems.push(format!(
                                    "{}: block '{}' uses %v{} before definition",
                                    function.name, block.label, id.0
                                ));
                            }
                        }
                    }
                    if let Inst::Load { ptr: Operand::Value(slot), .. } = inst {
                        // Stack slots must be written before read in layout
                        // order.
                        if alloca_slots.contains(slot) && !stored_slots.contains(slot) {
                            problems.push(format!(
                                "{}: block '{}' loads %v{} before any store",
                                function.name, block.label, slot.0
                            ));
                        }
                    }
                    if let Inst::Store { ptr: Operand::Value(slot), .. } = inst {
                        stored_slots.insert(*slot);
                    }
                    if let Some(result) = inst_result(inst) {
                        defined.insert(result);
                        if matches!(inst, Inst::Alloca { .. }) {
                            alloca_slots.insert(result);
                        }
                    }
                }
                if let Some(terminator) = &block.terminator {
                    for operand in terminator_operands(terminator) {
                        if let Operand::Value(id) = operand {
                            if !defined.contains(id) {
                                problems.push(format!(
                                    "{}: block '{}' terminator uses %v{} before definition",
                                    function.name, block.label, id.0
                                ));
                            }
                        }
                    }
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    // -- rendering ---------------------------------------------------------

    /// Deterministic textual IR.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; ModuleID = '{}'", self.name);
        let _ = writeln!(out, "source_filename = \"{}\"", self.name);
        let _ = writeln!(out);

        for (name, fields) in &self.struct_types {
            let rendered: Vec<String> = fields.iter().map(Type::render).collect();
            let _ = writeln!(out, "%{} = type {{ {} }}", name, rendered.join(", "));
        }
        if !self.struct_types.is_empty() {
            let _ = writeln!(out);
        }

        for constant in &self.string_constants {
            let bytes = constant.content.as_bytes();
            let _ = writeln!(
                out,
                "@{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
                constant.name,
                bytes.len() + 1,
                escape_bytes(bytes)
            );
        }
        for global in &self.ptr_globals {
            let _ = writeln!(out, "@{global} = internal global ptr null");
        }
        if !self.string_constants.is_empty() || !self.ptr_globals.is_empty() {
            let _ = writeln!(out);
        }

        for decl in &self.declarations {
            let params: Vec<String> = decl.params.iter().map(Type::render).collect();
            let _ = writeln!(
                out,
                "declare {} @{}({})",
                decl.ret.render(),
                decl.name,
                params.join(", ")
            );
        }
        if !self.declarations.is_empty() {
            let _ = writeln!(out);
        }

        for function in &self.functions {
            self.render_function(&mut out, function);
            let _ = writeln!(out);
        }
        out
    }

    fn render_function(&self, out: &mut String, function: &Function) {
        let params: Vec<String> = function
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} %v{}", ty.render(), i))
            .collect();
        let _ = writeln!(
            out,
            "define {} @{}({}) {{",
            function.ret.render(),
            function.name,
            params.join(", ")
        );
        for block in &function.blocks {
            let _ = writeln!(out, "{}:", block.label);
            for inst in &block.insts {
                let _ = writeln!(out, "  {}", render_inst(inst));
            }
            if let Some(terminator) = &block.terminator {
                let _ = writeln!(out, "  {}", render_terminator(terminator, function));
            }
        }
        let _ = writeln!(out, "}}");
    }
}

fn inst_result(inst: &Inst) -> Option<ValueId> {
    match inst {
        Inst::Alloca { result, .. }
        | Inst::Load { result, .. }
        | Inst::Gep { result, .. }
        | Inst::Icmp { result, .. }
        | Inst::Add { result, .. } => Some(*result),
        Inst::Call { result, .. } => *result,
        Inst::Store { .. } => None,
    }
}

fn inst_operands(inst: &Inst) -> Vec<&Operand> {
    match inst {
        Inst::Alloca { .. } => Vec::new(),
        Inst::Store { value, ptr, .. } => vec![value, ptr],
        Inst::Load { ptr, .. } => vec![ptr],
        Inst::Gep { ptr, .. } => vec![ptr],
        Inst::Call { args, .. } => args.iter().map(|(_, op)| op).collect(),
        Inst::Icmp { lhs, rhs, .. } | Inst::Add { lhs, rhs, .. } => vec![lhs, rhs],
    }
}

fn terminator_operands(terminator: &Terminator) -> Vec<&Operand> {
    match terminator {
        Terminator::Br(_) => Vec::new(),
        Terminator::CondBr { cond, .. } => vec![cond],
        Terminator::Ret { value, .. } => value.iter().collect(),
    }
}

fn render_inst(inst: &Inst) -> String {
    match inst {
        Inst::Alloca { result, ty } => {
            format!("%v{} = alloca {}", result.0, ty.render())
        }
        Inst::Store { ty, value, ptr } => {
            format!("store {} {}, ptr {}", ty.render(), value.render(), ptr.render())
        }
        Inst::Load { result, ty, ptr } => {
            format!("%v{} = load {}, ptr {}", result.0, ty.render(), ptr.render())
        }
        Inst::Gep {
            result,
            base_ty,
            ptr,
            indices,
        } => {
            let indices: Vec<String> = indices
                .iter()
                .map(|(ty, value)| format!("{} {}", ty.render(), value))
                .collect();
            format!(
                "%v{} = getelementptr inbounds {}, ptr {}, {}",
                result.0,
                base_ty.render(),
                ptr.render(),
                indices.join(", ")
            )
        }
        Inst::Call {
            result,
            ret,
            callee,
            args,
        } => {
            let args: Vec<String> = args
                .iter()
                .map(|(ty, op)| format!("{} {}", ty.render(), op.render()))
                .collect();
            let call = format!("call {} @{}({})", ret.render(), callee, args.join(", "));
            match result {
                Some(result) => format!("%v{} = {}", result.0, call),
                None => call,
            }
        }
        Inst::Icmp {
            result,
            pred,
            ty,
            lhs,
            rhs,
        } => format!(
            "%v{} = icmp {} {} {}, {}",
            result.0,
            pred.render(),
            ty.render(),
            lhs.render(),
            rhs.render()
        ),
        Inst::Add {
            result,
            ty,
            lhs,
            rhs,
        } => format!(
            "%v{} = add {} {}, {}",
            result.0,
            ty.render(),
            lhs.render(),
            rhs.render()
        ),
    }
}

fn render_terminator(terminator: &Terminator, function: &Function) -> String {
    let label = |id: &BlockId| format!("%{}", function.blocks[id.0].label);
    match terminator {
        Terminator::Br(target) => format!("br label {}", label(target)),
        Terminator::CondBr {
            cond,
            then_block,
            else_block,
        } => format!(
            "br i1 {}, label {}, label {}",
            cond.render(),
            label(then_block),
            label(else_block)
        ),
        Terminator::Ret { ty, value } => match value {
            Some(value) => format!("ret {} {}", ty.render(), value.render()),
            None => "ret void".to_string(),
        },
    }
}

/// Escape bytes for a `c"..."` constant: printable ASCII stays, everything
/// else (plus `"` and `\`) becomes `\XX`.
fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        match byte {
            b'"' | b'\\' => {
                let _ = write!(out, "\\{byte:02X}");
            }
            0x20..=0x7e => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\{byte:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_module() -> Module {
        let mut module = Module::new("test");
        module.declare_extern("probe", Type::I32, vec![Type::Ptr]);
        module.add_string_constant("str.0", "hi");
        let mut builder = module.define_function("answer", vec![Type::Ptr], Type::I64);
        let slot = builder.alloca(Type::I64);
        builder.store(Type::I64, Operand::ConstInt(41), Operand::Value(slot));
        let loaded = builder.load(Type::I64, Operand::Value(slot));
        let sum = builder.add(Type::I64, Operand::Value(loaded), Operand::ConstInt(1));
        builder.ret(Type::I64, Some(Operand::Value(sum)));
        module
    }

    #[test]
    fn well_formed_module_verifies_and_renders() {
        let module = simple_module();
        assert!(module.verify().is_ok());
        let text = module.render();
        assert!(text.contains("declare i32 @probe(ptr)"));
        assert!(text.contains("@str.0 = private unnamed_addr constant [3 x i8] c\"hi\\00\""));
        assert!(text.contains("define i64 @answer(ptr %v0)"));
        assert!(text.contains("%v2 = load i64, ptr %v1"));
        assert!(text.contains("ret i64 %v3"));
    }

    #[test]
    fn missing_terminator_is_a_verification_error() {
        let mut module = Module::new("test");
        let mut builder = module.define_function("broken", vec![], Type::Void);
        builder.alloca(Type::I64);
        // No terminator on purpose.
        let problems = module.verify().unwrap_err();
        assert!(problems[0].contains("no terminator"));
    }

    #[test]
    #[should_panic(expected = "second terminator")]
    fn builder_rejects_a_second_terminator() {
        let mut module = Module::new("test");
        let mut builder = module.define_function("f", vec![], Type::Void);
        builder.ret(Type::Void, None);
        builder.ret(Type::Void, None);
    }

    #[test]
    fn use_before_definition_is_caught() {
        let mut module = Module::new("test");
        let mut builder = module.define_function("f", vec![], Type::I64);
        // %v5 is never defined.
        builder.ret(Type::I64, Some(Operand::Value(ValueId(5))));
        let problems = module.verify().unwrap_err();
        assert!(problems[0].contains("before definition"));
    }

    #[test]
    fn load_before_store_is_caught() {
        let mut module = Module::new("test");
        let mut builder = module.define_function("f", vec![], Type::I64);
        let slot = builder.alloca(Type::I64);
        let loaded = builder.load(Type::I64, Operand::Value(slot));
        builder.ret(Type::I64, Some(Operand::Value(loaded)));
        let problems = module.verify().unwrap_err();
        assert!(problems[0].contains("before any store"));
    }

    #[test]
    fn float_constants_render_bit_exact() {
        assert_eq!(Operand::ConstFloat(10.0).render(), "0x4024000000000000");
    }

    #[test]
    fn string_escaping_covers_quotes_and_control_bytes() {
        assert_eq!(escape_bytes(b"a\"b\\c\n"), "a\\22b\\5Cc\\0A");
    }

    #[test]
    fn blocks_render_in_creation_order_with_labels() {
        let mut module = Module::new("test");
        let mut builder = module.define_function("f", vec![], Type::Void);
        let end = builder.create_block("end");
        builder.br(end);
        builder.switch_to(end);
        builder.ret(Type::Void, None);
        assert!(module.verify().is_ok());
        let text = module.render();
        let entry_pos = text.find("entry:").unwrap();
        let end_pos = text.find("end:").unwrap();
        assert!(entry_pos < end_pos);
        assert!(text.contains("br label %end"));
    }
}
