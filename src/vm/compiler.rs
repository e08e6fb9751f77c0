use std::collections::HashSet;

use crate::ast::*;
use super::value::{FunctionId, Value};

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub code: &'static str,
    pub span: Span,
    pub message: String,
}

impl CompileError {
    fn new(code: &'static str, span: Span, message: impl Into<String>) -> Self {
        CompileError { code, span, message: message.into() }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

// ── Instructions ─────────────────────────────────────────────────────
//
// Stack machine. Every `Op` is one observable VM step. Jump targets are
// absolute instruction indices within the current chunk.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Const(u16),
    Undefined,
    Pop,
    Dup,
    /// `a b` → `a b a b`
    Dup2,
    LoadLocal(u16),
    /// Stores the top of stack, leaving it in place.
    StoreLocal(u16),
    LoadGlobal(u16),
    StoreGlobal(u16),
    /// Hoisted `var`: binds the global to `undefined` unless it already exists.
    DeclareGlobal(u16),
    /// `typeof name` that tolerates undeclared globals.
    TypeofGlobal(u16),
    /// `obj key` → `obj[key]`
    GetIndex,
    /// `obj key value` → `value`
    SetIndex,
    /// `obj` → `obj.name`
    GetNamed(u16),
    /// `obj value` → `value`
    SetNamed(u16),
    Binary(BinaryOp),
    Unary(UnaryOp),
    Jump(u32),
    /// Pops the condition.
    JumpIfFalse(u32),
    /// Keeps the value when jumping, pops it otherwise (`&&`).
    JumpIfFalseKeep(u32),
    /// Keeps the value when jumping, pops it otherwise (`||`).
    JumpIfTrueKeep(u32),
    /// `callee args...` → `result`
    Call(u8),
    /// `receiver args...` → `result`
    CallMethod(u16, u8),
    Return,
    Throw,
    MakeArray(u16),
    /// `key value` pairs → object
    MakeObject(u16),
}

#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<Op>,
    pub spans: Vec<Span>,
    pub constants: Vec<Value>,
}

impl Chunk {
    fn add_const(&mut self, val: Value, span: Span) -> Result<u16> {
        let existing = self.constants.iter().position(|c| match (c, &val) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        });
        if let Some(i) = existing {
            return Ok(i as u16);
        }
        let idx = u16::try_from(self.constants.len())
            .map_err(|_| CompileError::new("BLK-C005", span, "too many constants in one function"))?;
        self.constants.push(val);
        Ok(idx)
    }

    fn emit(&mut self, op: Op, span: Span) -> usize {
        self.code.push(op);
        self.spans.push(span);
        self.code.len() - 1
    }

    fn patch_jump(&mut self, pos: usize) {
        let target = self.code.len() as u32;
        if let Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfFalseKeep(t) | Op::JumpIfTrueKeep(t) = &mut self.code[pos] {
            *t = target;
        }
    }

    pub fn constant_name(&self, idx: u16) -> &str {
        self.constants.get(idx as usize).and_then(Value::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub arity: usize,
    pub local_count: usize,
    pub chunk: Chunk,
}

/// Bytecode for one generated program. Function 0 is the top-level script.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub functions: Vec<Function>,
}

impl CompiledProgram {
    pub const MAIN: FunctionId = FunctionId(0);

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }
}

// ── Compiler ─────────────────────────────────────────────────────────

#[derive(Default)]
struct LoopLabels {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct FunctionCompiler {
    chunk: Chunk,
    /// `None` for the top-level script, where every name is global.
    locals: Option<Vec<String>>,
    loops: Vec<LoopLabels>,
}

impl FunctionCompiler {
    fn new(locals: Option<Vec<String>>) -> Self {
        FunctionCompiler { chunk: Chunk::default(), locals, loops: Vec::new() }
    }

    fn resolve_local(&self, name: &str) -> Option<u16> {
        self.locals.as_ref()?.iter().rposition(|n| n == name).map(|i| i as u16)
    }

    fn emit(&mut self, op: Op, span: Span) -> usize {
        self.chunk.emit(op, span)
    }

    fn name_const(&mut self, name: &str, span: Span) -> Result<u16> {
        self.chunk.add_const(Value::from(name), span)
    }

    fn emit_const(&mut self, val: Value, span: Span) -> Result<()> {
        let k = self.chunk.add_const(val, span)?;
        self.emit(Op::Const(k), span);
        Ok(())
    }

    fn load(&mut self, name: &str, span: Span) -> Result<()> {
        match self.resolve_local(name) {
            Some(slot) => self.emit(Op::LoadLocal(slot), span),
            None => {
                let k = self.name_const(name, span)?;
                self.emit(Op::LoadGlobal(k), span)
            }
        };
        Ok(())
    }

    fn store(&mut self, name: &str, span: Span) -> Result<()> {
        match self.resolve_local(name) {
            Some(slot) => self.emit(Op::StoreLocal(slot), span),
            None => {
                let k = self.name_const(name, span)?;
                self.emit(Op::StoreGlobal(k), span)
            }
        };
        Ok(())
    }

    // ---- Statements ----

    fn compile_body(&mut self, stmts: &[Stmt]) -> Result<()> {
        stmts.iter().try_for_each(|s| self.compile_stmt(s))
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Var { declarations, span } => {
                for decl in declarations {
                    if let Some(init) = &decl.init {
                        self.compile_expr(init)?;
                        self.store(&decl.name, *span)?;
                        self.emit(Op::Pop, *span);
                    }
                }
            }

            Stmt::Function(f) => {
                // Top-level declarations are hoisted by `compile`; anything
                // reaching here is nested.
                if self.locals.is_some() {
                    return Err(CompileError::new(
                        "BLK-C004",
                        f.span,
                        format!("nested function declaration '{}' is not supported", f.name),
                    ));
                }
            }

            Stmt::Return { value, span } => {
                if self.locals.is_none() {
                    return Err(CompileError::new("BLK-C003", *span, "'return' outside of a function"));
                }
                match value {
                    Some(v) => self.compile_expr(v)?,
                    None => {
                        self.emit(Op::Undefined, *span);
                    }
                }
                self.emit(Op::Return, *span);
            }

            Stmt::If { condition, then_branch, else_branch } => {
                self.compile_expr(condition)?;
                let skip_then = self.emit(Op::JumpIfFalse(0), condition.span);
                self.compile_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let skip_else = self.emit(Op::Jump(0), condition.span);
                        self.chunk.patch_jump(skip_then);
                        self.compile_stmt(else_branch)?;
                        self.chunk.patch_jump(skip_else);
                    }
                    None => self.chunk.patch_jump(skip_then),
                }
            }

            Stmt::While { condition, body } => {
                let top = self.chunk.code.len();
                self.compile_expr(condition)?;
                let exit = self.emit(Op::JumpIfFalse(0), condition.span);
                self.loops.push(LoopLabels::default());
                self.compile_stmt(body)?;
                let labels = self.loops.pop().unwrap_or_default();
                self.patch_all(&labels.continues, top);
                self.emit(Op::Jump(top as u32), condition.span);
                self.chunk.patch_jump(exit);
                self.patch_here(&labels.breaks);
            }

            Stmt::DoWhile { body, condition } => {
                let top = self.chunk.code.len();
                self.loops.push(LoopLabels::default());
                self.compile_stmt(body)?;
                let labels = self.loops.pop().unwrap_or_default();
                self.patch_here(&labels.continues);
                self.compile_expr(condition)?;
                let exit = self.emit(Op::JumpIfFalse(0), condition.span);
                self.emit(Op::Jump(top as u32), condition.span);
                self.chunk.patch_jump(exit);
                self.patch_here(&labels.breaks);
            }

            Stmt::For { init, test, update, body } => {
                if let Some(init) = init {
                    self.compile_stmt(init)?;
                }
                let top = self.chunk.code.len();
                let exit = match test {
                    Some(test) => {
                        self.compile_expr(test)?;
                        Some(self.emit(Op::JumpIfFalse(0), test.span))
                    }
                    None => None,
                };
                self.loops.push(LoopLabels::default());
                self.compile_stmt(body)?;
                let labels = self.loops.pop().unwrap_or_default();
                self.patch_here(&labels.continues);
                if let Some(update) = update {
                    self.compile_expr(update)?;
                    self.emit(Op::Pop, update.span);
                }
                self.emit(Op::Jump(top as u32), Span::UNKNOWN);
                if let Some(exit) = exit {
                    self.chunk.patch_jump(exit);
                }
                self.patch_here(&labels.breaks);
            }

            Stmt::Break { span } => {
                let pos = self.emit(Op::Jump(0), *span);
                self.loops
                    .last_mut()
                    .ok_or_else(|| CompileError::new("BLK-C001", *span, "'break' outside of a loop"))?
                    .breaks
                    .push(pos);
            }

            Stmt::Continue { span } => {
                let pos = self.emit(Op::Jump(0), *span);
                self.loops
                    .last_mut()
                    .ok_or_else(|| CompileError::new("BLK-C002", *span, "'continue' outside of a loop"))?
                    .continues
                    .push(pos);
            }

            Stmt::Throw { value, span } => {
                self.compile_expr(value)?;
                self.emit(Op::Throw, *span);
            }

            Stmt::Block(stmts) => self.compile_body(stmts)?,

            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Op::Pop, expr.span);
            }

            Stmt::Empty => {}
        }
        Ok(())
    }

    fn patch_here(&mut self, jumps: &[usize]) {
        for &j in jumps {
            self.chunk.patch_jump(j);
        }
    }

    fn patch_all(&mut self, jumps: &[usize], target: usize) {
        for &j in jumps {
            if let Op::Jump(t) = &mut self.chunk.code[j] {
                *t = target as u32;
            }
        }
    }

    // ---- Expressions ----

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        let span = expr.span;
        match &expr.node {
            ExprKind::Number(n) => self.emit_const(Value::Number(*n), span)?,
            ExprKind::Text(s) => self.emit_const(Value::from(s.as_str()), span)?,
            ExprKind::Bool(b) => self.emit_const(Value::Bool(*b), span)?,
            ExprKind::Null => self.emit_const(Value::Null, span)?,
            ExprKind::Ident(name) => self.load(name, span)?,

            ExprKind::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                let n = count(items.len(), span)?;
                self.emit(Op::MakeArray(n), span);
            }

            ExprKind::Object(props) => {
                for (key, value) in props {
                    self.emit_const(Value::from(key.as_str()), span)?;
                    self.compile_expr(value)?;
                }
                let n = count(props.len(), span)?;
                self.emit(Op::MakeObject(n), span);
            }

            ExprKind::Member { object, property } => {
                self.compile_expr(object)?;
                let k = self.name_const(property, span)?;
                self.emit(Op::GetNamed(k), span);
            }

            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(Op::GetIndex, span);
            }

            ExprKind::Call { callee, args } => {
                let argc = u8::try_from(args.len())
                    .map_err(|_| CompileError::new("BLK-C005", span, "too many call arguments"))?;
                if let ExprKind::Member { object, property } = &callee.node {
                    self.compile_expr(object)?;
                    for a in args {
                        self.compile_expr(a)?;
                    }
                    let k = self.name_const(property, span)?;
                    self.emit(Op::CallMethod(k, argc), span);
                } else {
                    self.compile_expr(callee)?;
                    for a in args {
                        self.compile_expr(a)?;
                    }
                    self.emit(Op::Call(argc), span);
                }
            }

            ExprKind::New { callee, args } => {
                let argc = u8::try_from(args.len())
                    .map_err(|_| CompileError::new("BLK-C005", span, "too many call arguments"))?;
                self.compile_expr(callee)?;
                for a in args {
                    self.compile_expr(a)?;
                }
                self.emit(Op::Call(argc), span);
            }

            ExprKind::Unary { op: UnaryOp::Typeof, operand } => match &operand.node {
                ExprKind::Ident(name) if self.resolve_local(name).is_none() => {
                    let k = self.name_const(name, span)?;
                    self.emit(Op::TypeofGlobal(k), span);
                }
                _ => {
                    self.compile_expr(operand)?;
                    self.emit(Op::Unary(UnaryOp::Typeof), span);
                }
            },

            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.emit(Op::Unary(*op), span);
            }

            ExprKind::Update { increment, prefix, target } => self.compile_update(*increment, *prefix, target, span)?,

            ExprKind::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(Op::Binary(*op), span);
            }

            ExprKind::Logical { op, left, right } => {
                self.compile_expr(left)?;
                let short = match op {
                    LogicalOp::And => self.emit(Op::JumpIfFalseKeep(0), span),
                    LogicalOp::Or => self.emit(Op::JumpIfTrueKeep(0), span),
                };
                self.compile_expr(right)?;
                self.chunk.patch_jump(short);
            }

            ExprKind::Conditional { test, consequent, alternate } => {
                self.compile_expr(test)?;
                let to_alternate = self.emit(Op::JumpIfFalse(0), span);
                self.compile_expr(consequent)?;
                let to_end = self.emit(Op::Jump(0), span);
                self.chunk.patch_jump(to_alternate);
                self.compile_expr(alternate)?;
                self.chunk.patch_jump(to_end);
            }

            ExprKind::Assign { op, target, value } => self.compile_assign(*op, target, value, span)?,
        }
        Ok(())
    }

    fn compile_assign(&mut self, op: Option<BinaryOp>, target: &Expr, value: &Expr, span: Span) -> Result<()> {
        match &target.node {
            ExprKind::Ident(name) => {
                if let Some(op) = op {
                    self.load(name, span)?;
                    self.compile_expr(value)?;
                    self.emit(Op::Binary(op), span);
                } else {
                    self.compile_expr(value)?;
                }
                self.store(name, span)?;
            }
            ExprKind::Member { object, property } => {
                self.compile_expr(object)?;
                let k = self.name_const(property, span)?;
                if let Some(op) = op {
                    self.emit(Op::Dup, span);
                    self.emit(Op::GetNamed(k), span);
                    self.compile_expr(value)?;
                    self.emit(Op::Binary(op), span);
                } else {
                    self.compile_expr(value)?;
                }
                self.emit(Op::SetNamed(k), span);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                if let Some(op) = op {
                    self.emit(Op::Dup2, span);
                    self.emit(Op::GetIndex, span);
                    self.compile_expr(value)?;
                    self.emit(Op::Binary(op), span);
                } else {
                    self.compile_expr(value)?;
                }
                self.emit(Op::SetIndex, span);
            }
            _ => return Err(CompileError::new("BLK-P003", target.span, "invalid assignment target")),
        }
        Ok(())
    }

    /// `++x` stores and yields the new number; `x++` yields it minus the step,
    /// which equals the old value after numeric conversion.
    fn compile_update(&mut self, increment: bool, prefix: bool, target: &Expr, span: Span) -> Result<()> {
        let (step, undo) = if increment {
            (BinaryOp::Add, BinaryOp::Subtract)
        } else {
            (BinaryOp::Subtract, BinaryOp::Add)
        };
        let bump = |c: &mut FunctionCompiler| -> Result<()> {
            c.emit(Op::Unary(UnaryOp::Plus), span);
            c.emit_const(Value::Number(1.0), span)?;
            c.emit(Op::Binary(step), span);
            Ok(())
        };
        match &target.node {
            ExprKind::Ident(name) => {
                self.load(name, span)?;
                bump(self)?;
                self.store(name, span)?;
            }
            ExprKind::Member { object, property } => {
                self.compile_expr(object)?;
                let k = self.name_const(property, span)?;
                self.emit(Op::Dup, span);
                self.emit(Op::GetNamed(k), span);
                bump(self)?;
                self.emit(Op::SetNamed(k), span);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(Op::Dup2, span);
                self.emit(Op::GetIndex, span);
                bump(self)?;
                self.emit(Op::SetIndex, span);
            }
            _ => return Err(CompileError::new("BLK-P003", target.span, "invalid increment/decrement target")),
        }
        if !prefix {
            self.emit_const(Value::Number(1.0), span)?;
            self.emit(Op::Binary(undo), span);
        }
        Ok(())
    }

    fn finish(mut self, name: String, arity: usize) -> Function {
        self.emit(Op::Undefined, Span::UNKNOWN);
        self.emit(Op::Return, Span::UNKNOWN);
        let local_count = self.locals.as_ref().map_or(0, Vec::len);
        Function { name, arity, local_count, chunk: self.chunk }
    }
}

fn count(n: usize, span: Span) -> Result<u16> {
    u16::try_from(n).map_err(|_| CompileError::new("BLK-C005", span, "literal has too many elements"))
}

/// Collect `var` names declared anywhere in a body, in first-seen order.
/// Function bodies are their own scope and are not entered.
fn hoisted_vars(stmts: &[Stmt], out: &mut Vec<String>, seen: &mut HashSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Var { declarations, .. } => {
                for d in declarations {
                    if seen.insert(d.name.clone()) {
                        out.push(d.name.clone());
                    }
                }
            }
            Stmt::If { then_branch, else_branch, .. } => {
                hoisted_vars(std::slice::from_ref(&**then_branch), out, seen);
                if let Some(e) = else_branch {
                    hoisted_vars(std::slice::from_ref(&**e), out, seen);
                }
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
                hoisted_vars(std::slice::from_ref(&**body), out, seen);
            }
            Stmt::For { init, body, .. } => {
                if let Some(init) = init {
                    hoisted_vars(std::slice::from_ref(&**init), out, seen);
                }
                hoisted_vars(std::slice::from_ref(&**body), out, seen);
            }
            Stmt::Block(inner) => hoisted_vars(inner, out, seen),
            _ => {}
        }
    }
}

/// Compile a parsed program into bytecode.
///
/// Top-level function declarations and `var`s are hoisted: the script starts by
/// binding every function and declaring every variable as a global.
pub fn compile(program: &Program) -> Result<CompiledProgram> {
    let decls: Vec<&FunctionDecl> = program
        .body
        .iter()
        .filter_map(|s| match s {
            Stmt::Function(f) => Some(f),
            _ => None,
        })
        .collect();

    let mut main = FunctionCompiler::new(None);
    let mut globals = Vec::new();
    hoisted_vars(&program.body, &mut globals, &mut HashSet::new());
    for name in &globals {
        let k = main.name_const(name, Span::UNKNOWN)?;
        main.emit(Op::DeclareGlobal(k), Span::UNKNOWN);
    }
    for (i, decl) in decls.iter().enumerate() {
        let id = u16::try_from(i + 1)
            .map_err(|_| CompileError::new("BLK-C005", decl.span, "too many functions"))?;
        main.emit_const(Value::Function(FunctionId(id)), decl.span)?;
        main.store(&decl.name, decl.span)?;
        main.emit(Op::Pop, decl.span);
    }
    main.compile_body(&program.body)?;

    let mut functions = vec![main.finish("<main>".to_string(), 0)];
    for decl in decls {
        let mut locals = decl.params.clone();
        let mut seen: HashSet<String> = locals.iter().cloned().collect();
        hoisted_vars(&decl.body, &mut locals, &mut seen);
        let mut compiler = FunctionCompiler::new(Some(locals));
        compiler.compile_body(&decl.body)?;
        functions.push(compiler.finish(decl.name.clone(), decl.params.len()));
    }

    Ok(CompiledProgram { functions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};

    fn compile_str(source: &str) -> Result<CompiledProgram> {
        let program = parser::parse(lexer::lex(source).unwrap()).unwrap();
        compile(&program)
    }

    #[test]
    fn script_ends_with_implicit_return() {
        let prog = compile_str("").unwrap();
        assert_eq!(prog.functions.len(), 1);
        assert_eq!(prog.functions[0].chunk.code, vec![Op::Undefined, Op::Return]);
    }

    #[test]
    fn vars_and_functions_are_hoisted() {
        let prog = compile_str("x = f(); var x; function f() { return 1; }").unwrap();
        let code = &prog.functions[0].chunk.code;
        assert!(matches!(code[0], Op::DeclareGlobal(_)));
        assert!(matches!(code[1], Op::Const(_)));
        assert!(matches!(code[2], Op::StoreGlobal(_)));
        assert_eq!(prog.functions[1].name, "f");
    }

    #[test]
    fn function_locals_shadow_globals() {
        let prog = compile_str("var a; function f(a) { var b = a; return b; }").unwrap();
        let f = &prog.functions[1];
        assert_eq!(f.arity, 1);
        assert_eq!(f.local_count, 2);
        assert!(f.chunk.code.contains(&Op::LoadLocal(0)));
        assert!(f.chunk.code.contains(&Op::StoreLocal(1)));
    }

    #[test]
    fn constants_are_deduplicated() {
        let prog = compile_str("a(1); b(1); a(2);").unwrap();
        let consts = &prog.functions[0].chunk.constants;
        assert_eq!(consts.iter().filter(|c| **c == Value::Number(1.0)).count(), 1);
        assert_eq!(consts.iter().filter(|c| c.as_str() == Some("a")).count(), 1);
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let err = compile_str("break;").unwrap_err();
        assert_eq!(err.code, "BLK-C001");
        assert_eq!(err.span, Span::new(0, 5));
    }

    #[test]
    fn continue_outside_loop_is_rejected() {
        assert_eq!(compile_str("if (x) { continue; }").unwrap_err().code, "BLK-C002");
    }

    #[test]
    fn return_outside_function_is_rejected() {
        assert_eq!(compile_str("return 1;").unwrap_err().code, "BLK-C003");
    }

    #[test]
    fn nested_functions_are_rejected() {
        let err = compile_str("function f() { function g() {} }").unwrap_err();
        assert_eq!(err.code, "BLK-C004");
        assert!(err.message.contains('g'));
    }

    #[test]
    fn while_loop_jumps_back_to_condition() {
        let prog = compile_str("while (x) { y(); }").unwrap();
        let code = &prog.functions[0].chunk.code;
        let back = code.iter().rev().find_map(|op| match op {
            Op::Jump(t) => Some(*t),
            _ => None,
        });
        assert_eq!(back, Some(0));
    }

    #[test]
    fn method_calls_keep_the_receiver() {
        let prog = compile_str("list.push(1);").unwrap();
        assert!(prog.functions[0].chunk.code.iter().any(|op| matches!(op, Op::CallMethod(_, 1))));
    }

    #[test]
    fn typeof_undeclared_uses_tolerant_lookup() {
        let prog = compile_str("typeof nothingHere;").unwrap();
        assert!(matches!(prog.functions[0].chunk.code[0], Op::TypeofGlobal(_)));
    }
}
