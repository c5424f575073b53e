//=====================================================
// File: compiler.rs
//=====================================================
// Goal: Lower Teal ASTs to teal_core executables
// Objective: Emit one code region per function or lambda body, with relative
//            jumps for conditionals and a source trace on every instruction
//=====================================================

use std::collections::{BTreeMap, HashSet, VecDeque};

use teal_core::Value;
use teal_core::vm::{Executable, FunctionInfo, Instruction, InstructionError, Opcode};
use thiserror::Error;
use tracing::debug;

use crate::ast::{BinOp, Literal, Location, Node, NodeKind};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{location}: only function definitions are allowed at the top level")]
    TopLevelExpression { location: Location },
    #[error("{location}: function `{name}` is defined more than once")]
    DuplicateFunction { name: String, location: Location },
    #[error("{location}: the left side of `=` must be a name")]
    InvalidAssignment { location: Location },
    #[error("{location}: `async` must be applied to a function call")]
    AsyncRequiresCall { location: Location },
    #[error("{location}: argument outside of a call")]
    StrayArgument { location: Location },
    #[error(transparent)]
    Instruction(#[from] InstructionError),
}

impl CompileError {
    pub fn location(&self) -> Option<&Location> {
        match self {
            CompileError::TopLevelExpression { location }
            | CompileError::DuplicateFunction { location, .. }
            | CompileError::InvalidAssignment { location }
            | CompileError::AsyncRequiresCall { location }
            | CompileError::StrayArgument { location } => Some(location),
            CompileError::Instruction(_) => None,
        }
    }
}

/// A function body waiting for its own code region.
struct Pending<'a> {
    name: String,
    params: &'a [String],
    body: &'a Node,
    attribute: Option<String>,
    /// Nested `fn` definitions rebind their own name on entry so they can recurse.
    rebind: Option<&'a str>,
}

#[derive(Default)]
pub struct Compiler<'a> {
    code: Vec<Instruction>,
    functions: BTreeMap<String, FunctionInfo>,
    pending: VecDeque<Pending<'a>>,
    closures: usize,
}

impl<'a> Compiler<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile_program(mut self, nodes: &'a [Node]) -> Result<Executable, CompileError> {
        let mut seen = HashSet::new();
        for node in nodes {
            let NodeKind::Definition {
                name,
                params,
                body,
                attribute,
            } = &node.kind
            else {
                return Err(CompileError::TopLevelExpression {
                    location: node.loc.clone(),
                });
            };
            if !seen.insert(name.as_str()) {
                return Err(CompileError::DuplicateFunction {
                    name: name.clone(),
                    location: node.loc.clone(),
                });
            }
            self.pending.push_back(Pending {
                name: name.clone(),
                params,
                body,
                attribute: attribute.clone(),
                rebind: None,
            });
            while let Some(pending) = self.pending.pop_front() {
                self.compile_function(pending)?;
            }
        }
        Ok(Executable::new(self.functions, self.code))
    }

    fn compile_function(&mut self, pending: Pending<'a>) -> Result<(), CompileError> {
        let location = self.code.len();
        if let Some(name) = pending.rebind {
            self.emit(
                pending.body,
                Opcode::MakeClosure,
                vec![Value::String(pending.name.clone())],
            )?;
            self.emit(pending.body, Opcode::Bind, vec![Value::from(name)])?;
            self.emit(pending.body, Opcode::Pop, vec![])?;
        }
        self.expression(pending.body)?;
        self.emit(pending.body, Opcode::Return, vec![])?;
        debug!(
            function = %pending.name,
            location,
            size = self.code.len() - location,
            "compiled function"
        );
        self.functions.insert(
            pending.name,
            FunctionInfo {
                location,
                params: pending.params.to_vec(),
                attribute: pending.attribute,
            },
        );
        Ok(())
    }

    fn emit(
        &mut self,
        node: &Node,
        opcode: Opcode,
        operands: Vec<Value>,
    ) -> Result<usize, CompileError> {
        let instruction = Instruction::new(opcode, operands)?.with_source(source_trace(node));
        self.code.push(instruction);
        Ok(self.code.len() - 1)
    }

    /// Rewrite the offset of the jump at `at` so it lands on `target`.
    fn patch_jump(&mut self, at: usize, target: usize) -> Result<(), CompileError> {
        let offset = target as i64 - at as i64;
        let old = &self.code[at];
        let patched = Instruction::new(old.opcode(), vec![Value::Integer(offset)])?
            .with_source(old.source().to_vec());
        self.code[at] = patched;
        Ok(())
    }

    fn closure_name(&mut self, base: &str) -> String {
        let name = format!("{base}:{}", self.closures);
        self.closures += 1;
        name
    }

    /// Compile `node` so that it leaves exactly one value on the stack.
    fn expression(&mut self, node: &'a Node) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Literal(literal) => {
                let value = match literal {
                    Literal::Null => Value::Null,
                    Literal::Boolean(flag) => Value::Boolean(*flag),
                    Literal::Integer(int) => Value::Integer(*int),
                    Literal::Float(float) => Value::Float(*float),
                    Literal::String(text) => Value::String(text.clone()),
                };
                self.emit(node, Opcode::PushV, vec![value])?;
            }
            NodeKind::Symbol(name) => {
                self.emit(node, Opcode::PushV, vec![Value::Symbol(name.clone())])?;
            }
            NodeKind::Id(name) => {
                self.emit(node, Opcode::PushB, vec![Value::from(name.as_str())])?;
            }
            NodeKind::Binop {
                left,
                op: BinOp::Set,
                right,
            } => {
                let Some(name) = left.as_id() else {
                    return Err(CompileError::InvalidAssignment {
                        location: left.loc.clone(),
                    });
                };
                self.expression(right)?;
                self.emit(node, Opcode::Bind, vec![Value::from(name)])?;
            }
            NodeKind::Binop { left, op, right } => {
                let Some(opcode) = binary_opcode(*op) else {
                    return Err(CompileError::InvalidAssignment {
                        location: node.loc.clone(),
                    });
                };
                self.expression(left)?;
                self.expression(right)?;
                self.emit(node, opcode, vec![])?;
            }
            NodeKind::Call { callee, args } => self.call(node, callee, args, Opcode::Call)?,
            NodeKind::Async(inner) => match &inner.kind {
                NodeKind::Call { callee, args } => self.call(inner, callee, args, Opcode::ACall)?,
                _ => {
                    return Err(CompileError::AsyncRequiresCall {
                        location: node.loc.clone(),
                    });
                }
            },
            NodeKind::Await(inner) => {
                self.expression(inner)?;
                self.emit(node, Opcode::Wait, vec![])?;
            }
            NodeKind::If { cond, then, else_ } => {
                self.expression(cond)?;
                let branch = self.emit(node, Opcode::JumpIf, vec![Value::Integer(0)])?;
                match else_ {
                    Some(else_) => self.expression(else_)?,
                    None => {
                        self.emit(node, Opcode::PushV, vec![Value::Null])?;
                    }
                }
                let skip = self.emit(node, Opcode::Jump, vec![Value::Integer(0)])?;
                self.patch_jump(branch, self.code.len())?;
                self.expression(then)?;
                self.patch_jump(skip, self.code.len())?;
            }
            NodeKind::Progn(items) => {
                if items.is_empty() {
                    self.emit(node, Opcode::PushV, vec![Value::Null])?;
                }
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        self.emit(item, Opcode::Pop, vec![])?;
                    }
                    self.expression(item)?;
                }
            }
            NodeKind::Lambda { params, body } => {
                let name = self.closure_name("lambda");
                self.emit(node, Opcode::MakeClosure, vec![Value::String(name.clone())])?;
                self.pending.push_back(Pending {
                    name,
                    params,
                    body,
                    attribute: None,
                    rebind: None,
                });
            }
            NodeKind::Definition {
                name: fn_name,
                params,
                body,
                attribute,
            } => {
                let name = self.closure_name(fn_name);
                self.emit(node, Opcode::MakeClosure, vec![Value::String(name.clone())])?;
                self.emit(node, Opcode::Bind, vec![Value::from(fn_name.as_str())])?;
                self.pending.push_back(Pending {
                    name,
                    params,
                    body,
                    attribute: attribute.clone(),
                    rebind: Some(fn_name.as_str()),
                });
            }
            NodeKind::Argument { .. } => {
                return Err(CompileError::StrayArgument {
                    location: node.loc.clone(),
                });
            }
        }
        Ok(())
    }

    /// Arguments left to right, then the callee, then the call itself.
    fn call(
        &mut self,
        node: &'a Node,
        callee: &'a Node,
        args: &'a [Node],
        opcode: Opcode,
    ) -> Result<(), CompileError> {
        let mut keywords = Vec::with_capacity(args.len());
        for arg in args {
            match &arg.kind {
                NodeKind::Argument { symbol, value } => {
                    self.expression(value)?;
                    keywords.push(match symbol.as_deref().map(|s| &s.kind) {
                        Some(NodeKind::Symbol(name)) => Value::Symbol(name.clone()),
                        _ => Value::Null,
                    });
                }
                _ => {
                    self.expression(arg)?;
                    keywords.push(Value::Null);
                }
            }
        }
        self.expression(callee)?;
        self.emit(
            node,
            opcode,
            vec![Value::Integer(args.len() as i64), Value::List(keywords)],
        )?;
        Ok(())
    }
}

/// Stack opcode for an operator; `=` has none and lowers to `Bind`.
fn binary_opcode(op: BinOp) -> Option<Opcode> {
    let opcode = match op {
        BinOp::Gt => Opcode::Gt,
        BinOp::Lt => Opcode::Lt,
        BinOp::Or => Opcode::Or,
        BinOp::And => Opcode::And,
        BinOp::Eq => Opcode::Eq,
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Set => return None,
    };
    Some(opcode)
}

fn source_trace(node: &Node) -> Vec<String> {
    vec![node.loc.to_string(), node.loc.source_line.clone()]
}

/// Compile a parsed program into a linked executable.
pub fn compile(nodes: &[Node]) -> Result<Executable, CompileError> {
    Compiler::new().compile_program(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn build(source: &str) -> Executable {
        let nodes = parse_source("test.tl", source).unwrap();
        compile(&nodes).unwrap()
    }

    fn op(opcode: Opcode, operands: Vec<Value>) -> Instruction {
        Instruction::new(opcode, operands).unwrap()
    }

    fn call(opcode: Opcode, keywords: Vec<Value>) -> Instruction {
        op(
            opcode,
            vec![Value::Integer(keywords.len() as i64), Value::List(keywords)],
        )
    }

    #[test]
    fn assignment_then_reference() {
        let exe = build("fn main() { x = 1 + 2; x }");
        assert_eq!(
            exe.code,
            vec![
                op(Opcode::PushV, vec![Value::Integer(1)]),
                op(Opcode::PushV, vec![Value::Integer(2)]),
                op(Opcode::Add, vec![]),
                op(Opcode::Bind, vec![Value::from("x")]),
                op(Opcode::Pop, vec![]),
                op(Opcode::PushB, vec![Value::from("x")]),
                op(Opcode::Return, vec![]),
            ]
        );
        assert_eq!(exe.function("main").unwrap().location, 0);
    }

    #[test]
    fn conditionals_use_relative_jumps() {
        let exe = build("fn f(a) { if a { 1 } else { 2 } }");
        assert_eq!(
            exe.code,
            vec![
                op(Opcode::PushB, vec![Value::from("a")]),
                op(Opcode::JumpIf, vec![Value::Integer(3)]),
                op(Opcode::PushV, vec![Value::Integer(2)]),
                op(Opcode::Jump, vec![Value::Integer(2)]),
                op(Opcode::PushV, vec![Value::Integer(1)]),
                op(Opcode::Return, vec![]),
            ]
        );
    }

    #[test]
    fn calls_push_arguments_then_callee() {
        let exe = build("fn main() { await async sub(:b 10, 3) }");
        assert_eq!(
            exe.code,
            vec![
                op(Opcode::PushV, vec![Value::Integer(10)]),
                op(Opcode::PushV, vec![Value::Integer(3)]),
                op(Opcode::PushB, vec![Value::from("sub")]),
                call(Opcode::ACall, vec![Value::Symbol("b".into()), Value::Null]),
                op(Opcode::Wait, vec![]),
                op(Opcode::Return, vec![]),
            ]
        );
    }

    #[test]
    fn lambdas_get_their_own_region() {
        let exe = build("fn main() { g = lambda(y) { y }; g(1) }");
        let lambda = exe.function("lambda:0").unwrap();
        assert_eq!(lambda.params, vec!["y".to_string()]);
        assert_eq!(
            exe.code[0],
            op(Opcode::MakeClosure, vec![Value::from("lambda:0")])
        );
        assert_eq!(
            exe.code[lambda.location],
            op(Opcode::PushB, vec![Value::from("y")])
        );
    }

    #[test]
    fn nested_definitions_rebind_their_name() {
        let exe = build("fn main() { fn twice(n) { n * 2 }\n twice(4) }");
        let inner = exe.function("twice:0").unwrap();
        assert_eq!(
            exe.code[inner.location..inner.location + 3],
            [
                op(Opcode::MakeClosure, vec![Value::from("twice:0")]),
                op(Opcode::Bind, vec![Value::from("twice")]),
                op(Opcode::Pop, vec![]),
            ]
        );
    }

    #[test]
    fn instructions_carry_source_traces() {
        let exe = build("fn main() {\n  42\n}");
        assert_eq!(exe.code[0].source(), ["test.tl:2:3", "  42"]);
    }

    #[test]
    fn attributes_reach_the_function_table() {
        let exe = build("#[export]\nfn main() { 1 }");
        assert_eq!(exe.function("main").unwrap().attribute.as_deref(), Some("export"));
    }

    #[test]
    fn rejects_malformed_programs() {
        let compile_err = |source: &str| {
            let nodes = parse_source("t.tl", source).unwrap();
            compile(&nodes).unwrap_err()
        };
        assert!(matches!(compile_err("1 + 2"), CompileError::TopLevelExpression { .. }));
        assert!(matches!(
            compile_err("fn a() { 1 }\nfn a() { 2 }"),
            CompileError::DuplicateFunction { name, .. } if name == "a"
        ));
        assert!(matches!(compile_err("fn a() { 1 = 2 }"), CompileError::InvalidAssignment { .. }));
        assert!(matches!(compile_err("fn a() { async 1 }"), CompileError::AsyncRequiresCall { .. }));
    }

    #[test]
    fn equality_compiles_to_eq_and_assignment_has_no_opcode() {
        let exe = build("fn f(a, b) { a == b }");
        assert_eq!(exe.code[2], op(Opcode::Eq, vec![]));
        assert_eq!(binary_opcode(BinOp::Eq), Some(Opcode::Eq));
        assert_eq!(binary_opcode(BinOp::Set), None);
    }
}
