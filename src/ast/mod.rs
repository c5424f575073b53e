//=====================================================
// File: ast.rs
//=====================================================
// Goal: Teal abstract syntax tree
// Objective: Located, immutable expression nodes produced by the parser and
//            consumed by the compiler
//=====================================================

use std::fmt;

/// Source position attached to every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub filename: String,
    pub line: usize,
    pub column: usize,
    pub source_line: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Definition {
        name: String,
        params: Vec<String>,
        body: Box<Node>,
        attribute: Option<String>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Node>,
    },
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
    },
    /// A call argument; `symbol` holds the keyword tag when present.
    Argument {
        symbol: Option<Box<Node>>,
        value: Box<Node>,
    },
    Id(String),
    Symbol(String),
    Literal(Literal),
    Binop {
        left: Box<Node>,
        op: BinOp,
        right: Box<Node>,
    },
    If {
        cond: Box<Node>,
        then: Box<Node>,
        else_: Option<Box<Node>>,
    },
    Async(Box<Node>),
    Await(Box<Node>),
    Progn(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Gt,
    Lt,
    Or,
    And,
    Eq,
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Gt => ">",
            BinOp::Lt => "<",
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Set => "=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

impl Node {
    pub fn new(kind: NodeKind, loc: Location) -> Self {
        Self { kind, loc }
    }

    pub fn as_id(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Id(name) => Some(name),
            _ => None,
        }
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[String]) -> fmt::Result {
    write!(f, "({})", params.join(" "))
}

/// Compact s-expression rendering, used by `teal ast` and in tests.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Definition {
                name,
                params,
                body,
                attribute,
            } => {
                if let Some(attribute) = attribute {
                    write!(f, "#[{attribute}] ")?;
                }
                write!(f, "(fn {name} ")?;
                write_params(f, params)?;
                write!(f, " {body})")
            }
            NodeKind::Lambda { params, body } => {
                write!(f, "(lambda ")?;
                write_params(f, params)?;
                write!(f, " {body})")
            }
            NodeKind::Call { callee, args } => {
                write!(f, "({callee}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            NodeKind::Argument { symbol, value } => match symbol {
                Some(symbol) => write!(f, "{symbol} {value}"),
                None => write!(f, "{value}"),
            },
            NodeKind::Id(name) => write!(f, "{name}"),
            NodeKind::Symbol(name) => write!(f, ":{name}"),
            NodeKind::Literal(literal) => match literal {
                Literal::Null => write!(f, "null"),
                Literal::Boolean(flag) => write!(f, "{flag}"),
                Literal::Integer(int) => write!(f, "{int}"),
                Literal::Float(float) => write!(f, "{float:?}"),
                Literal::String(text) => write!(f, "{text:?}"),
            },
            NodeKind::Binop { left, op, right } => {
                write!(f, "({} {left} {right})", op.as_str())
            }
            NodeKind::If { cond, then, else_ } => {
                write!(f, "(if {cond} {then}")?;
                if let Some(else_) = else_ {
                    write!(f, " {else_}")?;
                }
                write!(f, ")")
            }
            NodeKind::Async(inner) => write!(f, "(async {inner})"),
            NodeKind::Await(inner) => write!(f, "(await {inner})"),
            NodeKind::Progn(items) => {
                write!(f, "(progn")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                write!(f, ")")
            }
        }
    }
}
