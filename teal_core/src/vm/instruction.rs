use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    PushV = 0,
    PushB,
    Bind,
    Pop,
    Jump,
    JumpIf,
    Call,
    ACall,
    Wait,
    Return,
    MakeClosure,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Gt,
    Lt,
    And,
    Or,
}

/// Expected kind of a single operand position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Any,
    Integer,
    String,
    List,
}

impl OperandKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            OperandKind::Any => true,
            OperandKind::Integer => value.kind() == ValueKind::Integer,
            OperandKind::String => value.kind() == ValueKind::String,
            OperandKind::List => value.kind() == ValueKind::List,
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperandKind::Any => "any",
            OperandKind::Integer => "integer",
            OperandKind::String => "string",
            OperandKind::List => "list",
        };
        f.write_str(name)
    }
}

impl Opcode {
    pub const ALL: [Opcode; 20] = [
        Opcode::PushV,
        Opcode::PushB,
        Opcode::Bind,
        Opcode::Pop,
        Opcode::Jump,
        Opcode::JumpIf,
        Opcode::Call,
        Opcode::ACall,
        Opcode::Wait,
        Opcode::Return,
        Opcode::MakeClosure,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Eq,
        Opcode::Gt,
        Opcode::Lt,
        Opcode::And,
        Opcode::Or,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Opcode::PushV => "PushV",
            Opcode::PushB => "PushB",
            Opcode::Bind => "Bind",
            Opcode::Pop => "Pop",
            Opcode::Jump => "Jump",
            Opcode::JumpIf => "JumpIf",
            Opcode::Call => "Call",
            Opcode::ACall => "ACall",
            Opcode::Wait => "Wait",
            Opcode::Return => "Return",
            Opcode::MakeClosure => "MakeClosure",
            Opcode::Add => "Add",
            Opcode::Sub => "Sub",
            Opcode::Mul => "Mul",
            Opcode::Div => "Div",
            Opcode::Eq => "Eq",
            Opcode::Gt => "Gt",
            Opcode::Lt => "Lt",
            Opcode::And => "And",
            Opcode::Or => "Or",
        }
    }

    /// Operand shape; the slice length is the opcode's fixed arity.
    pub fn signature(self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Opcode::PushV => &[Any],
            Opcode::PushB | Opcode::Bind | Opcode::MakeClosure => &[String],
            Opcode::Jump | Opcode::JumpIf => &[Integer],
            Opcode::Call | Opcode::ACall => &[Integer, List],
            Opcode::Pop
            | Opcode::Wait
            | Opcode::Return
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Eq
            | Opcode::Gt
            | Opcode::Lt
            | Opcode::And
            | Opcode::Or => &[],
        }
    }

    pub fn arity(self) -> usize {
        self.signature().len()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstructionError {
    #[error("{opcode}: expected {expected} operand(s), got {got}")]
    BadOperandsLength {
        opcode: Opcode,
        expected: usize,
        got: usize,
    },
    #[error("{opcode}: operand {position} must be {expected}, got {found}")]
    BadOperandsType {
        opcode: Opcode,
        position: usize,
        expected: OperandKind,
        found: ValueKind,
    },
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),
    #[error("malformed instruction: {0}")]
    Malformed(String),
    #[error("{opcode}: operand cannot be serialized: {reason}")]
    Unserializable { opcode: Opcode, reason: String },
}

/// A closed table of opcodes that deserialization may resolve names against.
#[derive(Debug, Clone)]
pub struct OpcodeTable {
    by_name: HashMap<&'static str, Opcode>,
}

static STANDARD_TABLE: Lazy<OpcodeTable> = Lazy::new(|| OpcodeTable::from_opcodes(&Opcode::ALL));

impl OpcodeTable {
    pub fn standard() -> &'static OpcodeTable {
        &STANDARD_TABLE
    }

    pub fn from_opcodes(opcodes: &[Opcode]) -> Self {
        Self {
            by_name: opcodes.iter().map(|op| (op.name(), *op)).collect(),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Opcode> {
        self.by_name.get(name).copied()
    }
}

/// A single machine instruction.
///
/// Operands are always runtime values so the instruction is self-describing.
/// `source` is diagnostic only and is ignored by equality.
#[derive(Debug, Clone)]
pub struct Instruction {
    opcode: Opcode,
    operands: Vec<Value>,
    source: Vec<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Value>) -> Result<Self, InstructionError> {
        let signature = opcode.signature();
        if operands.len() != signature.len() {
            return Err(InstructionError::BadOperandsLength {
                opcode,
                expected: signature.len(),
                got: operands.len(),
            });
        }
        for (position, (operand, expected)) in operands.iter().zip(signature).enumerate() {
            if !expected.accepts(operand) {
                return Err(InstructionError::BadOperandsType {
                    opcode,
                    position,
                    expected: *expected,
                    found: operand.kind(),
                });
            }
        }
        Ok(Self {
            opcode,
            operands,
            source: Vec::new(),
        })
    }

    pub fn with_source(mut self, source: Vec<String>) -> Self {
        self.source = source;
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    pub fn operand(&self, index: usize) -> &Value {
        // Arity is validated at construction, so the index is in range for
        // every position the opcode's signature names.
        &self.operands[index]
    }

    pub fn source(&self) -> &[String] {
        &self.source
    }

    /// `[opcode_name, [operand...], [source_line...]]`
    pub fn serialize(&self) -> Result<serde_json::Value, InstructionError> {
        let operands = self
            .operands
            .iter()
            .map(Value::to_serial)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| InstructionError::Unserializable {
                opcode: self.opcode,
                reason: err.to_string(),
            })?;
        Ok(json!([self.opcode.name(), operands, self.source]))
    }

    pub fn deserialize(
        data: &serde_json::Value,
        table: &OpcodeTable,
    ) -> Result<Self, InstructionError> {
        let parts = data
            .as_array()
            .filter(|parts| parts.len() == 3)
            .ok_or_else(|| InstructionError::Malformed("expected a 3-element array".into()))?;
        let name = parts[0]
            .as_str()
            .ok_or_else(|| InstructionError::Malformed("opcode name must be a string".into()))?;
        let opcode = table
            .resolve(name)
            .ok_or_else(|| InstructionError::UnknownOpcode(name.to_string()))?;
        let operands = parts[1]
            .as_array()
            .ok_or_else(|| InstructionError::Malformed("operands must be an array".into()))?
            .iter()
            .map(|operand| {
                Value::from_serial(operand.clone())
                    .map_err(|err| InstructionError::Malformed(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let source = serde_json::from_value::<Vec<String>>(parts[2].clone())
            .map_err(|err| InstructionError::Malformed(err.to_string()))?;
        Ok(Self::new(opcode, operands)?.with_source(source))
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.opcode == other.opcode && self.operands == other.operands
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operands: Vec<String> = self.operands.iter().map(Value::repr).collect();
        write!(f, "{:12} {}", self.opcode.name().to_uppercase(), operands.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_operand() {
        let err = Instruction::new(Opcode::Call, vec![Value::Integer(1)]).unwrap_err();
        assert_eq!(
            err,
            InstructionError::BadOperandsLength {
                opcode: Opcode::Call,
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn rejects_wrong_operand_kind() {
        let err = Instruction::new(Opcode::Jump, vec![Value::from("far")]).unwrap_err();
        assert!(matches!(
            err,
            InstructionError::BadOperandsType {
                opcode: Opcode::Jump,
                position: 0,
                expected: OperandKind::Integer,
                found: ValueKind::String,
            }
        ));
    }

    #[test]
    fn equality_ignores_source_trace() {
        let a = Instruction::new(Opcode::PushV, vec![Value::Integer(1)])
            .unwrap()
            .with_source(vec!["a.tl:1:1".into()]);
        let b = Instruction::new(Opcode::PushV, vec![Value::Integer(1)]).unwrap();
        assert_eq!(a, b);
        let c = Instruction::new(Opcode::PushV, vec![Value::Float(1.0)]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn serial_round_trip_keeps_source() {
        let instruction = Instruction::new(
            Opcode::Call,
            vec![
                Value::Integer(2),
                Value::List(vec![Value::Null, Value::Symbol("key".into())]),
            ],
        )
        .unwrap()
        .with_source(vec!["main.tl:3:5".into(), "  f(1, :key 2)".into()]);
        let serial = instruction.serialize().unwrap();
        assert_eq!(serial[0], "Call");
        let back = Instruction::deserialize(&serial, OpcodeTable::standard()).unwrap();
        assert_eq!(back, instruction);
        assert_eq!(back.source(), instruction.source());
        assert_eq!(back.serialize().unwrap(), serial);
    }

    #[test]
    fn unknown_opcode_against_restricted_table() {
        let serial = Instruction::new(Opcode::Wait, Vec::new())
            .unwrap()
            .serialize()
            .unwrap();
        let table = OpcodeTable::from_opcodes(&[Opcode::PushV, Opcode::Return]);
        let err = Instruction::deserialize(&serial, &table).unwrap_err();
        assert_eq!(err, InstructionError::UnknownOpcode("Wait".into()));
    }

    #[test]
    fn infinite_constant_is_not_written_as_null() {
        let instruction =
            Instruction::new(Opcode::PushV, vec![Value::Float(f64::INFINITY)]).unwrap();
        assert!(matches!(
            instruction.serialize(),
            Err(InstructionError::Unserializable { opcode: Opcode::PushV, .. })
        ));
    }

    #[test]
    fn deserialize_revalidates_operands() {
        let data = json!(["Bind", [], []]);
        let err = Instruction::deserialize(&data, OpcodeTable::standard()).unwrap_err();
        assert!(matches!(err, InstructionError::BadOperandsLength { .. }));
    }
}
