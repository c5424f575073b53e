use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::instruction::{Instruction, InstructionError, OpcodeTable};

#[derive(Debug, Error)]
pub enum ExecutableError {
    #[error("not a teal executable (format tag `{0}`)")]
    InvalidFormat(String),
    #[error("unsupported executable version {0}")]
    UnsupportedVersion(u64),
    #[error("instruction {index}: {source}")]
    Instruction {
        index: usize,
        #[source]
        source: InstructionError,
    },
    #[error("function `{name}` points outside the code ({location})")]
    BadLocation { name: String, location: usize },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Entry point metadata for a compiled function or lambda body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub location: usize,
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

/// A linked instruction sequence plus the table of function entry points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Executable {
    pub functions: BTreeMap<String, FunctionInfo>,
    pub code: Vec<Instruction>,
}

impl Executable {
    const FORMAT: &'static str = "teal-bytecode";
    const VERSION: u64 = 1;

    pub fn new(functions: BTreeMap<String, FunctionInfo>, code: Vec<Instruction>) -> Self {
        Self { functions, code }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    pub fn instruction(&self, ip: usize) -> Option<&Instruction> {
        self.code.get(ip)
    }

    pub fn to_serial(&self) -> Result<serde_json::Value, ExecutableError> {
        let code = self
            .code
            .iter()
            .enumerate()
            .map(|(index, instruction)| {
                instruction
                    .serialize()
                    .map_err(|source| ExecutableError::Instruction { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({
            "format": Self::FORMAT,
            "version": Self::VERSION,
            "functions": self.functions,
            "code": code,
        }))
    }

    pub fn from_serial(
        data: &serde_json::Value,
        table: &OpcodeTable,
    ) -> Result<Self, ExecutableError> {
        let format = data.get("format").and_then(|f| f.as_str()).unwrap_or("");
        if format != Self::FORMAT {
            return Err(ExecutableError::InvalidFormat(format.to_string()));
        }
        let version = data.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
        if version != Self::VERSION {
            return Err(ExecutableError::UnsupportedVersion(version));
        }
        let functions: BTreeMap<String, FunctionInfo> = serde_json::from_value(
            data.get("functions").cloned().unwrap_or_else(|| json!({})),
        )?;
        let code = data
            .get("code")
            .and_then(|c| c.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(index, item)| {
                Instruction::deserialize(item, table)
                    .map_err(|source| ExecutableError::Instruction { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (name, info) in &functions {
            if info.location >= code.len() {
                return Err(ExecutableError::BadLocation {
                    name: name.clone(),
                    location: info.location,
                });
            }
        }
        Ok(Self { functions, code })
    }

    pub fn encode<W: Write>(&self, writer: W) -> Result<(), ExecutableError> {
        serde_json::to_writer_pretty(writer, &self.to_serial()?)?;
        Ok(())
    }

    pub fn decode<R: Read>(reader: R) -> Result<Self, ExecutableError> {
        let data: serde_json::Value = serde_json::from_reader(reader)?;
        Self::from_serial(&data, OpcodeTable::standard())
    }

    /// Human-readable listing with function labels.
    pub fn disassemble(&self) -> String {
        let mut labels: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for (name, info) in &self.functions {
            labels.entry(info.location).or_default().push(name);
        }
        let mut out = String::new();
        for (ip, instruction) in self.code.iter().enumerate() {
            if let Some(names) = labels.get(&ip) {
                for name in names {
                    out.push_str(&format!("{name}:\n"));
                }
            }
            out.push_str(&format!("  {ip:4}  {instruction}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::instruction::Opcode;
    use crate::Value;

    fn sample() -> Executable {
        let code = vec![
            Instruction::new(Opcode::PushV, vec![Value::Integer(42)]).unwrap(),
            Instruction::new(Opcode::Return, vec![]).unwrap(),
        ];
        let mut functions = BTreeMap::new();
        functions.insert(
            "main".to_string(),
            FunctionInfo {
                location: 0,
                params: Vec::new(),
                attribute: Some("export".into()),
            },
        );
        Executable::new(functions, code)
    }

    #[test]
    fn encode_decode_round_trip() {
        let exe = sample();
        let mut buf = Vec::new();
        exe.encode(&mut buf).unwrap();
        let back = Executable::decode(&buf[..]).unwrap();
        assert_eq!(back, exe);
        assert_eq!(back.to_serial().unwrap(), exe.to_serial().unwrap());
    }

    #[test]
    fn rejects_foreign_documents() {
        let err = Executable::decode(&b"{\"format\": \"other\"}"[..]).unwrap_err();
        assert!(matches!(err, ExecutableError::InvalidFormat(tag) if tag == "other"));
        let data = br#"{"format": "teal-bytecode", "version": 9}"#;
        let err = Executable::decode(&data[..]).unwrap_err();
        assert!(matches!(err, ExecutableError::UnsupportedVersion(9)));
    }

    #[test]
    fn encoding_points_at_unserializable_instruction() {
        let mut exe = sample();
        exe.code[0] = Instruction::new(Opcode::PushV, vec![Value::Float(f64::NAN)]).unwrap();
        let err = exe.encode(Vec::new()).unwrap_err();
        assert!(matches!(err, ExecutableError::Instruction { index: 0, .. }), "{err}");
    }

    #[test]
    fn reports_index_of_bad_instruction() {
        let mut data = sample().to_serial().unwrap();
        data["code"][1] = json!(["Explode", [], []]);
        let err = Executable::from_serial(&data, OpcodeTable::standard()).unwrap_err();
        assert!(matches!(err, ExecutableError::Instruction { index: 1, .. }));
    }
}
