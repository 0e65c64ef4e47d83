//! Operator commands, one per stdin line.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ChordError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `join <ip:port>`
    Join(SocketAddr),
    /// `get <file name>`
    Get(String),
    /// `put <file path>`
    Put(PathBuf),
    /// `self-boot`
    SelfBoot,
    /// `print`
    Print,
    /// `quit`
    Quit,
}

impl Instruction {
    /// Name a file is keyed by on the ring; directories are not part of it
    pub fn file_name(&self) -> Option<String> {
        match self {
            Instruction::Get(name) => Some(name.clone()),
            Instruction::Put(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            _ => None,
        }
    }
}

impl FromStr for Instruction {
    type Err = ChordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, arg) = match line.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (line, ""),
        };
        let invalid = |why: &str| ChordError::InvalidInstruction(format!("{}: {:?}", why, line));

        match (verb, arg.is_empty()) {
            ("join", false) => arg
                .parse()
                .map(Instruction::Join)
                .map_err(|_| invalid("join expects ip:port")),
            ("get" | "put", false) if arg.contains([',', '\r', '\n']) => {
                Err(invalid("file names cannot contain ',' or line breaks"))
            }
            ("get", false) => Ok(Instruction::Get(arg.to_string())),
            ("put", false) => {
                let path = PathBuf::from(arg);
                if path.file_name().is_none() {
                    return Err(invalid("put expects a file path"));
                }
                Ok(Instruction::Put(path))
            }
            ("join" | "get" | "put", true) => Err(invalid("missing argument")),
            ("self-boot", true) => Ok(Instruction::SelfBoot),
            ("print", true) => Ok(Instruction::Print),
            ("quit", true) => Ok(Instruction::Quit),
            ("self-boot" | "print" | "quit", false) => Err(invalid("unexpected argument")),
            _ => Err(invalid("unknown instruction")),
        }
    }
}
