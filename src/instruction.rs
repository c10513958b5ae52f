use std::fmt::{Display, Formatter, Write};

use crate::error::{Error, Result};
use crate::opcode_tables;
use crate::text;

/// Operand types, two bits each in the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// Two-byte constant
    LargeConstant,
    /// One-byte constant
    SmallConstant,
    /// Byte naming a local/global/stack-top
    Variable,
    /// Not present
    Omitted,
}

impl OperandType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0b00 => OperandType::LargeConstant,
            0b01 => OperandType::SmallConstant,
            0b10 => OperandType::Variable,
            _ => OperandType::Omitted,
        }
    }
}

/// Instruction forms, selected by the top bits of the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionForm {
    Long,
    Short,
    Variable,
    Extended,
}

/// Operand count class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandCount {
    Op0,
    Op1,
    Op2,
    Var,
}

/// Where a taken branch goes. Offsets 0 and 1 are short-circuit returns,
/// not jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTarget {
    ReturnFalse,
    ReturnTrue,
    Offset(i16),
}

/// Decoded branch specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    /// Branch when the condition matches this polarity
    pub on_true: bool,
    pub target: BranchTarget,
    /// Encoded length in bytes (1 or 2); the save opcode needs it to
    /// compute its resume address
    pub bytes: u8,
}

/// A decoded instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: u8,
    /// Second opcode byte of the extended (0xBE) form
    pub ext_opcode: Option<u8>,
    pub form: InstructionForm,
    pub operand_count: OperandCount,
    pub operand_types: Vec<OperandType>,
    /// Raw operand values; variables are resolved at execution time
    pub operands: Vec<u16>,
    pub store_var: Option<u8>,
    pub branch: Option<Branch>,
    /// Decoded inline text of the literal print opcodes
    pub text: Option<String>,
    /// Total encoded size in bytes
    pub size: usize,
}

impl Instruction {
    /// Decode one instruction at `addr`.
    pub fn decode(memory: &[u8], addr: usize, version: u8) -> Result<Instruction> {
        let read = |offset: usize| -> Result<u8> {
            memory
                .get(offset)
                .copied()
                .ok_or(Error::OutOfBounds { addr: offset as u32 })
        };

        let mut offset = addr;
        let opcode_byte = read(offset)?;
        offset += 1;

        let form = match opcode_byte >> 6 {
            0b11 => InstructionForm::Variable,
            0b10 => InstructionForm::Short,
            _ => {
                if opcode_byte == 0xBE && version >= 5 {
                    InstructionForm::Extended
                } else {
                    InstructionForm::Long
                }
            }
        };

        let (opcode, ext_opcode, operand_count) = match form {
            InstructionForm::Long => (opcode_byte & 0x1F, None, OperandCount::Op2),
            InstructionForm::Short => {
                let count = if (opcode_byte >> 4) & 0x03 == 0x03 {
                    OperandCount::Op0
                } else {
                    OperandCount::Op1
                };
                (opcode_byte & 0x0F, None, count)
            }
            InstructionForm::Variable => {
                let count = if opcode_byte & 0x20 == 0 {
                    OperandCount::Op2
                } else {
                    OperandCount::Var
                };
                (opcode_byte & 0x1F, None, count)
            }
            InstructionForm::Extended => {
                let ext = read(offset)?;
                offset += 1;
                (opcode_byte, Some(ext), OperandCount::Var)
            }
        };

        // Operand types
        let mut operand_types = Vec::new();
        match form {
            InstructionForm::Long => {
                // One type bit per operand: clear = small constant
                for bit in [0x40u8, 0x20] {
                    operand_types.push(if opcode_byte & bit != 0 {
                        OperandType::Variable
                    } else {
                        OperandType::SmallConstant
                    });
                }
            }
            InstructionForm::Short => {
                if operand_count != OperandCount::Op0 {
                    let op_type = OperandType::from_bits((opcode_byte >> 4) & 0x03);
                    if op_type != OperandType::Omitted {
                        operand_types.push(op_type);
                    }
                }
            }
            InstructionForm::Variable | InstructionForm::Extended => {
                // The two 8-operand call opcodes carry two type bytes
                let double = form == InstructionForm::Variable
                    && operand_count == OperandCount::Var
                    && matches!(opcode, 0x0C | 0x1A);
                let count = if double { 2 } else { 1 };
                let mut done = false;
                for _ in 0..count {
                    let type_byte = read(offset)?;
                    offset += 1;
                    for shift in [6u8, 4, 2, 0] {
                        let op_type = OperandType::from_bits(type_byte >> shift);
                        if op_type == OperandType::Omitted {
                            done = true;
                            break;
                        }
                        if !done {
                            operand_types.push(op_type);
                        }
                    }
                }
            }
        }

        // Operand values
        let mut operands = Vec::with_capacity(operand_types.len());
        for op_type in &operand_types {
            match op_type {
                OperandType::LargeConstant => {
                    let high = read(offset)? as u16;
                    let low = read(offset + 1)? as u16;
                    operands.push((high << 8) | low);
                    offset += 2;
                }
                OperandType::SmallConstant | OperandType::Variable => {
                    operands.push(read(offset)? as u16);
                    offset += 1;
                }
                OperandType::Omitted => unreachable!("omitted types are never recorded"),
            }
        }

        let store_var =
            if opcode_tables::stores_result(opcode, ext_opcode, form, operand_count, version) {
                let var = read(offset)?;
                offset += 1;
                Some(var)
            } else {
                None
            };

        let branch = if opcode_tables::has_branch(opcode, ext_opcode, form, operand_count, version)
        {
            let first = read(offset)?;
            offset += 1;
            let on_true = first & 0x80 != 0;
            let (raw, bytes) = if first & 0x40 != 0 {
                // One byte: unsigned 6-bit offset 0..63
                ((first & 0x3F) as i16, 1u8)
            } else {
                // Two bytes: signed 14-bit offset
                let second = read(offset)?;
                offset += 1;
                let mut value = (((first & 0x3F) as i16) << 8) | second as i16;
                if value & 0x2000 != 0 {
                    value -= 0x4000;
                }
                (value, 2)
            };
            let target = match raw {
                0 => BranchTarget::ReturnFalse,
                1 => BranchTarget::ReturnTrue,
                n => BranchTarget::Offset(n),
            };
            Some(Branch {
                on_true,
                target,
                bytes,
            })
        } else {
            None
        };

        let inline_text = if opcode_tables::has_text(opcode, form, operand_count) {
            let abbrev_table = if memory.len() >= 0x1A {
                ((memory[0x18] as usize) << 8) | memory[0x19] as usize
            } else {
                0
            };
            let (string, len) = text::decode_string(memory, offset, abbrev_table, version)?;
            offset += len;
            Some(string)
        } else {
            None
        };

        Ok(Instruction {
            opcode,
            ext_opcode,
            form,
            operand_count,
            operand_types,
            operands,
            store_var,
            branch,
            text: inline_text,
            size: offset - addr,
        })
    }

    /// Mnemonic for logs and error reports.
    pub fn name(&self, version: u8) -> &'static str {
        opcode_tables::name(
            self.opcode,
            self.ext_opcode,
            self.form,
            self.operand_count,
            version,
        )
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Version 3 names are right for everything the display is used for
        write!(f, "{}", self.name(3))?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            match self.operand_types[i] {
                OperandType::Variable => write!(f, "{sep}V{op:02x}")?,
                _ => write!(f, "{sep}#{op:04x}")?,
            }
        }
        if let Some(var) = self.store_var {
            write!(f, " -> V{var:02x}")?;
        }
        if let Some(branch) = &self.branch {
            let mut label = String::new();
            match branch.target {
                BranchTarget::ReturnFalse => label.push_str("RFALSE"),
                BranchTarget::ReturnTrue => label.push_str("RTRUE"),
                BranchTarget::Offset(n) => write!(label, "{n:+}")?,
            }
            write!(
                f,
                " [{} {label}]",
                if branch.on_true { "TRUE" } else { "FALSE" }
            )?;
        }
        Ok(())
    }
}
