//! Per-opcode metadata: mnemonic names and whether an instruction stores a
//! result, branches, or carries inline text. The decoder consults these
//! tables once per instruction; version is significant because a handful of
//! opcode numbers were reassigned between v4 and v5.

use crate::instruction::{InstructionForm, OperandCount};

/// Mnemonic for an opcode, mostly for logs and error reports.
pub fn name(
    opcode: u8,
    ext_opcode: Option<u8>,
    form: InstructionForm,
    operand_count: OperandCount,
    version: u8,
) -> &'static str {
    match form {
        InstructionForm::Extended => ext_name(ext_opcode.unwrap_or(0)),
        InstructionForm::Variable => {
            if operand_count == OperandCount::Op2 {
                op2_name(opcode & 0x1F)
            } else {
                var_name(opcode & 0x1F, version)
            }
        }
        InstructionForm::Short => match operand_count {
            OperandCount::Op0 => op0_name(opcode, version),
            _ => op1_name(opcode, version),
        },
        InstructionForm::Long => op2_name(opcode),
    }
}

fn op2_name(opcode: u8) -> &'static str {
    match opcode {
        0x01 => "je",
        0x02 => "jl",
        0x03 => "jg",
        0x04 => "dec_chk",
        0x05 => "inc_chk",
        0x06 => "jin",
        0x07 => "test",
        0x08 => "or",
        0x09 => "and",
        0x0A => "test_attr",
        0x0B => "set_attr",
        0x0C => "clear_attr",
        0x0D => "store",
        0x0E => "insert_obj",
        0x0F => "loadw",
        0x10 => "loadb",
        0x11 => "get_prop",
        0x12 => "get_prop_addr",
        0x13 => "get_next_prop",
        0x14 => "add",
        0x15 => "sub",
        0x16 => "mul",
        0x17 => "div",
        0x18 => "mod",
        0x19 => "call_2s",
        0x1A => "call_2n",
        0x1B => "set_colour",
        0x1C => "throw",
        _ => "unknown_2op",
    }
}

fn op1_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x00 => "jz",
        0x01 => "get_sibling",
        0x02 => "get_child",
        0x03 => "get_parent",
        0x04 => "get_prop_len",
        0x05 => "inc",
        0x06 => "dec",
        0x07 => "print_addr",
        0x08 => "call_1s",
        0x09 => "remove_obj",
        0x0A => "print_obj",
        0x0B => "ret",
        0x0C => "jump",
        0x0D => "print_paddr",
        0x0E => "load",
        0x0F => {
            if version >= 5 {
                "call_1n"
            } else {
                "not"
            }
        }
        _ => "unknown_1op",
    }
}

fn op0_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x00 => "rtrue",
        0x01 => "rfalse",
        0x02 => "print",
        0x03 => "print_ret",
        0x04 => "nop",
        0x05 => "save",
        0x06 => "restore",
        0x07 => "restart",
        0x08 => "ret_popped",
        0x09 => {
            if version >= 5 {
                "catch"
            } else {
                "pop"
            }
        }
        0x0A => "quit",
        0x0B => "new_line",
        0x0C => "show_status",
        0x0D => "verify",
        0x0E => "extended",
        0x0F => "piracy",
        _ => "unknown_0op",
    }
}

fn var_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x00 => "call",
        0x01 => "storew",
        0x02 => "storeb",
        0x03 => "put_prop",
        0x04 => {
            if version >= 5 {
                "aread"
            } else {
                "sread"
            }
        }
        0x05 => "print_char",
        0x06 => "print_num",
        0x07 => "random",
        0x08 => "push",
        0x09 => "pull",
        0x0A => "split_window",
        0x0B => "set_window",
        0x0C => "call_vs2",
        0x0D => "erase_window",
        0x0E => "erase_line",
        0x0F => "set_cursor",
        0x10 => "get_cursor",
        0x11 => "set_text_style",
        0x12 => "buffer_mode",
        0x13 => "output_stream",
        0x14 => "input_stream",
        0x15 => "sound_effect",
        0x16 => "read_char",
        0x17 => "scan_table",
        0x18 => "not",
        0x19 => "call_vn",
        0x1A => "call_vn2",
        0x1B => "tokenise",
        0x1C => "encode_text",
        0x1D => "copy_table",
        0x1E => "print_table",
        0x1F => "check_arg_count",
        _ => "unknown_var",
    }
}

fn ext_name(ext_opcode: u8) -> &'static str {
    match ext_opcode {
        0x00 => "save",
        0x01 => "restore",
        0x02 => "log_shift",
        0x03 => "art_shift",
        0x04 => "set_font",
        0x09 => "save_undo",
        0x0A => "restore_undo",
        0x0B => "print_unicode",
        0x0C => "check_unicode",
        _ => "unknown_ext",
    }
}

/// Does the instruction carry a store-variable byte?
pub fn stores_result(
    opcode: u8,
    ext_opcode: Option<u8>,
    form: InstructionForm,
    operand_count: OperandCount,
    version: u8,
) -> bool {
    match form {
        InstructionForm::Extended => matches!(
            ext_opcode,
            Some(0x00..=0x04) | Some(0x09) | Some(0x0A) | Some(0x0C)
        ),
        InstructionForm::Variable => {
            if operand_count == OperandCount::Op2 {
                stores_result_2op(opcode & 0x1F, version)
            } else {
                match opcode & 0x1F {
                    0x00 | 0x07 | 0x0C | 0x16 | 0x17 => true, // call, random, call_vs2, read_char, scan_table
                    0x04 => version >= 5,                     // aread stores the terminator
                    0x18 => version >= 5,                     // not
                    _ => false,
                }
            }
        }
        InstructionForm::Short => match operand_count {
            OperandCount::Op0 => match opcode {
                0x05 | 0x06 => version == 4, // save/restore branch in v1-3, store in v4
                0x09 => version >= 5,        // catch
                _ => false,
            },
            _ => match opcode {
                0x01..=0x04 => true, // get_sibling, get_child, get_parent, get_prop_len
                0x08 => true,        // call_1s
                0x0E => true,        // load
                0x0F => version <= 4, // not; call_1n in v5 discards
                _ => false,
            },
        },
        InstructionForm::Long => stores_result_2op(opcode, version),
    }
}

fn stores_result_2op(opcode: u8, _version: u8) -> bool {
    matches!(opcode, 0x08 | 0x09 | 0x0F..=0x19)
}

/// Does the instruction carry branch bytes?
pub fn has_branch(
    opcode: u8,
    _ext_opcode: Option<u8>,
    form: InstructionForm,
    operand_count: OperandCount,
    version: u8,
) -> bool {
    match form {
        InstructionForm::Extended => false,
        InstructionForm::Variable => {
            if operand_count == OperandCount::Op2 {
                has_branch_2op(opcode & 0x1F)
            } else {
                matches!(opcode & 0x1F, 0x17 | 0x1F) // scan_table, check_arg_count
            }
        }
        InstructionForm::Short => match operand_count {
            OperandCount::Op0 => match opcode {
                0x05 | 0x06 => version <= 3, // save/restore branch forms
                0x0D => true,                // verify
                0x0F => version >= 5,        // piracy
                _ => false,
            },
            _ => matches!(opcode, 0x00..=0x02), // jz, get_sibling, get_child
        },
        InstructionForm::Long => has_branch_2op(opcode),
    }
}

fn has_branch_2op(opcode: u8) -> bool {
    matches!(opcode, 0x01..=0x07 | 0x0A)
}

/// Does the instruction end with inline Z-text?
pub fn has_text(opcode: u8, form: InstructionForm, operand_count: OperandCount) -> bool {
    form == InstructionForm::Short
        && operand_count == OperandCount::Op0
        && matches!(opcode, 0x02 | 0x03) // print, print_ret
}
