use log::{debug, info};

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::input::LineInput;
use crate::instruction::{BranchTarget, Instruction, InstructionForm, OperandCount, OperandType};
use crate::quetzal;
use crate::screen::Screen;
use crate::storage::{slot_name, SaveStore};
use crate::text;
use crate::vm::VM;

/// Outcome of one executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Fall through to the next instruction
    Continue,
    /// A branch redirected the program counter
    Branched,
    /// A routine was entered
    Called,
    /// A routine returned this value
    Returned(u16),
    /// The restart opcode ran; the run loop reinitializes the session
    Restart,
    /// The quit opcode ran
    Quit,
    /// The main context returned; treated as end of story
    GameOver,
}

/// Nesting limit for stream-3 table redirection, per the Z-machine spec.
const MAX_STREAM3_DEPTH: usize = 16;

/// The opcode engine: fetch, decode, execute.
///
/// Owns the session (`VM`) and the three collaborators. Execution is
/// strictly synchronous; the read opcodes are the only points where the
/// engine blocks, and they block inside the input collaborator.
pub struct Interpreter {
    pub vm: VM,
    screen: Box<dyn Screen>,
    input: Box<dyn LineInput>,
    store: Box<dyn SaveStore>,
    /// Stream-3 redirection stack: (table address, characters written)
    stream3: Vec<(u32, u16)>,
    /// Stream 1; stories can switch the screen off
    screen_enabled: bool,
    instruction_count: u64,
}

impl Interpreter {
    pub fn new(
        vm: VM,
        screen: Box<dyn Screen>,
        input: Box<dyn LineInput>,
        store: Box<dyn SaveStore>,
    ) -> Interpreter {
        Interpreter {
            vm,
            screen,
            input,
            store,
            stream3: Vec::new(),
            screen_enabled: true,
            instruction_count: 0,
        }
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    fn version(&self) -> u8 {
        self.vm.game.header.version
    }

    pub fn run(&mut self) -> Result<()> {
        self.run_with_limit(None)
    }

    /// The fetch-decode-execute loop. An optional instruction cap keeps
    /// tests and scripted runs bounded.
    pub fn run_with_limit(&mut self, limit: Option<u64>) -> Result<()> {
        if let Some(warning) = self.vm.game.checksum_warning() {
            // Reported through the story's own output channel, then ignored
            let message = format!("[{warning}]\n");
            self.screen.print(&message)?;
        }
        info!("starting execution at pc {:#06x}", self.vm.pc);

        loop {
            let pc = self.vm.pc;
            let inst = Instruction::decode(&self.vm.game.memory, pc as usize, self.version())?;
            self.vm.pc += inst.size as u32;

            match self.execute_instruction(&inst)? {
                ExecutionResult::Quit => {
                    info!("quit after {} instructions", self.instruction_count);
                    return Ok(());
                }
                ExecutionResult::GameOver => {
                    info!("main routine returned; story over");
                    return Ok(());
                }
                ExecutionResult::Restart => {
                    debug!("restarting story");
                    self.vm.restart();
                    self.stream3.clear();
                    self.screen_enabled = true;
                    self.screen.clear()?;
                }
                _ => {}
            }

            self.instruction_count += 1;
            if let Some(limit) = limit {
                if self.instruction_count >= limit {
                    info!("instruction limit {limit} reached");
                    return Ok(());
                }
            }
        }
    }

    /// Execute one decoded instruction.
    pub fn execute_instruction(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        let operands = self.resolve_operands(inst)?;
        match inst.form {
            InstructionForm::Extended => self.execute_ext(inst, &operands),
            _ => match inst.operand_count {
                OperandCount::Op0 => self.execute_0op(inst),
                OperandCount::Op1 => {
                    let operand = *operands.first().ok_or_else(|| {
                        Error::CorruptStory(format!("{} without its operand", inst.name(3)))
                    })?;
                    self.execute_1op(inst, operand)
                }
                OperandCount::Op2 => self.execute_2op(inst, &operands),
                OperandCount::Var => self.execute_var(inst, &operands),
            },
        }
    }

    /// Fetch operand values; variable operands read (and for the stack,
    /// pop) left to right.
    fn resolve_operands(&mut self, inst: &Instruction) -> Result<Vec<u16>> {
        let mut values = Vec::with_capacity(inst.operands.len());
        for (op_type, &raw) in inst.operand_types.iter().zip(&inst.operands) {
            values.push(match op_type {
                OperandType::Variable => self.vm.read_variable(raw as u8)?,
                _ => raw,
            });
        }
        Ok(values)
    }

    fn unsupported(&self, inst: &Instruction) -> Error {
        Error::UnsupportedOpcode {
            opcode: inst.ext_opcode.unwrap_or(inst.opcode),
            pc: self.vm.pc - inst.size as u32,
        }
    }

    fn store_result(&mut self, inst: &Instruction, value: u16) -> Result<()> {
        if let Some(var) = inst.store_var {
            self.vm.write_variable(var, value)?;
        }
        Ok(())
    }

    /// Apply a branch specification. Offsets 0 and 1 return from the
    /// current routine instead of jumping; other offsets land relative to
    /// the instruction after the branch data.
    pub(crate) fn do_branch(
        &mut self,
        inst: &Instruction,
        condition: bool,
    ) -> Result<ExecutionResult> {
        let Some(branch) = inst.branch else {
            return Ok(ExecutionResult::Continue);
        };
        if condition != branch.on_true {
            return Ok(ExecutionResult::Continue);
        }
        match branch.target {
            BranchTarget::ReturnFalse => self.do_return(0),
            BranchTarget::ReturnTrue => self.do_return(1),
            BranchTarget::Offset(offset) => {
                self.vm.pc = (self.vm.pc as i64 + offset as i64 - 2) as u32;
                Ok(ExecutionResult::Branched)
            }
        }
    }

    fn do_call(&mut self, operands: &[u16], store: Option<u8>) -> Result<ExecutionResult> {
        let packed = *operands
            .first()
            .ok_or_else(|| Error::CorruptStory("call without a routine operand".into()))?;
        self.vm.call_routine(packed, &operands[1..], store)?;
        Ok(ExecutionResult::Called)
    }

    fn do_return(&mut self, value: u16) -> Result<ExecutionResult> {
        if self.vm.return_routine(value)? {
            Ok(ExecutionResult::GameOver)
        } else {
            Ok(ExecutionResult::Returned(value))
        }
    }

    // --- output ---

    fn output_char(&mut self, ch: char) -> Result<()> {
        if let Some((table, count)) = self.stream3.last_mut() {
            let zscii = match ch {
                '\n' => 13,
                c if c.is_ascii() => c as u8,
                _ => b'?',
            };
            let addr = *table + 2 + *count as u32;
            self.vm.game.write_byte(addr, zscii)?;
            *count += 1;
        } else if self.screen_enabled {
            self.screen.print_char(ch)?;
        }
        Ok(())
    }

    pub(crate) fn output_text(&mut self, string: &str) -> Result<()> {
        if self.stream3.is_empty() {
            if self.screen_enabled {
                self.screen.print(string)?;
            }
            Ok(())
        } else {
            // Stream 3 takes every character; nothing reaches the screen
            string.chars().try_for_each(|ch| self.output_char(ch))
        }
    }

    fn print_zscii(&mut self, code: u16) -> Result<()> {
        match code {
            0 => Ok(()),
            13 => self.output_char('\n'),
            32..=126 => self.output_char(code as u8 as char),
            _ => {
                debug!("print_char of unprintable ZSCII {code}");
                self.output_char('?')
            }
        }
    }

    /// v3 status line: location object's short name on the left, score and
    /// turns (or hours:minutes for a time game) on the right.
    fn show_status(&mut self) -> Result<()> {
        let location = self.vm.read_global(0x10)?;
        let name = self.vm.objects.short_name(&self.vm.game, location)?;
        let right = if self.vm.game.header.is_time_game() {
            let hours = self.vm.read_global(0x11)?;
            let minutes = self.vm.read_global(0x12)?;
            format!("Time: {hours}:{minutes:02}")
        } else {
            let score = self.vm.read_global(0x11)? as i16;
            let moves = self.vm.read_global(0x12)?;
            format!("Score: {score}  Moves: {moves}")
        };
        self.screen.status_line(&name, &right)
    }

    // --- reading ---

    /// The read opcode: the engine's single suspension point. Blocks on
    /// the input collaborator for one line, fills the text buffer in the
    /// version's layout, and tokenizes into the parse buffer.
    fn do_read(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        let text_buffer = *operands
            .first()
            .ok_or_else(|| Error::CorruptStory("read without a text buffer".into()))? as u32;
        let parse_buffer = operands.get(1).copied().unwrap_or(0) as u32;
        if operands.len() >= 4 && operands[2] > 0 && operands[3] > 0 {
            debug!(
                "read timer ({} tenths, routine {:#06x}) ignored",
                operands[2], operands[3]
            );
        }

        let version = self.version();
        if version <= 3 {
            self.show_status()?;
        }

        // Fold to lowercase and squash anything non-ASCII so buffer writes
        // are one byte per character
        let line: String = self
            .input
            .read_line()?
            .chars()
            .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { '?' })
            .collect();
        let max_len = self.vm.game.read_byte(text_buffer)? as usize;

        let kept = if version <= 4 {
            // Text from byte 1, zero terminated
            let kept = line.len().min(max_len.saturating_sub(1));
            for (i, &b) in line.as_bytes()[..kept].iter().enumerate() {
                self.vm.game.write_byte(text_buffer + 1 + i as u32, b)?;
            }
            self.vm.game.write_byte(text_buffer + 1 + kept as u32, 0)?;
            kept
        } else {
            // Length at byte 1, text from byte 2
            let kept = line.len().min(max_len);
            self.vm.game.write_byte(text_buffer + 1, kept as u8)?;
            for (i, &b) in line.as_bytes()[..kept].iter().enumerate() {
                self.vm.game.write_byte(text_buffer + 2 + i as u32, b)?;
            }
            kept
        };
        debug!("read line: '{}'", &line[..kept]);

        if parse_buffer != 0 {
            parse_into(&mut self.vm, &line[..kept], parse_buffer, None, false)?;
        }
        if version >= 5 {
            // aread stores the terminating character (always newline here)
            self.store_result(inst, 13)?;
        }
        Ok(ExecutionResult::Continue)
    }

    fn do_read_char(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        if operands.len() >= 3 && operands[1] > 0 && operands[2] > 0 {
            debug!("read_char timer ignored");
        }
        let ch = self.input.read_char()?;
        let zscii = match ch {
            '\n' => 13,
            c if c.is_ascii() => c as u16,
            _ => b'?' as u16,
        };
        self.store_result(inst, zscii)?;
        Ok(ExecutionResult::Continue)
    }

    // --- save / restore ---

    fn do_save(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        // The stream records the address of this instruction's branch or
        // store byte so a restore can re-report success through it.
        let resume_pc = if self.version() <= 3 {
            self.vm.pc - inst.branch.map_or(0, |b| b.bytes as u32)
        } else {
            self.vm.pc - 1
        };
        let bytes = quetzal::save_state(&self.vm, resume_pc);
        let name = slot_name(&self.vm.game.header);
        let success = match self.store.write(&name, &bytes) {
            Ok(()) => true,
            Err(err) => {
                self.output_text(&format!("Save failed: {err}.\n"))?;
                false
            }
        };
        if self.version() <= 3 {
            self.do_branch(inst, success)
        } else {
            self.store_result(inst, success as u16)?;
            Ok(ExecutionResult::Continue)
        }
    }

    fn do_restore(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        let name = slot_name(&self.vm.game.header);
        let outcome = if self.store.exists(&name) {
            self.store
                .read(&name)
                .and_then(|bytes| quetzal::restore_state(&mut self.vm, &bytes))
        } else {
            Err(Error::Io("no saved story found".into()))
        };

        match outcome {
            Ok(()) => {
                self.finish_restored_save()?;
                Ok(ExecutionResult::Branched)
            }
            Err(
                err @ (Error::RestoreChecksumMismatch | Error::BadSaveData(_) | Error::Io(_)),
            ) => {
                // Recoverable: tell the player, fail the opcode, play on
                self.output_text(&format!("Restore failed: {err}.\n"))?;
                if self.version() <= 3 {
                    self.do_branch(inst, false)
                } else {
                    self.store_result(inst, 0)?;
                    Ok(ExecutionResult::Continue)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// After a successful restore the program counter sits on the original
    /// save instruction's branch or store byte; report success through it.
    fn finish_restored_save(&mut self) -> Result<()> {
        if self.version() <= 3 {
            let first = self.vm.game.read_byte(self.vm.pc)?;
            self.vm.pc += 1;
            let on_true = first & 0x80 != 0;
            let offset = if first & 0x40 != 0 {
                (first & 0x3F) as i16
            } else {
                let second = self.vm.game.read_byte(self.vm.pc)?;
                self.vm.pc += 1;
                let mut value = (((first & 0x3F) as i16) << 8) | second as i16;
                if value & 0x2000 != 0 {
                    value -= 0x4000;
                }
                value
            };
            if on_true {
                match offset {
                    0 => {
                        self.vm.return_routine(0)?;
                    }
                    1 => {
                        self.vm.return_routine(1)?;
                    }
                    n => self.vm.pc = (self.vm.pc as i64 + n as i64 - 2) as u32,
                }
            }
            Ok(())
        } else {
            // v4+ save stores its result; restore reports 2 through it
            let var = self.vm.game.read_byte(self.vm.pc)?;
            self.vm.pc += 1;
            self.vm.write_variable(var, 2)
        }
    }

    // --- opcode groups ---

    fn execute_0op(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        match inst.opcode {
            0x00 => self.do_return(1),
            0x01 => self.do_return(0),
            0x02 => {
                self.output_text(inst.text.as_deref().unwrap_or(""))?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                self.output_text(inst.text.as_deref().unwrap_or(""))?;
                self.output_char('\n')?;
                self.do_return(1)
            }
            0x04 => Ok(ExecutionResult::Continue), // nop
            0x05 if self.version() <= 4 => self.do_save(inst),
            0x06 if self.version() <= 4 => self.do_restore(inst),
            0x07 => Ok(ExecutionResult::Restart),
            0x08 => {
                let value = self.vm.pop()?;
                self.do_return(value)
            }
            0x09 if self.version() <= 4 => {
                self.vm.pop()?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                // catch: the current frame count, for throw to unwind to
                let depth = self.vm.call_depth() as u16;
                self.store_result(inst, depth)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => Ok(ExecutionResult::Quit),
            0x0B => {
                self.output_char('\n')?;
                Ok(ExecutionResult::Continue)
            }
            0x0C if self.version() == 3 => {
                self.show_status()?;
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                // Illegal after v3; tolerated as a no-op like most terps
                debug!("show_status in v{} ignored", self.version());
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                let ok = self.vm.game.verify();
                debug!("verify: {}", if ok { "match" } else { "mismatch" });
                self.do_branch(inst, ok)
            }
            0x0F if self.version() >= 5 => self.do_branch(inst, true), // piracy: gullible
            _ => Err(self.unsupported(inst)),
        }
    }

    fn execute_1op(&mut self, inst: &Instruction, operand: u16) -> Result<ExecutionResult> {
        match inst.opcode {
            0x00 => self.do_branch(inst, operand == 0),
            0x01 => {
                let sibling = self.vm.objects.sibling(&self.vm.game, operand)?;
                self.store_result(inst, sibling)?;
                self.do_branch(inst, sibling != 0)
            }
            0x02 => {
                let child = self.vm.objects.child(&self.vm.game, operand)?;
                self.store_result(inst, child)?;
                self.do_branch(inst, child != 0)
            }
            0x03 => {
                let parent = self.vm.objects.parent(&self.vm.game, operand)?;
                self.store_result(inst, parent)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                let len = self.vm.objects.get_property_len(&self.vm.game, operand)?;
                self.store_result(inst, len)?;
                Ok(ExecutionResult::Continue)
            }
            0x05 => {
                let var = operand as u8;
                let value = (self.vm.read_variable_in_place(var)? as i16).wrapping_add(1);
                self.vm.write_variable_in_place(var, value as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                let var = operand as u8;
                let value = (self.vm.read_variable_in_place(var)? as i16).wrapping_sub(1);
                self.vm.write_variable_in_place(var, value as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                let (string, _) = text::decode_string(
                    &self.vm.game.memory,
                    operand as usize,
                    self.vm.game.header.abbrev_table as usize,
                    self.version(),
                )?;
                self.output_text(&string)?;
                Ok(ExecutionResult::Continue)
            }
            0x08 if self.version() >= 4 => self.do_call(&[operand], inst.store_var),
            0x09 => {
                self.vm.objects.remove_object(&mut self.vm.game, operand)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                let name = self.vm.objects.short_name(&self.vm.game, operand)?;
                self.output_text(&name)?;
                Ok(ExecutionResult::Continue)
            }
            0x0B => self.do_return(operand),
            0x0C => {
                let offset = operand as i16;
                self.vm.pc = (self.vm.pc as i64 + offset as i64 - 2) as u32;
                Ok(ExecutionResult::Branched)
            }
            0x0D => {
                let addr = self.vm.game.unpack_string(operand);
                let (string, _) = text::decode_string(
                    &self.vm.game.memory,
                    addr as usize,
                    self.vm.game.header.abbrev_table as usize,
                    self.version(),
                )?;
                self.output_text(&string)?;
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                let value = self.vm.read_variable_in_place(operand as u8)?;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0F if self.version() <= 4 => {
                self.store_result(inst, !operand)?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => self.do_call(&[operand], None), // call_1n
            _ => Err(self.unsupported(inst)),
        }
    }

    fn execute_2op(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        // je alone takes a variable operand count; everything else is a pair
        if inst.opcode != 0x01 && operands.len() < 2 {
            return Err(Error::CorruptStory(format!(
                "{} with {} operands",
                inst.name(self.version()),
                operands.len()
            )));
        }
        let a = operands.first().copied().unwrap_or(0);
        let b = operands.get(1).copied().unwrap_or(0);

        match inst.opcode {
            0x01 => {
                if operands.len() < 2 {
                    return Err(Error::CorruptStory("je with a single operand".into()));
                }
                let equal = operands[1..].iter().any(|&other| other == a);
                self.do_branch(inst, equal)
            }
            0x02 => self.do_branch(inst, (a as i16) < (b as i16)),
            0x03 => self.do_branch(inst, (a as i16) > (b as i16)),
            0x04 => {
                let var = a as u8;
                let value = (self.vm.read_variable_in_place(var)? as i16).wrapping_sub(1);
                self.vm.write_variable_in_place(var, value as u16)?;
                self.do_branch(inst, value < b as i16)
            }
            0x05 => {
                let var = a as u8;
                let value = (self.vm.read_variable_in_place(var)? as i16).wrapping_add(1);
                self.vm.write_variable_in_place(var, value as u16)?;
                self.do_branch(inst, value > b as i16)
            }
            0x06 => {
                let parent = self.vm.objects.parent(&self.vm.game, a)?;
                self.do_branch(inst, parent == b)
            }
            0x07 => self.do_branch(inst, a & b == b),
            0x08 => {
                self.store_result(inst, a | b)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                self.store_result(inst, a & b)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                let set = self.vm.objects.test_attribute(&self.vm.game, a, b)?;
                self.do_branch(inst, set)
            }
            0x0B => {
                self.vm.objects.set_attribute(&mut self.vm.game, a, b)?;
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                self.vm.objects.clear_attribute(&mut self.vm.game, a, b)?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                self.vm.write_variable_in_place(a as u8, b)?;
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                self.vm.objects.insert_object(&mut self.vm.game, a, b)?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                let addr = a.wrapping_add(b.wrapping_mul(2)) as u32;
                let value = self.vm.game.read_word(addr)?;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x10 => {
                let addr = a.wrapping_add(b) as u32;
                let value = self.vm.game.read_byte(addr)? as u16;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x11 => {
                let value = self.vm.objects.get_property(&self.vm.game, a, b as u8)?;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x12 => {
                let addr = self.vm.objects.get_property_addr(&self.vm.game, a, b as u8)?;
                self.store_result(inst, addr)?;
                Ok(ExecutionResult::Continue)
            }
            0x13 => {
                let next = self.vm.objects.get_next_property(&self.vm.game, a, b as u8)?;
                self.store_result(inst, next)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => {
                let value = (a as i16).wrapping_add(b as i16) as u16;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x15 => {
                let value = (a as i16).wrapping_sub(b as i16) as u16;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x16 => {
                let value = (a as i16).wrapping_mul(b as i16) as u16;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x17 => {
                if b == 0 {
                    return Err(Error::DivisionByZero);
                }
                let value = (a as i16).wrapping_div(b as i16) as u16;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x18 => {
                if b == 0 {
                    return Err(Error::DivisionByZero);
                }
                let value = (a as i16).wrapping_rem(b as i16) as u16;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x19 if self.version() >= 4 => self.do_call(&[a, b], inst.store_var),
            0x1A if self.version() >= 5 => self.do_call(&[a, b], None),
            0x1B if self.version() >= 5 => {
                // set_colour: colors belong to the display collaborator
                debug!("set_colour {a} {b} ignored");
                Ok(ExecutionResult::Continue)
            }
            0x1C if self.version() >= 5 => {
                // throw: unwind to the frame depth caught earlier
                let depth = b as usize;
                if depth == 0 || depth > self.vm.call_depth() {
                    return Err(Error::CorruptStory(format!(
                        "throw to frame {depth} of {}",
                        self.vm.call_depth()
                    )));
                }
                self.vm.call_stack.truncate(depth);
                self.do_return(a)
            }
            _ => Err(self.unsupported(inst)),
        }
    }

    fn execute_var(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        match inst.opcode {
            0x00 => self.do_call(operands, inst.store_var),
            0x01 => {
                let [array, index, value] = first_three(inst, operands, self.version())?;
                let addr = array.wrapping_add(index.wrapping_mul(2)) as u32;
                self.vm.game.write_word(addr, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x02 => {
                let [array, index, value] = first_three(inst, operands, self.version())?;
                let addr = array.wrapping_add(index) as u32;
                self.vm.game.write_byte(addr, (value & 0xFF) as u8)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                let [obj, prop, value] = first_three(inst, operands, self.version())?;
                self.vm
                    .objects
                    .put_property(&mut self.vm.game, obj, prop as u8, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => self.do_read(inst, operands),
            0x05 => {
                let code = operands.first().copied().unwrap_or(0);
                self.print_zscii(code)?;
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                let value = operands.first().copied().unwrap_or(0) as i16;
                self.output_text(&value.to_string())?;
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                let range = operands.first().copied().unwrap_or(0) as i16;
                let value = if range < 0 {
                    self.vm.rng.reseed(-(range as i64) as u64);
                    0
                } else if range == 0 {
                    self.vm.rng.reseed_random();
                    0
                } else {
                    self.vm.rng.next(range as u16)
                };
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x08 => {
                let value = operands.first().copied().unwrap_or(0);
                self.vm.push(value)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                let var = *operands
                    .first()
                    .ok_or_else(|| Error::CorruptStory("pull without a variable".into()))?
                    as u8;
                let value = self.vm.pop()?;
                self.vm.write_variable_in_place(var, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A | 0x0B | 0x0E | 0x0F | 0x11 | 0x12 => {
                // Window, cursor, style, and buffering control reduce to
                // plain-text semantics: the character stream is all there is
                debug!("{} reduced to text stream semantics", inst.name(self.version()));
                Ok(ExecutionResult::Continue)
            }
            0x0C if self.version() >= 4 => self.do_call(operands, inst.store_var),
            0x0D if self.version() >= 4 => {
                // erase_window: clearing the whole screen is the only part
                // with a text-stream meaning
                if operands.first().copied().unwrap_or(0) as i16 == -1 {
                    self.screen.clear()?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x10 if self.version() >= 4 => {
                // get_cursor: a plain stream has no cursor; report 1,1
                let table = operands.first().copied().unwrap_or(0) as u32;
                self.vm.game.write_word(table, 1)?;
                self.vm.game.write_word(table + 2, 1)?;
                Ok(ExecutionResult::Continue)
            }
            0x13 => {
                self.do_output_stream(operands)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => {
                debug!("input_stream {:?} ignored", operands.first());
                Ok(ExecutionResult::Continue)
            }
            0x15 => {
                // Sound is a non-goal; the opcode still has to decode so
                // stories that bleep keep running
                debug!("sound_effect {:?} ignored", operands.first());
                Ok(ExecutionResult::Continue)
            }
            0x16 if self.version() >= 4 => self.do_read_char(inst, operands),
            0x17 if self.version() >= 4 => self.do_scan_table(inst, operands),
            0x18 if self.version() >= 5 => {
                let value = operands.first().copied().unwrap_or(0);
                self.store_result(inst, !value)?;
                Ok(ExecutionResult::Continue)
            }
            0x19 | 0x1A if self.version() >= 5 => self.do_call(operands, None),
            0x1B if self.version() >= 5 => {
                let [text_buffer, parse_buffer] = match operands {
                    [t, p, ..] => [*t as u32, *p as u32],
                    _ => {
                        return Err(Error::CorruptStory("tokenise without buffers".into()));
                    }
                };
                let dict = operands.get(2).copied().filter(|&d| d != 0).map(u32::from);
                let skip_unknown = operands.get(3).copied().unwrap_or(0) != 0;
                let line = self.read_text_buffer(text_buffer)?;
                parse_into(&mut self.vm, &line, parse_buffer, dict, skip_unknown)?;
                Ok(ExecutionResult::Continue)
            }
            0x1C if self.version() >= 5 => {
                let [zscii_text, length, from, dest] = match operands {
                    [a, b, c, d, ..] => [*a, *b, *c, *d],
                    _ => return Err(Error::CorruptStory("encode_text operands".into())),
                };
                let mut word = String::new();
                for i in 0..length {
                    let b = self.vm.game.read_byte((zscii_text + from + i) as u32)?;
                    word.push(b as char);
                }
                let encoded = text::encode_word(&word, self.version());
                for (i, &b) in encoded.iter().enumerate() {
                    self.vm.game.write_byte(dest as u32 + i as u32, b)?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x1D if self.version() >= 5 => {
                self.do_copy_table(operands)?;
                Ok(ExecutionResult::Continue)
            }
            0x1E if self.version() >= 5 => {
                self.do_print_table(operands)?;
                Ok(ExecutionResult::Continue)
            }
            0x1F if self.version() >= 5 => {
                let wanted = operands.first().copied().unwrap_or(0);
                let supplied = self
                    .vm
                    .call_stack
                    .last()
                    .map_or(0, |frame| frame.arg_count as u16);
                self.do_branch(inst, wanted <= supplied)
            }
            _ => Err(self.unsupported(inst)),
        }
    }

    fn execute_ext(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        match inst.ext_opcode.unwrap_or(0xFF) {
            0x00 => {
                if !operands.is_empty() {
                    debug!("ext save auxiliary-table operands ignored");
                }
                self.do_save(inst)
            }
            0x01 => {
                if !operands.is_empty() {
                    debug!("ext restore auxiliary-table operands ignored");
                }
                self.do_restore(inst)
            }
            0x02 => {
                let number = operands.first().copied().unwrap_or(0);
                let places = operands.get(1).copied().unwrap_or(0) as i16;
                let value = if places >= 0 {
                    number.wrapping_shl(places as u32)
                } else {
                    number.wrapping_shr((-places) as u32)
                };
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                let number = operands.first().copied().unwrap_or(0) as i16;
                let places = operands.get(1).copied().unwrap_or(0) as i16;
                let value = if places >= 0 {
                    number.wrapping_shl(places as u32)
                } else {
                    number.wrapping_shr((-places) as u32)
                };
                self.store_result(inst, value as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                // set_font: only the normal font exists in a plain stream
                let font = operands.first().copied().unwrap_or(0);
                let result = if font == 1 || font == 0 { 1 } else { 0 };
                self.store_result(inst, result)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                // save_undo: -1 reports "no undo here"; the single-slot
                // save model does not cover in-memory undo states
                self.store_result(inst, 0xFFFF)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                self.store_result(inst, 0)?;
                Ok(ExecutionResult::Continue)
            }
            _ => Err(self.unsupported(inst)),
        }
    }

    // --- var-opcode helpers ---

    fn do_output_stream(&mut self, operands: &[u16]) -> Result<()> {
        let stream = operands.first().copied().unwrap_or(0) as i16;
        match stream {
            0 => {}
            1 => self.screen_enabled = true,
            -1 => self.screen_enabled = false,
            2 | -2 | 4 | -4 => debug!("output_stream {stream} (transcript/script) ignored"),
            3 => {
                let table = operands.get(1).copied().ok_or_else(|| {
                    Error::CorruptStory("output_stream 3 without a table".into())
                })? as u32;
                if self.stream3.len() >= MAX_STREAM3_DEPTH {
                    return Err(Error::CorruptStory("output_stream 3 nested too deep".into()));
                }
                self.stream3.push((table, 0));
            }
            -3 => {
                if let Some((table, count)) = self.stream3.pop() {
                    self.vm.game.write_word(table, count)?;
                } else {
                    debug!("output_stream -3 with no redirection active");
                }
            }
            _ => debug!("output_stream {stream} unknown, ignored"),
        }
        Ok(())
    }

    fn do_scan_table(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        let [x, table, len] = match operands {
            [x, t, l, ..] => [*x, *t, *l],
            _ => return Err(Error::CorruptStory("scan_table operands".into())),
        };
        let form = operands.get(3).copied().unwrap_or(0x82);
        let field = (form & 0x7F) as u32;
        if field == 0 {
            return Err(Error::CorruptStory("scan_table with zero field length".into()));
        }
        let words = form & 0x80 != 0;

        let mut found = 0u16;
        let mut addr = table as u32;
        for _ in 0..len {
            let value = if words {
                self.vm.game.read_word(addr)?
            } else {
                self.vm.game.read_byte(addr)? as u16
            };
            if value == x {
                found = addr as u16;
                break;
            }
            addr += field;
        }
        self.store_result(inst, found)?;
        self.do_branch(inst, found != 0)
    }

    fn do_copy_table(&mut self, operands: &[u16]) -> Result<()> {
        let [first, second, size] = match operands {
            [f, s, z, ..] => [*f, *s, *z],
            _ => return Err(Error::CorruptStory("copy_table operands".into())),
        };
        let size_i = size as i16;
        let length = size_i.unsigned_abs() as u32;
        if second == 0 {
            for i in 0..length {
                self.vm.game.write_byte(first as u32 + i, 0)?;
            }
        } else if size_i >= 0 && second > first && second < first.wrapping_add(size) {
            // Overlapping forward copy would trample the source
            for i in (0..length).rev() {
                let byte = self.vm.game.read_byte(first as u32 + i)?;
                self.vm.game.write_byte(second as u32 + i, byte)?;
            }
        } else {
            for i in 0..length {
                let byte = self.vm.game.read_byte(first as u32 + i)?;
                self.vm.game.write_byte(second as u32 + i, byte)?;
            }
        }
        Ok(())
    }

    fn do_print_table(&mut self, operands: &[u16]) -> Result<()> {
        let [addr, width] = match operands {
            [a, w, ..] => [*a, *w],
            _ => return Err(Error::CorruptStory("print_table operands".into())),
        };
        let height = operands.get(2).copied().unwrap_or(1);
        let skip = operands.get(3).copied().unwrap_or(0);
        let mut at = addr as u32;
        for row in 0..height {
            for _ in 0..width {
                let code = self.vm.game.read_byte(at)? as u16;
                self.print_zscii(code)?;
                at += 1;
            }
            at += skip as u32;
            if row + 1 < height {
                self.output_char('\n')?;
            }
        }
        Ok(())
    }

    /// Read back the typed line from a text buffer in the version's layout.
    fn read_text_buffer(&self, buffer: u32) -> Result<String> {
        let mut line = String::new();
        if self.version() >= 5 {
            let len = self.vm.game.read_byte(buffer + 1)? as u32;
            for i in 0..len {
                line.push(self.vm.game.read_byte(buffer + 2 + i)? as char);
            }
        } else {
            let mut at = buffer + 1;
            loop {
                let b = self.vm.game.read_byte(at)?;
                if b == 0 {
                    break;
                }
                line.push(b as char);
                at += 1;
            }
        }
        Ok(line)
    }
}

/// Tokenize `line` and write parse-buffer records: per token a dictionary
/// address (0 on a miss — the story decides what that means), the token
/// length, and its position in the text buffer.
fn parse_into(
    vm: &mut VM,
    line: &str,
    parse_buffer: u32,
    dict_addr: Option<u32>,
    skip_unknown: bool,
) -> Result<()> {
    let user_dict;
    let dict: &Dictionary = match dict_addr {
        Some(addr) => {
            user_dict = Dictionary::parse_at(&vm.game, addr)?;
            &user_dict
        }
        None => &vm.dictionary,
    };

    let tokens = dict.tokenize(line);
    let mut entries = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let addr = dict.lookup(&vm.game, &token.text)?;
        entries.push((addr, token.text.len(), token.start));
    }

    let position_base = if vm.game.header.version >= 5 { 2 } else { 1 };
    let max_words = vm.game.read_byte(parse_buffer)? as usize;
    let count = entries.len().min(max_words);
    vm.game.write_byte(parse_buffer + 1, count as u8)?;
    for (i, &(addr, len, start)) in entries.iter().take(count).enumerate() {
        let entry = parse_buffer + 2 + i as u32 * 4;
        if skip_unknown && addr == 0 {
            continue;
        }
        vm.game.write_word(entry, addr)?;
        vm.game.write_byte(entry + 2, len as u8)?;
        vm.game.write_byte(entry + 3, (start + position_base) as u8)?;
    }
    Ok(())
}

/// Three leading operands or a corrupt-story error.
fn first_three(inst: &Instruction, operands: &[u16], version: u8) -> Result<[u16; 3]> {
    match operands {
        [a, b, c, ..] => Ok([*a, *b, *c]),
        _ => Err(Error::CorruptStory(format!(
            "{} needs three operands, got {}",
            inst.name(version),
            operands.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ScriptedInput;
    use crate::screen::BufferScreen;
    use crate::storage::MemStore;
    use crate::test_utils::StoryBuilder;

    fn build_interpreter(code: &[u8]) -> Interpreter {
        let game = StoryBuilder::new(3).code(code).build_game();
        let vm = VM::new(game).unwrap();
        Interpreter::new(
            vm,
            Box::new(BufferScreen::new()),
            Box::new(ScriptedInput::new(Vec::<String>::new())),
            Box::new(MemStore::new()),
        )
    }

    #[test]
    fn test_arithmetic_and_store() {
        // add #5 #7 -> G00; quit
        let mut interp = build_interpreter(&[0x14, 0x05, 0x07, 0x10, 0xBA]);
        interp.run().unwrap();
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 12);
    }

    #[test]
    fn test_signed_division() {
        // div #0xFFFB (-5) #2 -> G00; quit
        let mut interp = build_interpreter(&[0xD7, 0x1F, 0xFF, 0xFB, 0x02, 0x10, 0xBA]);
        interp.run().unwrap();
        assert_eq!(interp.vm.read_global(0x10).unwrap() as i16, -2);
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        // div #9 #0 -> G00
        let mut interp = build_interpreter(&[0x17, 0x09, 0x00, 0x10, 0xBA]);
        assert_eq!(interp.run().unwrap_err(), Error::DivisionByZero);
    }

    #[test]
    fn test_je_branch_skips() {
        let code = [
            0x01, 0x03, 0x03, 0xC5, // je #3 #3 [TRUE +5]: over the next store
            0x0D, 0x10, 0x01, // store G00 1 (skipped)
            0x0D, 0x10, 0x02, // store G00 2
            0xBA, // quit
        ];
        let mut interp = build_interpreter(&code);
        interp.run().unwrap();
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 2);
    }

    #[test]
    fn test_unsupported_opcode_reports_pc() {
        // 0OP 0x0E ("extended") is not an instruction in v3
        let mut interp = build_interpreter(&[0xBE, 0xBA]);
        let err = interp.run().unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedOpcode {
                opcode: 0x0E,
                pc: StoryBuilder::INITIAL_PC as u32
            }
        );
    }

    #[test]
    fn test_stream3_redirects_output() {
        let table = StoryBuilder::SCRATCH as u16;
        let code = [
            0xF3, 0x4F, 0x03, (table >> 8) as u8, (table & 0xFF) as u8, // output_stream 3 TABLE
            0xE6, 0x7F, 0x2A, // print_num 42
            0xF3, 0x3F, 0xFF, 0xFD, // output_stream -3
            0xBA, // quit
        ];
        let mut interp = build_interpreter(&code);
        interp.run().unwrap();
        let base = StoryBuilder::SCRATCH as u32;
        assert_eq!(interp.vm.game.read_word(base).unwrap(), 2);
        assert_eq!(interp.vm.game.read_byte(base + 2).unwrap(), b'4');
        assert_eq!(interp.vm.game.read_byte(base + 3).unwrap(), b'2');
    }

    #[test]
    fn test_random_reseed_stores_zero() {
        // random #-7 -> G00 (large constant carries the sign); quit
        let mut interp = build_interpreter(&[0xE7, 0x3F, 0xFF, 0xF9, 0x10, 0xBA]);
        interp.run().unwrap();
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 0);
        assert!(interp.vm.rng.is_predictable());
    }
}
