use log::debug;

use crate::quetzal::chunks::{compress_memory, encode_frames, IFhd};
use crate::quetzal::iff::IffForm;
use crate::vm::VM;

/// Serialize the whole machine state. `resume_pc` must point at the save
/// instruction's branch or store byte so the restore can report success
/// through that instruction.
pub fn save_state(vm: &VM, resume_pc: u32) -> Vec<u8> {
    let dynamic = vm.game.dynamic_len();
    let mut form = IffForm::new(*b"IFZS");
    form.add_chunk(*b"IFhd", IFhd::from_vm(vm, resume_pc).to_bytes());
    form.add_chunk(
        *b"CMem",
        compress_memory(&vm.game.memory[..dynamic], &vm.game.original[..dynamic]),
    );
    form.add_chunk(*b"Stks", encode_frames(vm));
    let bytes = form.to_bytes();
    debug!(
        "saved {} bytes ({} dynamic, {} frames)",
        bytes.len(),
        dynamic,
        vm.call_stack.len()
    );
    bytes
}
