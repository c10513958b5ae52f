use log::debug;

use crate::error::{Error, Result};
use crate::quetzal::chunks::{decode_frames, decompress_memory, IFhd};
use crate::quetzal::iff::IffForm;
use crate::vm::VM;

/// Rebuild machine state from a save stream.
///
/// A stream whose identity header does not match the loaded story is
/// refused with `RestoreChecksumMismatch`; the VM is untouched on any
/// failure, so play continues from before the restore attempt.
pub fn restore_state(vm: &mut VM, bytes: &[u8]) -> Result<()> {
    let form = IffForm::from_bytes(bytes)?;
    if form.form_type != *b"IFZS" {
        return Err(Error::BadSaveData("not a save file form".into()));
    }

    let ifhd_chunk = form
        .find(b"IFhd")
        .ok_or_else(|| Error::BadSaveData("missing IFhd chunk".into()))?;
    let ifhd = IFhd::from_bytes(&ifhd_chunk.data)?;
    if !ifhd.matches(vm) {
        return Err(Error::RestoreChecksumMismatch);
    }

    let dynamic = vm.game.dynamic_len();
    // Full candidate state first; nothing is committed until it all parses.
    let memory = if let Some(cmem) = form.find(b"CMem") {
        decompress_memory(&cmem.data, &vm.game.original[..dynamic])?
    } else if let Some(umem) = form.find(b"UMem") {
        if umem.data.len() != dynamic {
            return Err(Error::BadSaveData(format!(
                "UMem is {} bytes, dynamic memory is {dynamic}",
                umem.data.len()
            )));
        }
        umem.data.clone()
    } else {
        return Err(Error::BadSaveData("missing memory chunk".into()));
    };

    let stks = form
        .find(b"Stks")
        .ok_or_else(|| Error::BadSaveData("missing Stks chunk".into()))?;
    let (frames, stack) = decode_frames(&stks.data)?;

    vm.game.memory[..dynamic].copy_from_slice(&memory);
    vm.call_stack = frames;
    vm.stack = stack;
    vm.pc = ifhd.pc;
    debug!(
        "restored: pc {:#06x}, {} frames, {} stack words",
        vm.pc,
        vm.call_stack.len(),
        vm.stack.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{checksum, Game};
    use crate::quetzal::save_state;

    fn test_vm() -> VM {
        let mut bytes = vec![0u8; 0x200];
        bytes[0] = 3;
        bytes[0x0F] = 0xC0; // static base
        bytes[0x02] = 0x00;
        bytes[0x03] = 0x07; // release 7
        bytes[0x08] = 0x00;
        bytes[0x09] = 0xB0; // dictionary
        bytes[0xB1] = 7;
        bytes[0x12..0x18].copy_from_slice(b"250807");
        let sum = checksum(&bytes, bytes.len());
        bytes[0x1C] = (sum >> 8) as u8;
        bytes[0x1D] = (sum & 0xFF) as u8;
        VM::new(Game::from_bytes(bytes).unwrap()).unwrap()
    }

    #[test]
    fn test_save_restore_round_trips_exactly() {
        let mut vm = test_vm();
        vm.game.write_byte(0x50, 0xAB).unwrap();
        vm.push(0x1111).unwrap();
        vm.call_routine(0x60, &[5], Some(0x10)).unwrap();
        vm.push(0x2222).unwrap();
        vm.pc = 0x123;

        let saved_memory = vm.game.memory.clone();
        let saved_stack = vm.stack.clone();
        let saved_frames = vm.call_stack.clone();
        let bytes = save_state(&vm, vm.pc);

        // Mutate everything after the save
        vm.game.write_byte(0x50, 0x00).unwrap();
        vm.game.write_byte(0x51, 0x77).unwrap();
        vm.pop().unwrap();
        vm.return_routine(9).unwrap();
        vm.pc = 0x999;

        restore_state(&mut vm, &bytes).unwrap();
        assert_eq!(vm.game.memory, saved_memory);
        assert_eq!(vm.stack, saved_stack);
        assert_eq!(vm.call_stack, saved_frames);
        assert_eq!(vm.pc, 0x123);
    }

    #[test]
    fn test_wrong_story_is_refused_and_state_kept() {
        let mut vm = test_vm();
        vm.game.write_byte(0x50, 0xAB).unwrap();
        let mut bytes = save_state(&vm, 0x100);
        // Corrupt the release number inside IFhd
        let pos = bytes.windows(4).position(|w| w == b"IFhd").unwrap();
        bytes[pos + 8] = 0xEE;
        vm.game.write_byte(0x50, 0xCD).unwrap();

        assert_eq!(
            restore_state(&mut vm, &bytes).unwrap_err(),
            Error::RestoreChecksumMismatch
        );
        // Refused restore leaves the running state alone
        assert_eq!(vm.game.read_byte(0x50).unwrap(), 0xCD);
    }

    #[test]
    fn test_garbage_is_bad_save_data() {
        let mut vm = test_vm();
        assert!(matches!(
            restore_state(&mut vm, b"not a save"),
            Err(Error::BadSaveData(_))
        ));
    }
}
