//! Versioned save/restore of VM state.
//!
//! Walks the register file and channel table field by field in a fixed
//! order, version-tagged, into any [`EncodeSink`]. The channel scheduling
//! state is written in its sentinel-encoded wire form (`0xFFFF` idle,
//! `0xFFFE` kill request) so snapshots stay compatible with the engine's
//! original save layout. The code segment is not part of a snapshot: it is
//! owned by the resource collaborator and reinstalled by the host before
//! restoring.

use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, SizeCounter};
use crate::vm::errors::VmError;
use crate::vm::machine::channels::{Pending, Resume, CHANNEL_COUNT};
use crate::vm::machine::registers::REGISTER_COUNT;
use crate::vm::machine::Vm;
use crate::vm::program::Version;

/// Magic bytes identifying a serialized VM snapshot.
const MAGIC: &[u8; 5] = b"OWSNP";

/// Current snapshot format version.
const CURRENT_VERSION: Version = Version::new(0, 2, 0);

fn decode_reason(err: DecodeError) -> VmError {
    let reason = match err {
        DecodeError::UnexpectedEof => "truncated",
        DecodeError::InvalidValue => "malformed field",
        DecodeError::LengthOverflow => "length overflow",
    };
    VmError::SnapshotError {
        reason: reason.to_string(),
    }
}

impl Vm {
    /// Serializes registers and channels into the given sink.
    pub fn save_state<S: EncodeSink>(&self, out: &mut S) {
        MAGIC.encode(out);
        CURRENT_VERSION.encode(out);
        self.registers().as_array().encode(out);
        for channel in self.channel_table().iter() {
            channel.run.to_word().encode(out);
            channel.pending_run.to_word().encode(out);
            channel.paused.encode(out);
            channel.pending_paused.encode(out);
        }
    }

    /// Serializes into a fresh exactly-sized buffer.
    pub fn save_state_bytes(&self) -> Bytes {
        let mut counter = SizeCounter::new();
        self.save_state(&mut counter);
        let mut out = Bytes::with_capacity(counter.len());
        self.save_state(&mut out);
        out
    }

    /// Restores registers and channels from a serialized snapshot.
    ///
    /// Validates the magic header and version and requires the input to be
    /// fully consumed. On error the VM state is left untouched.
    pub fn restore_state(&mut self, data: &[u8]) -> Result<(), VmError> {
        let mut input = data;

        if &<[u8; 5]>::decode(&mut input).map_err(decode_reason)? != MAGIC {
            return Err(VmError::SnapshotError {
                reason: "bad magic".to_string(),
            });
        }
        if Version::decode(&mut input).map_err(decode_reason)? != CURRENT_VERSION {
            return Err(VmError::SnapshotError {
                reason: "unsupported version".to_string(),
            });
        }

        let regs = <[i16; REGISTER_COUNT]>::decode(&mut input).map_err(decode_reason)?;

        let mut channels = Vec::with_capacity(CHANNEL_COUNT);
        for _ in 0..CHANNEL_COUNT {
            let run = Resume::from_word(u16::decode(&mut input).map_err(decode_reason)?);
            let pending_run = Pending::from_word(u16::decode(&mut input).map_err(decode_reason)?);
            let paused = bool::decode(&mut input).map_err(decode_reason)?;
            let pending_paused = bool::decode(&mut input).map_err(decode_reason)?;
            channels.push((run, pending_run, paused, pending_paused));
        }

        if !input.is_empty() {
            return Err(VmError::SnapshotError {
                reason: "trailing bytes".to_string(),
            });
        }

        self.registers_mut().restore(regs);
        for (channel, (run, pending_run, paused, pending_paused)) in
            self.channel_table_mut().iter_mut().zip(channels)
        {
            channel.run = run;
            channel.pending_run = pending_run;
            channel.paused = paused;
            channel.pending_paused = pending_paused;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::program::CodeStore;

    fn vm_with_state() -> Vm {
        let mut vm = Vm::new(CodeStore::new(Bytes::default()).unwrap());
        vm.set_reg(0, -123);
        vm.set_reg(200, 456);
        vm.channel_table_mut().get_mut(0).run = Resume::At(0x10);
        vm.channel_table_mut().get_mut(1).pending_run = Pending::At(0x22);
        vm.channel_table_mut().get_mut(2).pending_run = Pending::Kill;
        vm.channel_table_mut().get_mut(3).paused = true;
        vm.channel_table_mut().get_mut(3).pending_paused = true;
        vm
    }

    #[test]
    fn roundtrip_restores_registers_and_channels() {
        let vm = vm_with_state();
        let bytes = vm.save_state_bytes();

        let mut restored = Vm::new(CodeStore::new(Bytes::default()).unwrap());
        restored.restore_state(&bytes).unwrap();

        assert_eq!(restored.reg(0), -123);
        assert_eq!(restored.reg(200), 456);
        assert_eq!(restored.channel_table().get(0).run, Resume::At(0x10));
        assert_eq!(
            restored.channel_table().get(1).pending_run,
            Pending::At(0x22)
        );
        assert_eq!(restored.channel_table().get(2).pending_run, Pending::Kill);
        assert!(restored.channel_table().get(3).paused);
        assert!(restored.channel_table().get(3).pending_paused);
        assert_eq!(restored.channel_table().get(4).run, Resume::Idle);
    }

    #[test]
    fn snapshot_size_is_fixed() {
        let bytes = vm_with_state().save_state_bytes();
        // magic + version + 256 registers + 64 * (2 words + 2 flags)
        assert_eq!(bytes.len(), 5 + 3 + REGISTER_COUNT * 2 + CHANNEL_COUNT * 6);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = vm_with_state().save_state_bytes().to_vec();
        bytes[0] = b'X';
        let mut vm = Vm::new(CodeStore::new(Bytes::default()).unwrap());
        let err = vm.restore_state(&bytes).unwrap_err();
        assert!(matches!(err, VmError::SnapshotError { ref reason } if reason == "bad magic"));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = vm_with_state().save_state_bytes().to_vec();
        bytes[5] = 99;
        let mut vm = Vm::new(CodeStore::new(Bytes::default()).unwrap());
        let err = vm.restore_state(&bytes).unwrap_err();
        assert!(
            matches!(err, VmError::SnapshotError { ref reason } if reason == "unsupported version")
        );
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = vm_with_state().save_state_bytes();
        let mut vm = Vm::new(CodeStore::new(Bytes::default()).unwrap());
        let err = vm.restore_state(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, VmError::SnapshotError { ref reason } if reason == "truncated"));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = vm_with_state().save_state_bytes().to_vec();
        bytes.push(0);
        let mut vm = Vm::new(CodeStore::new(Bytes::default()).unwrap());
        let err = vm.restore_state(&bytes).unwrap_err();
        assert!(matches!(err, VmError::SnapshotError { ref reason } if reason == "trailing bytes"));
    }

    #[test]
    fn failed_restore_leaves_state_untouched() {
        let mut vm = vm_with_state();
        let mut bytes = vm.save_state_bytes().to_vec();
        bytes.truncate(bytes.len() - 4);
        assert!(vm.restore_state(&bytes).is_err());
        assert_eq!(vm.reg(0), -123);
        assert_eq!(vm.channel_table().get(0).run, Resume::At(0x10));
    }
}
