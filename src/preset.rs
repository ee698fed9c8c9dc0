//! Binary voice presets
//!
//! A preset bulk-applies module parameters and bypass flags to one voice.
//! The layout is guest-visible and bit-compatible: a fixed header of byte
//! offsets relative to the preset's own start, a packed block of parameter
//! records and a flat array of bypass module indices.
//!
//! Layout details:
//! - Header: 16 bytes, four little-endian `u32` fields
//!   (`preset_data_offset`, `preset_data_size`, `bypass_flags_offset`,
//!   `bypass_flags_nb`); a zero offset marks the section absent.
//! - Parameter record: `module_index: u32` followed by a size-prefixed
//!   descriptor whose leading `u32` counts the whole descriptor including
//!   itself; records are packed back to back.
//! - Bypass flags: `bypass_flags_nb` little-endian `u32` module indices.

use crate::voice::Voice;
use crate::{NgsError, Result};

/// Byte size of the preset header
pub const PRESET_HEADER_SIZE: usize = 16;

/// Byte size of the per-record module-index header
pub const PARAM_RECORD_HEADER_SIZE: usize = 4;

/// Parsed preset header.
#[derive(Debug, Clone, Copy)]
pub struct VoicePresetHeader {
    /// Byte offset of the parameter-record block, 0 when absent
    pub preset_data_offset: u32,
    /// Byte size of the parameter-record block
    pub preset_data_size: u32,
    /// Byte offset of the bypass-flag array, 0 when absent
    pub bypass_flags_offset: u32,
    /// Number of bypass flags
    pub bypass_flags_nb: u32,
}

impl VoicePresetHeader {
    /// Parses the header from the start of a preset blob
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PRESET_HEADER_SIZE {
            return Err(NgsError::PresetFormat(format!(
                "preset too small for header: {} bytes",
                data.len()
            )));
        }

        let word = |offset: usize| {
            u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };

        Ok(Self {
            preset_data_offset: word(0),
            preset_data_size: word(4),
            bypass_flags_offset: word(8),
            bypass_flags_nb: word(12),
        })
    }
}

impl Voice {
    /// Applies one parameter descriptor to one chain slot. The record
    /// fails when the slot index is out of range, the slot is currently
    /// locked by a parameter writer, or the descriptor exceeds the slot's
    /// fixed buffer capacity.
    fn parse_params(&self, module_index: usize, descriptor: &[u8]) -> bool {
        self.with_module_storage(module_index, |data| {
            if data.is_locked() {
                return false;
            }
            if descriptor.len() > data.capacity() {
                return false;
            }

            data.params_mut()[..descriptor.len()].copy_from_slice(descriptor);
            true
        })
        .unwrap_or(false)
    }

    /// Walks a packed parameter-record block, applying each record in
    /// order, and returns the number of failed records.
    ///
    /// A record that would run past the end of the block counts as one
    /// failure and stops the walk.
    pub fn parse_params_block(&self, block: &[u8]) -> usize {
        let mut cursor = 0;
        let mut num_error = 0;

        while cursor < block.len() {
            // Module-index header plus the descriptor's own size word
            if block.len() - cursor < PARAM_RECORD_HEADER_SIZE + 4 {
                num_error += 1;
                break;
            }

            let module_index = u32::from_le_bytes([
                block[cursor],
                block[cursor + 1],
                block[cursor + 2],
                block[cursor + 3],
            ]) as usize;
            let descriptor_start = cursor + PARAM_RECORD_HEADER_SIZE;
            let size = u32::from_le_bytes([
                block[descriptor_start],
                block[descriptor_start + 1],
                block[descriptor_start + 2],
                block[descriptor_start + 3],
            ]) as usize;

            // The size prefix counts itself
            if size < 4 || descriptor_start + size > block.len() {
                num_error += 1;
                break;
            }

            if !self.parse_params(module_index, &block[descriptor_start..descriptor_start + size])
            {
                num_error += 1;
            }

            cursor += PARAM_RECORD_HEADER_SIZE + size;
        }

        num_error
    }

    /// Applies a binary preset to this voice.
    ///
    /// Parameter records are applied in order; any failed record makes the
    /// whole call fail with [`NgsError::PresetFailed`], but records that
    /// succeeded before the failure stay applied — partial application is
    /// observable and deliberate. Bypass flags are applied afterwards and
    /// only ever set `is_bypassed`; an invalid bypass index fails the
    /// preset.
    pub fn set_preset(&self, preset: &[u8]) -> Result<()> {
        let header = VoicePresetHeader::parse(preset)?;

        if header.preset_data_offset != 0 {
            let start = header.preset_data_offset as usize;
            let end = start.saturating_add(header.preset_data_size as usize);
            let block = preset
                .get(start..end)
                .ok_or_else(|| {
                    NgsError::PresetFormat("parameter block out of bounds".to_string())
                })?;

            let num_error = self.parse_params_block(block);
            if num_error > 0 {
                return Err(NgsError::PresetFailed { failed: num_error });
            }
        }

        if header.bypass_flags_offset != 0 {
            let start = header.bypass_flags_offset as usize;
            let end = start.saturating_add(header.bypass_flags_nb as usize * 4);
            let flags = preset
                .get(start..end)
                .ok_or_else(|| {
                    NgsError::PresetFormat("bypass flag array out of bounds".to_string())
                })?;

            // Earlier flags stay applied if a later index is invalid,
            // mirroring the parameter-block behavior
            for flag in flags.chunks_exact(4) {
                let index = u32::from_le_bytes([flag[0], flag[1], flag[2], flag[3]]) as usize;
                self.with_module_storage(index, |data| data.is_bypassed = true)
                    .ok_or(NgsError::OutOfRange {
                        index,
                        limit: self.module_count(),
                    })?;
            }
        }

        Ok(())
    }
}
