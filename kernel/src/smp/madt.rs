//! MADT parsing
//!
//! The Multiple APIC Description Table lists the interrupt controllers and
//! processors of the machine. The parser walks the raw table bytes: each
//! enabled Local-APIC entry yields a CPU, and the BSP is the entry whose
//! APIC id matches the one the current CPU is running on.

use alloc::vec::Vec;

use crate::error::{KernelResult, SmpError};

use super::CpuInfo;

/// Table signature (`b"APIC"`).
pub const MADT_SIGNATURE: &[u8; 4] = b"APIC";

/// Byte length of the SDT header preceding the MADT fields.
const SDT_HEADER_LEN: usize = 36;

/// Offset of the entry area: SDT header + local APIC address + flags.
const ENTRIES_OFFSET: usize = SDT_HEADER_LEN + 8;

/// MADT entry type: processor local APIC.
const ENTRY_LOCAL_APIC: u8 = 0;

/// Local-APIC flag bit: processor enabled.
const LAPIC_ENABLED: u32 = 1 << 0;

/// Parsed table contents.
#[derive(Debug, Clone)]
pub struct MadtInfo {
    /// Physical address of the local APIC register block.
    pub local_apic_address: u32,
    /// MADT flags (bit 0: dual 8259 PICs present).
    pub flags: u32,
    /// Local-APIC entries in table order (enabled and disabled).
    pub cpus: Vec<CpuInfo>,
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let chunk = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Parse a raw MADT. Validates the signature, length, and checksum, then
/// walks the interrupt-controller entries collecting Local-APIC records.
pub fn parse_madt(table: &[u8]) -> KernelResult<MadtInfo> {
    if table.len() < ENTRIES_OFFSET || &table[0..4] != MADT_SIGNATURE {
        return Err(SmpError::NoMadt.into());
    }
    let length = read_u32(table, 4).ok_or(SmpError::NoMadt)? as usize;
    if length > table.len() || length < ENTRIES_OFFSET {
        return Err(SmpError::NoMadt.into());
    }
    // The table bytes sum to zero modulo 256.
    let checksum = table[..length]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    if checksum != 0 {
        return Err(SmpError::NoMadt.into());
    }

    let local_apic_address = read_u32(table, SDT_HEADER_LEN).ok_or(SmpError::NoMadt)?;
    let flags = read_u32(table, SDT_HEADER_LEN + 4).ok_or(SmpError::NoMadt)?;

    let mut cpus = Vec::new();
    let mut offset = ENTRIES_OFFSET;
    let mut next_cpu_id = 0u32;
    while offset + 2 <= length {
        let entry_type = table[offset];
        let entry_len = table[offset + 1] as usize;
        if entry_len < 2 || offset + entry_len > length {
            break;
        }
        if entry_type == ENTRY_LOCAL_APIC && entry_len >= 8 {
            let processor_id = table[offset + 2];
            let apic_id = table[offset + 3];
            let lapic_flags = read_u32(table, offset + 4).unwrap_or(0);
            let enabled = lapic_flags & LAPIC_ENABLED != 0;
            if enabled {
                cpus.push(CpuInfo {
                    cpu_id: next_cpu_id,
                    processor_id,
                    apic_id,
                    enabled,
                    is_bsp: false,
                });
                next_cpu_id += 1;
            }
        }
        offset += entry_len;
    }

    Ok(MadtInfo {
        local_apic_address,
        flags,
        cpus,
    })
}

/// Parse the MADT and mark the BSP: the CPU whose APIC id matches
/// `current_apic_id`, the id of the local APIC this code is running on.
pub fn discover_cpus(table: &[u8], current_apic_id: u8) -> KernelResult<Vec<CpuInfo>> {
    let info = parse_madt(table)?;
    let mut cpus = info.cpus;
    if cpus.is_empty() {
        return Err(SmpError::NoApic.into());
    }
    let mut found_bsp = false;
    for cpu in cpus.iter_mut() {
        cpu.is_bsp = cpu.apic_id == current_apic_id;
        found_bsp |= cpu.is_bsp;
    }
    if !found_bsp {
        return Err(SmpError::NoApic.into());
    }
    Ok(cpus)
}

/// Build a syntactically valid MADT from Local-APIC descriptions
/// (`(processor_id, apic_id, enabled)`); used by boot self-tests.
pub fn build_test_madt(lapics: &[(u8, u8, bool)]) -> Vec<u8> {
    let length = ENTRIES_OFFSET + lapics.len() * 8;
    let mut table = alloc::vec![0u8; length];
    table[0..4].copy_from_slice(MADT_SIGNATURE);
    table[4..8].copy_from_slice(&(length as u32).to_le_bytes());
    // Local APIC base for the standard xAPIC window.
    table[SDT_HEADER_LEN..SDT_HEADER_LEN + 4].copy_from_slice(&0xFEE0_0000u32.to_le_bytes());

    let mut offset = ENTRIES_OFFSET;
    for &(processor_id, apic_id, enabled) in lapics {
        table[offset] = ENTRY_LOCAL_APIC;
        table[offset + 1] = 8;
        table[offset + 2] = processor_id;
        table[offset + 3] = apic_id;
        let flags: u32 = if enabled { LAPIC_ENABLED } else { 0 };
        table[offset + 4..offset + 8].copy_from_slice(&flags.to_le_bytes());
        offset += 8;
    }

    // Fix up the checksum so the table sums to zero.
    let sum = table.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    table[9] = 0u8.wrapping_sub(sum);
    table
}
