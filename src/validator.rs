// SPDX-License-Identifier: MIT OR Apache-2.0

//! The validate/repair walk.
//!
//! Repair is scoped to the smallest enclosing aggregate: if one leaf in a
//! Group is corrupt, only that Group's `RomStored` leaves are re-defaulted,
//! not the whole tree.

use crate::crc::{crc16, CRC_SEED};
use crate::handler::{handle_byte_array, handle_integer};
use crate::node::{LeafPayload, Node};
use crate::op::{CallbackValue, Op, Outcome, StatusCode, Value};
use crate::rom::RomDevice;
use crate::Storage;

/// Validates (and, where necessary, repairs) `node`'s RAM image against
/// `rom`, starting at absolute offsets `(ram_base, rom_base)`.
///
/// `ram` is the full RAM pool; `ram_base`/`rom_base` locate `node`'s own
/// window within it / within ROM. When `force_defaults` is set, every leaf
/// underneath `node` is unconditionally restored to its declared default
/// (used by `reset_to_defaults`), regardless of its current CRC status.
pub fn validate(
    node: &mut Node,
    ram: &mut [u8],
    rom: &mut dyn RomDevice,
    ram_base: u32,
    rom_base: u32,
    force_defaults: bool,
) -> Outcome {
    match node {
        Node::Leaf(leaf) => {
            let header = leaf.header;
            let abs_ram = (ram_base + header.ram_off) as usize;
            let abs_rom = rom_base + header.rom_off;
            let ram_window = &mut ram[abs_ram..abs_ram + leaf.size as usize];
            let op = if force_defaults {
                Op::RestoreDefault
            } else {
                Op::RestoreValidate
            };
            let mut cache: Option<CallbackValue> = None;
            let mut scratch = [0u8; 4];
            let mut value = Value::Raw(&mut scratch[..leaf.size as usize]);
            match &mut leaf.payload {
                LeafPayload::Integer { .. } => handle_integer(
                    &mut leaf.payload,
                    leaf.storage,
                    &leaf.on_change,
                    rom,
                    abs_rom,
                    ram_window,
                    op,
                    &mut value,
                    0,
                    &mut cache,
                ),
                LeafPayload::ByteArray { .. } => handle_byte_array(
                    &mut leaf.payload,
                    leaf.storage,
                    &leaf.on_change,
                    rom,
                    abs_rom,
                    ram_window,
                    op,
                    &mut value,
                    0,
                    &mut cache,
                ),
            }
        }
        Node::Group(group) => {
            let header = group.header;
            let group_ram_base = ram_base + header.ram_off;
            let group_rom_base = rom_base + header.rom_off;

            let mut leaf_result = Outcome::ok();
            let mut aggr_result = Outcome::ok();
            for child in group.children.iter_mut().flatten() {
                let outcome = validate(
                    child,
                    ram,
                    rom,
                    group_ram_base,
                    group_rom_base,
                    force_defaults,
                );
                match child {
                    Node::Leaf(_) => leaf_result = leaf_result.combine(outcome),
                    Node::Group(_) | Node::List(_) => aggr_result = aggr_result.combine(outcome),
                }
            }

            let crc_ok = if force_defaults {
                false
            } else {
                check_group_crc(group, ram, rom, group_ram_base, group_rom_base)
            };

            let needs_repair = force_defaults || leaf_result.status != StatusCode::Ok || !crc_ok;
            if needs_repair && !force_defaults {
                for child in group.children.iter_mut().flatten() {
                    if matches!(child, Node::Leaf(_)) {
                        validate(child, ram, rom, group_ram_base, group_rom_base, true);
                    }
                }
            }
            if needs_repair {
                write_group_crc(group, ram, rom, group_ram_base, group_rom_base);
            }

            // `leaf_result` only decided whether this group needed repair;
            // once repaired (or never broken), a leaf's pre-repair status
            // must not taint what's returned. Only sibling aggregates'
            // statuses (already final, never repaired here) propagate.
            let mut outcome = aggr_result;
            if needs_repair {
                outcome = outcome.with_updated_rom();
            }
            outcome
        }
        Node::List(list) => {
            let header = list.header;
            let list_ram_base = ram_base + header.ram_off;
            let list_rom_base = rom_base + header.rom_off;
            let element_is_leaf = matches!(*list.element, Node::Leaf(_));

            let mut leaf_result = Outcome::ok();
            let mut aggr_result = Outcome::ok();
            for i in 0..list.count {
                let slot_ram = list_ram_base + i * list.element_ram_size;
                let slot_rom = list_rom_base + i * list.element_rom_size;
                let outcome = validate(
                    &mut list.element,
                    ram,
                    rom,
                    slot_ram,
                    slot_rom,
                    force_defaults,
                );
                if element_is_leaf {
                    leaf_result = leaf_result.combine(outcome);
                } else {
                    aggr_result = aggr_result.combine(outcome);
                }
            }

            let crc_ok = if force_defaults {
                false
            } else {
                check_list_crc(list, ram, rom, list_ram_base, list_rom_base, element_is_leaf)
            };

            let needs_repair = force_defaults || (element_is_leaf && leaf_result.status != StatusCode::Ok) || !crc_ok;
            if needs_repair && !force_defaults && element_is_leaf {
                for i in 0..list.count {
                    let slot_ram = list_ram_base + i * list.element_ram_size;
                    let slot_rom = list_rom_base + i * list.element_rom_size;
                    validate(&mut list.element, ram, rom, slot_ram, slot_rom, true);
                }
            }
            if needs_repair {
                write_list_crc(list, ram, rom, list_ram_base, list_rom_base, element_is_leaf);
            }

            // Same reasoning as the Group arm above: a per-slot leaf error
            // only drove the repair decision, not the returned status.
            let mut outcome = aggr_result;
            if needs_repair {
                outcome = outcome.with_updated_rom();
            }
            outcome
        }
    }
}

/// Zeroes `node`'s stored CRC header(s) (and those of every aggregate
/// beneath it) so the next `validate` pass is guaranteed to repair them.
/// Used by `reset_to_defaults`.
pub fn invalidate_crc(node: &mut Node, ram: &mut [u8], ram_base: u32) {
    match node {
        Node::Leaf(_) => {}
        Node::Group(group) => {
            let base = ram_base + group.header.ram_off;
            ram[base as usize..base as usize + 2].copy_from_slice(&[0, 0]);
            for child in group.children.iter_mut().flatten() {
                invalidate_crc(child, ram, base);
            }
        }
        Node::List(list) => {
            let base = ram_base + list.header.ram_off;
            ram[base as usize..base as usize + 2].copy_from_slice(&[0, 0]);
            for i in 0..list.count {
                let slot_base = base + i * list.element_ram_size;
                invalidate_crc(&mut list.element, ram, slot_base);
            }
        }
    }
}

fn check_group_crc(
    group: &crate::node::Group,
    ram: &mut [u8],
    rom: &mut dyn RomDevice,
    group_ram_base: u32,
    group_rom_base: u32,
) -> bool {
    rom.read(group_rom_base, &mut ram[group_ram_base as usize..group_ram_base as usize + 2]);
    let stored = u16::from_be_bytes([
        ram[group_ram_base as usize],
        ram[group_ram_base as usize + 1],
    ]);
    let computed = aggregate_crc_group(group, ram, group_ram_base);
    stored == computed
}

fn write_group_crc(
    group: &crate::node::Group,
    ram: &mut [u8],
    rom: &mut dyn RomDevice,
    group_ram_base: u32,
    group_rom_base: u32,
) {
    let crc = aggregate_crc_group(group, ram, group_ram_base);
    let bytes = crc.to_be_bytes();
    ram[group_ram_base as usize..group_ram_base as usize + 2].copy_from_slice(&bytes);
    rom.write(group_rom_base, &bytes);
}

fn aggregate_crc_group(group: &crate::node::Group, ram: &[u8], group_ram_base: u32) -> u16 {
    let mut crc = CRC_SEED;
    for child in group.children.iter().flatten() {
        if let Node::Leaf(leaf) = child {
            if matches!(leaf.storage, Storage::RomStored) {
                let start = (group_ram_base + leaf.header.ram_off) as usize;
                crc = crc16(&ram[start..start + leaf.size as usize], crc);
            }
        }
    }
    crc
}

fn check_list_crc(
    list: &crate::node::List,
    ram: &mut [u8],
    rom: &mut dyn RomDevice,
    list_ram_base: u32,
    list_rom_base: u32,
    element_is_leaf: bool,
) -> bool {
    rom.read(list_rom_base, &mut ram[list_ram_base as usize..list_ram_base as usize + 2]);
    let stored = u16::from_be_bytes([
        ram[list_ram_base as usize],
        ram[list_ram_base as usize + 1],
    ]);
    let computed = aggregate_crc_list(list, ram, list_ram_base, element_is_leaf);
    stored == computed
}

fn write_list_crc(
    list: &crate::node::List,
    ram: &mut [u8],
    rom: &mut dyn RomDevice,
    list_ram_base: u32,
    list_rom_base: u32,
    element_is_leaf: bool,
) {
    let crc = aggregate_crc_list(list, ram, list_ram_base, element_is_leaf);
    let bytes = crc.to_be_bytes();
    ram[list_ram_base as usize..list_ram_base as usize + 2].copy_from_slice(&bytes);
    rom.write(list_rom_base, &bytes);
}

/// Computes a list's own aggregate CRC. Only contributes bytes when the
/// shared element is itself a `RomStored` Leaf; when the element is an
/// aggregate, this is a constant (`CRC_SEED`), since a List's own header
/// covers only its direct Leaf children — each nested aggregate slot
/// repairs its own CRC header independently (see DESIGN.md).
fn aggregate_crc_list(
    list: &crate::node::List,
    ram: &[u8],
    list_ram_base: u32,
    element_is_leaf: bool,
) -> u16 {
    if !element_is_leaf {
        return CRC_SEED;
    }
    match list.element.as_ref() {
        Node::Leaf(leaf) if matches!(leaf.storage, Storage::RomStored) => {
            let mut crc = CRC_SEED;
            for i in 0..list.count {
                let start =
                    (list_ram_base + leaf.header.ram_off + i * list.element_ram_size) as usize;
                crc = crc16(&ram[start..start + leaf.size as usize], crc);
            }
            crc
        }
        _ => CRC_SEED,
    }
}
