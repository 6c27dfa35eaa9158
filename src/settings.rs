// SPDX-License-Identifier: MIT OR Apache-2.0

//! The request dispatcher: resolves a positional path, invokes the
//! matching leaf handler, and keeps each aggregate's CRC-16 header in sync
//! with its contents after a write.

use crate::alloc::vec;
use crate::alloc::vec::Vec;
use crate::crc::{crc16, CRC_SEED};
use crate::handler::{handle_byte_array, handle_integer};
use crate::layout::{layout, InitError};
use crate::node::{LeafPayload, Node};
use crate::op::{CallbackValue, Op, Outcome, StatusCode, Value};
use crate::rom::RomDevice;
use crate::validator::{invalidate_crc, validate};
use crate::{Storage, MAX_DEPTH};

/// Owns the node tree, its RAM pool, the ROM device, and the per-request
/// argument history and callback cache.
///
/// A single `Settings` value is not meant to be shared across concurrent
/// requests: `request` runs to completion synchronously, and any callback
/// it fires only ever sees `&CallbackValue`, never a handle back into
/// `Settings`, so re-entrant dispatch during a callback is impossible by
/// construction.
pub struct Settings<R: RomDevice> {
    root: Node,
    rom: R,
    ram: Vec<u8>,
    rom_size: u32,
    arg_history: [u32; MAX_DEPTH as usize],
    callback_cache: Option<CallbackValue>,
}

impl<R: RomDevice> Settings<R> {
    /// Lays out `root` against `ram_pool_size` and creates a `Settings`
    /// ready for [`Settings::init`].
    ///
    /// Fails with [`InitError`] if the tree nests deeper than `MAX_DEPTH` or
    /// its computed RAM footprint exceeds `ram_pool_size`.
    pub fn new(mut root: Node, rom: R, ram_pool_size: u32) -> Result<Self, InitError> {
        let (ram_size, rom_size) = layout(&mut root, ram_pool_size)?;
        #[cfg(feature = "log")]
        log::debug!(
            "settings layout computed: ram_size={} rom_size={} depth<= {}",
            ram_size,
            rom_size,
            MAX_DEPTH
        );
        Ok(Settings {
            root,
            rom,
            ram: vec![0u8; ram_size as usize],
            rom_size,
            arg_history: [0; MAX_DEPTH as usize],
            callback_cache: None,
        })
    }

    /// Reads the tree's current RAM image from ROM and validates it,
    /// repairing any aggregate whose leaves or checksum no longer hold with
    /// declared defaults. Pass `use_defaults = true` to force every leaf to
    /// its default regardless of current ROM contents (used internally by
    /// [`Settings::reset_to_defaults`]).
    pub fn init(&mut self, use_defaults: bool) -> Outcome {
        let outcome = validate(&mut self.root, &mut self.ram, &mut self.rom, 0, 0, use_defaults);
        #[cfg(feature = "log")]
        if outcome.updated_rom {
            log::warn!("settings validation repaired one or more aggregates");
        }
        outcome
    }

    /// Forces every leaf back to its declared default and rewrites every
    /// aggregate CRC, regardless of current validity.
    pub fn reset_to_defaults(&mut self) {
        invalidate_crc(&mut self.root, &mut self.ram, 0);
        self.init(true);
    }

    /// Writes the entire RAM window (every `RomStored` leaf and every
    /// aggregate CRC header) out to ROM unconditionally.
    pub fn flush_all(&mut self) {
        flush_node(&self.root, &self.ram, &mut self.rom, 0, 0);
    }

    /// The declared total ROM footprint.
    pub fn rom_size(&self) -> u32 {
        self.rom_size
    }

    /// Serves a request against the leaf addressed by `path`.
    pub fn request(&mut self, path: &[u32], op: Op, value: &mut Value<'_>) -> StatusCode {
        if path.len() as u32 > MAX_DEPTH {
            return StatusCode::DepthExceeded;
        }
        let outcome = dispatch(
            &mut self.root,
            &mut self.ram,
            &mut self.rom,
            0,
            0,
            path,
            op,
            value,
            &mut self.arg_history,
            &mut self.callback_cache,
        );
        #[cfg(feature = "log")]
        if outcome.status != StatusCode::Ok {
            log::debug!("settings request {:?} on {:?} returned {:?}", op, path, outcome.status);
        }
        outcome.status
    }

    /// The `i`'th most recently consumed path index (0 = the terminal leaf
    /// index of the most recent `request`).
    pub fn request_arg(&self, i: usize) -> u32 {
        self.arg_history[i]
    }

    /// The value deposited by the most recent successful `Apply`/`Write`.
    pub fn callback_cache(&self) -> Option<&CallbackValue> {
        self.callback_cache.as_ref()
    }

    /// Reads an integer leaf's current value.
    pub fn read_i32(&mut self, path: &[u32]) -> i32 {
        let mut v = 0i32;
        self.request(path, Op::Read, &mut Value::Integer(&mut v));
        v
    }

    /// Validates, writes, and fires the change callback for an integer
    /// leaf, then stores it to ROM.
    pub fn write_i32(&mut self, path: &[u32], value: i32) -> StatusCode {
        let mut v = value;
        self.request(path, Op::Write, &mut Value::Integer(&mut v))
    }

    /// Same as [`Settings::write_i32`] but suppresses the change callback.
    pub fn write_i32_no_cb(&mut self, path: &[u32], value: i32) -> StatusCode {
        let mut v = value;
        self.request(path, Op::WriteNoCb, &mut Value::Integer(&mut v))
    }

    /// Reads a byte-array leaf's current contents into `out`.
    ///
    /// `out.len()` must equal the leaf's declared size.
    pub fn read_bytes(&mut self, path: &[u32], out: &mut [u8]) -> StatusCode {
        self.request(path, Op::Read, &mut Value::Raw(out))
    }

    /// Writes, fires the change callback for, and stores a byte-array leaf.
    ///
    /// `data.len()` must equal the leaf's declared size.
    pub fn write_bytes(&mut self, path: &[u32], data: &[u8]) -> StatusCode {
        let mut buf = data.to_vec();
        self.request(path, Op::Write, &mut Value::Raw(&mut buf))
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    node: &mut Node,
    ram: &mut [u8],
    rom: &mut dyn RomDevice,
    ram_base: u32,
    rom_base: u32,
    path: &[u32],
    op: Op,
    value: &mut Value<'_>,
    arg_history: &mut [u32],
    cache: &mut Option<CallbackValue>,
) -> Outcome {
    match node {
        Node::Leaf(leaf) => {
            let header = leaf.header;
            let abs_ram = (ram_base + header.ram_off) as usize;
            let abs_rom = rom_base + header.rom_off;
            let ram_window = &mut ram[abs_ram..abs_ram + leaf.size as usize];
            let last_arg = arg_history[0];
            match &mut leaf.payload {
                LeafPayload::Integer { .. } => handle_integer(
                    &mut leaf.payload,
                    leaf.storage,
                    &leaf.on_change,
                    rom,
                    abs_rom,
                    ram_window,
                    op,
                    value,
                    last_arg,
                    cache,
                ),
                LeafPayload::ByteArray { .. } => handle_byte_array(
                    &mut leaf.payload,
                    leaf.storage,
                    &leaf.on_change,
                    rom,
                    abs_rom,
                    ram_window,
                    op,
                    value,
                    last_arg,
                    cache,
                ),
            }
        }
        Node::Group(group) => {
            let a = path[0] as usize;
            push_arg(arg_history, path[0]);
            #[cfg(feature = "panic-on-uninitialized-node")]
            let child = group.children[a]
                .as_mut()
                .expect("dispatch reached an unset group child");
            #[cfg(not(feature = "panic-on-uninitialized-node"))]
            let child = match group.children[a].as_mut() {
                Some(c) => c,
                None => return Outcome::new(StatusCode::UnknownNodeType),
            };
            let is_leaf_child = matches!(child, Node::Leaf(_));
            let child_header = child.header();
            let group_ram_base = ram_base + group.header.ram_off;
            let group_rom_base = rom_base + group.header.rom_off;
            let mut outcome = dispatch(
                child,
                ram,
                rom,
                group_ram_base,
                group_rom_base,
                &path[1..],
                op,
                value,
                arg_history,
                cache,
            );
            let _ = child_header;
            if outcome.updated_rom && is_leaf_child {
                write_group_crc(group, ram, rom, group_ram_base, group_rom_base);
                outcome.updated_rom = false;
            }
            outcome
        }
        Node::List(list) => {
            let a = path[0];
            push_arg(arg_history, a);
            assert!(
                a < list.count,
                "dispatch reached an out-of-range list index"
            );
            let element_is_leaf = matches!(*list.element, Node::Leaf(_));
            let list_ram_base = ram_base + list.header.ram_off;
            let list_rom_base = rom_base + list.header.rom_off;
            let slot_ram_base = list_ram_base + a * list.element_ram_size;
            let slot_rom_base = list_rom_base + a * list.element_rom_size;
            let mut outcome = dispatch(
                &mut list.element,
                ram,
                rom,
                slot_ram_base,
                slot_rom_base,
                &path[1..],
                op,
                value,
                arg_history,
                cache,
            );
            if outcome.updated_rom && element_is_leaf {
                write_list_crc(list, ram, rom, list_ram_base, list_rom_base);
                outcome.updated_rom = false;
            }
            outcome
        }
    }
}

fn push_arg(arg_history: &mut [u32], a: u32) {
    for i in (1..arg_history.len()).rev() {
        arg_history[i] = arg_history[i - 1];
    }
    arg_history[0] = a;
}

fn write_group_crc(
    group: &crate::node::Group,
    ram: &mut [u8],
    rom: &mut dyn RomDevice,
    group_ram_base: u32,
    group_rom_base: u32,
) {
    let mut crc = CRC_SEED;
    for child in group.children.iter().flatten() {
        if let Node::Leaf(leaf) = child {
            if matches!(leaf.storage, Storage::RomStored) {
                let start = (group_ram_base + leaf.header.ram_off) as usize;
                crc = crc16(&ram[start..start + leaf.size as usize], crc);
            }
        }
    }
    let bytes = crc.to_be_bytes();
    ram[group_ram_base as usize..group_ram_base as usize + 2].copy_from_slice(&bytes);
    rom.write(group_rom_base, &bytes);
}

fn write_list_crc(
    list: &crate::node::List,
    ram: &mut [u8],
    rom: &mut dyn RomDevice,
    list_ram_base: u32,
    list_rom_base: u32,
) {
    let crc = match list.element.as_ref() {
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
    };
    let bytes = crc.to_be_bytes();
    ram[list_ram_base as usize..list_ram_base as usize + 2].copy_from_slice(&bytes);
    rom.write(list_rom_base, &bytes);
}

fn flush_node(node: &Node, ram: &[u8], rom: &mut dyn RomDevice, ram_base: u32, rom_base: u32) {
    match node {
        Node::Leaf(leaf) => {
            if matches!(leaf.storage, Storage::RomStored) {
                let start = (ram_base + leaf.header.ram_off) as usize;
                rom.write(
                    rom_base + leaf.header.rom_off,
                    &ram[start..start + leaf.size as usize],
                );
            }
        }
        Node::Group(group) => {
            let base_ram = ram_base + group.header.ram_off;
            let base_rom = rom_base + group.header.rom_off;
            rom.write(base_rom, &ram[base_ram as usize..base_ram as usize + 2]);
            for child in group.children.iter().flatten() {
                flush_node(child, ram, rom, base_ram, base_rom);
            }
        }
        Node::List(list) => {
            let base_ram = ram_base + list.header.ram_off;
            let base_rom = rom_base + list.header.rom_off;
            rom.write(base_rom, &ram[base_ram as usize..base_ram as usize + 2]);
            for i in 0..list.count {
                flush_node(
                    &list.element,
                    ram,
                    rom,
                    base_ram + i * list.element_ram_size,
                    base_rom + i * list.element_rom_size,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::node::{Group, Leaf, List};
    use crate::rom::MemoryRom;
    use crate::{AccessLevel, Storage};

    fn int_leaf(size: u32, min: i32, max: i32, default: i32, storage: Storage) -> Node {
        Node::Leaf(Leaf::integer(AccessLevel::AccessByAll, storage, size, min, max, default, None))
    }

    fn demo_tree() -> Node {
        let group_b0 = Group::new(crate::alloc::vec![
            Some(int_leaf(4, 0, 100000, 12345, Storage::RomStored)),
            Some(int_leaf(1, 0, 144, 5, Storage::RomStored)),
        ]);
        let default_text = {
            let mut v = crate::alloc::vec::Vec::from(&b"Default text"[..]);
            v.resize(20, 0);
            v
        };
        let c2 = Node::Leaf(Leaf::byte_array(
            AccessLevel::AccessByAll,
            Storage::RomStored,
            20,
            Some(default_text),
            None,
        ));
        let list_b1 = List::new(35, c2);
        let leaf_b2 = int_leaf(2, 1, 1024, 16, Storage::NotRomStored);
        Node::Group(Group::new(crate::alloc::vec![
            Some(Node::Group(group_b0)),
            Some(Node::List(list_b1)),
            Some(leaf_b2),
        ]))
    }

    #[test]
    fn e2e_fresh_init_restores_declared_defaults() {
        let rom = MemoryRom::new(4096);
        let mut settings = Settings::new(demo_tree(), rom, 4096).unwrap();
        let outcome = settings.init(false);
        assert!(outcome.updated_rom);
        assert_eq!(settings.read_i32(&[0, 0]), 12345);
        assert_eq!(settings.read_i32(&[0, 1]), 5);
        assert_eq!(settings.read_i32(&[2]), 16);
        let mut text = [0u8; 20];
        settings.read_bytes(&[1, 10], &mut text);
        assert_eq!(&text[..12], b"Default text");
    }

    #[test]
    fn e2e_write_then_read_round_trips_and_skips_rom_for_non_rom_stored() {
        let rom = MemoryRom::new(4096);
        let mut settings = Settings::new(demo_tree(), rom, 4096).unwrap();
        settings.init(false);

        assert_eq!(settings.write_i32(&[0, 0], 9000), StatusCode::Ok);
        assert_eq!(settings.write_i32(&[0, 1], 45), StatusCode::Ok);
        let mut modified = crate::alloc::vec::Vec::from(&b"Modified text"[..]);
        modified.resize(20, 0);
        assert_eq!(settings.write_bytes(&[1, 10], &modified), StatusCode::Ok);

        assert_eq!(settings.read_i32(&[0, 0]), 9000);
        assert_eq!(settings.read_i32(&[0, 1]), 45);
        let mut text = [0u8; 20];
        settings.read_bytes(&[1, 10], &mut text);
        assert_eq!(&text[..13], b"Modified text");

        // leaf_b2 is NotRomStored; writing it must not touch rom_size bytes.
        assert_eq!(settings.write_i32(&[2], 100), StatusCode::Ok);
        assert_eq!(settings.read_i32(&[2]), 100);
    }

    #[test]
    fn e2e_out_of_range_write_is_rejected() {
        let rom = MemoryRom::new(4096);
        let mut settings = Settings::new(demo_tree(), rom, 4096).unwrap();
        settings.init(false);
        assert_eq!(settings.write_i32(&[0, 0], 100001), StatusCode::ValidateError);
        assert_eq!(settings.read_i32(&[0, 0]), 12345);
    }

    #[test]
    fn e2e_power_cycle_after_writes_preserves_state() {
        let rom = MemoryRom::new(4096);
        let mut settings = Settings::new(demo_tree(), rom, 4096).unwrap();
        settings.init(false);
        settings.write_i32(&[0, 0], 9000);
        settings.write_i32(&[0, 1], 45);

        // Simulate a power cycle: re-validate the already-written rom image.
        let outcome = settings.init(false);
        assert!(!outcome.updated_rom, "a consistent image must not be repaired");
        assert_eq!(settings.read_i32(&[0, 0]), 9000);
        assert_eq!(settings.read_i32(&[0, 1]), 45);
    }

    #[test]
    fn request_arg_reports_path_history() {
        let rom = MemoryRom::new(4096);
        let mut settings = Settings::new(demo_tree(), rom, 4096).unwrap();
        settings.init(false);
        settings.read_i32(&[1, 7]);
        assert_eq!(settings.request_arg(0), 7);
        assert_eq!(settings.request_arg(1), 1);
    }

    #[test]
    fn callback_cache_observes_applied_integer() {
        let rom = MemoryRom::new(4096);
        let mut settings = Settings::new(demo_tree(), rom, 4096).unwrap();
        settings.init(false);
        settings.write_i32(&[0, 0], 777);
        match settings.callback_cache() {
            Some(CallbackValue::Integer(v)) => assert_eq!(*v, 777),
            other => panic!("expected cached integer, got {other:?}"),
        }
    }

    #[test]
    fn reset_to_defaults_restores_the_whole_tree() {
        let rom = MemoryRom::new(4096);
        let mut settings = Settings::new(demo_tree(), rom, 4096).unwrap();
        settings.init(false);
        settings.write_i32(&[0, 0], 9000);
        settings.reset_to_defaults();
        assert_eq!(settings.read_i32(&[0, 0]), 12345);
    }

    #[test]
    fn depth_exceeded_when_path_longer_than_max_depth() {
        let rom = MemoryRom::new(4096);
        let mut settings = Settings::new(demo_tree(), rom, 4096).unwrap();
        settings.init(false);
        let long_path = [0u32; (MAX_DEPTH + 1) as usize];
        let mut out = 0i32;
        let status = settings.request(&long_path, Op::Read, &mut Value::Integer(&mut out));
        assert_eq!(status, StatusCode::DepthExceeded);
    }
}
