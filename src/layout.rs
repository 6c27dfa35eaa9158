// SPDX-License-Identifier: MIT OR Apache-2.0

//! The recursive RAM/ROM offset assignment pass.

use core::fmt;

use crate::node::{Header, Node};
use crate::MAX_DEPTH;

/// A layout-time failure. Unlike the runtime programming errors elsewhere
/// in this crate, these are returned rather than panicking, since a
/// mis-declared tree is something a caller (or a test) may reasonably want
/// to observe and react to rather than crash on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The tree nests deeper than `MAX_DEPTH` levels.
    DepthExceeded {
        /// The depth at which the overflow was detected.
        depth: u32,
        /// The maximum allowed depth.
        max: u32,
    },
    /// The root's computed RAM footprint exceeds the caller-supplied pool.
    CapacityExceeded {
        /// Bytes the tree actually needs.
        needed: u32,
        /// Bytes the caller made available.
        pool: u32,
    },
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::DepthExceeded { depth, max } => {
                write!(f, "tree depth {depth} exceeds maximum allowed depth {max}")
            }
            InitError::CapacityExceeded { needed, pool } => {
                write!(f, "tree needs {needed} ram bytes but pool has {pool}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InitError {}

/// Lays out `root`, assigning every node's [`Header`] and reporting the
/// root's total `(ram_size, rom_size)`.
///
/// Fails with [`InitError::DepthExceeded`] if any aggregate nests beyond
/// `MAX_DEPTH`, or with [`InitError::CapacityExceeded`] if the computed RAM
/// footprint exceeds `ram_pool_size`.
pub fn layout(root: &mut Node, ram_pool_size: u32) -> Result<(u32, u32), InitError> {
    let (ram_size, rom_size) = layout_node(root, 0)?;
    if ram_size > ram_pool_size {
        return Err(InitError::CapacityExceeded {
            needed: ram_size,
            pool: ram_pool_size,
        });
    }
    Ok((ram_size, rom_size))
}

fn layout_node(node: &mut Node, depth: u32) -> Result<(u32, u32), InitError> {
    if depth >= MAX_DEPTH {
        return Err(InitError::DepthExceeded {
            depth,
            max: MAX_DEPTH,
        });
    }
    match node {
        Node::Leaf(leaf) => Ok((leaf.size, leaf.rom_size())),
        Node::Group(group) => {
            let mut ram_cursor = crate::NODE_CRC_SIZE;
            let mut rom_cursor = crate::NODE_CRC_SIZE;

            // Leaves first, in declared index order, advancing both cursors
            // (a NotRomStored leaf advances RAM only, since its rom_size is 0).
            for child in group.children.iter_mut().flatten() {
                if let Node::Leaf(leaf) = child {
                    leaf.header = Header {
                        ram_off: ram_cursor,
                        rom_off: rom_cursor,
                    };
                    ram_cursor += leaf.size;
                    rom_cursor += leaf.rom_size();
                }
            }

            // Then sub-aggregates, in declared index order, placed after
            // every leaf so the aggregate CRC scan never has to skip over a
            // nested aggregate's own CRC header.
            for child in group.children.iter_mut().flatten() {
                if matches!(child, Node::Group(_) | Node::List(_)) {
                    let header = Header {
                        ram_off: ram_cursor,
                        rom_off: rom_cursor,
                    };
                    let (child_ram, child_rom) = layout_node(child, depth + 1)?;
                    child.set_header(header);
                    ram_cursor += child_ram;
                    rom_cursor += child_rom;
                }
            }

            group.ram_size = ram_cursor;
            group.rom_size = rom_cursor;
            Ok((group.ram_size, group.rom_size))
        }
        Node::List(list) => {
            let element_header = Header {
                ram_off: crate::NODE_CRC_SIZE,
                rom_off: crate::NODE_CRC_SIZE,
            };
            let (element_ram, element_rom) = layout_node(&mut list.element, depth + 1)?;
            list.element.set_header(element_header);
            list.element_ram_size = element_ram;
            list.element_rom_size = element_rom;
            list.ram_size = crate::NODE_CRC_SIZE + list.count * element_ram;
            list.rom_size = crate::NODE_CRC_SIZE + list.count * element_rom;
            Ok((list.ram_size, list.rom_size))
        }
    }
}
