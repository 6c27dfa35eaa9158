// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request op codes and recoverable result codes.

use core::fmt;

/// A requested operation against a leaf node.
///
/// Discriminants are preserved numerically so the three independent flags
/// they encode (apply the value, fire the change callback, write to ROM)
/// stay visible as the same bit pattern a reader familiar with the
/// reference protocol would expect, even though Rust doesn't need the bit
/// trick to compose the variants below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Copy the current RAM value out.
    Read = 0x00,
    /// Validate and write RAM; suppress the change callback.
    ApplyNoCb = 0x01,
    /// Validate and write RAM; fire the change callback.
    Apply = 0x03,
    /// Write the RAM window to ROM.
    Store = 0x04,
    /// Apply without callback, then store.
    WriteNoCb = 0x05,
    /// Apply with callback, then store.
    Write = 0x07,
    /// Return `Ok` iff the value satisfies the leaf's constraint.
    Validate = 0x08,
    /// Emit the leaf's declared minimum.
    GetMin = 0x10,
    /// Emit the leaf's declared maximum.
    GetMax = 0x20,
    /// Emit the leaf's declared size in bytes.
    GetSize = 0x40,
    /// Load from ROM, then validate.
    RestoreValidate = 0xFE,
    /// Write the declared default to RAM (and ROM, if stored there).
    RestoreDefault = 0xFF,
}

impl Op {
    const APPLY_BIT: u8 = 0x01;
    const STORE_BIT: u8 = 0x04;

    /// Whether this op asks the handler to validate-and-write the value.
    pub fn applies(self) -> bool {
        matches!(self, Op::ApplyNoCb | Op::Apply | Op::WriteNoCb | Op::Write)
    }

    /// Whether this op asks the handler to fire the change callback.
    pub fn fires_callback(self) -> bool {
        self as u8 & Self::APPLY_BIT != 0 && matches!(self, Op::Apply | Op::Write)
    }

    /// Whether this op asks the handler to write the RAM window to ROM.
    pub fn stores(self) -> bool {
        self as u8 & Self::STORE_BIT != 0
    }
}

/// Recoverable result code returned by handlers, the validator, and the
/// dispatcher. Programming errors (out-of-range path index, unset child
/// under `panic-on-uninitialized-node`, depth overflow during layout) are
/// not represented here; they panic instead (see `crate::layout::InitError`
/// for the one case that is recoverable by design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success.
    Ok,
    /// Encountered an unrecognized node header. Unreachable through the
    /// public API since `Node` is a closed enum; kept for defense at the
    /// trait boundary.
    UnknownNodeType,
    /// Operation is undefined for this node kind (e.g. `GetMin` on a byte
    /// array leaf).
    WrongNodeType,
    /// The handler does not implement the requested op.
    WrongRequestType,
    /// Path length exceeded `MAX_DEPTH` during dispatch.
    DepthExceeded,
    /// Value failed its bounds check, or a byte-array apply was requested
    /// without a raw buffer.
    ValidateError,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StatusCode::Ok => "ok",
            StatusCode::UnknownNodeType => "unknown node type",
            StatusCode::WrongNodeType => "operation undefined for this node kind",
            StatusCode::WrongRequestType => "handler does not implement this op",
            StatusCode::DepthExceeded => "path depth exceeded",
            StatusCode::ValidateError => "value failed validation",
        };
        f.write_str(text)
    }
}

/// A `StatusCode` paired with whether the operation caused a ROM write that
/// an enclosing aggregate's CRC must account for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// The result of the operation.
    pub status: StatusCode,
    /// Set when RAM and/or ROM changed in a way that requires the
    /// enclosing aggregate's CRC-16 to be recomputed.
    pub updated_rom: bool,
}

impl Outcome {
    /// An outcome carrying `status` and no pending CRC refresh.
    pub fn new(status: StatusCode) -> Self {
        Outcome {
            status,
            updated_rom: false,
        }
    }

    /// `Outcome::new(StatusCode::Ok)`.
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    /// Same status, with `updated_rom` forced to `true`.
    pub fn with_updated_rom(mut self) -> Self {
        self.updated_rom = true;
        self
    }

    /// Combines two outcomes from sibling subtrees: the first non-`Ok`
    /// status wins, and `updated_rom` flags are OR'd.
    pub fn combine(self, other: Outcome) -> Outcome {
        let status = if self.status == StatusCode::Ok {
            other.status
        } else {
            self.status
        };
        Outcome {
            status,
            updated_rom: self.updated_rom || other.updated_rom,
        }
    }
}

/// The value carried into and out of a leaf request.
pub enum Value<'a> {
    /// Native 32-bit integer form, used by the integer handler.
    Integer(&'a mut i32),
    /// Serialized byte form, used by both handlers.
    Raw(&'a mut [u8]),
}

/// The value a successful `Apply`/`Write` deposits into the callback cache,
/// owned rather than aliasing the caller's buffer (see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackValue {
    /// An applied integer leaf's new value.
    Integer(i32),
    /// An applied byte-array leaf's new contents.
    Bytes(alloc::vec::Vec<u8>),
}

use crate::alloc;
