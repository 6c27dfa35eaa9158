// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-kind leaf request handlers.
//!
//! Dispatch is by the leaf's [`LeafPayload`] variant, not a stored function
//! pointer or trait object: the two built-in kinds are in 1:1
//! correspondence with their payload, and a third kind is never exercised.

use crate::codec::{bytes_to_u32_msb, u32_to_bytes_msb};
use crate::node::{ChangeCallback, LeafPayload};
use crate::op::{CallbackValue, Op, Outcome, StatusCode, Value};
use crate::rom::RomDevice;
use crate::Storage;
use crate::alloc::vec::Vec;

fn validate_failure(status: StatusCode) -> Outcome {
    #[cfg(feature = "panic-on-validate-error")]
    {
        let _ = status;
        panic!("value failed validation");
    }
    #[cfg(not(feature = "panic-on-validate-error"))]
    {
        Outcome::new(status)
    }
}

/// Serves a request against an integer leaf.
///
/// `ram` is the leaf's own window into the RAM pool (`leaf.size` bytes).
/// `abs_rom_off` is the leaf's absolute ROM offset, meaningful only when
/// `storage` is `RomStored`. `last_arg` is the terminal path index, passed
/// through to `on_change` unmodified.
#[allow(clippy::too_many_arguments)]
pub fn handle_integer(
    payload: &mut LeafPayload,
    storage: Storage,
    on_change: &Option<ChangeCallback>,
    rom: &mut dyn RomDevice,
    abs_rom_off: u32,
    ram: &mut [u8],
    op: Op,
    value: &mut Value<'_>,
    last_arg: u32,
    cache: &mut Option<CallbackValue>,
) -> Outcome {
    let (default, min, max) = match payload {
        LeafPayload::Integer { default, min, max } => (*default, *min, *max),
        LeafPayload::ByteArray { .. } => unreachable!("integer handler invoked on byte-array leaf"),
    };

    let read_current = |value: &mut Value<'_>| {
        let current = bytes_to_u32_msb(ram) as i32;
        match value {
            Value::Integer(out) => **out = current,
            Value::Raw(buf) => u32_to_bytes_msb(current as u32, buf),
        }
    };

    match op {
        Op::Read => {
            read_current(value);
            Outcome::ok()
        }
        Op::Validate => {
            let candidate = match value {
                Value::Integer(v) => **v,
                Value::Raw(buf) => bytes_to_u32_msb(buf) as i32,
            };
            if candidate < min || candidate > max {
                validate_failure(StatusCode::ValidateError)
            } else {
                Outcome::ok()
            }
        }
        Op::GetMin => {
            match value {
                Value::Integer(out) => **out = min,
                Value::Raw(buf) => u32_to_bytes_msb(min as u32, buf),
            }
            Outcome::ok()
        }
        Op::GetMax => {
            match value {
                Value::Integer(out) => **out = max,
                Value::Raw(buf) => u32_to_bytes_msb(max as u32, buf),
            }
            Outcome::ok()
        }
        Op::GetSize => {
            match value {
                Value::Integer(out) => **out = ram.len() as i32,
                Value::Raw(buf) => u32_to_bytes_msb(ram.len() as u32, buf),
            }
            Outcome::ok()
        }
        Op::RestoreValidate => {
            if matches!(storage, Storage::RomStored) {
                rom.read(abs_rom_off, ram);
            }
            let current = bytes_to_u32_msb(ram) as i32;
            if current < min || current > max {
                Outcome::new(StatusCode::ValidateError)
            } else {
                Outcome::ok()
            }
        }
        Op::RestoreDefault => {
            u32_to_bytes_msb(default as u32, ram);
            let mut outcome = Outcome::ok();
            if matches!(storage, Storage::RomStored) {
                rom.write(abs_rom_off, ram);
                outcome = outcome.with_updated_rom();
            }
            outcome
        }
        Op::ApplyNoCb | Op::Apply | Op::Store | Op::WriteNoCb | Op::Write => {
            let mut outcome = Outcome::ok();
            if op.applies() {
                let candidate = match value {
                    Value::Integer(v) => **v,
                    Value::Raw(buf) => bytes_to_u32_msb(buf) as i32,
                };
                if candidate < min || candidate > max {
                    return validate_failure(StatusCode::ValidateError);
                }
                u32_to_bytes_msb(candidate as u32, ram);
                *cache = Some(CallbackValue::Integer(candidate));
                if op.fires_callback() {
                    if let Some(cb) = on_change {
                        cb(op, last_arg, cache.as_ref().unwrap());
                    }
                }
            }
            if op.stores() && matches!(storage, Storage::RomStored) {
                rom.write(abs_rom_off, ram);
                outcome = outcome.with_updated_rom();
            }
            outcome
        }
    }
}

/// Serves a request against a byte-array leaf.
///
/// Only [`Value::Raw`] inputs are meaningful here; the native integer form
/// is never used. A caller supplying [`Value::Integer`] receives
/// `StatusCode::WrongRequestType`.
#[allow(clippy::too_many_arguments)]
pub fn handle_byte_array(
    payload: &mut LeafPayload,
    storage: Storage,
    on_change: &Option<ChangeCallback>,
    rom: &mut dyn RomDevice,
    abs_rom_off: u32,
    ram: &mut [u8],
    op: Op,
    value: &mut Value<'_>,
    last_arg: u32,
    cache: &mut Option<CallbackValue>,
) -> Outcome {
    let default: &Option<Vec<u8>> = match payload {
        LeafPayload::ByteArray { default } => default,
        LeafPayload::Integer { .. } => unreachable!("byte-array handler invoked on integer leaf"),
    };

    match op {
        Op::Read => match value {
            Value::Raw(buf) => {
                buf.copy_from_slice(ram);
                Outcome::ok()
            }
            Value::Integer(_) => Outcome::new(StatusCode::WrongRequestType),
        },
        Op::Validate => match value {
            // Contents are opaque and length is not checked: a documented
            // limitation carried over unchanged (see DESIGN.md).
            Value::Raw(_) => Outcome::ok(),
            Value::Integer(_) => Outcome::new(StatusCode::ValidateError),
        },
        Op::GetMin | Op::GetMax => Outcome::new(StatusCode::WrongNodeType),
        Op::GetSize => match value {
            Value::Raw(buf) => {
                u32_to_bytes_msb(ram.len() as u32, buf);
                Outcome::ok()
            }
            Value::Integer(out) => {
                **out = ram.len() as i32;
                Outcome::ok()
            }
        },
        Op::RestoreValidate => {
            if matches!(storage, Storage::RomStored) {
                rom.read(abs_rom_off, ram);
            } else {
                fill_from_default(ram, default);
            }
            Outcome::ok()
        }
        Op::RestoreDefault => {
            fill_from_default(ram, default);
            let mut outcome = Outcome::ok();
            if matches!(storage, Storage::RomStored) {
                rom.write(abs_rom_off, ram);
                outcome = outcome.with_updated_rom();
            }
            outcome
        }
        Op::ApplyNoCb | Op::Apply | Op::Store | Op::WriteNoCb | Op::Write => {
            let mut outcome = Outcome::ok();
            if op.applies() {
                let buf = match value {
                    Value::Raw(buf) => buf,
                    Value::Integer(_) => return Outcome::new(StatusCode::WrongRequestType),
                };
                ram.copy_from_slice(buf);
                *cache = Some(CallbackValue::Bytes(ram.to_vec()));
                if op.fires_callback() {
                    if let Some(cb) = on_change {
                        cb(op, last_arg, cache.as_ref().unwrap());
                    }
                }
            }
            if op.stores() && matches!(storage, Storage::RomStored) {
                rom.write(abs_rom_off, ram);
                outcome = outcome.with_updated_rom();
            }
            outcome
        }
    }
}

fn fill_from_default(ram: &mut [u8], default: &Option<Vec<u8>>) {
    match default {
        Some(bytes) => ram.copy_from_slice(bytes),
        None => ram.fill(0),
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::rom::MemoryRom;

    fn int_payload(default: i32, min: i32, max: i32) -> LeafPayload {
        LeafPayload::Integer { default, min, max }
    }

    #[test]
    fn integer_write_round_trips() {
        let mut payload = int_payload(10, 0, 100);
        let mut rom = MemoryRom::new(16);
        let mut ram = [0u8; 4];
        let mut cache = None;
        let mut v = 42i32;
        let mut value = Value::Integer(&mut v);
        let outcome = handle_integer(
            &mut payload,
            Storage::RomStored,
            &None,
            &mut rom,
            0,
            &mut ram,
            Op::Write,
            &mut value,
            0,
            &mut cache,
        );
        assert_eq!(outcome.status, StatusCode::Ok);
        assert!(outcome.updated_rom);

        let mut out = 0i32;
        let mut read_value = Value::Integer(&mut out);
        handle_integer(
            &mut payload,
            Storage::RomStored,
            &None,
            &mut rom,
            0,
            &mut ram,
            Op::Read,
            &mut read_value,
            0,
            &mut cache,
        );
        assert_eq!(out, 42);
    }

    #[test]
    fn integer_out_of_range_fails_validation_and_leaves_ram() {
        let mut payload = int_payload(10, 0, 100);
        let mut rom = MemoryRom::new(16);
        let mut ram = [0u8; 4];
        crate::codec::u32_to_bytes_msb(10, &mut ram);
        let mut cache = None;
        let mut v = 9000i32;
        let mut value = Value::Integer(&mut v);
        let outcome = handle_integer(
            &mut payload,
            Storage::RomStored,
            &None,
            &mut rom,
            0,
            &mut ram,
            Op::Write,
            &mut value,
            0,
            &mut cache,
        );
        assert_eq!(outcome.status, StatusCode::ValidateError);
        assert_eq!(crate::codec::bytes_to_u32_msb(&ram), 10);
    }

    #[test]
    fn byte_array_write_round_trips() {
        let mut payload = LeafPayload::ByteArray { default: None };
        let mut rom = MemoryRom::new(16);
        let mut ram = [0u8; 4];
        let mut cache = None;
        let mut buf = [1u8, 2, 3, 4];
        let mut value = Value::Raw(&mut buf);
        let outcome = handle_byte_array(
            &mut payload,
            Storage::RomStored,
            &None,
            &mut rom,
            0,
            &mut ram,
            Op::Write,
            &mut value,
            0,
            &mut cache,
        );
        assert_eq!(outcome.status, StatusCode::Ok);
        assert_eq!(ram, [1, 2, 3, 4]);
    }

    #[test]
    fn byte_array_integer_value_is_wrong_request_type() {
        let mut payload = LeafPayload::ByteArray { default: None };
        let mut rom = MemoryRom::new(16);
        let mut ram = [0u8; 4];
        let mut cache = None;
        let mut v = 1i32;
        let mut value = Value::Integer(&mut v);
        let outcome = handle_byte_array(
            &mut payload,
            Storage::RomStored,
            &None,
            &mut rom,
            0,
            &mut ram,
            Op::Read,
            &mut value,
            0,
            &mut cache,
        );
        assert_eq!(outcome.status, StatusCode::WrongRequestType);
    }

    #[test]
    fn byte_array_restore_default_zero_fills_when_no_default() {
        let mut payload = LeafPayload::ByteArray { default: None };
        let mut rom = MemoryRom::new(16);
        let mut ram = [5u8; 4];
        let mut cache = None;
        let mut buf = [0u8; 4];
        let mut value = Value::Raw(&mut buf);
        handle_byte_array(
            &mut payload,
            Storage::NotRomStored,
            &None,
            &mut rom,
            0,
            &mut ram,
            Op::RestoreDefault,
            &mut value,
            0,
            &mut cache,
        );
        assert_eq!(ram, [0, 0, 0, 0]);
    }

    #[test]
    fn integer_get_min_max_size() {
        let mut payload = int_payload(10, 0, 100);
        let mut rom = MemoryRom::new(4);
        let mut ram = [0u8; 4];
        let mut cache = None;
        let mut out = 0i32;
        let mut value = Value::Integer(&mut out);
        handle_integer(
            &mut payload,
            Storage::RomStored,
            &None,
            &mut rom,
            0,
            &mut ram,
            Op::GetMin,
            &mut value,
            0,
            &mut cache,
        );
        assert_eq!(out, 0);
        let mut value = Value::Integer(&mut out);
        handle_integer(
            &mut payload,
            Storage::RomStored,
            &None,
            &mut rom,
            0,
            &mut ram,
            Op::GetMax,
            &mut value,
            0,
            &mut cache,
        );
        assert_eq!(out, 100);
    }
}
