//! Bit-level access to items inside a packet buffer.

use std::collections::BTreeMap;

use crate::catalog::{DataType, Endianness, ItemDef, PacketDef};
use crate::error::{CoreError, CoreResult};
use crate::value::Value;

fn out_of_bounds(item: &ItemDef, buffer_len: usize) -> CoreError {
    CoreError::Validation(format!(
        "{} at bit offset {} size {} exceeds buffer of {} bytes",
        item.name, item.bit_offset, item.bit_size, buffer_len
    ))
}

fn is_byte_aligned(bit_offset: u32, bit_size: u32) -> bool {
    bit_offset % 8 == 0 && bit_size % 8 == 0
}

/// Unsigned read of `bit_size` bits starting at `bit_offset`.
fn read_bits(buffer: &[u8], bit_offset: u32, bit_size: u32, endianness: Endianness) -> u64 {
    if endianness == Endianness::LittleEndian && is_byte_aligned(bit_offset, bit_size) {
        let start = (bit_offset / 8) as usize;
        let len = (bit_size / 8) as usize;
        return buffer[start..start + len]
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    }
    let mut value = 0u64;
    for i in 0..bit_size {
        let bit = bit_offset + i;
        let byte = buffer[(bit / 8) as usize];
        let b = (byte >> (7 - bit % 8)) & 1;
        value = (value << 1) | u64::from(b);
    }
    value
}

fn write_bits(buffer: &mut [u8], bit_offset: u32, bit_size: u32, value: u64, endianness: Endianness) {
    if endianness == Endianness::LittleEndian && is_byte_aligned(bit_offset, bit_size) {
        let start = (bit_offset / 8) as usize;
        for i in 0..(bit_size / 8) as usize {
            buffer[start + i] = (value >> (8 * i)) as u8;
        }
        return;
    }
    for i in 0..bit_size {
        let bit = bit_offset + i;
        let shift = bit_size - 1 - i;
        let b = ((value >> shift) & 1) as u8;
        let idx = (bit / 8) as usize;
        let mask = 1u8 << (7 - bit % 8);
        if b == 1 {
            buffer[idx] |= mask;
        } else {
            buffer[idx] &= !mask;
        }
    }
}

fn sign_extend(value: u64, bit_size: u32) -> i64 {
    if bit_size >= 64 {
        return value as i64;
    }
    let sign = 1u64 << (bit_size - 1);
    if value & sign != 0 {
        (value | !((1u64 << bit_size) - 1)) as i64
    } else {
        value as i64
    }
}

fn read_scalar(
    item: &ItemDef,
    bit_offset: u32,
    buffer: &[u8],
    endianness: Endianness,
) -> CoreResult<Value> {
    let total_bits = buffer.len() as u32 * 8;
    match item.data_type {
        DataType::String | DataType::Block => {
            let start = (bit_offset / 8) as usize;
            let end = if item.bit_size == 0 {
                buffer.len()
            } else {
                start + (item.bit_size / 8) as usize
            };
            if start > buffer.len() || end > buffer.len() {
                return Err(out_of_bounds(item, buffer.len()));
            }
            let bytes = &buffer[start..end];
            if item.data_type == DataType::Block {
                Ok(Value::Block(bytes.to_vec()))
            } else {
                let trimmed = match bytes.iter().position(|b| *b == 0) {
                    Some(nul) => &bytes[..nul],
                    None => bytes,
                };
                Ok(Value::String(String::from_utf8_lossy(trimmed).into_owned()))
            }
        }
        DataType::Derived => Ok(Value::Null),
        _ => {
            if item.bit_size == 0 || item.bit_size > 64 || bit_offset + item.bit_size > total_bits {
                return Err(out_of_bounds(item, buffer.len()));
            }
            let raw = read_bits(buffer, bit_offset, item.bit_size, endianness);
            match item.data_type {
                DataType::Uint => match i64::try_from(raw) {
                    Ok(v) => Ok(Value::Int(v)),
                    Err(_) => Ok(Value::Float(raw as f64)),
                },
                DataType::Int => Ok(Value::Int(sign_extend(raw, item.bit_size))),
                DataType::Float => match item.bit_size {
                    32 => Ok(Value::Float(f64::from(f32::from_bits(raw as u32)))),
                    64 => Ok(Value::Float(f64::from_bits(raw))),
                    other => Err(CoreError::Validation(format!(
                        "{} has invalid FLOAT bit size {other}",
                        item.name
                    ))),
                },
                _ => Ok(Value::Null),
            }
        }
    }
}

/// Decode one item from a packet buffer.
pub fn read_item(item: &ItemDef, buffer: &[u8], endianness: Endianness) -> CoreResult<Value> {
    match item.array_length {
        Some(length) => (0..length)
            .map(|i| read_scalar(item, item.bit_offset + i * item.bit_size, buffer, endianness))
            .collect::<CoreResult<Vec<_>>>()
            .map(Value::Array),
        None => read_scalar(item, item.bit_offset, buffer, endianness),
    }
}

fn ensure_len(buffer: &mut Vec<u8>, len: usize) {
    if buffer.len() < len {
        buffer.resize(len, 0);
    }
}

fn value_bytes(item: &ItemDef, value: &Value) -> CoreResult<Vec<u8>> {
    match value {
        Value::Block(bytes) => Ok(bytes.clone()),
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Array(elements) => elements
            .iter()
            .map(|e| {
                e.as_i64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| invalid_value(item, value))
            })
            .collect(),
        _ => Err(invalid_value(item, value)),
    }
}

fn invalid_value(item: &ItemDef, value: &Value) -> CoreError {
    CoreError::Validation(format!(
        "Invalid value {value} for {:?} item {}",
        item.data_type, item.name
    ))
}

fn write_scalar(
    item: &ItemDef,
    bit_offset: u32,
    value: &Value,
    buffer: &mut Vec<u8>,
    endianness: Endianness,
) -> CoreResult<()> {
    match item.data_type {
        DataType::String | DataType::Block => {
            let mut bytes = value_bytes(item, value)?;
            let start = (bit_offset / 8) as usize;
            if item.bit_size == 0 {
                buffer.truncate(start);
                ensure_len(buffer, start);
                buffer.extend_from_slice(&bytes);
                return Ok(());
            }
            let size = (item.bit_size / 8) as usize;
            if bytes.len() > size {
                return Err(CoreError::Validation(format!(
                    "Value of {} bytes does not fit in {}-byte item {}",
                    bytes.len(),
                    size,
                    item.name
                )));
            }
            bytes.resize(size, 0);
            ensure_len(buffer, start + size);
            buffer[start..start + size].copy_from_slice(&bytes);
            Ok(())
        }
        DataType::Derived => Ok(()),
        _ => {
            if item.bit_size == 0 || item.bit_size > 64 {
                return Err(out_of_bounds(item, buffer.len()));
            }
            let bits = match item.data_type {
                DataType::Float => {
                    let v = value.as_f64().ok_or_else(|| invalid_value(item, value))?;
                    match item.bit_size {
                        32 => u64::from((v as f32).to_bits()),
                        64 => v.to_bits(),
                        _ => return Err(invalid_value(item, value)),
                    }
                }
                DataType::Uint => {
                    let v = integer(item, value)?;
                    let max = if item.bit_size == 64 {
                        i128::from(u64::MAX)
                    } else {
                        (1i128 << item.bit_size) - 1
                    };
                    if v < 0 || v > max {
                        return Err(not_fit(item, value));
                    }
                    v as u64
                }
                _ => {
                    let v = integer(item, value)?;
                    let half = 1i128 << (item.bit_size - 1);
                    if v < -half || v >= half {
                        return Err(not_fit(item, value));
                    }
                    (v as i64) as u64 & mask(item.bit_size)
                }
            };
            ensure_len(buffer, (bit_offset + item.bit_size).div_ceil(8) as usize);
            write_bits(buffer, bit_offset, item.bit_size, bits, endianness);
            Ok(())
        }
    }
}

fn mask(bit_size: u32) -> u64 {
    if bit_size >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_size) - 1
    }
}

fn integer(item: &ItemDef, value: &Value) -> CoreResult<i128> {
    match value {
        Value::Int(v) => Ok(i128::from(*v)),
        Value::Float(f) if f.is_finite() => Ok(f.round() as i128),
        _ => Err(invalid_value(item, value)),
    }
}

fn not_fit(item: &ItemDef, value: &Value) -> CoreError {
    CoreError::Validation(format!(
        "Value {value} does not fit in {}-bit {:?} item {}",
        item.bit_size, item.data_type, item.name
    ))
}

/// Encode one item into a packet buffer, growing the buffer as needed.
pub fn write_item(
    item: &ItemDef,
    value: &Value,
    buffer: &mut Vec<u8>,
    endianness: Endianness,
) -> CoreResult<()> {
    match (item.array_length, value) {
        (Some(length), Value::Array(elements)) => {
            if elements.len() > length as usize {
                return Err(CoreError::Validation(format!(
                    "{} accepts at most {length} elements",
                    item.name
                )));
            }
            for (i, element) in elements.iter().enumerate() {
                write_scalar(item, item.bit_offset + i as u32 * item.bit_size, element, buffer, endianness)?;
            }
            Ok(())
        }
        (Some(_), other) => Err(invalid_value(item, other)),
        (None, _) => write_scalar(item, item.bit_offset, value, buffer, endianness),
    }
}

/// Decode every wire item of a packet.
pub fn decode_packet(packet: &PacketDef, buffer: &[u8]) -> CoreResult<BTreeMap<String, Value>> {
    let mut values = BTreeMap::new();
    for item in &packet.items {
        if item.data_type == DataType::Derived {
            continue;
        }
        values.insert(item.name.clone(), read_item(item, buffer, packet.endianness)?);
    }
    Ok(values)
}

/// Whether `buffer` carries this packet's identification values.
pub fn identify(packet: &PacketDef, buffer: &[u8]) -> bool {
    let mut id_items = packet.id_items().peekable();
    if id_items.peek().is_none() {
        return false;
    }
    id_items.all(|item| match (&item.id_value, read_item(item, buffer, packet.endianness)) {
        (Some(expected), Ok(actual)) => expected.loosely_equals(&actual),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_bitfields() {
        let buffer = [0b1010_0000, 0x12, 0x34];
        let flag = ItemDef::new("FLAG", 0, 3, DataType::Uint);
        assert_eq!(read_item(&flag, &buffer, Endianness::BigEndian).unwrap(), Value::Int(5));
        let word = ItemDef::new("WORD", 8, 16, DataType::Uint);
        assert_eq!(
            read_item(&word, &buffer, Endianness::BigEndian).unwrap(),
            Value::Int(0x1234)
        );
        assert_eq!(
            read_item(&word, &buffer, Endianness::LittleEndian).unwrap(),
            Value::Int(0x3412)
        );
    }

    #[test]
    fn test_signed_and_float() {
        let mut buffer = Vec::new();
        let temp = ItemDef::new("TEMP", 0, 16, DataType::Int);
        write_item(&temp, &Value::Int(-75), &mut buffer, Endianness::BigEndian).unwrap();
        assert_eq!(buffer, vec![0xFF, 0xB5]);
        assert_eq!(
            read_item(&temp, &buffer, Endianness::BigEndian).unwrap(),
            Value::Int(-75)
        );

        let volts = ItemDef::new("VOLTS", 16, 32, DataType::Float);
        write_item(&volts, &Value::Float(1.5), &mut buffer, Endianness::BigEndian).unwrap();
        assert_eq!(
            read_item(&volts, &buffer, Endianness::BigEndian).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn test_range_rejected_on_write() {
        let mut buffer = Vec::new();
        let byte = ItemDef::new("BYTE", 0, 8, DataType::Uint);
        assert!(write_item(&byte, &Value::Int(256), &mut buffer, Endianness::BigEndian).is_err());
        assert!(write_item(&byte, &Value::Int(-1), &mut buffer, Endianness::BigEndian).is_err());
        let signed = ItemDef::new("SIGNED", 0, 8, DataType::Int);
        assert!(write_item(&signed, &Value::Int(-128), &mut buffer, Endianness::BigEndian).is_ok());
        assert!(write_item(&signed, &Value::Int(128), &mut buffer, Endianness::BigEndian).is_err());
    }

    #[test]
    fn test_strings_blocks_and_arrays() {
        let mut buffer = Vec::new();
        let label = ItemDef::new("LABEL", 0, 64, DataType::String);
        write_item(&label, &Value::from("ABC"), &mut buffer, Endianness::BigEndian).unwrap();
        assert_eq!(buffer.len(), 8);
        assert_eq!(
            read_item(&label, &buffer, Endianness::BigEndian).unwrap(),
            Value::from("ABC")
        );

        let tail = ItemDef::new("TAIL", 64, 0, DataType::Block);
        write_item(&tail, &Value::Block(vec![1, 2, 3]), &mut buffer, Endianness::BigEndian).unwrap();
        assert_eq!(
            read_item(&tail, &buffer, Endianness::BigEndian).unwrap(),
            Value::Block(vec![1, 2, 3])
        );

        let samples = ItemDef::new("SAMPLES", 0, 8, DataType::Uint).with_array(3);
        let buffer = [4u8, 5, 6];
        assert_eq!(
            read_item(&samples, &buffer, Endianness::BigEndian).unwrap(),
            Value::Array(vec![Value::Int(4), Value::Int(5), Value::Int(6)])
        );
    }

    #[test]
    fn test_identify() {
        let packet = PacketDef::new("INST", "HEALTH_STATUS")
            .with_item(ItemDef::new("PKTID", 0, 8, DataType::Uint).with_id(1));
        assert!(identify(&packet, &[1, 0]));
        assert!(!identify(&packet, &[2, 0]));
        assert!(!identify(&PacketDef::new("INST", "EMPTY"), &[1]));
    }
}
