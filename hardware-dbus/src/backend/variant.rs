//! D-Bus variant to property-value normalization

use hardware_types::PropertyValue;
use zbus::zvariant::{OwnedValue, Value};

/// Decode a D-Bus byte-string (NUL-terminated byte array) into text.
pub(crate) fn decode_byte_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Convert one D-Bus variant into the facade's closed property value set.
///
/// Returns `None` for shapes with no sensible mapping (dicts, structs, file
/// descriptors); callers skip those keys rather than fail the bulk fetch.
pub(crate) fn from_variant(value: &OwnedValue) -> Option<PropertyValue> {
    convert(value)
}

fn convert(value: &Value<'_>) -> Option<PropertyValue> {
    match value {
        Value::Bool(b) => Some(PropertyValue::Bool(*b)),
        Value::U8(v) => Some(PropertyValue::UInt(u64::from(*v))),
        Value::U16(v) => Some(PropertyValue::UInt(u64::from(*v))),
        Value::U32(v) => Some(PropertyValue::UInt(u64::from(*v))),
        Value::U64(v) => Some(PropertyValue::UInt(*v)),
        Value::I16(v) => Some(PropertyValue::Int(i64::from(*v))),
        Value::I32(v) => Some(PropertyValue::Int(i64::from(*v))),
        Value::I64(v) => Some(PropertyValue::Int(*v)),
        Value::F64(v) => Some(PropertyValue::Double(*v)),
        Value::Str(s) => Some(PropertyValue::Text(s.to_string())),
        Value::ObjectPath(p) => Some(PropertyValue::Text(p.to_string())),
        Value::Value(inner) => convert(inner),
        Value::Array(array) => convert_array(array.iter()),
        _ => None,
    }
}

fn convert_array<'a>(items: impl Iterator<Item = &'a Value<'a>>) -> Option<PropertyValue> {
    let items: Vec<&Value<'_>> = items.collect();
    if items.is_empty() {
        return Some(PropertyValue::TextList(Vec::new()));
    }

    // Byte arrays are C strings on the wire (device paths, mount points).
    if items.iter().all(|v| matches!(v, Value::U8(_))) {
        let bytes: Vec<u8> = items
            .iter()
            .filter_map(|v| match v {
                Value::U8(b) => Some(*b),
                _ => None,
            })
            .collect();
        return Some(PropertyValue::Text(decode_byte_string(&bytes)));
    }

    // Arrays of byte arrays (e.g. MountPoints) become string lists.
    if items.iter().all(|v| matches!(v, Value::Array(_))) {
        let mut texts = Vec::with_capacity(items.len());
        for item in items {
            match convert(item) {
                Some(PropertyValue::Text(s)) => texts.push(s),
                _ => return None,
            }
        }
        return Some(PropertyValue::TextList(texts));
    }

    let mut texts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Str(s) => texts.push(s.to_string()),
            Value::ObjectPath(p) => texts.push(p.to_string()),
            _ => return None,
        }
    }
    Some(PropertyValue::TextList(texts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_strings_drop_the_trailing_nul() {
        assert_eq!(decode_byte_string(b"/dev/sda1\0"), "/dev/sda1");
        assert_eq!(decode_byte_string(b"/dev/sda1"), "/dev/sda1");
        assert_eq!(decode_byte_string(b""), "");
    }

    #[test]
    fn scalars_convert_to_their_property_shape() {
        let v = OwnedValue::from(42u32);
        assert_eq!(from_variant(&v), Some(PropertyValue::UInt(42)));

        let v = OwnedValue::from(true);
        assert_eq!(from_variant(&v), Some(PropertyValue::Bool(true)));

        let v = OwnedValue::from(-3i32);
        assert_eq!(from_variant(&v), Some(PropertyValue::Int(-3)));
    }
}
