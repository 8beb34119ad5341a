//! Defines the [`Props`] type, a key-value map that associates arbitrary
//! properties with streams and clients.

use std::{
    collections::BTreeMap,
    ffi::{CStr, CString},
};

use enum_primitive_derive::Primitive;

use super::serde::*;
use super::ProtocolError;

/// A list of key-value pairs that associate arbitrary properties with an
/// object. Keys are null-terminated strings and values are arbitrary binary
/// blobs, although by convention both are usually null-terminated ASCII
/// strings.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Props(BTreeMap<Box<CStr>, Box<[u8]>>);

impl Props {
    /// Creates a new, empty property list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a well-known property in the map, overwriting any previous value.
    pub fn set<T>(&mut self, prop: Prop, value: T)
    where
        T: AsRef<CStr>,
    {
        self.set_bytes(prop.to_c_str(), value.as_ref().to_bytes_with_nul());
    }

    /// Sets a property in the map, overwriting any previous value.
    pub fn set_bytes<K, V>(&mut self, key: K, value: V)
    where
        K: AsRef<CStr>,
        V: AsRef<[u8]>,
    {
        self.0.insert(key.as_ref().into(), value.as_ref().into());
    }

    /// Gets the value of a well-known property, or `None` if unset.
    pub fn get(&self, prop: Prop) -> Option<&[u8]> {
        self.get_bytes(prop.to_c_str())
    }

    /// Gets a property from the map.
    pub fn get_bytes<K>(&self, key: K) -> Option<&[u8]>
    where
        K: AsRef<CStr>,
    {
        self.0.get(key.as_ref()).map(|r| &r[..])
    }

    /// Returns true if the well-known property is present.
    pub fn contains(&self, prop: Prop) -> bool {
        self.get(prop).is_some()
    }

    /// Creates an iterator over the properties.
    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, Box<CStr>, Box<[u8]>> {
        self.0.iter()
    }

    /// Returns the number of properties in the map.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the map holds no properties.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Props {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dm = f.debug_map();
        let opaque = CString::new("<bytes>").unwrap();

        for (k, v) in self.0.iter() {
            match CStr::from_bytes_with_nul(v) {
                Ok(s) => dm.entry(k, &s),
                Err(_) => dm.entry(k, &opaque),
            };
        }

        dm.finish()
    }
}

impl TagStructRead for Props {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.expect_tag(Tag::PropList)?;

        let mut props = Props::new();
        loop {
            let key = match ts.read_string()? {
                Some(key) => key,
                None => break,
            };

            let len = ts.read_u32()?;
            let value = ts.read_arbitrary()?;
            if value.len() as u32 != len {
                return Err(ProtocolError::Invalid(format!(
                    "proplist value length mismatch ({} vs {})",
                    len,
                    value.len()
                )));
            }

            props.set_bytes(key, value);
        }

        Ok(props)
    }
}

impl TagStructWrite for Props {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        use byteorder::WriteBytesExt;

        w.inner().write_u8(Tag::PropList as u8)?;
        for (key, value) in self.iter() {
            w.write_string(Some(key))?;
            w.write_u32(value.len() as u32)?;
            w.write_arbitrary(value)?;
        }
        w.write_null_string()?;
        Ok(())
    }
}

/// Well-known property list keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum Prop {
    /// For streams: localized media name, formatted as UTF-8.
    MediaName,

    /// For streams: logic role of this media.
    MediaRole,

    /// For clients/streams: localized human readable application name.
    ApplicationName,

    /// For clients/streams: a textual id for identifying an application.
    ApplicationId,

    /// For clients/streams: application process PID, as text.
    ApplicationProcessId,

    /// For clients/streams: application process name.
    ApplicationProcessBinary,
}

impl Prop {
    /// Returns the wire name of the property.
    pub fn to_c_str(self) -> &'static CStr {
        let bytes: &[u8] = match self {
            Prop::MediaName => b"media.name\0",
            Prop::MediaRole => b"media.role\0",
            Prop::ApplicationName => b"application.name\0",
            Prop::ApplicationId => b"application.id\0",
            Prop::ApplicationProcessId => b"application.process.id\0",
            Prop::ApplicationProcessBinary => b"application.process.binary\0",
        };

        CStr::from_bytes_with_nul(bytes).unwrap()
    }
}

/// How a proplist update is applied to the existing list.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum PropsUpdateMode {
    /// Replace the entire list with the new one.
    Set = 0,
    /// Add new entries, keeping existing values.
    Merge = 1,
    /// Add new entries, overwriting existing values.
    Replace = 2,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::test_util::test_serde;

    #[test]
    fn empty_props_serde() -> anyhow::Result<()> {
        test_serde(&Props::new())
    }

    #[test]
    fn props_serde() -> anyhow::Result<()> {
        let mut props = Props::new();
        props.set(Prop::MediaName, CString::new("test").unwrap());
        props.set(Prop::ApplicationName, CString::new("pulsewire").unwrap());
        props.set_bytes(
            CString::new("custom.key").unwrap(),
            b"not a string\xff".as_slice(),
        );

        test_serde(&props)
    }
}
