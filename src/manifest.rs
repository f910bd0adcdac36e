use crate::errors::Error;
use std::io::Read;
use tracing::warn;

/// Main-section attribute names this crate gives meaning to. Everything else
/// is preserved verbatim for callers.
pub mod attribute_names {
    /// Binary name of the application entry point, consumed by launchers.
    pub const START_CLASS: &str = "Start-Class";
    /// Path within the archive of the classpath index sidecar.
    pub const CLASSPATH_INDEX: &str = "Spring-Boot-Classpath-Index";
    pub const AUTOMATIC_MODULE_NAME: &str = "Automatic-Module-Name";
    pub const IMPLEMENTATION_TITLE: &str = "Implementation-Title";
    pub const IMPLEMENTATION_VERSION: &str = "Implementation-Version";
    pub const BUILT_BY: &str = "Built-By";
    pub const BUILD_JDK_SPEC: &str = "Build-Jdk-Spec";
    pub const SEALED: &str = "Sealed";
}

/// An ordered attribute map. Names compare case-insensitively, as the JAR
/// manifest format requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn put(&mut self, name: String, value: String) {
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed `META-INF/MANIFEST.MF`: the main attribute section plus any
/// named per-entry sections, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    main: Attributes,
    sections: Vec<(String, Attributes)>,
}

impl Manifest {
    pub fn read_from(mut reader: impl Read) -> Result<Manifest, Error> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(Error::io)?;
        Manifest::from_bytes(&bytes)
    }

    /// Parse manifest text: `Key: value` attribute lines, continuation lines
    /// marked by a leading space, sections separated by blank lines, and
    /// named sections introduced by a `Name:` attribute.
    ///
    /// Continuations are joined before the `Key: value` split, since the
    /// 72-byte line wrap may fall anywhere, attribute names included.
    pub fn from_bytes(bytes: &[u8]) -> Result<Manifest, Error> {
        let text = std::str::from_utf8(bytes).map_err(Error::utf8)?;
        let mut manifest = Manifest::default();
        let mut in_main = true;
        let mut logical: Vec<String> = Vec::new();

        let finish_section = |manifest: &mut Manifest,
                                  in_main: &mut bool,
                                  logical: &mut Vec<String>|
         -> Result<(), Error> {
            if logical.is_empty() && !*in_main {
                return Ok(());
            }
            let mut attributes = Attributes::default();
            let mut section_name = None;
            for (position, line) in logical.drain(..).enumerate() {
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| Error::malformed("manifest attribute line"))?;
                let value = value.strip_prefix(' ').unwrap_or(value);
                if !*in_main && position == 0 && name.eq_ignore_ascii_case("Name") {
                    section_name = Some(value.to_owned());
                    continue;
                }
                attributes.put(name.to_owned(), value.to_owned());
            }
            if *in_main {
                manifest.main = attributes;
                *in_main = false;
            } else if let Some(name) = section_name {
                manifest.sections.push((name, attributes));
            } else if !attributes.is_empty() {
                warn!("discarding manifest section without a Name attribute");
            }
            Ok(())
        };

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                finish_section(&mut manifest, &mut in_main, &mut logical)?;
            } else if let Some(continuation) = line.strip_prefix(' ') {
                logical
                    .last_mut()
                    .ok_or_else(|| Error::malformed("manifest continuation line"))?
                    .push_str(continuation);
            } else {
                logical.push(line.to_owned());
            }
        }
        finish_section(&mut manifest, &mut in_main, &mut logical)?;
        Ok(manifest)
    }

    pub fn main_attributes(&self) -> &Attributes {
        &self.main
    }

    /// Attributes of the named per-entry section, if present.
    pub fn attributes_for(&self, name: &str) -> Option<&Attributes> {
        self.sections
            .iter()
            .find(|(section, _)| section == name)
            .map(|(_, attributes)| attributes)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &Attributes)> {
        self.sections
            .iter()
            .map(|(name, attributes)| (name.as_str(), attributes))
    }
}
