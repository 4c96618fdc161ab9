//! The persisted state document.
//!
//! A single self-describing JSON document per file: a version tag, a
//! partial/full mode flag and an ordered list of components. Components
//! serialize sorted by key and element maps with sorted names, so
//! serialization is byte-deterministic for any given value. The mode flag
//! is recomputed from the components on read and a drifted flag is
//! rejected.

use crate::component::Component;
use crate::error::Error;
use crate::system::{System, SystemMode};
use serde::{Deserialize, Serialize};
use std::io;

/// Version tag written into every document.
pub const FORMAT_VERSION: &str = "1";

#[derive(Serialize, Deserialize)]
struct StateDocument {
    version: String,
    mode: SystemMode,
    components: Vec<Component>,
}

impl System {
    /// Writes the canonical serialized form of this system.
    pub fn write_to<W: io::Write>(&self, mut writer: W) -> Result<(), Error> {
        let mut canonical = self.clone();
        canonical.normalize();

        let document = StateDocument {
            version: FORMAT_VERSION.to_string(),
            mode: canonical.mode(),
            components: canonical.components().cloned().collect(),
        };
        serde_json::to_writer_pretty(&mut writer, &document)
            .map_err(|err| Error::Parse(err.to_string()))?;
        writer
            .write_all(b"\n")
            .map_err(|err| Error::Parse(err.to_string()))
    }

    /// The canonical serialized form as a string.
    pub fn to_json(&self) -> Result<String, Error> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        String::from_utf8(buffer).map_err(|err| Error::Parse(err.to_string()))
    }

    /// Parses a serialized state document.
    pub fn read_from<R: io::Read>(reader: R) -> Result<System, Error> {
        let document: StateDocument =
            serde_json::from_reader(reader).map_err(|err| Error::Parse(err.to_string()))?;
        if document.version != FORMAT_VERSION {
            return Err(Error::Parse(format!(
                "unsupported state document version {:?}",
                document.version
            )));
        }

        let mut system = System::new();
        for component in document.components {
            let key = component.key();
            if system.insert(component).is_some() {
                return Err(Error::Parse(format!("duplicate component {}", key)));
            }
        }

        if system.mode() != document.mode {
            return Err(Error::Parse(format!(
                "document declares a {:?} system but its components derive {:?}",
                document.mode,
                system.mode()
            )));
        }
        Ok(system)
    }
}
