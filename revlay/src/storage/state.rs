//! Active port state shared by the deployer and the proxy

use crate::errors::RevlayError;
use crate::filesys::file::File;

/// Parse the contents of the active port file
pub fn parse_port(contents: &str) -> Option<u16> {
    contents.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

/// The persisted port that currently receives live traffic
#[derive(Debug, Clone)]
pub struct ActivePortState {
    file: File,
}

impl ActivePortState {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Read the active port, `None` when absent or unparsable
    pub async fn read(&self) -> Result<Option<u16>, RevlayError> {
        let contents = self.file.read_string_opt().await?;
        Ok(contents.as_deref().and_then(parse_port))
    }

    /// Persist a new active port atomically
    pub async fn write(&self, port: u16) -> Result<(), RevlayError> {
        self.file.write_atomic(port.to_string().as_bytes()).await
    }

    /// Ports for a blue-green cutover: `(old, new)`
    pub async fn cutover_ports(
        &self,
        primary: u16,
        alternate: u16,
    ) -> Result<(u16, u16), RevlayError> {
        let old = match self.read().await? {
            Some(port) if port == alternate => alternate,
            _ => primary,
        };
        let new = if old == primary { alternate } else { primary };
        Ok((old, new))
    }
}
