//! Read path: the precedence walk.

use command::Command;

use crate::{Engine, Result};

impl Engine {
    /// Point lookup.
    ///
    /// Resolution order: active memtable, frozen memtable (present only
    /// while a flush is in flight), then SSTables newest first. The first
    /// command found wins; a tombstone reads as `None`. The shared lock is
    /// held for the whole walk so the result reflects one consistent
    /// snapshot.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read();
        inner.readable()?;

        if let Some(command) = inner.active.get(key) {
            return Ok(owned_value(command));
        }
        if let Some(frozen) = &inner.frozen {
            if let Some(command) = frozen.get(key) {
                return Ok(owned_value(command));
            }
        }
        for table in &inner.tables {
            if let Some(command) = table.get(key)? {
                return Ok(owned_value(&command));
            }
        }
        Ok(None)
    }
}

fn owned_value(command: &Command) -> Option<Vec<u8>> {
    command.value().map(|v| v.to_vec())
}
