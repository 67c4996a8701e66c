//! In-memory property host
//!
//! A small object model with data properties, accessor traps and a
//! configurable flag. Native callers and tests use it to evaluate scriptlet
//! effects without a JavaScript engine.

use std::collections::BTreeMap;

use super::{Literal, Lookup, PropertyHost, ScriptletError, Trap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Literal(Literal),
    Object(ObjectId),
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Data(GraphValue),
    Trap(Trap),
}

#[derive(Debug, Clone)]
struct Property {
    slot: Slot,
    configurable: bool,
}

/// Error raised by [`ObjectGraph::read`] / [`ObjectGraph::write`], the
/// equivalent of a thrown exception in page code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("read of '{0}' aborted")]
    ReadAborted(String),
    #[error("write of '{0}' aborted")]
    WriteAborted(String),
    #[error("cannot reach '{0}'")]
    Unreachable(String),
}

#[derive(Debug, Clone)]
pub struct ObjectGraph {
    objects: Vec<BTreeMap<String, Property>>,
}

impl Default for ObjectGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectGraph {
    /// A graph holding only the global object.
    pub fn new() -> Self {
        Self {
            objects: vec![BTreeMap::new()],
        }
    }

    fn alloc(&mut self) -> ObjectId {
        self.objects.push(BTreeMap::new());
        ObjectId(self.objects.len() - 1)
    }

    fn owner_of(&mut self, path: &str, create: bool) -> Result<(ObjectId, String), AccessError> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let key = segments.pop().unwrap_or_default().to_string();
        let mut current = ObjectId(0);
        for segment in segments {
            let next = match self.objects[current.0].get(segment).map(|p| p.slot.clone()) {
                Some(Slot::Data(GraphValue::Object(id))) => id,
                Some(Slot::Trap(Trap::ThrowOnRead)) => {
                    return Err(AccessError::ReadAborted(segment.to_string()))
                }
                None if create => {
                    let id = self.alloc();
                    self.objects[current.0].insert(
                        segment.to_string(),
                        Property {
                            slot: Slot::Data(GraphValue::Object(id)),
                            configurable: true,
                        },
                    );
                    id
                }
                _ => return Err(AccessError::Unreachable(path.to_string())),
            };
            current = next;
        }
        Ok((current, key))
    }

    /// Seed a data property, creating intermediate objects.
    pub fn insert(&mut self, path: &str, value: Literal, configurable: bool) -> Result<(), AccessError> {
        let (owner, key) = self.owner_of(path, true)?;
        self.objects[owner.0].insert(
            key,
            Property {
                slot: Slot::Data(GraphValue::Literal(value)),
                configurable,
            },
        );
        Ok(())
    }

    /// Read a property the way page code would; traps raise errors.
    pub fn read(&mut self, path: &str) -> Result<Option<GraphValue>, AccessError> {
        let (owner, key) = self.owner_of(path, false)?;
        match self.objects[owner.0].get(&key).map(|p| &p.slot) {
            None => Ok(None),
            Some(Slot::Data(value)) => Ok(Some(value.clone())),
            Some(Slot::Trap(Trap::ThrowOnRead)) => Err(AccessError::ReadAborted(path.to_string())),
            Some(Slot::Trap(Trap::ThrowOnWrite)) => Ok(None),
        }
    }

    /// Assign a property the way page code would; traps raise errors.
    pub fn write(&mut self, path: &str, value: Literal) -> Result<(), AccessError> {
        let (owner, key) = self.owner_of(path, false)?;
        let existing = self.objects[owner.0]
            .get(&key)
            .map(|p| (p.slot.clone(), p.configurable));
        match existing {
            Some((Slot::Trap(Trap::ThrowOnWrite), _)) => Err(AccessError::WriteAborted(path.to_string())),
            Some((Slot::Trap(Trap::ThrowOnRead), _)) => Ok(()),
            _ => {
                let configurable = existing.map_or(true, |(_, configurable)| configurable);
                self.objects[owner.0].insert(
                    key,
                    Property {
                        slot: Slot::Data(GraphValue::Literal(value)),
                        configurable,
                    },
                );
                Ok(())
            }
        }
    }

    pub fn read_literal(&mut self, path: &str) -> Result<Option<Literal>, AccessError> {
        Ok(match self.read(path)? {
            Some(GraphValue::Literal(literal)) => Some(literal),
            _ => None,
        })
    }

    pub fn is_object(&mut self, path: &str) -> bool {
        matches!(self.read(path), Ok(Some(GraphValue::Object(_))))
    }

    fn define(&mut self, owner: &ObjectId, key: &str, slot: Slot) -> Result<(), ScriptletError> {
        let props = self
            .objects
            .get_mut(owner.0)
            .ok_or_else(|| ScriptletError::Host(format!("dangling object {}", owner.0)))?;
        if let Some(existing) = props.get(key) {
            if !existing.configurable {
                return Err(ScriptletError::NotConfigurable(key.to_string()));
            }
        }
        props.insert(
            key.to_string(),
            Property {
                slot,
                configurable: true,
            },
        );
        Ok(())
    }
}

impl PropertyHost for ObjectGraph {
    type Handle = ObjectId;

    fn root(&self) -> ObjectId {
        ObjectId(0)
    }

    fn lookup(&self, owner: &ObjectId, key: &str) -> Result<Lookup<ObjectId>, ScriptletError> {
        let props = self
            .objects
            .get(owner.0)
            .ok_or_else(|| ScriptletError::Host(format!("dangling object {}", owner.0)))?;
        Ok(match props.get(key).map(|p| &p.slot) {
            None => Lookup::Missing,
            Some(Slot::Data(GraphValue::Object(id))) => Lookup::Object(*id),
            Some(_) => Lookup::Value,
        })
    }

    fn create_object(&mut self, owner: &ObjectId, key: &str) -> Result<ObjectId, ScriptletError> {
        let id = self.alloc();
        self.define(owner, key, Slot::Data(GraphValue::Object(id)))?;
        Ok(id)
    }

    fn define_value(&mut self, owner: &ObjectId, key: &str, value: &Literal) -> Result<(), ScriptletError> {
        self.define(owner, key, Slot::Data(GraphValue::Literal(value.clone())))
    }

    fn define_trap(&mut self, owner: &ObjectId, key: &str, trap: Trap) -> Result<(), ScriptletError> {
        self.define(owner, key, Slot::Trap(trap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_read() {
        let mut graph = ObjectGraph::new();
        graph.insert("cfg.ads", Literal::Bool(true), true).unwrap();
        assert_eq!(graph.read_literal("cfg.ads").unwrap(), Some(Literal::Bool(true)));
        assert!(graph.is_object("cfg"));
        assert_eq!(graph.read("cfg.missing").unwrap(), None);
        assert!(graph.read("nothing.here").is_err());
    }

    #[test]
    fn test_traps_raise_on_access() {
        let mut graph = ObjectGraph::new();
        let root = graph.root();
        graph.define_trap(&root, "detector", Trap::ThrowOnRead).unwrap();
        graph.define_trap(&root, "beacon", Trap::ThrowOnWrite).unwrap();

        assert_eq!(
            graph.read("detector"),
            Err(AccessError::ReadAborted("detector".to_string()))
        );
        assert_eq!(
            graph.write("beacon", Literal::Null),
            Err(AccessError::WriteAborted("beacon".to_string()))
        );
        assert_eq!(graph.read("beacon").unwrap(), None);
    }

    #[test]
    fn test_non_configurable_blocks_redefinition() {
        let mut graph = ObjectGraph::new();
        graph.insert("locked", Literal::Bool(false), false).unwrap();
        let root = graph.root();
        assert!(matches!(
            graph.define_value(&root, "locked", &Literal::Bool(true)),
            Err(ScriptletError::NotConfigurable(_))
        ));
        assert_eq!(graph.read_literal("locked").unwrap(), Some(Literal::Bool(false)));
    }
}
