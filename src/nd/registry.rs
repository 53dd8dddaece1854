//! Node type registry: maps the u16 code stored at the start of every node
//! record to the factory that knows how to destroy it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{NdError, Result};
use crate::nd::Nd;

/// Behaviour of one node type.
pub trait TypeFactory: Send + Sync {
    fn type_name(&self) -> &str;

    /// Bytes to allocate for a node of this type, type code included.
    fn record_size(&self) -> usize;

    /// Release everything the node owns. The node's own bytes are freed by
    /// the caller afterwards.
    fn destruct(&self, nd: &Nd, address: u64) -> Result<()>;

    /// Whether a node scheduled for deletion may be destroyed now.
    fn is_ready_for_deletion(&self, nd: &Nd, address: u64) -> Result<bool>;
}

#[derive(Default)]
pub struct NodeTypeRegistry {
    factories: HashMap<u16, Arc<dyn TypeFactory>>,
    reserved: HashSet<u16>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F: TypeFactory + 'static>(&mut self, code: u16, factory: F) -> Result<()> {
        self.register_arc(code, Arc::new(factory))
    }

    pub fn register_arc(&mut self, code: u16, factory: Arc<dyn TypeFactory>) -> Result<()> {
        if self.reserved.contains(&code) || self.factories.contains_key(&code) {
            return Err(NdError::TypeCodeInUse(code));
        }
        self.factories.insert(code, factory);
        Ok(())
    }

    /// Retire a code for good; it can never be registered again.
    pub fn reserve(&mut self, code: u16) -> Result<()> {
        if self.factories.contains_key(&code) || !self.reserved.insert(code) {
            return Err(NdError::TypeCodeInUse(code));
        }
        Ok(())
    }

    pub fn is_registered(&self, code: u16) -> bool {
        self.factories.contains_key(&code)
    }

    pub fn factory(&self, code: u16) -> Result<&Arc<dyn TypeFactory>> {
        self.factories
            .get(&code)
            .ok_or(NdError::UnknownNodeType(code))
    }

    /// Handle for the node of type `code` at `address`.
    pub fn create_node(&self, address: u64, code: u16) -> Result<NodeRef> {
        let factory = self.factory(code)?.clone();
        Ok(NodeRef {
            address,
            type_code: code,
            factory,
        })
    }

    /// Registered codes, sorted.
    pub fn codes(&self) -> Vec<u16> {
        let mut v: Vec<u16> = self.factories.keys().copied().collect();
        v.sort_unstable();
        v
    }
}

impl fmt::Debug for NodeTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTypeRegistry")
            .field("registered", &self.codes())
            .field("reserved", &self.reserved.len())
            .finish()
    }
}

/// A node record together with its type.
#[derive(Clone)]
pub struct NodeRef {
    address: u64,
    type_code: u16,
    factory: Arc<dyn TypeFactory>,
}

impl NodeRef {
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn type_code(&self) -> u16 {
        self.type_code
    }

    pub fn type_name(&self) -> &str {
        self.factory.type_name()
    }

    pub fn factory(&self) -> &Arc<dyn TypeFactory> {
        &self.factory
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("address", &self.address)
            .field("type", &self.type_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain(&'static str);

    impl TypeFactory for Plain {
        fn type_name(&self) -> &str {
            self.0
        }
        fn record_size(&self) -> usize {
            8
        }
        fn destruct(&self, _nd: &Nd, _address: u64) -> Result<()> {
            Ok(())
        }
        fn is_ready_for_deletion(&self, _nd: &Nd, _address: u64) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn register_and_reserve() {
        let mut r = NodeTypeRegistry::new();
        r.register(1, Plain("one")).unwrap();
        assert!(matches!(r.register(1, Plain("again")), Err(NdError::TypeCodeInUse(1))));

        r.reserve(2).unwrap();
        assert!(matches!(r.register(2, Plain("two")), Err(NdError::TypeCodeInUse(2))));
        assert!(matches!(r.reserve(2), Err(NdError::TypeCodeInUse(2))));
        assert!(matches!(r.reserve(1), Err(NdError::TypeCodeInUse(1))));

        let node = r.create_node(4098, 1).unwrap();
        assert_eq!(node.type_name(), "one");
        assert_eq!(node.address(), 4098);
        assert!(matches!(r.create_node(4098, 9), Err(NdError::UnknownNodeType(9))));
        assert_eq!(r.codes(), vec![1]);
    }
}
