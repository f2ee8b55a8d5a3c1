// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Decrypted keys and the operations running on them.
//!
//! A [`KeyNode`] is the in-memory form of an unwrapped key blob. Loaded nodes live in a
//! [`KeyNodeRegistry`], an arena addressed by generation-checked [`KeyNodeHandle`]s, so a handle
//! that outlives its node is detected instead of reaching a reused slot. A [`KeyOperation`] is
//! the state of a three-stage (init, update, finish) operation on one node.

use crate::engine::{CryptoEngine, EngineContext, UsageSpec};
use crate::key_parameter::{Algorithm, Tag};
use crate::ks_err;
use crate::kserr;
use crate::param_set::ParamSet;
use anyhow::{Context, Result};
use hwkeystore_crypto::ZVec;
use std::fmt;
use std::sync::{Arc, Mutex};

/// An unwrapped key: its parameters and the decrypted key material. The material is zeroized
/// when the node is dropped.
pub struct KeyNode {
    params: ParamSet,
    key: ZVec,
}

impl KeyNode {
    /// Creates a node from the envelope parameters and the decrypted key material.
    pub fn new(params: ParamSet, key: ZVec) -> Self {
        Self { params, key }
    }

    /// The parameters stored with the key.
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// The decrypted key material.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The key algorithm.
    pub fn algorithm(&self) -> Result<Algorithm> {
        Ok(Algorithm(self.params.require_uint(Tag::ALGORITHM).context(ks_err!())?))
    }
}

impl fmt::Debug for KeyNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyNode")
            .field("params", &self.params)
            .field("key", &self.key)
            .finish()
    }
}

/// Opaque reference to a node in a [`KeyNodeRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyNodeHandle {
    index: u32,
    generation: u32,
}

impl KeyNodeHandle {
    /// Packs the handle into one integer for callers that store it outside the process.
    pub fn to_u64(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`KeyNodeHandle::to_u64`].
    pub fn from_u64(v: u64) -> Self {
        Self { index: v as u32, generation: (v >> 32) as u32 }
    }
}

struct Entry {
    node: Arc<KeyNode>,
    refcount: usize,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct RegistryInner {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl RegistryInner {
    fn entry_mut(&mut self, handle: KeyNodeHandle) -> Result<&mut Entry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| kserr!(BadState, "unknown or stale key node handle {:?}", handle))
    }

    fn remove(&mut self, handle: KeyNodeHandle) {
        let index = handle.index as usize;
        if let Some(slot) = self.slots.get_mut(index) {
            slot.entry = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index);
        }
    }
}

/// The registry of loaded key nodes. All bookkeeping happens under one lock; callers get an
/// `Arc` to the node and run crypto outside of it.
#[derive(Default)]
pub struct KeyNodeRegistry {
    inner: Mutex<RegistryInner>,
}

impl KeyNodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Publishes `node` with a reference count of one.
    pub fn insert(&self, node: KeyNode) -> Result<KeyNodeHandle> {
        let mut inner = self.inner.lock().unwrap();
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.slots.push(Slot::default());
                inner.slots.len() - 1
            }
        };
        let index_u32 = u32::try_from(index)
            .map_err(|_| kserr!(MallocFail, "key node registry is full"))?;
        let slot = &mut inner.slots[index];
        slot.entry = Some(Entry { node: Arc::new(node), refcount: 1 });
        Ok(KeyNodeHandle { index: index_u32, generation: slot.generation })
    }

    /// Takes another reference on the node behind `handle`.
    pub fn acquire(&self, handle: KeyNodeHandle) -> Result<Arc<KeyNode>> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entry_mut(handle)?;
        entry.refcount += 1;
        Ok(entry.node.clone())
    }

    /// Drops one reference. The node leaves the registry when the last reference is gone.
    pub fn release(&self, handle: KeyNodeHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entry_mut(handle)?;
        entry.refcount -= 1;
        if entry.refcount == 0 {
            inner.remove(handle);
        }
        Ok(())
    }

    /// Removes the node regardless of outstanding references.
    pub fn delete(&self, handle: KeyNodeHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.entry_mut(handle)?;
        inner.remove(handle);
        Ok(())
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slots.len() - inner.free.len()
    }

    /// True if no node is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A three-stage operation on a key node.
///
/// `init` creates the engine context, `update` and `finish` feed it, and `finish` or `abort`
/// end it. An operation dropped while its context is live releases the context and logs it.
pub struct KeyOperation {
    node: Arc<KeyNode>,
    params: ParamSet,
    context: Option<Box<dyn EngineContext>>,
}

impl KeyOperation {
    /// Creates an operation on `node` with the runtime parameters of the request.
    pub fn new(node: Arc<KeyNode>, params: ParamSet) -> Self {
        Self { node, params, context: None }
    }

    /// The key node this operation runs on.
    pub fn node(&self) -> &KeyNode {
        &self.node
    }

    /// The runtime parameters.
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// True between a successful `init` and the matching `finish` or `abort`.
    pub fn is_active(&self) -> bool {
        self.context.is_some()
    }

    /// Starts the operation.
    pub fn init(&mut self, engine: &dyn CryptoEngine, usage: &UsageSpec) -> Result<()> {
        if self.context.is_some() {
            return Err(kserr!(BadState, "operation already initialized"));
        }
        let context = engine
            .init_context(self.node.key(), usage)
            .context(ks_err!("Failed to initialize {:?} operation.", usage.purpose))?;
        self.context = Some(context);
        Ok(())
    }

    /// Feeds `input`.
    pub fn update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| kserr!(NullPointer, "update without an active operation"))?;
        context.update(input).context(ks_err!())
    }

    /// Feeds the last input and ends the operation. The context is released even on failure.
    pub fn finish(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let context = self
            .context
            .take()
            .ok_or_else(|| kserr!(NullPointer, "finish without an active operation"))?;
        context.finish(input).context(ks_err!())
    }

    /// Ends the operation without output.
    pub fn abort(&mut self) -> Result<()> {
        self.context
            .take()
            .ok_or_else(|| kserr!(NullPointer, "abort without an active operation"))?;
        log::info!("Key operation aborted.");
        Ok(())
    }
}

impl Drop for KeyOperation {
    fn drop(&mut self) {
        if self.context.take().is_some() {
            log::warn!("Dropping a key operation that was never finished or aborted.");
        }
    }
}
