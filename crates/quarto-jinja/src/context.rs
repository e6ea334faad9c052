/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Scope chains for template rendering.
//!
//! A [`Context`] is a handle to one frame of a scope tree. Each frame owns a
//! reference to its parent, so a frame lives exactly as long as some handle
//! (or some child frame) still refers to it. Lookups walk from the local
//! frame up through the ancestors; writes only ever touch the local frame, so
//! a child can shadow a binding but never change the parent's copy.
//!
//! Macro closures keep a handle to the scope they were defined in. Because
//! such a macro is usually stored in that very scope, every scope tree keeps
//! weak references to its frames so that the cycles can be broken once a
//! render is done (see [`Context::release`]).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{TemplateError, TemplateResult};
use crate::value::Value;

/// Dead entries are pruned from the release list once it grows past this.
const MIN_TRACKED_FRAMES: usize = 32;

struct Frame {
    data: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Frame>>,
}

/// Weak references to every frame of one scope tree.
struct Tree {
    frames: RefCell<Vec<Weak<Frame>>>,
    prune_at: Cell<usize>,
}

impl Tree {
    fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
            prune_at: Cell::new(MIN_TRACKED_FRAMES),
        }
    }

    fn track(&self, frame: &Rc<Frame>) {
        let mut frames = self.frames.borrow_mut();
        if frames.len() >= self.prune_at.get() {
            frames.retain(|frame| frame.strong_count() > 0);
            self.prune_at.set((frames.len() * 2).max(MIN_TRACKED_FRAMES));
        }
        frames.push(Rc::downgrade(frame));
    }

    fn live(&self) -> Vec<Rc<Frame>> {
        self.frames.borrow().iter().filter_map(Weak::upgrade).collect()
    }
}

/// A handle to one scope frame.
///
/// Cloning a `Context` clones the handle, not the frame: both clones see the
/// same bindings.
#[derive(Clone)]
pub struct Context {
    frame: Rc<Frame>,
    tree: Rc<Tree>,
}

impl Context {
    /// Create a new root scope with no bindings.
    pub fn new() -> Self {
        Self::with_tree(Rc::new(Tree::new()), None)
    }

    fn with_tree(tree: Rc<Tree>, parent: Option<Rc<Frame>>) -> Self {
        let frame = Rc::new(Frame {
            data: RefCell::new(HashMap::new()),
            parent,
        });
        tree.track(&frame);
        Self { frame, tree }
    }

    /// Create a root scope from a JSON object.
    pub fn from_json(data: serde_json::Value) -> TemplateResult<Self> {
        match data {
            serde_json::Value::Object(entries) => {
                let ctx = Self::new();
                for (name, value) in entries {
                    ctx.set(name, Value::from(value));
                }
                Ok(ctx)
            }
            serde_json::Value::Null => Ok(Self::new()),
            other => Err(TemplateError::InvalidData {
                message: format!("expected a JSON object, got {other}"),
            }),
        }
    }

    /// Check whether `name` is bound in this frame or any ancestor.
    pub fn has(&self, name: &str) -> bool {
        self.lookup(name, |_| ()).is_some()
    }

    /// Resolve `name` in this frame, then in each ancestor in turn.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.lookup(name, Value::clone)
    }

    fn lookup<T>(&self, name: &str, f: impl Fn(&Value) -> T) -> Option<T> {
        let mut current = Some(&self.frame);
        while let Some(frame) = current {
            if let Some(value) = frame.data.borrow().get(name) {
                return Some(f(value));
            }
            current = frame.parent.as_ref();
        }
        None
    }

    /// Bind `name` in the local frame, shadowing any ancestor binding.
    ///
    /// Takes `&self` because frames are shared between handles.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        let replaced = self
            .frame
            .data
            .borrow_mut()
            .insert(name.into(), value.into());
        // Dropped outside the borrow: the old value may own other frames.
        drop(replaced);
    }

    /// Create an empty child frame whose parent is this frame.
    pub fn inherit(&self) -> Context {
        Self::with_tree(Rc::clone(&self.tree), Some(Rc::clone(&self.frame)))
    }

    /// Create an empty frame with no parent in the same scope tree.
    ///
    /// Nothing outside it is visible, but it is freed by the same
    /// [`Context::release`].
    pub fn detached(&self) -> Context {
        Self::with_tree(Rc::clone(&self.tree), None)
    }

    /// Copy the local bindings of `other` into this frame.
    ///
    /// Ancestors of `other` are not consulted; existing names are overwritten.
    pub fn update(&self, other: &Context) -> &Self {
        let entries: Vec<(String, Value)> = other
            .frame
            .data
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in entries {
            self.set(name, value);
        }
        self
    }

    /// Names bound in the local frame, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.frame.data.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of frames of this scope tree that are still alive.
    pub fn frame_count(&self) -> usize {
        self.tree
            .frames
            .borrow()
            .iter()
            .filter(|frame| frame.strong_count() > 0)
            .count()
    }

    /// Drop the bindings of every live frame in this scope tree.
    ///
    /// Called when a render finishes so closures stored in the frames they
    /// capture are freed.
    pub fn release(&self) {
        let frames = self.tree.live();
        let released: Vec<HashMap<String, Value>> = frames
            .iter()
            .map(|frame| std::mem::take(&mut *frame.data.borrow_mut()))
            .collect();
        drop(released);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.keys())
            .field("parent", &self.frame.parent.is_some())
            .finish()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let ctx = Context::new();
        for (name, value) in iter {
            ctx.set(name, value);
        }
        ctx
    }
}
