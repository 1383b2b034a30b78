//! The call-frame tree.
//!
//! Every invocation runs inside a [`Frame`], a node whose parent is the frame
//! that was current when the invocation was made. Deferred values remember the
//! frame they were created under, so when one rejects the tracer can walk the
//! chain of logical calls back to the root even though the native stack only
//! shows the event loop that resumed it.
//!
//! Children hold their parent alive; parents never hold their children. A
//! subtree is therefore dropped as soon as nothing (no deferred value, no
//! pending continuation) refers to it.
//!
//! The current frame is thread-local. [`Frame::enter`] pushes onto a stack and
//! returns a guard that pops the entry again on drop, also during unwinding.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::rc::Rc;

use crate::tracer::Snapshot;
use crate::tracing_compat::trace;

thread_local! {
    static ROOT: Frame = Frame::root();
    static STACK: RefCell<Vec<StackEntry>> = const { RefCell::new(Vec::new()) };
    static NEXT_GUARD_ID: Cell<u64> = const { Cell::new(0) };
}

struct StackEntry {
    id: u64,
    frame: Frame,
}

struct Node {
    parent: Option<Frame>,
    index: u64,
    children: Cell<u64>,
    snapshot: Option<Snapshot>,
}

impl Drop for Node {
    fn drop(&mut self) {
        // Unlink ancestors one at a time; deep chains would overflow otherwise.
        let mut parent = self.parent.take();
        while let Some(frame) = parent {
            parent = match Rc::try_unwrap(frame.node) {
                Ok(mut node) => node.parent.take(),
                Err(_) => None,
            };
        }
    }
}

/// A node of the call-frame tree.
///
/// Cloning is cheap and yields a handle to the same node.
#[derive(Clone)]
pub struct Frame {
    node: Rc<Node>,
}

impl Frame {
    fn root() -> Self {
        Self {
            node: Rc::new(Node {
                parent: None,
                index: 0,
                children: Cell::new(0),
                snapshot: None,
            }),
        }
    }

    /// Returns the thread's root frame.
    #[must_use]
    pub fn root_frame() -> Self {
        ROOT.with(Clone::clone)
    }

    /// Returns the frame currently entered on this thread, or the root.
    #[must_use]
    pub fn current() -> Self {
        STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map_or_else(Self::root_frame, |entry| entry.frame.clone())
        })
    }

    /// Creates the next child of this frame.
    pub(crate) fn child(&self, label: &'static str, location: &'static Location<'static>) -> Self {
        let index = self.node.children.get().saturating_add(1);
        self.node.children.set(index);
        let frame = Self {
            node: Rc::new(Node {
                parent: Some(self.clone()),
                index,
                children: Cell::new(0),
                snapshot: Snapshot::capture(label, location),
            }),
        };
        trace!(label, path = ?frame.path(), "frame created");
        frame
    }

    /// Makes this frame current until the guard is dropped.
    #[must_use]
    pub fn enter(&self) -> FrameGuard {
        let id = NEXT_GUARD_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        STACK.with(|stack| {
            stack.borrow_mut().push(StackEntry {
                id,
                frame: self.clone(),
            });
        });
        FrameGuard {
            id,
            _not_send: PhantomData,
        }
    }

    /// Returns the parent frame, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.node.parent.as_ref()
    }

    /// Returns true for the root frame.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }

    /// Returns the 1-based position among the parent's children (0 for root).
    #[must_use]
    pub fn index(&self) -> u64 {
        self.node.index
    }

    /// Returns the number of children created so far.
    #[must_use]
    pub fn child_count(&self) -> u64 {
        self.node.children.get()
    }

    /// Returns the snapshot captured when the frame was created.
    #[must_use]
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.node.snapshot.as_ref()
    }

    /// Iterates from this frame up to, but excluding, the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |frame| frame.parent()).take_while(|f| !f.is_root())
    }

    /// Returns the sequence indices from the root down to this frame.
    #[must_use]
    pub fn path(&self) -> Vec<u64> {
        let mut path: Vec<u64> = self.ancestors().map(Self::index).collect();
        path.reverse();
        path
    }

    /// Returns the number of frames between this one and the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Returns true if both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("path", &self.path())
            .field("children", &self.node.children.get())
            .finish_non_exhaustive()
    }
}

/// Guard for an entered frame.
///
/// Dropping the guard removes its own stack entry, so guards dropped out of
/// order never disturb the frame on top.
pub struct FrameGuard {
    id: u64,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        // try_with: the stack may already be gone during thread teardown.
        let _ = STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|entry| entry.id == self.id) {
                stack.remove(pos);
            }
        });
    }
}

impl fmt::Debug for FrameGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameGuard").field("id", &self.id).finish()
    }
}
