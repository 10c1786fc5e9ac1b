//! Window handle → surface side-table.
//!
//! The map is a relation, never an owner of the window: binding a window
//! swaps in a new shared surface reference and releases the previous one only
//! after the map lock is dropped. The map's lock is private and distinct from
//! any individual surface's lock, so rebinding a window can never deadlock
//! against a draw in flight on its current surface.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::SharedSurface;

/// Opaque top-level window handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

#[derive(Default)]
pub struct SurfaceMap {
    map: Mutex<HashMap<WindowId, SharedSurface>>,
}

impl SurfaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace `window`'s bound surface. The previous reference
    /// (if any) is dropped after the swap, outside the map lock.
    pub fn bind(&self, window: WindowId, surface: SharedSurface) {
        let previous = {
            let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
            map.insert(window, surface)
        };
        drop(previous);
    }

    /// Remove `window`'s binding; the surface reference is dropped outside
    /// the map lock.
    pub fn unbind(&self, window: WindowId) {
        let previous = {
            let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
            map.remove(&window)
        };
        drop(previous);
    }

    /// A new owning reference to `window`'s surface, or `None` when the
    /// window has no backing surface (destroyed, or never bound). Callers
    /// treat `None` as "nothing to draw to" and skip the primitive.
    ///
    /// The returned reference must not be cached beyond one operation's
    /// scope except through an explicit window-region rebind.
    pub fn lookup(&self, window: WindowId) -> Option<SharedSurface> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(&window).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{SoftwareTarget, Surface};

    use super::*;

    #[test]
    fn bind_replaces_and_releases_previous() {
        let map = SurfaceMap::new();
        let win = WindowId(7);

        let first = Surface::new(Box::new(SoftwareTarget::new(1, 1)));
        map.bind(win, Arc::clone(&first));
        assert_eq!(Arc::strong_count(&first), 2);

        let second = Surface::new(Box::new(SoftwareTarget::new(1, 1)));
        map.bind(win, Arc::clone(&second));
        // The map gave up its reference to the first surface.
        assert_eq!(Arc::strong_count(&first), 1);

        let looked_up = map.lookup(win).unwrap();
        assert!(Arc::ptr_eq(&looked_up, &second));
    }

    #[test]
    fn lookup_after_unbind_is_none() {
        let map = SurfaceMap::new();
        let win = WindowId(1);
        assert!(map.lookup(win).is_none());

        map.bind(win, Surface::new(Box::new(SoftwareTarget::new(1, 1))));
        assert!(map.lookup(win).is_some());

        map.unbind(win);
        assert!(map.lookup(win).is_none());
    }
}
