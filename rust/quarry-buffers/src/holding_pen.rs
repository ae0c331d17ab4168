//! Uninitialised storage cells and the holding pens built from them.

use std::mem::MaybeUninit;
use std::sync::{Mutex, PoisonError};

use quarry_common::{Error, Result};

/// Storage for a value of type `T` that may or may not be constructed.
///
/// `RawCell` does not know whether it holds a value. Tracking that, and pairing
/// every [`RawCell::emplace`] with exactly one destruction, is the
/// responsibility of the owner of the cell. A cell is never dropped
/// implicitly: a value still held when the cell goes away is leaked.
#[repr(transparent)]
pub struct RawCell<T>(MaybeUninit<T>);

impl<T> RawCell<T> {
    /// Creates an empty cell.
    pub const fn new() -> RawCell<T> {
        RawCell(MaybeUninit::uninit())
    }

    /// Returns the location of the (possibly absent) value.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.0.as_ptr()
    }

    /// Returns the mutable location of the (possibly absent) value.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.0.as_mut_ptr()
    }

    /// Constructs `value` in the cell and returns a reference to it.
    ///
    /// If the cell already holds a value, that value is overwritten without
    /// being dropped.
    #[inline]
    pub fn emplace(&mut self, value: T) -> &mut T {
        self.0.write(value)
    }

    /// # Safety
    ///
    /// The cell must hold a value.
    #[inline]
    pub unsafe fn assume_init_ref(&self) -> &T {
        unsafe { self.0.assume_init_ref() }
    }

    /// # Safety
    ///
    /// The cell must hold a value.
    #[inline]
    pub unsafe fn assume_init_mut(&mut self) -> &mut T {
        unsafe { self.0.assume_init_mut() }
    }

    /// Moves the value out, leaving the cell logically empty.
    ///
    /// # Safety
    ///
    /// The cell must hold a value.
    #[inline]
    pub unsafe fn take(&mut self) -> T {
        unsafe { self.0.assume_init_read() }
    }

    /// Drops the held value when `destroy` is `true`.
    ///
    /// # Safety
    ///
    /// When `destroy` is `true` the cell must hold a value, which must not be
    /// used again afterwards.
    #[inline]
    pub unsafe fn destroy_if(&mut self, destroy: bool) {
        if destroy {
            unsafe { self.0.assume_init_drop() };
        }
    }
}

impl<T> Default for RawCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Optionally holds a value.
///
/// The pen behaves much like `Option<T>`, but keeps the occupancy flag next to
/// a [`RawCell`] so that construction and destruction of the held value happen
/// exactly once each, at well defined points.
pub struct HoldingPen<T> {
    store: RawCell<T>,
    holding: bool,
}

impl<T> HoldingPen<T> {
    /// Creates an empty pen.
    pub const fn new() -> HoldingPen<T> {
        HoldingPen {
            store: RawCell::new(),
            holding: false,
        }
    }

    /// Returns `true` if the pen holds a value.
    #[inline]
    pub fn has_value(&self) -> bool {
        self.holding
    }

    /// Returns the held value, or `EmptyPen` if there is none.
    pub fn value(&self) -> Result<&T> {
        if self.holding {
            Ok(unsafe { self.store.assume_init_ref() })
        } else {
            Err(Error::empty_pen())
        }
    }

    pub fn value_mut(&mut self) -> Result<&mut T> {
        if self.holding {
            Ok(unsafe { self.store.assume_init_mut() })
        } else {
            Err(Error::empty_pen())
        }
    }

    /// Returns a copy of the held value, or `default` converted into `T`.
    pub fn value_or<U>(&self, default: U) -> T
    where
        T: Clone,
        U: Into<T>,
    {
        match self.value() {
            Ok(v) => v.clone(),
            Err(_) => default.into(),
        }
    }

    /// Puts `value` in the pen, dropping any value already held.
    pub fn assign(&mut self, value: T) {
        self.emplace(value);
    }

    /// Puts `value` in the pen, dropping any value already held, and returns a
    /// reference to the new value.
    pub fn emplace(&mut self, value: T) -> &mut T {
        let held = std::mem::replace(&mut self.holding, true);
        unsafe { self.store.destroy_if(held) };
        self.store.emplace(value)
    }

    /// Drops any held value.
    pub fn reset(&mut self) {
        let held = std::mem::replace(&mut self.holding, false);
        unsafe { self.store.destroy_if(held) };
    }

    /// Moves the held value out, leaving the pen empty.
    pub fn take(&mut self) -> Option<T> {
        if std::mem::replace(&mut self.holding, false) {
            Some(unsafe { self.store.take() })
        } else {
            None
        }
    }
}

impl<T> Drop for HoldingPen<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Default for HoldingPen<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<T> for HoldingPen<T> {
    fn from(value: T) -> Self {
        let mut pen = HoldingPen::new();
        pen.assign(value);
        pen
    }
}

impl<T: Clone> Clone for HoldingPen<T> {
    fn clone(&self) -> Self {
        match self.value() {
            Ok(v) => HoldingPen::from(v.clone()),
            Err(_) => HoldingPen::new(),
        }
    }
}

impl<T: PartialEq> PartialEq for HoldingPen<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.value(), other.value()) {
            (Ok(l), Ok(r)) => l == r,
            (Err(_), Err(_)) => true,
            _ => false,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for HoldingPen<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value() {
            Ok(v) => f.debug_tuple("HoldingPen").field(v).finish(),
            Err(_) => f.write_str("HoldingPen(<empty>)"),
        }
    }
}

/// A [`HoldingPen`] that can be shared between threads.
///
/// Every operation takes an internal lock, and `value` hands out a copy rather
/// than a reference.
pub struct AtomicPen<T> {
    pen: Mutex<HoldingPen<T>>,
}

impl<T> AtomicPen<T> {
    pub fn new() -> AtomicPen<T> {
        AtomicPen {
            pen: Mutex::new(HoldingPen::new()),
        }
    }

    pub fn value(&self) -> Result<T>
    where
        T: Clone,
    {
        self.lock().value().cloned()
    }

    pub fn has_value(&self) -> bool {
        self.lock().has_value()
    }

    pub fn assign(&self, value: T) {
        self.lock().assign(value);
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Moves the value out, leaving the pen empty.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn into_inner(self) -> HoldingPen<T> {
        self.pen.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HoldingPen<T>> {
        // A panic while the lock was held cannot leave the pen half updated.
        self.pen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for AtomicPen<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<T> for AtomicPen<T> {
    fn from(value: T) -> Self {
        AtomicPen {
            pen: Mutex::new(HoldingPen::from(value)),
        }
    }
}
