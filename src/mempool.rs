//! Guest memory pool
//!
//! Every engine object lives inside an emulated, address-visible memory
//! region supplied by the guest, so guest code can hold stable handles to
//! racks, voices and patches for the whole session. The pool is a plain
//! bump allocator over one such region: it hands out guest addresses and
//! never frees, compacts or grows. Region capacities are pre-computed with
//! the `required_memspace_size` functions, so an allocation failure during
//! normal operation indicates a sizing bug in the caller, not a transient
//! condition.

use std::fmt;
use std::marker::PhantomData;

/// A guest-visible address inside the emulated address space.
///
/// Addresses are plain 32-bit offsets into guest memory, never native
/// pointers. `Addr(0)` is the null address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(pub u32);

impl Addr {
    /// The null guest address
    pub const NULL: Addr = Addr(0);

    /// Returns true for the null address
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one
    pub fn offset(self, bytes: u32) -> Addr {
        Addr(self.0.wrapping_add(bytes))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A typed guest address.
///
/// Purely a bookkeeping wrapper: the pointee is described by `T` but the
/// handle is only ever resolved by the emulator layers that own the actual
/// guest memory, never dereferenced here.
pub struct Handle<T> {
    addr: Addr,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Wraps a raw guest address
    pub fn new(addr: Addr) -> Self {
        Self {
            addr,
            _marker: PhantomData,
        }
    }

    /// The underlying guest address
    pub fn addr(self) -> Addr {
        self.addr
    }

    /// Returns true for the null handle
    pub fn is_null(self) -> bool {
        self.addr.is_null()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.addr)
    }
}

/// An externally owned guest memory region handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct MemBlock {
    /// Guest address of the first byte of the region
    pub base: Addr,
    /// Region size in bytes
    pub size: u32,
}

impl MemBlock {
    /// Describes a region starting at `base` spanning `size` bytes
    pub fn new(base: Addr, size: u32) -> Self {
        Self { base, size }
    }
}

/// Fixed-capacity bump allocator over one guest memory region.
///
/// Allocations are contiguous and unaligned so the bytes consumed match the
/// sizing formulas exactly. There is no way to free an allocation; objects
/// that become logically unused (e.g. removed patches) keep their backing
/// addresses for reuse by their owner.
///
/// # Example
///
/// ```
/// use ngs_emu::mempool::{Addr, MemBlock, MemPool};
///
/// let mut pool = MemPool::new(MemBlock::new(Addr(0x8100_0000), 16));
/// let a = pool.alloc_raw(10).unwrap();
/// let b = pool.alloc_raw(6).unwrap();
/// assert_eq!(b.0 - a.0, 10);
/// assert!(pool.alloc_raw(1).is_none()); // exhausted
/// ```
#[derive(Debug)]
pub struct MemPool {
    base: Addr,
    capacity: u32,
    cursor: u32,
}

impl MemPool {
    /// Binds a pool to an externally owned region
    pub fn new(block: MemBlock) -> Self {
        Self {
            base: block.base,
            capacity: block.size,
            cursor: 0,
        }
    }

    /// Allocates `size` bytes, returning the guest address of the block.
    ///
    /// Returns `None` when the remaining capacity is insufficient.
    pub fn alloc_raw(&mut self, size: u32) -> Option<Addr> {
        if size > self.capacity - self.cursor {
            return None;
        }

        let addr = self.base.offset(self.cursor);
        self.cursor += size;
        Some(addr)
    }

    /// Allocates space for one record of type `T`
    pub fn alloc<T>(&mut self) -> Option<Handle<T>> {
        self.alloc_raw(std::mem::size_of::<T>() as u32)
            .map(Handle::new)
    }

    /// Guest address of the region
    pub fn base(&self) -> Addr {
        self.base
    }

    /// Total region size in bytes
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bytes still available
    pub fn remaining(&self) -> u32 {
        self.capacity - self.cursor
    }
}
