use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

use allocator_api2::alloc::{Allocator, Global};

/// Error type for APIs with fallible heap allocation.
#[derive(Debug)]
pub enum AllocError {
    /// Overflow `isize::MAX` or other error during size computation.
    CapacityOverflow,
    /// The allocator returned an error.
    Allocator {
        /// The layout that was passed to the allocator.
        layout: Layout,
    },
}

/// Some information stored at the beginning of every heap buffer.
///
/// The buffer's elements are laid out right after the header (plus padding
/// to satisfy the element type's alignment) in the same allocation.
pub struct Header {
    // Plain counter: a container graph is single-threaded by contract, so
    // upgrading to an atomic would only change the performance profile.
    ref_count: Cell<usize>,
    cap: usize,
    len: usize,
}

/// An owning handle to a heap allocated, reference counted buffer of `T`.
///
/// `Clone` creates a new reference to the same buffer in O(1). The buffer
/// is destroyed when the last handle is dropped, at which point the `len`
/// live elements are dropped and the memory is released.
pub struct RawBuffer<T> {
    header: NonNull<Header>,
    _marker: PhantomData<T>,
}

impl<T> RawBuffer<T> {
    pub fn try_with_capacity(cap: usize) -> Result<RawBuffer<T>, AllocError> {
        let layout = buffer_layout::<T>(cap)?;
        let alloc: NonNull<Header> = Global
            .allocate(layout)
            .map_err(|_| AllocError::Allocator { layout })?
            .cast();

        unsafe {
            ptr::write(
                alloc.as_ptr(),
                Header {
                    ref_count: Cell::new(1),
                    cap,
                    len: 0,
                },
            );
        }

        Ok(RawBuffer {
            header: alloc,
            _marker: PhantomData,
        })
    }

    /// Allocates a buffer of capacity `cap` containing clones of `data`.
    ///
    /// The length is advanced one element at a time so that a panicking
    /// clone only unwinds over the already-constructed prefix.
    pub fn try_from_slice(data: &[T], cap: Option<usize>) -> Result<RawBuffer<T>, AllocError>
    where
        T: Clone,
    {
        let cap = cap.map(|cap| cap.max(data.len())).unwrap_or(data.len());
        let mut buffer = Self::try_with_capacity(cap)?;

        unsafe {
            for item in data {
                buffer.push(item.clone());
            }
        }

        Ok(buffer)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.header().len
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.header().cap
    }

    /// Returns true if this is the only existing handle to the buffer.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.header().ref_count.get() == 1
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        self.header().ref_count.get()
    }

    /// Creates a new reference to the same buffer without allocating.
    ///
    /// Equivalent to `Clone::clone`.
    #[inline]
    pub fn new_ref(&self) -> Self {
        let rc = &self.header().ref_count;
        rc.set(rc.get() + 1);
        RawBuffer {
            header: self.header,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn data_ptr(&self) -> *mut T {
        unsafe { data_ptr(self.header) }
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.data_ptr(), self.len()) }
    }

    #[inline]
    fn header(&self) -> &Header {
        unsafe { self.header.as_ref() }
    }

    /// Returns true if the two handles point to the same underlying storage.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.header == other.header
    }
}

// SAFETY: all of the following methods require the buffer to be safely
// mutable. In other words, there is a single reference to the buffer
// (is_unique() returned true).
impl<T> RawBuffer<T> {
    #[inline]
    pub unsafe fn set_len(&mut self, new_len: usize) {
        debug_assert!(new_len <= self.capacity());
        self.header.as_mut().len = new_len;
    }

    /// Writes `val` past the last element. The caller must have checked
    /// that there is room for it.
    #[inline]
    pub unsafe fn push(&mut self, val: T) {
        let len = self.len();
        debug_assert!(len < self.capacity());

        ptr::write(data_ptr::<T>(self.header).add(len), val);
        self.header.as_mut().len = len + 1;
    }

    /// Drops the live elements in place, leaving the buffer empty with its
    /// capacity intact.
    pub unsafe fn clear(&mut self) {
        let len = self.len();
        self.header.as_mut().len = 0;

        let mut item = data_ptr::<T>(self.header);
        for _ in 0..len {
            ptr::drop_in_place(item);
            item = item.add(1);
        }
    }
}

impl<T> Clone for RawBuffer<T> {
    fn clone(&self) -> Self {
        self.new_ref()
    }
}

impl<T> Drop for RawBuffer<T> {
    fn drop(&mut self) {
        unsafe {
            release::<T>(self.header);
        }
    }
}

unsafe fn release<T>(ptr: NonNull<Header>) -> bool {
    let rc = &ptr.as_ref().ref_count;
    let count = rc.get();
    rc.set(count - 1);

    if count == 1 {
        dealloc::<T>(ptr);
        return true;
    }

    false
}

unsafe fn data_ptr<T>(header: NonNull<Header>) -> *mut T {
    (header.as_ptr() as *mut u8).add(header_size::<T>()) as *mut T
}

unsafe fn clear_items<T>(ptr: NonNull<Header>) {
    let len = ptr.as_ref().len;

    let mut item = data_ptr::<T>(ptr);
    for _ in 0..len {
        ptr::drop_in_place(item);
        item = item.add(1);
    }
}

unsafe fn dealloc<T>(ptr: NonNull<Header>) {
    clear_items::<T>(ptr);

    let cap = ptr.as_ref().cap;
    let layout = buffer_layout::<T>(cap).unwrap();

    Global.deallocate(ptr.cast(), layout);
}

/// Offset from the start of the allocation to the first element, i.e. the
/// header size rounded up to the element type's alignment.
const fn header_size<T>() -> usize {
    let align = mem::align_of::<T>();
    let size = mem::size_of::<Header>();

    ((size + align - 1) / align) * align
}

fn buffer_layout<T>(n: usize) -> Result<Layout, AllocError> {
    let size = mem::size_of::<T>()
        .checked_mul(n)
        .ok_or(AllocError::CapacityOverflow)?;
    let total = header_size::<T>()
        .checked_add(size)
        .ok_or(AllocError::CapacityOverflow)?;
    let align = mem::align_of::<Header>().max(mem::align_of::<T>());

    Layout::from_size_align(total, align).map_err(|_| AllocError::CapacityOverflow)
}

#[test]
fn buffer_layout_alignment() {
    type B = Box<u32>;
    let layout = buffer_layout::<B>(2).unwrap();
    assert_eq!(layout.align() % mem::align_of::<B>(), 0);
    assert_eq!(header_size::<B>() % mem::align_of::<B>(), 0);
}

#[test]
fn release_drops_elements() {
    let a = RawBuffer::try_from_slice(&[Box::new(1u32), Box::new(2)], Some(8)).unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(a.capacity(), 8);
    assert!(a.is_unique());

    let b = a.new_ref();
    assert!(!a.is_unique());
    assert!(a.ptr_eq(&b));
    assert_eq!(a.ref_count(), 2);

    drop(b);
    assert!(a.is_unique());
}
