use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ops::{Index, IndexMut, Range};
use std::ptr;

use crate::raw::{AllocError, RawBuffer};

/// A resizable contiguous container with small-size optimization and
/// copy-on-write sharing.
///
/// Up to `N` elements are stored inline without allocating. Past that, the
/// elements live in a heap allocated, reference counted buffer which clones
/// of the vector share. Cloning a vector in its shared representation is
/// O(1) and copies no elements; mutating any of the sharing vectors first
/// forks a private buffer, so copies always behave as independent values.
///
/// Mutable methods require `T: Clone` because of the copy-on-write
/// semantics. Methods documented as forking or building new storage provide
/// the strong guarantee: if an allocation fails or an element clone panics,
/// the vector is left exactly as it was and nothing leaks.
pub struct CowVector<T, const N: usize> {
    storage: Storage<T, N>,
}

/// The two representations. Switching is always explicit: the new case is
/// constructed and committed, the old one destroyed. The bytes of one case
/// are never reinterpreted as the other.
enum Storage<T, const N: usize> {
    Inline {
        len: usize,
        items: [MaybeUninit<T>; N],
    },
    Shared(RawBuffer<T>),
}

impl<T, const N: usize> Storage<T, N> {
    fn new_inline() -> Self {
        Storage::Inline {
            len: 0,
            // An uninitialized array of MaybeUninit is itself initialized.
            items: unsafe { MaybeUninit::<[MaybeUninit<T>; N]>::uninit().assume_init() },
        }
    }
}

// Drops the first `len` elements of an inline array.
unsafe fn drop_inline_items<T>(items: &mut [MaybeUninit<T>], len: usize) {
    ptr::drop_in_place(ptr::slice_from_raw_parts_mut(items.as_mut_ptr() as *mut T, len));
}

impl<T, const N: usize> CowVector<T, N> {
    /// Creates an empty vector without allocating memory.
    #[inline]
    pub fn new() -> Self {
        CowVector {
            storage: Storage::new_inline(),
        }
    }

    /// Creates an empty vector able to hold `cap` elements without
    /// reallocating.
    ///
    /// Storage is inline if `cap <= N`, otherwise a fresh exclusive buffer
    /// of capacity exactly `cap` is allocated.
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        Self::try_with_capacity(cap).unwrap()
    }

    /// Fallible version of [`CowVector::with_capacity`].
    pub fn try_with_capacity(cap: usize) -> Result<Self, AllocError> {
        if cap <= N {
            return Ok(Self::new());
        }

        Ok(CowVector {
            storage: Storage::Shared(RawBuffer::try_with_capacity(cap)?),
        })
    }

    pub fn from_slice(data: &[T]) -> Self
    where
        T: Clone,
    {
        let mut v = Self::with_capacity(data.len());
        v.extend_from_slice(data);

        v
    }

    /// Returns the number of elements in the vector, also referred to as
    /// its 'length'.
    #[inline]
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Inline { len, .. } => *len,
            Storage::Shared(buf) => buf.len(),
        }
    }

    /// Returns `true` if the vector contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total number of elements the vector can hold without
    /// reallocating (`N` for the inline representation).
    #[inline]
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Inline { .. } => N,
            Storage::Shared(buf) => buf.capacity(),
        }
    }

    /// Returns `true` if the elements are stored inline.
    #[inline]
    pub fn is_inline(&self) -> bool {
        matches!(self.storage, Storage::Inline { .. })
    }

    /// Returns `true` if no other vector shares this one's storage.
    ///
    /// Inline storage is always unique. When this returns `true`, mutable
    /// methods do not allocate or copy elements.
    #[inline]
    pub fn is_unique(&self) -> bool {
        match &self.storage {
            Storage::Inline { .. } => true,
            Storage::Shared(buf) => buf.is_unique(),
        }
    }

    /// Returns the number of vectors currently holding this one's buffer
    /// (1 for inline storage).
    #[inline]
    pub fn ref_count(&self) -> usize {
        match &self.storage {
            Storage::Inline { .. } => 1,
            Storage::Shared(buf) => buf.ref_count(),
        }
    }

    /// Exchanges the contents of the two vectors.
    ///
    /// O(1) and cannot panic for every representation pair: values move
    /// wholesale, handles and inline arrays included.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Returns `true` if the two vectors share the same underlying storage.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.storage, &other.storage) {
            (Storage::Shared(a), Storage::Shared(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    fn data_ptr(&self) -> *const T {
        match &self.storage {
            Storage::Inline { items, .. } => items.as_ptr() as *const T,
            Storage::Shared(buf) => buf.data_ptr(),
        }
    }

    // SAFETY: for the shared case the caller must ensure that the buffer is
    // not going to be mutated through the returned pointer unless it is
    // unique.
    unsafe fn data_mut_ptr(&mut self) -> *mut T {
        match &mut self.storage {
            Storage::Inline { items, .. } => items.as_mut_ptr() as *mut T,
            Storage::Shared(buf) => buf.data_ptr(),
        }
    }

    // SAFETY: same contract as data_mut_ptr; elements [0, new_len) must be
    // initialized.
    unsafe fn set_len(&mut self, new_len: usize) {
        match &mut self.storage {
            Storage::Inline { len, .. } => *len = new_len,
            Storage::Shared(buf) => buf.set_len(new_len),
        }
    }

    /// Extracts a slice containing the entire vector. Never forks.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.data_ptr(), self.len()) }
    }

    #[inline]
    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }

    #[inline]
    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Replaces the current representation with `buffer`.
    ///
    /// Inline elements are dropped (their clones live in `buffer` by now);
    /// a previous shared handle is released. This is the commit step of
    /// every build-then-commit mutation: it runs after all fallible work
    /// has succeeded and cannot itself fail.
    fn commit_buffer(&mut self, buffer: RawBuffer<T>) {
        if let Storage::Inline { len, items } = &mut self.storage {
            let live = *len;
            *len = 0;
            unsafe {
                drop_inline_items(items, live);
            }
        }

        self.storage = Storage::Shared(buffer);
    }
}

impl<T: Clone, const N: usize> CowVector<T, N> {
    /// Forks a private buffer of the same capacity if the storage is
    /// shared with another vector. No-op otherwise.
    fn ensure_unique(&mut self) {
        if let Storage::Shared(buf) = &self.storage {
            if !buf.is_unique() {
                let copy = RawBuffer::try_from_slice(buf.as_slice(), Some(buf.capacity())).unwrap();
                self.commit_buffer(copy);
            }
        }
    }

    /// Extracts a mutable slice containing the entire vector.
    ///
    /// Like all mutable access, this forks a private copy of the storage
    /// first if it is shared.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.ensure_unique();
        let len = self.len();
        unsafe { std::slice::from_raw_parts_mut(self.data_mut_ptr(), len) }
    }

    #[inline]
    pub fn first_mut(&mut self) -> Option<&mut T> {
        self.as_mut_slice().first_mut()
    }

    #[inline]
    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.as_mut_slice().last_mut()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.as_mut_slice().iter_mut()
    }

    /// Appends an element to the back of the vector.
    #[inline]
    pub fn push(&mut self, val: T) {
        self.insert(self.len(), val);
    }

    /// Removes the last element and returns it, or `None` if the vector is
    /// empty.
    ///
    /// If the storage is shared, this privatizes onto a buffer holding the
    /// first `len - 1` elements; the other vectors still own the full range.
    pub fn pop(&mut self) -> Option<T> {
        let len = self.len();
        if len == 0 {
            return None;
        }

        if !self.is_unique() {
            let val = self.as_slice()[len - 1].clone();
            let cap = self.capacity();
            let fork = RawBuffer::try_from_slice(&self.as_slice()[..len - 1], Some(cap)).unwrap();
            self.commit_buffer(fork);

            return Some(val);
        }

        unsafe {
            let val = ptr::read(self.data_mut_ptr().add(len - 1));
            self.set_len(len - 1);

            Some(val)
        }
    }

    /// Inserts an element at position `index`, shifting all elements after
    /// it to the right.
    ///
    /// When the vector is full, a fresh buffer of twice the capacity is
    /// built; when the storage is merely shared, a fresh buffer of the same
    /// capacity. Both paths leave the original storage untouched until the
    /// new content is fully built, so a panicking element clone leaves the
    /// vector exactly as it was.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&mut self, index: usize, val: T) {
        let len = self.len();
        assert!(
            index <= len,
            "insertion index (is {index}) should be <= len (is {len})"
        );

        let cap = self.capacity();
        let needs_grow = len == cap;

        if needs_grow || !self.is_unique() {
            let new_cap = if needs_grow { grow_amortized(len, 1) } else { cap };
            let mut fork = RawBuffer::try_with_capacity(new_cap).unwrap();

            unsafe {
                let (prefix, suffix) = self.as_slice().split_at(index);
                for item in prefix {
                    fork.push(item.clone());
                }
                fork.push(val);
                for item in suffix {
                    fork.push(item.clone());
                }
            }

            self.commit_buffer(fork);
            return;
        }

        unsafe {
            let p = self.data_mut_ptr().add(index);
            // Shift everything over to make space.
            ptr::copy(p, p.add(1), len - index);
            ptr::write(p, val);
            self.set_len(len + 1);
        }
    }

    /// Removes and returns the element at position `index`, shifting all
    /// elements after it to the left.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> T {
        let len = self.len();
        assert!(
            index < len,
            "removal index (is {index}) should be < len (is {len})"
        );

        if !self.is_unique() {
            let val = self.as_slice()[index].clone();
            let cap = self.capacity();
            let mut fork = RawBuffer::try_with_capacity(cap).unwrap();

            unsafe {
                for item in &self.as_slice()[..index] {
                    fork.push(item.clone());
                }
                for item in &self.as_slice()[index + 1..] {
                    fork.push(item.clone());
                }
            }

            self.commit_buffer(fork);
            return val;
        }

        unsafe {
            let base = self.data_mut_ptr();
            let val = ptr::read(base.add(index));
            ptr::copy(base.add(index + 1), base.add(index), len - index - 1);
            self.set_len(len - 1);

            val
        }
    }

    /// Removes the elements in `range`, shifting the tail to the left.
    ///
    /// An empty range is a no-op. If the storage is shared, the kept prefix
    /// and suffix are rebuilt into a fresh buffer of the same capacity.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn remove_range(&mut self, range: Range<usize>) {
        let len = self.len();
        assert!(
            range.start <= range.end && range.end <= len,
            "removal range (is {range:?}) should be within 0..{len}"
        );

        if range.is_empty() {
            return;
        }

        if !self.is_unique() {
            let cap = self.capacity();
            let mut fork = RawBuffer::try_with_capacity(cap).unwrap();

            unsafe {
                for item in &self.as_slice()[..range.start] {
                    fork.push(item.clone());
                }
                for item in &self.as_slice()[range.end..] {
                    fork.push(item.clone());
                }
            }

            self.commit_buffer(fork);
            return;
        }

        unsafe {
            let removed = range.end - range.start;
            let base = self.data_mut_ptr();
            // Truncate first so that a panicking element drop cannot lead
            // to a double drop; at worst the tail leaks.
            self.set_len(range.start);
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(base.add(range.start), removed));
            ptr::copy(base.add(range.end), base.add(range.start), len - range.end);
            self.set_len(len - removed);
        }
    }

    /// Clears the vector, removing all values.
    ///
    /// Uniquely owned storage (inline or shared) is retained along with its
    /// capacity: clearing never frees memory the vector owns exclusively,
    /// so clearing and refilling below the retained capacity does not
    /// reallocate. When the buffer is shared, the handle is released
    /// without touching the elements (the other vectors still own them) and
    /// a fresh empty buffer of the same capacity is adopted.
    pub fn clear(&mut self) {
        match &mut self.storage {
            Storage::Inline { len, items } => {
                let live = *len;
                *len = 0;
                unsafe {
                    drop_inline_items(items, live);
                }
            }
            Storage::Shared(buf) => {
                if buf.is_unique() {
                    unsafe {
                        buf.clear();
                    }
                } else {
                    let fresh = RawBuffer::try_with_capacity(buf.capacity()).unwrap();
                    *buf = fresh;
                }
            }
        }
    }

    /// Reserves capacity for at least `additional` more elements.
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.reserve_capacity(self.len().saturating_add(additional));
    }

    /// Ensures the vector can hold `new_cap` elements in exclusive storage.
    ///
    /// No-op when `new_cap` is below the current length, or when the
    /// current storage is already exclusive (inline, or shared and unique)
    /// with sufficient capacity; an already-sufficient exclusive buffer is
    /// never shrunk. A request that fits inline demotes shared storage via
    /// [`CowVector::shrink_to_fit`]. Otherwise a fresh exclusive buffer of
    /// capacity exactly `new_cap` is allocated.
    pub fn reserve_capacity(&mut self, new_cap: usize) {
        if new_cap < self.len() {
            return;
        }

        match &self.storage {
            Storage::Inline { .. } => {
                if new_cap <= N {
                    return;
                }

                let buffer = RawBuffer::try_from_slice(self.as_slice(), Some(new_cap)).unwrap();
                self.commit_buffer(buffer);
            }
            Storage::Shared(buf) => {
                if new_cap <= buf.capacity() && buf.is_unique() {
                    return;
                }
                if new_cap <= N {
                    self.shrink_to_fit();
                    return;
                }

                let buffer = RawBuffer::try_from_slice(buf.as_slice(), Some(new_cap)).unwrap();
                self.commit_buffer(buffer);
            }
        }
    }

    /// Shrinks the storage to the vector's length.
    ///
    /// No-op for inline storage or when the buffer is already exactly
    /// sized. Demotes to the inline representation when the elements fit;
    /// the inline value is built in full before it replaces the shared
    /// handle, so a panicking clone leaves the vector unchanged.
    pub fn shrink_to_fit(&mut self) {
        let len = self.len();
        if self.is_inline() || len == self.capacity() {
            return;
        }

        if len <= N {
            let mut tmp = Self::new();
            for item in self.as_slice() {
                unsafe {
                    tmp.push_assuming_capacity(item.clone());
                }
            }
            *self = tmp;
        } else if let Storage::Shared(buf) = &self.storage {
            let buffer = RawBuffer::try_from_slice(buf.as_slice(), Some(len)).unwrap();
            self.storage = Storage::Shared(buffer);
        }
    }

    /// Clones and appends the contents of the slice to the back of the
    /// vector.
    pub fn extend_from_slice(&mut self, data: &[T]) {
        if data.is_empty() {
            return;
        }

        self.reserve(data.len());
        for item in data {
            self.push(item.clone());
        }
    }

    // SAFETY: the storage must be exclusive with room for one more element.
    unsafe fn push_assuming_capacity(&mut self, val: T) {
        let len = self.len();
        debug_assert!(self.is_unique() && len < self.capacity());

        ptr::write(self.data_mut_ptr().add(len), val);
        self.set_len(len + 1);
    }
}

impl<T, const N: usize> Drop for CowVector<T, N> {
    fn drop(&mut self) {
        // A shared handle releases its reference when the storage drops.
        if let Storage::Inline { len, items } = &mut self.storage {
            unsafe {
                drop_inline_items(items, *len);
            }
        }
    }
}

impl<T: Clone, const N: usize> Clone for CowVector<T, N> {
    /// An inline source is cloned element by element; a shared source is
    /// adopted in O(1) without copying any element.
    fn clone(&self) -> Self {
        match &self.storage {
            Storage::Shared(buf) => CowVector {
                storage: Storage::Shared(buf.new_ref()),
            },
            Storage::Inline { .. } => {
                let mut out = Self::new();
                for item in self.as_slice() {
                    unsafe {
                        out.push_assuming_capacity(item.clone());
                    }
                }

                out
            }
        }
    }

    fn clone_from(&mut self, source: &Self) {
        match (&mut self.storage, &source.storage) {
            // Adopt the source's buffer; the old handle is released after
            // the new reference exists, so sharing with the source already
            // is fine.
            (Storage::Shared(dst), Storage::Shared(src)) => *dst = src.new_ref(),
            // Build the replacement in full before committing it.
            _ => *self = source.clone(),
        }
    }
}

impl<T, const N: usize> Default for CowVector<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, const N: usize> fmt::Debug for CowVector<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_slice().fmt(f)
    }
}

impl<T: PartialEq<T>, const N: usize> PartialEq<CowVector<T, N>> for CowVector<T, N> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, const N: usize> Eq for CowVector<T, N> {}

impl<T: PartialEq<T>, const N: usize> PartialEq<&[T]> for CowVector<T, N> {
    fn eq(&self, other: &&[T]) -> bool {
        self.as_slice() == *other
    }
}

impl<T, const N: usize> AsRef<[T]> for CowVector<T, N> {
    fn as_ref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Clone, const N: usize> AsMut<[T]> for CowVector<T, N> {
    fn as_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Clone, const N: usize> From<&[T]> for CowVector<T, N> {
    fn from(data: &[T]) -> Self {
        Self::from_slice(data)
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a CowVector<T, N> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;
    fn into_iter(self) -> std::slice::Iter<'a, T> {
        self.as_slice().iter()
    }
}

impl<'a, T: Clone, const N: usize> IntoIterator for &'a mut CowVector<T, N> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;
    fn into_iter(self) -> std::slice::IterMut<'a, T> {
        self.iter_mut()
    }
}

impl<T, const N: usize, I> Index<I> for CowVector<T, N>
where
    I: std::slice::SliceIndex<[T]>,
{
    type Output = <I as std::slice::SliceIndex<[T]>>::Output;
    fn index(&self, index: I) -> &Self::Output {
        self.as_slice().index(index)
    }
}

impl<T: Clone, const N: usize, I> IndexMut<I> for CowVector<T, N>
where
    I: std::slice::SliceIndex<[T]>,
{
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        self.as_mut_slice().index_mut(index)
    }
}

impl<T: Clone, const N: usize> Extend<T> for CowVector<T, N> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (min, _) = iter.size_hint();
        self.reserve(min);

        for item in iter {
            self.push(item);
        }
    }
}

impl<T: Clone, const N: usize> FromIterator<T> for CowVector<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut v = Self::new();
        v.extend(iter);

        v
    }
}

fn grow_amortized(len: usize, additional: usize) -> usize {
    let required = len.saturating_add(additional);
    let cap = len.saturating_add(len).max(required).max(8);

    const MAX: usize = isize::MAX as usize;

    if cap > MAX {
        if required <= MAX {
            return required;
        }

        panic!("required allocation size is too large");
    }

    cap
}

// In order to give us a chance to catch leaks and double-frees, test with
// values that implement drop.
#[cfg(test)]
fn num(val: u32) -> Box<u32> {
    Box::new(val)
}

#[cfg(test)]
fn vals<const N: usize>(v: &CowVector<Box<u32>, N>) -> Vec<u32> {
    v.iter().map(|b| **b).collect()
}

#[test]
fn basic() {
    let mut a: CowVector<Box<u32>, 4> = CowVector::new();
    assert!(a.is_empty());
    assert!(a.is_inline());
    assert_eq!(a.capacity(), 4);

    a.push(num(1));
    a.push(num(2));
    a.push(num(3));

    assert_eq!(a.len(), 3);
    assert_eq!(a.as_slice(), &[num(1), num(2), num(3)]);
    assert_eq!(a.first(), Some(&num(1)));
    assert_eq!(a.last(), Some(&num(3)));
    assert_eq!(*a[1], 2);

    assert_eq!(a.pop(), Some(num(3)));
    assert_eq!(a.pop(), Some(num(2)));
    assert_eq!(a.pop(), Some(num(1)));
    assert_eq!(a.pop(), None);
    assert!(a.is_empty());

    let b = CowVector::<Box<u32>, 4>::from_slice(&[num(1), num(2), num(3), num(4), num(5)]);
    assert!(!b.is_inline());
    assert_eq!(vals(&b), [1, 2, 3, 4, 5]);

    let c: CowVector<u32, 2> = [1u32, 2, 3].iter().copied().collect();
    assert_eq!(c, &[1u32, 2, 3][..]);
}

#[test]
fn promotes_when_inline_is_full() {
    let mut a: CowVector<Box<u32>, 4> = CowVector::new();
    for i in 1..=4 {
        a.push(num(i));
    }

    assert!(a.is_inline());
    assert_eq!(a.len(), 4);
    assert_eq!(a.capacity(), 4);

    a.push(num(5));

    assert!(!a.is_inline());
    assert_eq!(a.len(), 5);
    assert_eq!(a.capacity(), 8);
    assert_eq!(vals(&a), [1, 2, 3, 4, 5]);
}

#[test]
fn zero_copy_clone_then_fork() {
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Counted {
        val: u32,
        clones: Rc<Cell<usize>>,
    }

    impl Clone for Counted {
        fn clone(&self) -> Self {
            self.clones.set(self.clones.get() + 1);
            Counted {
                val: self.val,
                clones: self.clones.clone(),
            }
        }
    }

    let clones = Rc::new(Cell::new(0));
    let mut a: CowVector<Counted, 4> = CowVector::with_capacity(8);
    for val in 1..=5 {
        a.push(Counted {
            val,
            clones: clones.clone(),
        });
    }
    assert_eq!(clones.get(), 0);

    let mut b = a.clone();
    // Adopting the buffer copies no elements.
    assert_eq!(clones.get(), 0);
    assert!(a.ptr_eq(&b));
    assert_eq!(a.ref_count(), 2);

    b.push(Counted {
        val: 6,
        clones: clones.clone(),
    });

    // The first mutation forked: one clone per element of b.
    assert_eq!(clones.get(), 5);
    assert!(!a.ptr_eq(&b));
    assert!(a.is_unique());
    assert!(b.is_unique());
    assert_eq!(a.iter().map(|c| c.val).collect::<Vec<_>>(), [1, 2, 3, 4, 5]);
    assert_eq!(b.iter().map(|c| c.val).collect::<Vec<_>>(), [1, 2, 3, 4, 5, 6]);
}

#[test]
fn erase_forks_shared_storage() {
    let mut a = CowVector::<Box<u32>, 4>::from_slice(&[num(1), num(2), num(3), num(4), num(5)]);
    let b = a.clone();
    assert!(a.ptr_eq(&b));

    a.remove_range(1..3);

    assert_eq!(vals(&a), [1, 4, 5]);
    assert_eq!(vals(&b), [1, 2, 3, 4, 5]);
    assert!(!a.ptr_eq(&b));
    assert_eq!(a.capacity(), b.capacity());

    // In-place compaction once the storage is exclusive again.
    let mut c = b.clone();
    drop(b);
    assert!(c.is_unique());
    let cap = c.capacity();
    c.remove_range(0..2);
    assert_eq!(vals(&c), [3, 4, 5]);
    assert_eq!(c.capacity(), cap);

    c.remove_range(1..1);
    assert_eq!(vals(&c), [3, 4, 5]);
}

#[test]
fn shrink_to_fit_demotes_to_inline() {
    let mut a = CowVector::<Box<u32>, 4>::from_slice(&[num(1), num(2), num(3), num(4), num(5)]);
    assert!(!a.is_inline());

    a.remove_range(1..3);
    assert_eq!(a.len(), 3);
    assert!(!a.is_inline());

    a.shrink_to_fit();
    assert!(a.is_inline());
    assert_eq!(a.capacity(), 4);
    assert_eq!(vals(&a), [1, 4, 5]);

    // Exactly-sized reallocation when the contents don't fit inline.
    let mut b = CowVector::<Box<u32>, 4>::with_capacity(16);
    for i in 1..=6 {
        b.push(num(i));
    }
    b.shrink_to_fit();
    assert!(!b.is_inline());
    assert_eq!(b.capacity(), 6);
    assert_eq!(vals(&b), [1, 2, 3, 4, 5, 6]);

    // No-op cases.
    b.shrink_to_fit();
    assert_eq!(b.capacity(), 6);
    let mut c: CowVector<Box<u32>, 4> = CowVector::new();
    c.push(num(1));
    c.shrink_to_fit();
    assert!(c.is_inline());
}

#[test]
fn swap_representation_pairs() {
    let mut a = CowVector::<Box<u32>, 4>::from_slice(&[num(1), num(2)]);
    let mut b = CowVector::<Box<u32>, 4>::from_slice(&[num(10), num(20), num(30), num(40), num(50)]);
    assert!(a.is_inline());
    assert!(!b.is_inline());

    a.swap(&mut b);

    assert_eq!(vals(&a), [10, 20, 30, 40, 50]);
    assert!(!a.is_inline());
    assert_eq!(vals(&b), [1, 2]);
    assert!(b.is_inline());

    // Shared/shared swaps the handles.
    let mut c = a.clone();
    let d = a.clone();
    let mut e = CowVector::<Box<u32>, 4>::from_slice(&[num(7), num(8), num(9), num(10), num(11)]);
    c.swap(&mut e);
    assert_eq!(vals(&c), [7, 8, 9, 10, 11]);
    assert_eq!(vals(&e), [10, 20, 30, 40, 50]);
    assert!(e.ptr_eq(&d));

    // Inline/inline.
    let mut f = CowVector::<Box<u32>, 4>::from_slice(&[num(1)]);
    let mut g = CowVector::<Box<u32>, 4>::from_slice(&[num(2), num(3)]);
    f.swap(&mut g);
    assert_eq!(vals(&f), [2, 3]);
    assert_eq!(vals(&g), [1]);
}

#[test]
fn reserve_rules() {
    // Reserving within the inline capacity is a no-op.
    let mut a: CowVector<Box<u32>, 4> = CowVector::new();
    a.push(num(1));
    a.reserve_capacity(4);
    assert!(a.is_inline());
    assert_eq!(a.capacity(), 4);
    assert_eq!(vals(&a), [1]);

    // Promotion allocates exactly the requested capacity.
    a.reserve_capacity(10);
    assert!(!a.is_inline());
    assert_eq!(a.capacity(), 10);
    assert_eq!(vals(&a), [1]);

    // An already-sufficient exclusive buffer is never shrunk.
    a.reserve_capacity(5);
    assert_eq!(a.capacity(), 10);

    // Reserving below the length is ignored.
    let mut b = CowVector::<Box<u32>, 2>::from_slice(&[num(1), num(2), num(3), num(4), num(5)]);
    b.reserve_capacity(3);
    assert_eq!(b.capacity(), 5);
    assert_eq!(b.len(), 5);

    // A shared buffer is replaced by an exclusive one of the requested size.
    let c = b.clone();
    b.reserve_capacity(8);
    assert!(!b.ptr_eq(&c));
    assert_eq!(b.capacity(), 8);
    assert!(b.is_unique());
    assert_eq!(vals(&b), vals(&c));

    // A request that fits inline demotes shared storage.
    let mut d = CowVector::<Box<u32>, 4>::from_slice(&[num(1), num(2), num(3), num(4), num(5)]);
    d.remove_range(3..5);
    let _d2 = d.clone();
    d.reserve_capacity(3);
    assert!(d.is_inline());
    assert_eq!(vals(&d), [1, 2, 3]);
}

#[test]
fn clear_retains_exclusive_capacity() {
    let mut a = CowVector::<Box<u32>, 2>::from_slice(&[num(1), num(2), num(3), num(4), num(5)]);
    let cap = a.capacity();
    let ptr = a.as_slice().as_ptr();

    a.clear();
    assert!(a.is_empty());
    assert_eq!(a.capacity(), cap);

    // Refilling below the retained capacity does not reallocate.
    for i in 1..=5 {
        a.push(num(i));
    }
    assert_eq!(a.as_slice().as_ptr(), ptr);
    assert_eq!(a.capacity(), cap);

    // Inline storage also keeps its (fixed) capacity.
    let mut b = CowVector::<Box<u32>, 4>::from_slice(&[num(1), num(2)]);
    b.clear();
    assert!(b.is_inline());
    assert!(b.is_empty());
}

#[test]
fn clear_shared_leaves_other_holders_intact() {
    let mut a = CowVector::<Box<u32>, 2>::from_slice(&[num(1), num(2), num(3)]);
    let b = a.clone();
    let cap = a.capacity();

    a.clear();

    assert!(a.is_empty());
    assert_eq!(a.capacity(), cap);
    assert!(a.is_unique());
    assert_eq!(vals(&b), [1, 2, 3]);
    assert!(b.is_unique());
}

#[test]
fn assignment_pairs() {
    let shared_src = CowVector::<Box<u32>, 2>::from_slice(&[num(1), num(2), num(3)]);
    let inline_src = CowVector::<Box<u32>, 2>::from_slice(&[num(7)]);

    // Shared <- Shared adopts the buffer without copying.
    let mut a = CowVector::<Box<u32>, 2>::from_slice(&[num(4), num(5), num(6)]);
    a.clone_from(&shared_src);
    assert!(a.ptr_eq(&shared_src));
    assert_eq!(vals(&a), [1, 2, 3]);

    // Inline <- Shared also adopts (sharing is observably an independent
    // copy; the first mutation forks).
    let mut b = CowVector::<Box<u32>, 2>::from_slice(&[num(9)]);
    assert!(b.is_inline());
    b.clone_from(&shared_src);
    assert!(b.ptr_eq(&shared_src));
    b.push(num(4));
    assert_eq!(vals(&b), [1, 2, 3, 4]);
    assert_eq!(vals(&shared_src), [1, 2, 3]);

    // Shared <- Inline makes an independent inline copy.
    let mut c = CowVector::<Box<u32>, 2>::from_slice(&[num(1), num(2), num(3)]);
    c.clone_from(&inline_src);
    assert!(c.is_inline());
    assert_eq!(vals(&c), [7]);

    // Inline <- Inline copies elements.
    let mut d = CowVector::<Box<u32>, 2>::from_slice(&[num(8)]);
    d.clone_from(&inline_src);
    assert_eq!(vals(&d), [7]);
    assert_eq!(vals(&inline_src), [7]);
}

#[test]
fn pop_forks_shared_storage() {
    let mut a = CowVector::<Box<u32>, 2>::from_slice(&[num(1), num(2), num(3)]);
    let mut b = a.clone();
    let cap = a.capacity();

    assert_eq!(b.pop(), Some(num(3)));

    assert_eq!(vals(&a), [1, 2, 3]);
    assert_eq!(vals(&b), [1, 2]);
    assert_eq!(b.capacity(), cap);
    assert!(a.is_unique());
    assert!(b.is_unique());

    assert_eq!(a.pop(), Some(num(3)));
    assert_eq!(vals(&a), [1, 2]);
}

#[test]
fn remove_forks_shared_storage() {
    let mut a = CowVector::<Box<u32>, 2>::from_slice(&[num(1), num(2), num(3)]);
    let b = a.clone();

    assert_eq!(a.remove(1), num(2));

    assert_eq!(vals(&a), [1, 3]);
    assert_eq!(vals(&b), [1, 2, 3]);

    // In-place removal when exclusive.
    let mut c = CowVector::<Box<u32>, 4>::from_slice(&[num(1), num(2), num(3)]);
    assert_eq!(c.remove(0), num(1));
    assert_eq!(vals(&c), [2, 3]);
}

#[test]
fn insert_shifts_in_place_when_exclusive() {
    let mut a: CowVector<Box<u32>, 4> = CowVector::new();
    a.push(num(1));
    a.push(num(2));
    a.push(num(4));

    a.insert(2, num(3));
    assert!(a.is_inline());
    assert_eq!(vals(&a), [1, 2, 3, 4]);

    a.insert(0, num(0));
    assert!(!a.is_inline());
    assert_eq!(vals(&a), [0, 1, 2, 3, 4]);
    assert_eq!(a.capacity(), 8);

    a.insert(5, num(5));
    assert_eq!(vals(&a), [0, 1, 2, 3, 4, 5]);
}

#[test]
fn mutable_access_forks() {
    let mut a = CowVector::<Box<u32>, 2>::from_slice(&[num(1), num(2), num(3)]);
    let mut b = a.clone();

    *b.as_mut_slice()[0] = 99;

    assert_eq!(vals(&a), [1, 2, 3]);
    assert_eq!(vals(&b), [99, 2, 3]);
    assert!(!a.ptr_eq(&b));

    b[1] = num(88);
    assert_eq!(vals(&b), [99, 88, 3]);

    if let Some(last) = a.last_mut() {
        **last = 33;
    }
    assert_eq!(vals(&a), [1, 2, 33]);

    // Read-only access never forks.
    let c = a.clone();
    let _ = a.as_slice();
    let _ = a.first();
    assert!(a.ptr_eq(&c));
}

#[test]
fn panicking_clone_leaves_vector_unchanged() {
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::rc::Rc;

    #[derive(Debug)]
    struct Fallible {
        val: u32,
        clones_left: Rc<Cell<i32>>,
        live: Rc<Cell<i32>>,
    }

    impl Fallible {
        fn new(val: u32, clones_left: &Rc<Cell<i32>>, live: &Rc<Cell<i32>>) -> Self {
            live.set(live.get() + 1);
            Fallible {
                val,
                clones_left: clones_left.clone(),
                live: live.clone(),
            }
        }
    }

    impl Clone for Fallible {
        fn clone(&self) -> Self {
            if self.clones_left.get() == 0 {
                panic!("clone failure");
            }
            self.clones_left.set(self.clones_left.get() - 1);
            self.live.set(self.live.get() + 1);
            Fallible {
                val: self.val,
                clones_left: self.clones_left.clone(),
                live: self.live.clone(),
            }
        }
    }

    impl Drop for Fallible {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    let clones_left = Rc::new(Cell::new(i32::MAX));
    let live = Rc::new(Cell::new(0));

    let mut a: CowVector<Fallible, 4> = CowVector::new();
    for val in 1..=5 {
        a.push(Fallible::new(val, &clones_left, &live));
    }
    assert_eq!(live.get(), 5);

    let mut b = a.clone();
    assert_eq!(live.get(), 5);

    // The forking push clones two elements, then fails on the third.
    clones_left.set(2);
    let result = catch_unwind(AssertUnwindSafe(|| {
        b.push(Fallible::new(6, &clones_left, &live));
    }));
    assert!(result.is_err());

    // Strong guarantee: b is observably unchanged, everything constructed
    // before the panic was dropped.
    clones_left.set(i32::MAX);
    assert_eq!(live.get(), 5);
    assert_eq!(b.len(), 5);
    assert_eq!(b.iter().map(|f| f.val).collect::<Vec<_>>(), [1, 2, 3, 4, 5]);
    assert!(a.ptr_eq(&b));
    assert_eq!(a.ref_count(), 2);

    drop(a);
    drop(b);
    assert_eq!(live.get(), 0);
}

#[test]
fn extend_and_iterators() {
    let mut a: CowVector<u32, 4> = CowVector::new();
    a.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
    assert_eq!(a, &[1u32, 2, 3, 4, 5, 6][..]);

    a.extend([7, 8]);
    assert_eq!(a.len(), 8);

    for item in &mut a {
        *item += 1;
    }
    let collected: Vec<u32> = (&a).into_iter().copied().collect();
    assert_eq!(collected, [2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn zero_sized_elements() {
    let mut a: CowVector<(), 2> = CowVector::new();
    for _ in 0..5 {
        a.push(());
    }
    assert_eq!(a.len(), 5);
    assert!(!a.is_inline());

    let mut b = a.clone();
    b.pop();
    assert_eq!(b.len(), 4);
    assert_eq!(a.len(), 5);
}

#[test]
fn len_never_exceeds_capacity() {
    let mut a: CowVector<Box<u32>, 4> = CowVector::new();
    for i in 0..100 {
        a.push(num(i));
        assert!(a.len() <= a.capacity());
    }
    a.remove_range(10..60);
    assert!(a.len() <= a.capacity());
    a.shrink_to_fit();
    assert_eq!(a.len(), a.capacity());
}
