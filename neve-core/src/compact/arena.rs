use {
    crate::object::OBJECT_ALIGN,
    std::{
        alloc::{Layout, alloc, dealloc, handle_alloc_error},
        ptr::{self, NonNull},
        slice,
    },
};

/// Initial capacity of an arena.
pub const ARENA_INIT_CAPACITY: usize = 1024 * 1024;

/// Growable, offset-addressed destination buffer.
///
/// The arena is a single contiguous allocation that doubles in
/// capacity when it fills up.
/// Doubling moves the buffer, so the arena never hands out pointers:
/// [`alloc`] returns a byte offset from the start of the buffer,
/// and offsets stay valid across growth.
/// Pointers into the buffer may only be formed transiently,
/// between two allocations.
///
/// Every allocation is object-aligned and zero-initialized.
///
/// [`alloc`]: `Self::alloc`
pub struct Arena
{
    /// The buffer, aligned to [`OBJECT_ALIGN`].
    ptr: NonNull<u8>,

    /// The number of bytes allocated for the buffer.
    capacity: usize,

    /// The offset at which the next allocation takes place.
    ///
    /// Always a multiple of [`OBJECT_ALIGN`].
    len: usize,
}

impl Arena
{
    /// Create an arena with the default initial capacity.
    pub fn new() -> Self
    {
        Self::with_capacity(ARENA_INIT_CAPACITY)
    }

    /// Create an arena with a given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self
    {
        let capacity = capacity.max(OBJECT_ALIGN);
        Self{ptr: alloc_buffer(capacity), capacity, len: 0}
    }

    /// Allocate a zeroed span of bytes and return its offset.
    ///
    /// The requested size is rounded up to a multiple of
    /// [`OBJECT_ALIGN`], so returned offsets are always aligned.
    pub fn alloc(&mut self, size: usize) -> usize
    {
        let size = size
            .checked_next_multiple_of(OBJECT_ALIGN)
            .expect("Cannot allocate a span this large");

        while self.capacity - self.len < size {
            self.grow();
        }

        let offset = self.len;

        // Offsets below len may have been handed back by truncate,
        // so the span must be re-zeroed.
        // SAFETY: The span is in bounds; we just ensured capacity.
        unsafe {
            ptr::write_bytes(self.ptr.as_ptr().add(offset), 0, size);
        }

        self.len = offset + size;
        offset
    }

    /// Rewind the allocation cursor to a previous offset.
    ///
    /// All spans at or past the offset are discarded.
    /// Nothing may reference them anymore.
    pub fn truncate(&mut self, offset: usize)
    {
        debug_assert!(offset <= self.len);
        debug_assert_eq!(offset % OBJECT_ALIGN, 0);
        self.len = offset;
    }

    /// The number of bytes allocated so far.
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// Whether nothing has been allocated yet.
    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// The current address of the buffer.
    ///
    /// Invalidated by the next call to [`alloc`][`Self::alloc`].
    pub fn base(&self) -> *const u8
    {
        self.ptr.as_ptr()
    }

    /// A pointer into the buffer at the given offset.
    ///
    /// Invalidated by the next call to [`alloc`][`Self::alloc`].
    ///
    /// # Safety
    ///
    /// The offset must be within the allocated length,
    /// and suitably aligned for `T`.
    pub unsafe fn at<T>(&self, offset: usize) -> *mut T
    {
        debug_assert!(offset < self.len);
        self.ptr.as_ptr().add(offset).cast()
    }

    /// View a span of allocated bytes.
    pub fn bytes(&self, offset: usize, size: usize) -> &[u8]
    {
        assert!(offset + size <= self.len);
        // SAFETY: The span is in bounds and allocations are zeroed.
        unsafe {
            slice::from_raw_parts(self.ptr.as_ptr().add(offset), size)
        }
    }

    /// Double the capacity of the buffer.
    ///
    /// Allocated bytes keep their offsets; their addresses move.
    fn grow(&mut self)
    {
        let new_capacity = self.capacity
            .checked_mul(2)
            .expect("Cannot grow a buffer this large");

        let new_ptr = alloc_buffer(new_capacity);

        // SAFETY: Both buffers hold at least len bytes.
        unsafe {
            ptr::copy_nonoverlapping(
                self.ptr.as_ptr(),
                new_ptr.as_ptr(),
                self.len,
            );
            dealloc_buffer(self.ptr, self.capacity);
        }

        self.ptr = new_ptr;
        self.capacity = new_capacity;
    }
}

impl Drop for Arena
{
    fn drop(&mut self)
    {
        // SAFETY: ptr and capacity come from alloc_buffer.
        unsafe { dealloc_buffer(self.ptr, self.capacity); }
    }
}

pub (super) fn alloc_buffer(capacity: usize) -> NonNull<u8>
{
    let layout = Layout::from_size_align(capacity, OBJECT_ALIGN)
        .expect("Cannot allocate a buffer this large");

    // SAFETY: capacity is non-zero.
    let ptr = unsafe { alloc(layout) };
    match NonNull::new(ptr) {
        Some(ptr) => ptr,
        None      => handle_alloc_error(layout),
    }
}

pub (super) unsafe fn dealloc_buffer(ptr: NonNull<u8>, capacity: usize)
{
    let layout = Layout::from_size_align_unchecked(capacity, OBJECT_ALIGN);
    dealloc(ptr.as_ptr(), layout);
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::{self as p, proptest}};

    #[test]
    fn growth_preserves_contents()
    {
        let mut arena = Arena::with_capacity(OBJECT_ALIGN);

        let a = arena.alloc(OBJECT_ALIGN);
        // SAFETY: a is an allocated, aligned offset.
        unsafe { *arena.at::<u64>(a) = 0xABCD; }

        // Force several growth steps.
        for _ in 0 .. 10 {
            arena.alloc(3 * OBJECT_ALIGN);
        }

        assert_eq!(arena.bytes(a, 2), &[0xCD, 0xAB]);
    }

    #[test]
    fn truncated_spans_are_rezeroed()
    {
        let mut arena = Arena::new();

        let a = arena.alloc(16);
        // SAFETY: a is an allocated, aligned offset.
        unsafe { *arena.at::<u64>(a) = u64::MAX; }

        arena.truncate(a);
        let b = arena.alloc(16);

        assert_eq!(a, b);
        assert_eq!(arena.bytes(b, 16), &[0; 16]);
    }

    proptest!
    {
        #[test]
        fn offsets_are_aligned_and_monotonic(
            sizes in p::collection::vec(0usize ..= 100, 1 .. 50),
        )
        {
            let mut arena = Arena::with_capacity(64);
            let mut prev = 0;
            for size in sizes {
                let offset = arena.alloc(size);
                assert_eq!(offset % OBJECT_ALIGN, 0);
                assert!(offset >= prev);
                assert!(offset + size <= arena.len());
                prev = offset;
            }
        }
    }
}
