use {
    super::{Compactor, arena::{alloc_buffer, dealloc_buffer}},
    crate::object::{
        Array,
        Bigint,
        Ctor,
        Kind,
        OBJECT_ALIGN,
        ObjRef,
        ObjectHeader,
        Ref,
        ScalarArray,
        Str,
        Terminator,
        Thunk,
        BIGINT_TAIL,
        array_size,
        bigint_drop_value,
        ctor_size,
        ref_size,
        scalar_array_size,
        str_size,
        tag,
        terminator_size,
        thunk_size,
    },
    std::{
        mem::{ManuallyDrop, size_of},
        ptr::{self, NonNull},
        slice,
    },
    thiserror::Error,
};

/// Owned buffer produced by a [`Compactor`],
/// or loaded back verbatim from storage.
///
/// While resident in a region, every reference field of every record
/// holds a byte offset from the start of the buffer.
/// [`read`][`Self::read`] converts the offsets into addresses in one
/// forward pass, after which the objects are used directly in place.
/// All of them are released together when the region is dropped.
pub struct Region
{
    /// The buffer, aligned to [`OBJECT_ALIGN`].
    base: NonNull<u8>,

    /// The number of meaningful bytes in the buffer.
    size: usize,

    /// Offset of the next record to be fixed up.
    next: usize,

    /// Head of the list of big integer objects decoded so far.
    ///
    /// The list is threaded through the tail of each record,
    /// where the serialized digits were before decoding.
    /// The digit storage of these objects must be dropped
    /// before the buffer is released.
    nested_bigints: *mut Bigint,
}

/// Error returned when a region cannot be read.
///
/// A region loaded from storage is untrusted bytes,
/// so a malformed record is reported to the caller
/// rather than treated as an internal fault.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ReadError
{
    #[error("All object graphs in the region have already been read")]
    Exhausted,

    #[error("Record at offset {offset} runs past the end of the region")]
    Truncated { offset: usize },

    #[error("Record at offset {offset} has unsupported tag {tag}")]
    UnsupportedRecord { offset: usize, tag: u8 },

    #[error("Big integer record at offset {offset} is malformed")]
    MalformedBigint { offset: usize },
}

impl Region
{
    /// Create a region holding a copy of a compactor's buffer.
    pub fn from_compactor(compactor: &Compactor) -> Self
    {
        Self::from_bytes(compactor.as_bytes())
    }

    /// Create a region holding a copy of the given bytes.
    ///
    /// This is the path for buffers loaded back from storage.
    /// The copy restores the alignment the records were written with.
    pub fn from_bytes(bytes: &[u8]) -> Self
    {
        let size = bytes.len();
        let base = alloc_buffer(size.max(OBJECT_ALIGN));

        // SAFETY: The buffer holds at least size bytes.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.as_ptr(), size);
        }

        Self{base, size, next: 0, nested_bigints: ptr::null_mut()}
    }

    /// Convert the offsets of the next object graph into addresses
    /// and return the graph's root.
    ///
    /// One call consumes the records up to and including one
    /// terminator; a buffer holding several graphs is read by
    /// calling this once per graph, in writing order.
    /// Once every graph has been read,
    /// further calls return [`ReadError::Exhausted`];
    /// in particular, reading a single-graph region twice
    /// is reported rather than corrupting the objects.
    ///
    /// The returned root, and everything reachable from it,
    /// lives inside the region and dies with it.
    pub fn read(&mut self) -> Result<ObjRef, ReadError>
    {
        if self.next == self.size {
            return Err(ReadError::Exhausted);
        }

        loop {
            let offset = self.next;
            self.ensure(offset, size_of::<ObjectHeader>())?;

            // SAFETY: The record header is in bounds.
            let header_tag = unsafe { (*self.at::<ObjectHeader>(offset)).tag };

            match Kind::from_tag(header_tag) {
                Kind::Ctor(..)    => unsafe { self.fix_ctor(offset)? },
                Kind::Array       => unsafe { self.fix_array(offset)? },
                Kind::ScalarArray => unsafe { self.skip_scalar_array(offset)? },
                Kind::String      => unsafe { self.skip_string(offset)? },
                Kind::Bigint      => unsafe { self.fix_bigint(offset)? },
                Kind::Thunk       => unsafe { self.fix_thunk(offset)? },
                Kind::Ref         => unsafe { self.fix_ref(offset)? },
                // Unassigned tags decode as Reserved too,
                // so only the exact terminator tag may end a graph.
                Kind::Reserved if header_tag == tag::RESERVED =>
                    return unsafe { self.finish(offset) },
                Kind::Task
                | Kind::Closure
                | Kind::External
                | Kind::Reserved  =>
                    return Err(ReadError::UnsupportedRecord{
                        offset,
                        tag: header_tag,
                    }),
            }
        }
    }

    /// The number of bytes in the region.
    pub fn size(&self) -> usize
    {
        self.size
    }

    /// View the raw bytes of the region.
    ///
    /// Before [`read`][`Self::read`] this is exactly
    /// what should be written to storage.
    pub fn as_bytes(&self) -> &[u8]
    {
        // SAFETY: The buffer holds size bytes.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.size) }
    }

    /* ------------------------------ fixups ------------------------------- */

    /// Rebase one reference field onto the buffer.
    ///
    /// Scalars pass through untouched.
    fn fix_obj_ref(&self, o: ObjRef) -> ObjRef
    {
        if o.is_scalar() {
            return o;
        }
        let offset = o.raw();
        debug_assert!(offset < self.size);
        debug_assert_eq!(offset % OBJECT_ALIGN, 0);
        // SAFETY: The offset is in bounds.
        unsafe {
            ObjRef::from_ptr(self.base.as_ptr().add(offset).cast())
        }
    }

    unsafe fn fix_ctor(&mut self, offset: usize) -> Result<(), ReadError>
    {
        let num_fields =
            (*self.at::<ObjectHeader>(offset)).other as usize;
        let size = ctor_size(num_fields);
        self.ensure(offset, size)?;

        let ctor = &mut *self.at::<Ctor>(offset);
        for i in 0 .. num_fields {
            let fixed = self.fix_obj_ref(ctor.field(i));
            ctor.set_field(i, fixed);
        }

        self.advance(size)
    }

    unsafe fn fix_array(&mut self, offset: usize) -> Result<(), ReadError>
    {
        self.ensure(offset, size_of::<Array>())?;
        let arr = &mut *self.at::<Array>(offset);
        let size = array_size(arr.size);
        self.ensure(offset, size)?;

        for i in 0 .. arr.size {
            let fixed = self.fix_obj_ref(arr.elem(i));
            arr.set_elem(i, fixed);
        }

        self.advance(size)
    }

    unsafe fn skip_scalar_array(&mut self, offset: usize)
        -> Result<(), ReadError>
    {
        self.ensure(offset, size_of::<ScalarArray>())?;
        let sa = &*self.at::<ScalarArray>(offset);
        self.advance(scalar_array_size(sa.elem_size(), sa.size))
    }

    unsafe fn skip_string(&mut self, offset: usize) -> Result<(), ReadError>
    {
        self.ensure(offset, size_of::<Str>())?;
        let s = &*self.at::<Str>(offset);
        self.advance(str_size(s.size))
    }

    unsafe fn fix_thunk(&mut self, offset: usize) -> Result<(), ReadError>
    {
        let size = thunk_size();
        self.ensure(offset, size)?;
        let thunk = &mut *self.at::<Thunk>(offset);
        thunk.value = self.fix_obj_ref(thunk.value);
        self.advance(size)
    }

    unsafe fn fix_ref(&mut self, offset: usize) -> Result<(), ReadError>
    {
        let size = ref_size();
        self.ensure(offset, size)?;
        let cell = &mut *self.at::<Ref>(offset);
        cell.value = self.fix_obj_ref(cell.value);
        self.advance(size)
    }

    /// Decode the digits of a big integer record in place.
    unsafe fn fix_bigint(&mut self, offset: usize) -> Result<(), ReadError>
    {
        self.ensure(offset, BIGINT_TAIL)?;
        self.advance(BIGINT_TAIL)?;

        // The nul-terminated decimal digits follow the value slot.
        let tail = self.next;
        let mut len = 0;
        loop {
            self.ensure(tail + len, 1)?;
            if *self.at::<u8>(tail + len) == 0 {
                break;
            }
            len += 1;
        }

        let digits = slice::from_raw_parts(self.at::<u8>(tail), len);
        let value = num_bigint::BigInt::parse_bytes(digits, 10)
            .ok_or(ReadError::MalformedBigint{offset})?;

        let o = self.at::<Bigint>(offset);
        ptr::write(&mut (*o).value, ManuallyDrop::new(value));

        // The digits have served their purpose;
        // their spot now holds the teardown list link.
        *self.at::<*mut Bigint>(tail) = self.nested_bigints;
        self.nested_bigints = o;

        let consumed = (len + 1).max(size_of::<*mut Bigint>());
        self.advance(consumed)
    }

    /// Resolve a terminator record and return the graph root.
    unsafe fn finish(&mut self, offset: usize) -> Result<ObjRef, ReadError>
    {
        let size = terminator_size();
        self.ensure(offset, size)?;
        let root = (*self.at::<Terminator>(offset)).value;
        self.advance(size)?;
        Ok(self.fix_obj_ref(root))
    }

    /* ------------------------------ cursor ------------------------------- */

    /// Check that a span lies within the region.
    fn ensure(&self, offset: usize, size: usize) -> Result<(), ReadError>
    {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(ReadError::Truncated{offset}),
        }
    }

    /// Move the cursor past a record.
    fn advance(&mut self, size: usize) -> Result<(), ReadError>
    {
        let size = size
            .checked_next_multiple_of(OBJECT_ALIGN)
            .ok_or(ReadError::Truncated{offset: self.next})?;
        self.ensure(self.next, size)?;
        self.next += size;
        Ok(())
    }

    /// A pointer into the buffer at the given offset.
    ///
    /// # Safety
    ///
    /// The offset must be within the region
    /// and suitably aligned for `T`.
    unsafe fn at<T>(&self, offset: usize) -> *mut T
    {
        debug_assert!(offset <= self.size);
        self.base.as_ptr().add(offset).cast()
    }
}

impl Drop for Region
{
    fn drop(&mut self)
    {
        unsafe {
            // The decoded big integers own storage outside the
            // buffer; that goes first.
            let mut it = self.nested_bigints;
            while !it.is_null() {
                let link = it.cast::<u8>().add(BIGINT_TAIL)
                    .cast::<*mut Bigint>();
                let next = *link;
                bigint_drop_value(it);
                it = next;
            }

            dealloc_buffer(self.base, self.size.max(OBJECT_ALIGN));
        }
    }
}
