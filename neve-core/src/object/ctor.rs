use {
    super::{MAX_CTOR_TAG, ObjRef, ObjectHeader, alloc_object},
    std::{mem::size_of, ptr, slice},
};

/// In-memory representation of constructor objects.
///
/// A constructor stores a fixed number of fields.
/// Each field is an [`ObjRef`], so scalars and pointers can mix freely.
/// The field count is stored in [`ObjectHeader::other`].
#[repr(C)]
pub struct Ctor
{
    pub (crate) header: ObjectHeader,
    pub (crate) fields: [ObjRef; 0 /* header.other */],
}

/// Byte footprint of a constructor with the given field count.
pub fn ctor_size(num_fields: usize) -> usize
{
    size_of::<Ctor>() + num_fields * size_of::<ObjRef>()
}

/// Create a new constructor object with the given tag and fields.
pub fn new_ctor(t: u8, fields: &[ObjRef]) -> ObjRef
{
    assert!(t <= MAX_CTOR_TAG, "Not a constructor tag: {}", t);
    assert!(fields.len() <= u8::MAX as usize, "Too many fields");

    let ptr = alloc_object(ctor_size(fields.len())).cast::<Ctor>();

    // SAFETY: The allocation is large enough for header and fields.
    unsafe {
        let header = ObjectHeader::new(t, fields.len() as u8);
        ptr::write(ptr, Ctor{header, fields: []});
        let dst = (*ptr).fields.as_mut_ptr();
        ptr::copy_nonoverlapping(fields.as_ptr(), dst, fields.len());
        ObjRef::from_ptr(ptr.cast())
    }
}

impl Ctor
{
    /// Number of fields.
    pub fn num_fields(&self) -> usize
    {
        self.header.other as usize
    }

    /// Read a field.
    ///
    /// # Safety
    ///
    /// The index must be in bounds.
    pub unsafe fn field(&self, i: usize) -> ObjRef
    {
        debug_assert!(i < self.num_fields());
        *self.fields.as_ptr().add(i)
    }

    /// Overwrite a field.
    ///
    /// # Safety
    ///
    /// The index must be in bounds.
    pub unsafe fn set_field(&mut self, i: usize, value: ObjRef)
    {
        debug_assert!(i < self.num_fields());
        *self.fields.as_mut_ptr().add(i) = value;
    }

    /// View all fields.
    ///
    /// # Safety
    ///
    /// The fields must be initialized
    /// and must not hold region offsets.
    pub unsafe fn fields(&self) -> &[ObjRef]
    {
        slice::from_raw_parts(self.fields.as_ptr(), self.num_fields())
    }
}
