use {
    super::{ObjRef, ObjectHeader, alloc_object, tag},
    std::{mem::size_of, ptr, slice},
};

/* -------------------------------------------------------------------------- */
/*                                    Array                                   */
/* -------------------------------------------------------------------------- */

/// In-memory representation of array objects.
///
/// An array stores a variable number of elements,
/// each of which is an [`ObjRef`].
#[repr(C)]
pub struct Array
{
    pub (crate) header: ObjectHeader,

    /// Number of elements.
    pub size: usize,

    /// Number of element slots allocated.
    ///
    /// Equal to `size` for arrays in compacted regions.
    pub capacity: usize,

    pub (crate) elems: [ObjRef; 0 /* capacity */],
}

/// Byte footprint of an array with the given element count.
pub fn array_size(len: usize) -> usize
{
    size_of::<Array>() + len * size_of::<ObjRef>()
}

/// Create a new array object holding the given elements.
pub fn new_array(elems: &[ObjRef]) -> ObjRef
{
    let ptr = alloc_object(array_size(elems.len())).cast::<Array>();

    // SAFETY: The allocation is large enough for header and elements.
    unsafe {
        let header = ObjectHeader::new(tag::ARRAY, 0);
        let size = elems.len();
        ptr::write(ptr, Array{header, size, capacity: size, elems: []});
        let dst = (*ptr).elems.as_mut_ptr();
        ptr::copy_nonoverlapping(elems.as_ptr(), dst, size);
        ObjRef::from_ptr(ptr.cast())
    }
}

impl Array
{
    /// Read an element.
    ///
    /// # Safety
    ///
    /// The index must be in bounds.
    pub unsafe fn elem(&self, i: usize) -> ObjRef
    {
        debug_assert!(i < self.size);
        *self.elems.as_ptr().add(i)
    }

    /// Overwrite an element.
    ///
    /// # Safety
    ///
    /// The index must be in bounds.
    pub unsafe fn set_elem(&mut self, i: usize, value: ObjRef)
    {
        debug_assert!(i < self.size);
        *self.elems.as_mut_ptr().add(i) = value;
    }

    /// Pointer to the first element slot.
    pub fn elems_ptr(&mut self) -> *mut ObjRef
    {
        self.elems.as_mut_ptr()
    }
}

/* -------------------------------------------------------------------------- */
/*                                ScalarArray                                 */
/* -------------------------------------------------------------------------- */

/// In-memory representation of scalar array objects.
///
/// A scalar array stores fixed-width elements that are never references,
/// so its payload is opaque bytes to everything in this crate.
/// The element size is stored in [`ObjectHeader::other`].
#[repr(C)]
pub struct ScalarArray
{
    pub (crate) header: ObjectHeader,

    /// Number of elements.
    pub size: usize,

    /// Number of element slots allocated.
    pub capacity: usize,

    pub (crate) data: [u8; 0 /* capacity * header.other */],
}

/// Byte footprint of a scalar array.
pub fn scalar_array_size(elem_size: usize, len: usize) -> usize
{
    size_of::<ScalarArray>() + elem_size * len
}

/// Create a new scalar array object from raw element bytes.
///
/// The byte count must be a multiple of the element size.
pub fn new_scalar_array(elem_size: usize, data: &[u8]) -> ObjRef
{
    assert!(elem_size > 0 && elem_size <= u8::MAX as usize);
    assert_eq!(data.len() % elem_size, 0);

    let len = data.len() / elem_size;
    let ptr = alloc_object(scalar_array_size(elem_size, len))
        .cast::<ScalarArray>();

    // SAFETY: The allocation is large enough for header and data.
    unsafe {
        let header = ObjectHeader::new(tag::SCALAR_ARRAY, elem_size as u8);
        let this = ScalarArray{header, size: len, capacity: len, data: []};
        ptr::write(ptr, this);
        let dst = (*ptr).data.as_mut_ptr();
        ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        ObjRef::from_ptr(ptr.cast())
    }
}

impl ScalarArray
{
    /// Element size in bytes.
    pub fn elem_size(&self) -> usize
    {
        self.header.other as usize
    }

    /// View the element bytes.
    pub fn bytes(&self) -> &[u8]
    {
        // SAFETY: size * elem_size bytes follow the header.
        unsafe {
            slice::from_raw_parts(
                self.data.as_ptr(),
                self.size * self.elem_size(),
            )
        }
    }

    /// Pointer to the first element byte.
    pub fn data_ptr(&mut self) -> *mut u8
    {
        self.data.as_mut_ptr()
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::object::{Kind, dealloc_object}};

    #[test]
    fn array_elems_round_trip()
    {
        let a = ObjRef::from_scalar(10);
        let b = ObjRef::from_scalar(20);
        let o = new_array(&[a, b]);

        unsafe {
            assert_eq!(o.kind(), Kind::Array);
            let arr = &*o.deref::<Array>();
            assert_eq!(arr.size, 2);
            assert_eq!(arr.elem(0), a);
            assert_eq!(arr.elem(1), b);
            dealloc_object(o);
        }
    }

    #[test]
    fn scalar_array_bytes_round_trip()
    {
        let o = new_scalar_array(2, &[1, 2, 3, 4, 5, 6]);

        unsafe {
            assert_eq!(o.kind(), Kind::ScalarArray);
            let sa = &*o.deref::<ScalarArray>();
            assert_eq!(sa.size, 3);
            assert_eq!(sa.elem_size(), 2);
            assert_eq!(sa.bytes(), &[1, 2, 3, 4, 5, 6]);
            dealloc_object(o);
        }
    }
}
