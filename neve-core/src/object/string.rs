use {
    super::{ObjRef, ObjectHeader, alloc_object, tag},
    std::{mem::size_of, ptr, slice, str},
};

/// In-memory representation of string objects.
///
/// Strings are UTF-8 and carry a terminating nul
/// so that their data can be handed to foreign code directly.
#[repr(C)]
pub struct Str
{
    pub (crate) header: ObjectHeader,

    /// Number of bytes including the terminating nul.
    pub size: usize,

    /// Number of bytes allocated.
    ///
    /// Equal to `size` for strings in compacted regions.
    pub capacity: usize,

    /// Number of unicode scalar values.
    pub length: usize,

    pub (crate) data: [u8; 0 /* capacity */],
}

/// Byte footprint of a string whose `size` field holds the given value.
pub fn str_size(size: usize) -> usize
{
    size_of::<Str>() + size
}

/// Create a new string object.
pub fn new_string(s: &str) -> ObjRef
{
    let size = s.len() + 1;
    let ptr = alloc_object(str_size(size)).cast::<Str>();

    // SAFETY: The allocation is large enough for header and bytes.
    unsafe {
        let header = ObjectHeader::new(tag::STRING, 0);
        let length = s.chars().count();
        ptr::write(ptr, Str{header, size, capacity: size, length, data: []});

        let dst = (*ptr).data.as_mut_ptr();
        ptr::copy_nonoverlapping(s.as_ptr(), dst, s.len());
        *dst.add(s.len()) = 0;

        ObjRef::from_ptr(ptr.cast())
    }
}

impl Str
{
    /// View the string contents, excluding the terminating nul.
    pub fn as_str(&self) -> &str
    {
        // SAFETY: size - 1 content bytes follow the header.
        let bytes = unsafe {
            slice::from_raw_parts(self.data.as_ptr(), self.size - 1)
        };

        // SAFETY: Strings are always constructed from UTF-8.
        unsafe { str::from_utf8_unchecked(bytes) }
    }

    /// Pointer to the first byte.
    pub fn data_ptr(&mut self) -> *mut u8
    {
        self.data.as_mut_ptr()
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::object::{Kind, dealloc_object, object_byte_size}};

    #[test]
    fn string_round_trip()
    {
        let o = new_string("héllo");

        unsafe {
            assert_eq!(o.kind(), Kind::String);
            let s = &*o.deref::<Str>();
            assert_eq!(s.as_str(), "héllo");
            assert_eq!(s.size, 7);
            assert_eq!(s.length, 5);
            assert_eq!(object_byte_size(o), str_size(7));
            dealloc_object(o);
        }
    }
}
